//! # Relationship Testing Utils
//!
//! 各 crate 共用的测试工具：
//!
//! - **内存仓储**：学员、模板、任务、时间线的内存实现，任务仓储复现唯一索引语义
//! - **故障注入**：始终失败的时间线仓储、可注入存储故障与延迟的任务仓储
//! - **数据构造器**：学员、模板、任务
//!
//! ```toml
//! [dev-dependencies]
//! relationship-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
