//! # Relationship Engine
//!
//! 触达任务的调度核心：
//!
//! - [`RecalculationEngine`]：按运行日期对账模板与学员，创建缺失的任务并推进到期任务
//! - [`TaskLedger`]：任务的读取、状态转换、改期和统计
//! - [`ManualOverrideChannel`]：登记系统外完成的人工触达
//! - [`AuditEmitter`]：只追加的时间线，写入失败不影响主操作

pub mod audit;
pub mod ledger;
pub mod manual;
pub mod recalculation;
pub mod retry;
pub mod scheduler;

pub use audit::AuditEmitter;
pub use ledger::{TaskLedger, TaskSummary, SYSTEM_ACTOR};
pub use manual::{ManualMessage, ManualOverrideChannel};
pub use recalculation::{RecalculationEngine, RecalculationReport, RecalculationRequest, RowError};
pub use retry::RetryPolicy;
pub use scheduler::{RelationshipScheduler, Repositories};
