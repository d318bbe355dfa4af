pub mod anchors;
pub mod entities;
pub mod lifecycle;
pub mod repositories;
pub mod schedule;
pub mod value_objects;

// SQLx 实现（仅在启用 sqlx-support feature 时编译）
#[cfg(feature = "sqlx-support")]
pub mod sqlx_impls;

pub use anchors::*;
pub use entities::*;
pub use lifecycle::TransitionFields;
pub use repositories::*;
pub use relationship_errors::{SchedulerError, SchedulerResult};
pub use schedule::*;
pub use value_objects::*;
