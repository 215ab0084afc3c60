pub mod ids;
pub mod task;

pub use ids::{TaskId, UserId};
pub use task::{infer_priority, Priority, TaskStatus};
