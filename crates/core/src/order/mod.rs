//! Order tasks: one per asset a user previews and buys.

mod store;
mod types;

pub use store::{StoreError, TaskFilter, TaskStore};
pub use types::{NewTask, Task, TaskStatus, TaskUpdate};
