//! Task declarations, runtime nodes and the list scheduler.

pub mod bus;
pub mod context;
pub mod error;
pub mod list;
pub mod node;
pub mod types;
pub mod wrapper;


pub use bus::NotificationBus;
pub use context::Context;
pub use error::{ListError, TaskError};
pub use list::{Concurrency, ListOptions, TaskList};
pub use node::TaskNode;
pub use types::*;
pub use wrapper::TaskWrapper;
