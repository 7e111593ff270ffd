//! # Taskflow
//!
//! A task-list execution engine: ordered lists of tasks run against one shared
//! context with bounded concurrency, nested subtasks, skip and enable
//! predicates, interactive prompts and live progress rendering.
//!
//! ## Architecture Overview
//!
//! - **[`task`]**: Task declarations, runtime nodes, the task facade handed to
//!   bodies and the list scheduler
//! - **[`prompt`]**: Prompt gateway binding interactive questions to a task
//! - **[`render`]**: Renderers driven by the notification bus
//! - **[`cli`]**: TOML task files and the `taskflow` command line
//!
//! ## Features
//!
//! ### ⚙️ Scheduling
//! - **Bounded Concurrency**: Serial, unbounded or a fixed pool per list
//! - **Fail-Fast or Collect**: Abort on the first failure, or run everything and
//!   aggregate failures
//! - **Nested Lists**: A task may return a list that runs as its subtasks and
//!   inherits the parent's options
//! - **Dynamic Enablement**: Enable predicates are re-checked before every dispatch
//!
//! ### 🔄 Result Normalization
//! - **Deferred Values**: Futures resolving to any other outcome
//! - **Streams and Readers**: Each item or chunk becomes the task's output
//! - **Prompts**: Interactive questions with cancellation turned into task failure
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use taskflow::task::{Context, ListOptions, TaskList, TaskOutcome, TaskSpec};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let list = TaskList::new(
//!         vec![
//!             TaskSpec::new("Resolve version", |ctx: std::sync::Arc<Context>, _task| {
//!                 ctx.set("version", "1.2.0");
//!                 Ok(TaskOutcome::Done)
//!             }),
//!             TaskSpec::new("Publish", |ctx: std::sync::Arc<Context>, task| {
//!                 task.set_output(format!("publishing {:?}", ctx.get("version")));
//!                 Ok(TaskOutcome::Done)
//!             })
//!             .enabled(|ctx: &Context| ctx.contains("version")),
//!         ],
//!         ListOptions::new().concurrent(false),
//!     );
//!
//!     let ctx = list.run().await?;
//!     println!("{}", ctx.snapshot());
//!     Ok(())
//! }
//! ```

/// Task declarations, nodes and the list scheduler.
///
/// Provides the notification bus, the shared context, result normalization and
/// the fail-fast and collect error modes.
pub mod task;

/// Prompt gateway.
///
/// Asks questions through a pluggable engine and marks the owning task while
/// a prompt is pending or after it was cancelled.
pub mod prompt;

/// Renderers and renderer selection.
pub mod render;

/// Environment constants: exit codes, default file names and messages.
pub mod env;

// CLI module for command-line interface
pub mod cli;

// Re-export main task types
pub use task::{
    Concurrency, Context, ListError, ListOptions, NotificationBus, Skip, TaskError, TaskEvent,
    TaskList, TaskNode, TaskOutcome, TaskSpec, TaskState, TaskWrapper,
};

// Re-export prompt types
pub use prompt::{PromptAnswer, PromptEngine, PromptQuestion, PromptSettings, create_prompt};

// Re-export renderer types
pub use render::{Renderer, RendererKind, RendererOptions};
