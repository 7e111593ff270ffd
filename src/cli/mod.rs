//! CLI-specific functionality for the taskflow binary
//!
//! This module contains argument parsing, task file loading and the
//! conversion of file declarations into runnable tasks.

pub mod args;
pub mod config;
pub mod tasks;

pub use args::{Args, ExecutionMode, RunConfig, RunOverrides};
pub use config::{ConfigError, FileOptions, SkipDecl, TaskDecl, TaskFile};
pub use tasks::{build_list, build_task, describe, list_options};
