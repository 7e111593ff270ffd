//! Environment constants for the task engine and its command line front end.
//!
//! This module centralizes the fixed messages, exit codes, channel sizes and
//! file names used throughout the crate, making them easier to keep consistent.

/// Task file looked up in the current directory when none is given
pub const DEFAULT_TASK_FILE: &str = "taskflow.toml";

/// Exit status used when the operator interrupts a run
pub const INTERRUPT_EXIT_CODE: i32 = 127;

/// Exit status used when a run fails or collects errors
pub const FAILURE_EXIT_CODE: u8 = 1;

/// Logging filters used by the binary
pub mod logging {
    /// Filter used when no `RUST_LOG` is set
    pub const DEFAULT_FILTER: &str = "taskflow=warn";

    /// Filter used with `--verbose`
    pub const VERBOSE_FILTER: &str = "taskflow=debug";
}

/// User-facing messages produced by the engine itself
pub mod messages {
    /// Error message recorded when the user aborts a prompt
    pub const CANCELLED_PROMPT: &str = "Cancelled prompt.";

    /// Error message used when the host interrupts a run
    pub const INTERRUPTED: &str = "Interrupted.";

    /// Message of the aggregated error appended after a collect-mode run
    pub const FAILED_WITHOUT_CRASHING: &str = "Task failed without crashing.";
}

/// Channel and buffer sizes
pub mod limits {
    /// Capacity of the render notification channel
    pub const BUS_CAPACITY: usize = 256;

    /// Capacity of each task's event channel
    pub const TASK_EVENT_CAPACITY: usize = 128;

    /// Read buffer used when draining chunked byte sources
    pub const READ_CHUNK_SIZE: usize = 8 * 1024;
}
