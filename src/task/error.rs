use crate::env::messages;
use crate::prompt::PromptError;
use std::fmt;
use std::sync::Arc;

/// Failure of a single task.
///
/// Cloneable so the same failure can be reported to the list's accumulator and
/// re-raised to the caller of `run`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    /// Task body failed, or a normalized sub-result failed
    #[error("{0}")]
    Message(String),

    /// A prompt inside the task was cancelled or could not be shown
    #[error("{0}")]
    Prompt(#[from] PromptError),

    /// A chunked byte source signalled an error
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// The host interrupted the run
    #[error("{}", messages::INTERRUPTED)]
    Interrupted,
}

impl TaskError {
    /// Create a plain task failure.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// Whether this failure came from a prompt.
    pub fn is_prompt(&self) -> bool {
        matches!(self, Self::Prompt(_))
    }
}

impl From<std::io::Error> for TaskError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(Arc::new(error))
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(error: anyhow::Error) -> Self {
        Self::Message(error.to_string())
    }
}

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        Self::Message(message)
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        Self::Message(message.to_string())
    }
}

/// Aggregated failure recorded by a task list.
///
/// Holds the underlying task failures together with the run's shared context,
/// so callers can inspect what the tasks had written before things went wrong.
pub struct ListError<Ctx> {
    pub message: String,
    pub errors: Vec<TaskError>,
    pub context: Arc<Ctx>,
}

impl<Ctx> ListError<Ctx> {
    pub fn new(message: impl Into<String>, errors: Vec<TaskError>, context: Arc<Ctx>) -> Self {
        Self {
            message: message.into(),
            errors,
            context,
        }
    }
}

impl<Ctx> Clone for ListError<Ctx> {
    fn clone(&self) -> Self {
        Self {
            message: self.message.clone(),
            errors: self.errors.clone(),
            context: Arc::clone(&self.context),
        }
    }
}

impl<Ctx> fmt::Debug for ListError<Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListError")
            .field("message", &self.message)
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}

impl<Ctx> fmt::Display for ListError<Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl<Ctx> std::error::Error for ListError<Ctx> {}
