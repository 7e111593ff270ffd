use crate::task::error::TaskError;
use crate::task::list::TaskList;
use crate::task::wrapper::TaskWrapper;
use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncRead;
use uuid::Uuid;

/// Unique identifier for task nodes
pub type TaskId = Uuid;

/// Lifecycle state of a task node.
///
/// A node without a state has not been dispatched yet. `Completed`, `Failed`
/// and `Skipped` are terminal.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Completed,
    Failed,
    Skipped,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Pending)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskState::Pending => "pending",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Skipped => "skipped",
        };
        f.write_str(label)
    }
}

/// Events published by a single task node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    /// Result of an enablement check
    Enabled(bool),
    /// Lifecycle transition
    State(TaskState),
    /// Body returned a nested list with this many tasks
    Subtasks(usize),
    /// New output from the running body
    Data(String),
    /// Title changed
    Title(String),
}

/// Prompt sub-flag of a node, orthogonal to its lifecycle state
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "status", content = "message")]
pub enum PromptState {
    #[default]
    Idle,
    Pending,
    Failed(String),
}

impl PromptState {
    /// Whether a prompt is pending or has failed.
    pub fn is_active(&self) -> bool {
        !matches!(self, PromptState::Idle)
    }
}

/// Result of a skip predicate
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Skip {
    #[default]
    No,
    Yes,
    /// Skip, displaying the given message instead of the title
    Reason(String),
}

impl From<bool> for Skip {
    fn from(skip: bool) -> Self {
        if skip { Skip::Yes } else { Skip::No }
    }
}

/// An empty reason reads as false and does not skip.
impl From<String> for Skip {
    fn from(reason: String) -> Self {
        if reason.is_empty() {
            Skip::No
        } else {
            Skip::Reason(reason)
        }
    }
}

impl From<&str> for Skip {
    fn from(reason: &str) -> Self {
        reason.to_string().into()
    }
}

impl<T: Into<Skip>> From<Option<T>> for Skip {
    fn from(skip: Option<T>) -> Self {
        skip.map_or(Skip::No, Into::into)
    }
}

/// Per-task rendering options
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskOptions {
    /// Keep showing the last output after the task finished
    pub persistent_output: Option<bool>,
    /// Show this many trailing output lines instead of just the last one
    pub bottom_bar: Option<usize>,
}

impl TaskOptions {
    /// Fill unset fields from `defaults`.
    pub fn over(&self, defaults: &TaskOptions) -> TaskOptions {
        TaskOptions {
            persistent_output: self.persistent_output.or(defaults.persistent_output),
            bottom_bar: self.bottom_bar.or(defaults.bottom_bar),
        }
    }
}

/// Point-in-time view of a task node, consumed by renderers
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub title: Option<String>,
    pub state: Option<TaskState>,
    pub output: Option<String>,
    pub enabled: Option<bool>,
    pub prompt: PromptState,
    pub options: TaskOptions,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub subtasks: Vec<TaskSnapshot>,
}

impl TaskSnapshot {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }

    pub fn has_title(&self) -> bool {
        self.title.is_some()
    }

    /// Time spent running, if the task has started.
    pub fn elapsed(&self) -> Option<Duration> {
        let started = self.started_at?;
        let finished = self.finished_at.unwrap_or_else(Utc::now);
        Some(finished.signed_duration_since(started))
    }
}

/// Outcome of a task body.
///
/// Each kind is normalized by the node until a plain success or a failure is
/// reached; see `TaskNode::run`.
pub enum TaskOutcome<Ctx> {
    /// Plain success
    Done,
    /// Plain success carrying a value the engine ignores
    Value(serde_json::Value),
    /// Nested list, run to completion as this task's subtasks
    Subtasks(TaskList<Ctx>),
    /// A prompt is driving this task; nothing further to do
    Prompt,
    /// Value that resolves later, normalized again once resolved
    Deferred(BoxFuture<'static, TaskResult<Ctx>>),
    /// Chunked byte source; each chunk becomes the task output
    Reader(Pin<Box<dyn AsyncRead + Send>>),
    /// Push-based value sequence; each value becomes the task output
    Stream(BoxStream<'static, Result<String, TaskError>>),
}

/// Value returned by a task body
pub type TaskResult<Ctx> = Result<TaskOutcome<Ctx>, TaskError>;

impl<Ctx> TaskOutcome<Ctx> {
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = TaskResult<Ctx>> + Send + 'static,
    {
        TaskOutcome::Deferred(future.boxed())
    }

    pub fn reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        TaskOutcome::Reader(Box::pin(reader))
    }

    /// Wrap a sequence of displayable values.
    pub fn stream<S, T>(stream: S) -> Self
    where
        S: Stream<Item = Result<T, TaskError>> + Send + 'static,
        T: ToString,
    {
        TaskOutcome::Stream(stream.map(|item| item.map(|value| value.to_string())).boxed())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TaskOutcome::Done => "done",
            TaskOutcome::Value(_) => "value",
            TaskOutcome::Subtasks(_) => "subtasks",
            TaskOutcome::Prompt => "prompt",
            TaskOutcome::Deferred(_) => "deferred",
            TaskOutcome::Reader(_) => "reader",
            TaskOutcome::Stream(_) => "stream",
        }
    }
}

impl<Ctx> fmt::Debug for TaskOutcome<Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskOutcome::{}", self.kind())
    }
}

impl<Ctx> From<TaskList<Ctx>> for TaskOutcome<Ctx> {
    fn from(list: TaskList<Ctx>) -> Self {
        TaskOutcome::Subtasks(list)
    }
}

/// Task body
pub type TaskFn<Ctx> = Arc<dyn Fn(Arc<Ctx>, TaskWrapper<Ctx>) -> TaskResult<Ctx> + Send + Sync>;

/// Skip predicate
pub type SkipFn<Ctx> = Arc<dyn Fn(&Ctx) -> Skip + Send + Sync>;

/// Enable predicate, re-evaluated before every dispatch
pub type EnabledFn<Ctx> = Arc<dyn Fn(&Ctx) -> bool + Send + Sync>;

/// Declaration of one unit of work
pub struct TaskSpec<Ctx> {
    pub title: Option<String>,
    pub task: TaskFn<Ctx>,
    pub skip: Option<SkipFn<Ctx>>,
    pub enabled: Option<EnabledFn<Ctx>>,
    pub options: TaskOptions,
}

impl<Ctx: 'static> TaskSpec<Ctx> {
    /// Declare a titled task with a synchronous body.
    pub fn new<F>(title: impl Into<String>, task: F) -> Self
    where
        F: Fn(Arc<Ctx>, TaskWrapper<Ctx>) -> TaskResult<Ctx> + Send + Sync + 'static,
    {
        Self {
            title: Some(title.into()),
            task: Arc::new(task),
            skip: None,
            enabled: None,
            options: TaskOptions::default(),
        }
    }

    /// Declare a task that never displays a title.
    pub fn untitled<F>(task: F) -> Self
    where
        F: Fn(Arc<Ctx>, TaskWrapper<Ctx>) -> TaskResult<Ctx> + Send + Sync + 'static,
    {
        Self {
            title: None,
            ..Self::new(String::new(), task)
        }
    }

    /// Declare a titled task with an async body.
    pub fn from_async<F, Fut>(title: impl Into<String>, task: F) -> Self
    where
        F: Fn(Arc<Ctx>, TaskWrapper<Ctx>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult<Ctx>> + Send + 'static,
    {
        Self::new(title, move |ctx, wrapper| {
            Ok(TaskOutcome::deferred(task(ctx, wrapper)))
        })
    }

    pub fn skip<F, S>(mut self, skip: F) -> Self
    where
        F: Fn(&Ctx) -> S + Send + Sync + 'static,
        S: Into<Skip>,
    {
        self.skip = Some(Arc::new(move |ctx| skip(ctx).into()));
        self
    }

    pub fn enabled<F>(mut self, enabled: F) -> Self
    where
        F: Fn(&Ctx) -> bool + Send + Sync + 'static,
    {
        self.enabled = Some(Arc::new(enabled));
        self
    }

    pub fn options(mut self, options: TaskOptions) -> Self {
        self.options = options;
        self
    }
}

impl<Ctx> Clone for TaskSpec<Ctx> {
    fn clone(&self) -> Self {
        Self {
            title: self.title.clone(),
            task: Arc::clone(&self.task),
            skip: self.skip.clone(),
            enabled: self.enabled.clone(),
            options: self.options.clone(),
        }
    }
}

impl<Ctx> fmt::Debug for TaskSpec<Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("title", &self.title)
            .field("skip", &self.skip.is_some())
            .field("enabled", &self.enabled.is_some())
            .field("options", &self.options)
            .finish()
    }
}
