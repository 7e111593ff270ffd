use crate::env::limits::{READ_CHUNK_SIZE, TASK_EVENT_CAPACITY};
use crate::prompt::PromptHost;
use crate::task::bus::NotificationBus;
use crate::task::error::TaskError;
use crate::task::list::TaskList;
use crate::task::types::*;
use crate::task::wrapper::TaskWrapper;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::broadcast;
use tracing::debug;

/// Runtime instance of one task declaration.
///
/// Nodes are created once by their list and live for the whole run. Every
/// mutation of state, title or output publishes to the node's event channel and
/// ticks the notification bus.
pub struct TaskNode<Ctx> {
    id: TaskId,
    spec: TaskSpec<Ctx>,
    options: TaskOptions,
    fields: RwLock<NodeFields<Ctx>>,
    events: broadcast::Sender<TaskEvent>,
    bus: NotificationBus,
    finished: AtomicBool,
}

struct NodeFields<Ctx> {
    title: Option<String>,
    state: Option<TaskState>,
    output: Option<String>,
    enabled: Option<bool>,
    prompt: PromptState,
    subtasks: Vec<Arc<TaskNode<Ctx>>>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl<Ctx: Send + Sync + 'static> TaskNode<Ctx> {
    pub(crate) fn new(spec: TaskSpec<Ctx>, defaults: &TaskOptions, bus: NotificationBus) -> Self {
        let (events, _) = broadcast::channel(TASK_EVENT_CAPACITY);
        let options = spec.options.over(defaults);

        Self {
            id: TaskId::new_v4(),
            fields: RwLock::new(NodeFields {
                title: spec.title.clone(),
                state: None,
                output: None,
                enabled: None,
                prompt: PromptState::Idle,
                subtasks: Vec::new(),
                started_at: None,
                finished_at: None,
            }),
            spec,
            options,
            events,
            bus,
            finished: AtomicBool::new(false),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, NodeFields<Ctx>> {
        match self.fields.read() {
            Ok(fields) => fields,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, NodeFields<Ctx>> {
        match self.fields.write() {
            Ok(fields) => fields,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn emit(&self, event: TaskEvent) {
        if self.is_finished() {
            return;
        }
        let _ = self.events.send(event);
        self.bus.publish();
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn title(&self) -> Option<String> {
        self.read().title.clone()
    }

    pub fn has_title(&self) -> bool {
        self.read().title.is_some()
    }

    pub fn state(&self) -> Option<TaskState> {
        self.read().state
    }

    pub fn output(&self) -> Option<String> {
        self.read().output.clone()
    }

    /// Cached result of the last enablement check, `None` if never checked.
    pub fn enabled(&self) -> Option<bool> {
        self.read().enabled
    }

    /// Not-yet-checked reads as disabled.
    pub fn is_enabled(&self) -> bool {
        self.read().enabled.unwrap_or(false)
    }

    pub fn is_pending(&self) -> bool {
        self.state() == Some(TaskState::Pending)
    }

    pub fn is_completed(&self) -> bool {
        self.state() == Some(TaskState::Completed)
    }

    pub fn is_skipped(&self) -> bool {
        self.state() == Some(TaskState::Skipped)
    }

    pub fn has_failed(&self) -> bool {
        self.state() == Some(TaskState::Failed)
    }

    pub fn has_subtasks(&self) -> bool {
        !self.read().subtasks.is_empty()
    }

    pub fn subtasks(&self) -> Vec<Arc<TaskNode<Ctx>>> {
        self.read().subtasks.clone()
    }

    pub fn prompt_state(&self) -> PromptState {
        self.read().prompt.clone()
    }

    pub fn is_prompt(&self) -> bool {
        self.read().prompt.is_active()
    }

    pub fn options(&self) -> &TaskOptions {
        &self.options
    }

    /// Whether the node has settled and stopped publishing events.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Subscribe to this node's events.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let fields = self.read();
        TaskSnapshot {
            id: self.id,
            title: fields.title.clone(),
            state: fields.state,
            output: fields.output.clone(),
            enabled: fields.enabled,
            prompt: fields.prompt.clone(),
            options: self.options.clone(),
            started_at: fields.started_at,
            finished_at: fields.finished_at,
            subtasks: fields.subtasks.iter().map(|task| task.snapshot()).collect(),
        }
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        {
            let mut fields = self.write();
            fields.state = Some(state);
            let now = Utc::now();
            if state == TaskState::Pending {
                fields.started_at = Some(now);
            } else {
                fields.finished_at = Some(now);
            }
        }
        debug!("Task {} is now {}", self.id, state);
        self.emit(TaskEvent::State(state));
    }

    pub(crate) fn set_title(&self, title: impl Into<String>) {
        let title = title.into();
        self.write().title = Some(title.clone());
        self.emit(TaskEvent::Title(title));
    }

    pub(crate) fn set_output(&self, output: impl Into<String>) {
        let output = output.into();
        self.write().output = Some(output.clone());
        self.emit(TaskEvent::Data(output));
    }

    fn set_subtasks(&self, subtasks: Vec<Arc<TaskNode<Ctx>>>) {
        let count = subtasks.len();
        self.write().subtasks = subtasks;
        self.emit(TaskEvent::Subtasks(count));
    }

    /// Evaluate the enable predicate, only while the node has no state yet.
    pub(crate) fn check(&self, ctx: &Ctx) {
        if self.state().is_some() {
            return;
        }

        let enabled = self.spec.enabled.as_ref().is_none_or(|enabled| enabled(ctx));
        self.write().enabled = Some(enabled);
        self.emit(TaskEvent::Enabled(enabled));
    }

    /// Stop publishing; no further events are expected from this node.
    fn complete(&self) {
        self.finished.store(true, Ordering::Release);
        // Final tick so the renderer observes the settled node
        self.bus.publish();
    }

    /// Force a pending node, and pending subtasks, into `Failed`.
    pub(crate) fn interrupt(&self) {
        if self.is_pending() {
            self.set_state(TaskState::Failed);
        }
        for subtask in self.subtasks() {
            subtask.interrupt();
        }
    }

    /// Mark a running node skipped, optionally replacing its output.
    pub(crate) fn skip(&self, message: Option<String>) {
        if let Some(message) = message {
            self.write().output = Some(message);
        }
        self.set_state(TaskState::Skipped);
    }

    /// Execute the task body and drive the node to a terminal state.
    ///
    /// Returns an error only when the owning list runs in fail-fast mode; in
    /// collect mode the failure is reported through the wrapper and swallowed.
    pub(crate) async fn run(
        self: &Arc<Self>,
        ctx: Arc<Ctx>,
        wrapper: TaskWrapper<Ctx>,
    ) -> Result<(), TaskError> {
        self.set_state(TaskState::Pending);

        let skip = match &self.spec.skip {
            Some(skip) => skip(&ctx),
            None => Skip::No,
        };
        match skip {
            Skip::No => {}
            Skip::Reason(ref reason) if reason.is_empty() => {}
            Skip::Yes | Skip::Reason(_) => {
                let output = match skip {
                    Skip::Reason(reason) => Some(reason),
                    _ => self.title(),
                };
                if let Some(output) = output {
                    self.write().output = Some(output);
                }
                self.set_state(TaskState::Skipped);
                self.complete();
                return Ok(());
            }
        }

        let result = match (self.spec.task)(Arc::clone(&ctx), wrapper.clone()) {
            Ok(outcome) => self.normalize(outcome, &ctx, &wrapper).await,
            Err(error) => Err(error),
        };

        let result = match result {
            Ok(()) => {
                // A body may have skipped itself through the wrapper
                if self.is_pending() {
                    self.set_state(TaskState::Completed);
                }
                Ok(())
            }
            Err(error) => self.fail(error, &wrapper),
        };

        self.complete();
        result
    }

    fn fail(&self, error: TaskError, wrapper: &TaskWrapper<Ctx>) -> Result<(), TaskError> {
        self.set_state(TaskState::Failed);

        let error = match self.prompt_state() {
            PromptState::Failed(message) => TaskError::Message(message),
            _ => error,
        };

        // With subtasks the failure is already visible on the failing child
        if !self.has_subtasks() {
            self.set_title(error.to_string());
        }

        debug!("Task {} failed: {}", self.id, error);
        wrapper.report(error.clone());

        if wrapper.exit_on_error() {
            Err(error)
        } else {
            Ok(())
        }
    }

    fn normalize<'a>(
        self: &'a Arc<Self>,
        outcome: TaskOutcome<Ctx>,
        ctx: &'a Arc<Ctx>,
        wrapper: &'a TaskWrapper<Ctx>,
    ) -> BoxFuture<'a, Result<(), TaskError>> {
        async move {
            debug!("Task {} returned {}", self.id, outcome.kind());
            match outcome {
                TaskOutcome::Subtasks(list) => self.run_subtasks(list, ctx, wrapper).await,
                TaskOutcome::Prompt => Ok(()),
                TaskOutcome::Deferred(future) => {
                    let resolved = future.await?;
                    self.normalize(resolved, ctx, wrapper).await
                }
                TaskOutcome::Reader(reader) => self.drain_reader(reader).await,
                TaskOutcome::Stream(stream) => self.drain_stream(stream).await,
                TaskOutcome::Done | TaskOutcome::Value(_) => Ok(()),
            }
        }
        .boxed()
    }

    async fn run_subtasks(
        &self,
        list: TaskList<Ctx>,
        ctx: &Arc<Ctx>,
        wrapper: &TaskWrapper<Ctx>,
    ) -> Result<(), TaskError> {
        list.adopt(wrapper.list_options(), &self.bus);
        self.set_subtasks(list.tasks());

        let recorded = list.errors().len();
        list.run_with(Arc::clone(ctx)).await?;

        // A nested list that settled without raising still hands its collected
        // failures up, so they reach the top-level accumulator
        for aggregated in list.errors().into_iter().skip(recorded) {
            for error in aggregated.errors {
                wrapper.report(error);
            }
        }
        Ok(())
    }

    async fn drain_reader(
        &self,
        mut reader: Pin<Box<dyn AsyncRead + Send>>,
    ) -> Result<(), TaskError> {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        loop {
            let read = reader.read(&mut buf).await?;
            if read == 0 {
                return Ok(());
            }
            self.set_output(String::from_utf8_lossy(&buf[..read]).into_owned());
        }
    }

    async fn drain_stream(
        &self,
        mut stream: BoxStream<'static, Result<String, TaskError>>,
    ) -> Result<(), TaskError> {
        while let Some(item) = stream.next().await {
            self.set_output(item?);
        }
        Ok(())
    }
}

impl<Ctx: Send + Sync + 'static> PromptHost for TaskNode<Ctx> {
    fn set_prompt_state(&self, state: PromptState) {
        self.write().prompt = state;
        self.bus.publish();
    }
}

impl<Ctx> std::fmt::Debug for TaskNode<Ctx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskNode")
            .field("id", &self.id)
            .field("title", &self.spec.title)
            .finish_non_exhaustive()
    }
}
