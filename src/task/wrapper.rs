use crate::prompt::{self, PromptAnswer, PromptQuestion, PromptSettings};
use crate::task::error::TaskError;
use crate::task::list::{ListOptions, TaskList};
use crate::task::node::TaskNode;
use crate::task::types::{PromptState, TaskId, TaskSpec};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Run-local accumulator of reported task failures
pub(crate) type ErrorSink = Arc<Mutex<Vec<TaskError>>>;

/// Handle given to a running task body.
///
/// Exposes title/output mutation, error reporting and prompts for the one node
/// it is bound to. It carries no scheduling authority over sibling tasks.
pub struct TaskWrapper<Ctx> {
    task: Arc<TaskNode<Ctx>>,
    errors: ErrorSink,
    options: Arc<ListOptions<Ctx>>,
}

impl<Ctx> Clone for TaskWrapper<Ctx> {
    fn clone(&self) -> Self {
        Self {
            task: Arc::clone(&self.task),
            errors: Arc::clone(&self.errors),
            options: Arc::clone(&self.options),
        }
    }
}

impl<Ctx: Send + Sync + 'static> TaskWrapper<Ctx> {
    pub(crate) fn new(
        task: Arc<TaskNode<Ctx>>,
        errors: ErrorSink,
        options: Arc<ListOptions<Ctx>>,
    ) -> Self {
        Self {
            task,
            errors,
            options,
        }
    }

    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    pub fn title(&self) -> Option<String> {
        self.task.title()
    }

    pub fn set_title(&self, title: impl Into<String>) {
        self.task.set_title(title);
    }

    pub fn output(&self) -> Option<String> {
        self.task.output()
    }

    pub fn set_output(&self, output: impl Into<String>) {
        self.task.set_output(output);
    }

    /// Record a failure in the owning list without failing this task.
    pub fn report(&self, error: impl Into<TaskError>) {
        let error = error.into();
        debug!("Task {} reported: {}", self.task.id(), error);
        match self.errors.lock() {
            Ok(mut errors) => errors.push(error),
            Err(poisoned) => poisoned.into_inner().push(error),
        }
    }

    /// Mark the running task skipped, optionally with a message shown in place
    /// of the title. The body keeps running; its result no longer completes the task.
    pub fn skip(&self, message: Option<&str>) {
        self.task.skip(message.map(str::to_string));
    }

    /// Ask the user one or more questions.
    ///
    /// A single question yields [`PromptAnswer::Single`], several yield a map
    /// keyed by question name.
    pub async fn prompt(
        &self,
        questions: impl Into<Vec<PromptQuestion>>,
        settings: PromptSettings,
    ) -> Result<PromptAnswer, TaskError> {
        prompt::create_prompt(questions.into(), settings, Some(self.task.as_ref())).await
    }

    pub fn prompt_state(&self) -> PromptState {
        self.task.prompt_state()
    }

    pub fn is_prompt_pending(&self) -> bool {
        self.task.prompt_state() == PromptState::Pending
    }

    /// Build a nested list, to be returned as this task's outcome.
    pub fn new_list(
        &self,
        tasks: impl IntoIterator<Item = TaskSpec<Ctx>>,
        options: ListOptions<Ctx>,
    ) -> TaskList<Ctx> {
        TaskList::new(tasks, options)
    }

    pub(crate) fn exit_on_error(&self) -> bool {
        self.options.exits_on_error()
    }

    pub(crate) fn list_options(&self) -> &ListOptions<Ctx> {
        &self.options
    }
}
