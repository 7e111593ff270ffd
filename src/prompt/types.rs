use crate::task::error::TaskError;
use crate::task::types::PromptState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Typed prompt failure, recorded on the node that asked
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct PromptError {
    pub message: String,
}

impl PromptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure reported by a prompt engine
#[derive(Debug, thiserror::Error)]
pub enum PromptEngineError {
    /// The user aborted input
    #[error("prompt cancelled")]
    Cancelled,

    #[error("invalid answer for '{question}': {reason}")]
    InvalidAnswer { question: String, reason: String },

    #[error("prompt I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Kind of answer a question expects
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    /// Free text
    #[default]
    Input,
    /// Yes or no
    Confirm,
    /// A number
    Number,
    /// One of the question's choices
    Select,
}

/// One question to ask
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PromptQuestion {
    pub name: String,
    pub message: String,
    #[serde(default)]
    pub kind: QuestionKind,
    /// Options offered by a select question
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
    /// Answer used when the user enters nothing
    #[serde(default)]
    pub initial: Option<Value>,
}

impl PromptQuestion {
    pub fn input(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            kind: QuestionKind::Input,
            choices: Vec::new(),
            initial: None,
        }
    }

    pub fn confirm(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: QuestionKind::Confirm,
            ..Self::input(name, message)
        }
    }

    pub fn number(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: QuestionKind::Number,
            ..Self::input(name, message)
        }
    }

    pub fn select(
        name: impl Into<String>,
        message: impl Into<String>,
        choices: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            kind: QuestionKind::Select,
            choices: choices.into_iter().map(Into::into).collect(),
            ..Self::input(name, message)
        }
    }

    pub fn with_initial(mut self, initial: impl Into<Value>) -> Self {
        self.initial = Some(initial.into());
        self
    }
}

impl From<PromptQuestion> for Vec<PromptQuestion> {
    fn from(question: PromptQuestion) -> Self {
        vec![question]
    }
}

/// Answers to a prompt
#[derive(Debug, Clone, PartialEq)]
pub enum PromptAnswer {
    /// Answer to the only question asked
    Single(Value),
    /// Answers keyed by question name
    Map(HashMap<String, Value>),
}

impl PromptAnswer {
    /// Collapse into one JSON value.
    pub fn into_value(self) -> Value {
        match self {
            PromptAnswer::Single(value) => value,
            PromptAnswer::Map(answers) => Value::Object(answers.into_iter().collect()),
        }
    }

    pub fn as_single(&self) -> Option<&Value> {
        match self {
            PromptAnswer::Single(value) => Some(value),
            PromptAnswer::Map(_) => None,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        match self {
            PromptAnswer::Single(_) => None,
            PromptAnswer::Map(answers) => answers.get(name),
        }
    }
}

/// Shared output the prompt writes its questions to
pub type PromptWriter = Arc<Mutex<dyn Write + Send>>;

/// Questions plus the stream to render them on
pub struct PromptRequest {
    pub questions: Vec<PromptQuestion>,
    pub output: PromptWriter,
}

impl fmt::Debug for PromptRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptRequest")
            .field("questions", &self.questions)
            .finish_non_exhaustive()
    }
}

/// Engine that actually interacts with the user; injectable for tests
#[async_trait]
pub trait PromptEngine: Send + Sync {
    async fn prompt(
        &self,
        request: PromptRequest,
    ) -> Result<HashMap<String, Value>, PromptEngineError>;
}

/// Callback run when the user cancels; its error is returned to the body
pub type CancelCallback = Arc<dyn Fn() -> TaskError + Send + Sync>;

/// Prompt settings
#[derive(Clone, Default)]
pub struct PromptSettings {
    /// Replaces the default cancellation handling
    pub cancel_callback: Option<CancelCallback>,
    /// Where questions are written, stderr by default
    pub output: Option<PromptWriter>,
    /// On cancel, fail with a plain error instead of recording a prompt failure
    pub error: bool,
    /// Engine to use instead of the terminal
    pub engine: Option<Arc<dyn PromptEngine>>,
}

impl PromptSettings {
    pub fn with_engine(mut self, engine: Arc<dyn PromptEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_output(mut self, output: PromptWriter) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_cancel_callback(mut self, callback: CancelCallback) -> Self {
        self.cancel_callback = Some(callback);
        self
    }

    pub fn throw_on_cancel(mut self) -> Self {
        self.error = true;
        self
    }
}

impl fmt::Debug for PromptSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptSettings")
            .field("cancel_callback", &self.cancel_callback.is_some())
            .field("output", &self.output.is_some())
            .field("error", &self.error)
            .field("engine", &self.engine.is_some())
            .finish()
    }
}

/// Owner of a prompt's pending/failed flag
pub trait PromptHost: Send + Sync {
    fn set_prompt_state(&self, state: PromptState);
}
