//! Task file loading
//!
//! A task file is a TOML document with an optional `[options]` table and a
//! `[[tasks]]` array. Every task declares exactly one body: a shell command
//! (`run`), a question (`prompt`) or a nested list (`tasks`).

use crate::prompt::PromptQuestion;
use crate::render::RendererKind;
use crate::task::Concurrency;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Task file '{path}' not found")]
    NotFound { path: PathBuf },

    #[error("IO error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid task file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Task '{task}' {reason}")]
    InvalidTask { task: String, reason: String },

    #[error("Task file declares no tasks")]
    Empty,
}

/// List-level options of a task file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileOptions {
    pub concurrent: Option<Concurrency>,
    pub exit_on_error: Option<bool>,
    pub renderer: Option<RendererKind>,
    pub show_timer: Option<bool>,
}

/// Static skip declaration: `true`/`false` or a reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SkipDecl {
    Flag(bool),
    Reason(String),
}

/// One task as written in the file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskDecl {
    pub title: Option<String>,
    /// Shell command; stdout lines become the task output
    pub run: Option<String>,
    pub prompt: Option<PromptQuestion>,
    /// Nested list run as this task's subtasks
    pub tasks: Vec<TaskDecl>,
    pub concurrent: Option<Concurrency>,
    pub exit_on_error: Option<bool>,
    /// Context key receiving the last output line of `run`
    pub capture: Option<String>,
    pub skip: Option<SkipDecl>,
    pub enabled: Option<bool>,
    /// Context keys that must be set for the task to be enabled
    pub requires: Vec<String>,
    pub persistent_output: Option<bool>,
    pub bottom_bar: Option<usize>,
}

impl TaskDecl {
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("(untitled)")
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let bodies = [self.run.is_some(), self.prompt.is_some(), !self.tasks.is_empty()]
            .into_iter()
            .filter(|declared| *declared)
            .count();

        let invalid = |reason: &str| ConfigError::InvalidTask {
            task: self.display_title().to_string(),
            reason: reason.to_string(),
        };

        match bodies {
            0 => return Err(invalid("declares none of run, prompt or tasks")),
            1 => {}
            _ => return Err(invalid("declares more than one of run, prompt or tasks")),
        }

        if self.capture.is_some() && self.run.is_none() {
            return Err(invalid("uses capture without a run command"));
        }
        if matches!(&self.run, Some(command) if command.trim().is_empty()) {
            return Err(invalid("has an empty run command"));
        }

        self.tasks.iter().try_for_each(TaskDecl::validate)
    }

    fn count(&self) -> usize {
        1 + self.tasks.iter().map(TaskDecl::count).sum::<usize>()
    }
}

/// Parsed task file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskFile {
    pub options: FileOptions,
    pub tasks: Vec<TaskDecl>,
}

impl TaskFile {
    /// Load and validate a task file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("Loading task file: {:?}", path);

        let content = fs::read_to_string(path).map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => ConfigError::NotFound {
                path: path.to_path_buf(),
            },
            _ => ConfigError::Io {
                path: path.to_path_buf(),
                source,
            },
        })?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: TaskFile = toml::from_str(content)?;
        file.validate()?;
        Ok(file)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tasks.is_empty() {
            return Err(ConfigError::Empty);
        }
        self.tasks.iter().try_for_each(TaskDecl::validate)
    }

    /// Number of declared tasks, nested ones included
    pub fn task_count(&self) -> usize {
        self.tasks.iter().map(TaskDecl::count).sum()
    }
}
