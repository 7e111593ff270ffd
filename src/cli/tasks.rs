//! Conversion of task file declarations into runnable tasks
//!
//! - `run` tasks execute through the platform shell; each stdout line becomes
//!   the task output and a non-zero exit fails the task with the last stderr line
//! - `prompt` tasks ask one question and store the answer under its name
//! - `tasks` declarations become nested lists

use crate::cli::args::RunOverrides;
use crate::cli::config::{FileOptions, SkipDecl, TaskDecl, TaskFile};
use crate::prompt::{PromptQuestion, PromptSettings};
use crate::task::{
    Context, ListOptions, TaskError, TaskList, TaskOptions, TaskOutcome, TaskResult, TaskSpec,
    TaskWrapper,
};
use futures::Stream;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::debug;

/// Build the top-level list of a task file, CLI overrides applied.
pub fn build_list(file: &TaskFile, overrides: &RunOverrides) -> TaskList<Context> {
    let specs = file.tasks.iter().map(build_task).collect::<Vec<_>>();
    TaskList::new(specs, list_options(&file.options, overrides))
}

/// List options from the file's `[options]`, overridden by CLI flags.
pub fn list_options(options: &FileOptions, overrides: &RunOverrides) -> ListOptions<Context> {
    let mut list = ListOptions::new();
    list.concurrent = overrides.concurrent.or(options.concurrent);
    list.exit_on_error = overrides.exit_on_error.or(options.exit_on_error);
    list.renderer = overrides.renderer.or(options.renderer);
    list.register_signal_listeners = overrides.register_signal_listeners;

    let show_timer = options.show_timer.unwrap_or(false);
    list.renderer_options.show_timer = show_timer;
    list.non_tty_renderer_options.show_timer = show_timer;
    list
}

/// Convert one declaration, nested tasks included.
pub fn build_task(decl: &TaskDecl) -> TaskSpec<Context> {
    let spec = match (&decl.run, &decl.prompt) {
        (Some(command), _) => command_task(decl.title.clone(), command.clone(), decl.capture.clone()),
        (None, Some(question)) => prompt_task(decl.title.clone(), question.clone()),
        (None, None) => group_task(decl),
    };

    let spec = spec.options(TaskOptions {
        persistent_output: decl.persistent_output,
        bottom_bar: decl.bottom_bar,
    });

    let spec = match decl.skip.clone() {
        Some(SkipDecl::Flag(skip)) => spec.skip(move |_ctx: &Context| skip),
        Some(SkipDecl::Reason(reason)) => spec.skip(move |_ctx: &Context| reason.clone()),
        None => spec,
    };

    let enabled = decl.enabled.unwrap_or(true);
    if enabled && decl.requires.is_empty() {
        return spec;
    }
    let requires = decl.requires.clone();
    spec.enabled(move |ctx: &Context| enabled && requires.iter().all(|key| ctx.contains(key)))
}

fn titled<F>(title: Option<String>, body: F) -> TaskSpec<Context>
where
    F: Fn(Arc<Context>, TaskWrapper<Context>) -> TaskResult<Context> + Send + Sync + 'static,
{
    match title {
        Some(title) => TaskSpec::new(title, body),
        None => TaskSpec::untitled(body),
    }
}

fn command_task(title: Option<String>, command: String, capture: Option<String>) -> TaskSpec<Context> {
    titled(title, move |ctx, _task| {
        let run = CommandRun::spawn(&command, capture.clone().map(|key| (key, ctx)))?;
        Ok(TaskOutcome::stream(run.into_stream()))
    })
}

fn prompt_task(title: Option<String>, question: PromptQuestion) -> TaskSpec<Context> {
    titled(title, move |ctx, task| {
        Ok(TaskOutcome::deferred(ask(question.clone(), ctx, task)))
    })
}

async fn ask(question: PromptQuestion, ctx: Arc<Context>, task: TaskWrapper<Context>) -> TaskResult<Context> {
    let name = question.name.clone();
    let answer = task.prompt(question, PromptSettings::default()).await?;
    debug!("Storing answer for '{}'", name);
    ctx.set(name, answer.into_value());
    Ok(TaskOutcome::Done)
}

fn group_task(decl: &TaskDecl) -> TaskSpec<Context> {
    let children = decl.tasks.iter().map(build_task).collect::<Vec<_>>();
    let concurrent = decl.concurrent;
    let exit_on_error = decl.exit_on_error;

    titled(decl.title.clone(), move |_ctx, task| {
        let mut options = ListOptions::new();
        options.concurrent = concurrent;
        options.exit_on_error = exit_on_error;
        Ok(TaskOutcome::Subtasks(task.new_list(children.clone(), options)))
    })
}

/// A spawned shell command whose stdout is consumed line by line
struct CommandRun {
    command: String,
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    stderr: JoinHandle<String>,
    capture: Option<(String, Arc<Context>)>,
    last_line: Option<String>,
}

impl CommandRun {
    fn spawn(command: &str, capture: Option<(String, Arc<Context>)>) -> Result<Self, TaskError> {
        debug!("Spawning: {}", command);

        let mut child = shell(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TaskError::msg("Command stdout was not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| TaskError::msg("Command stderr was not captured"))?;

        let stderr = tokio::spawn(async move {
            let mut collected = String::new();
            let _ = stderr.read_to_string(&mut collected).await;
            collected
        });

        Ok(Self {
            command: command.to_string(),
            child,
            lines: BufReader::new(stdout).lines(),
            stderr,
            capture,
            last_line: None,
        })
    }

    fn into_stream(self) -> impl Stream<Item = Result<String, TaskError>> + Send + 'static {
        futures::stream::unfold(Some(self), |state| async move {
            let Some(mut run) = state else {
                return None;
            };

            match run.lines.next_line().await {
                Ok(Some(line)) => {
                    run.last_line = Some(line.clone());
                    Some((Ok(line), Some(run)))
                }
                Ok(None) => match run.finish().await {
                    Ok(()) => None,
                    Err(error) => Some((Err(error), None)),
                },
                Err(error) => Some((Err(error.into()), None)),
            }
        })
    }

    async fn finish(mut self) -> Result<(), TaskError> {
        let status = self.child.wait().await?;
        let stderr = self.stderr.await.unwrap_or_default();

        if !status.success() {
            return Err(failure(&self.command, status, &stderr));
        }

        if let Some((key, ctx)) = &self.capture {
            let captured = self.last_line.clone().unwrap_or_default();
            debug!("Capturing output of '{}' into '{}'", self.command, key);
            ctx.set(key.clone(), captured);
        }
        Ok(())
    }
}

fn failure(command: &str, status: ExitStatus, stderr: &str) -> TaskError {
    match stderr.lines().rev().find(|line| !line.trim().is_empty()) {
        Some(line) => TaskError::msg(line.trim()),
        None => TaskError::msg(format!("Command '{command}' failed with {status}")),
    }
}

#[cfg(unix)]
fn shell(command: &str) -> Command {
    let mut shell = Command::new("sh");
    shell.arg("-c").arg(command);
    shell
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut shell = Command::new("cmd");
    shell.arg("/C").arg(command);
    shell
}

/// Indented outline of the declared tasks, used by `--dry-run`
pub fn describe(tasks: &[TaskDecl]) -> Vec<String> {
    let mut lines = Vec::new();
    describe_into(tasks, 0, &mut lines);
    lines
}

fn describe_into(tasks: &[TaskDecl], level: usize, lines: &mut Vec<String>) {
    for decl in tasks {
        let indent = "  ".repeat(level);
        let body = match (&decl.run, &decl.prompt) {
            (Some(command), _) => format!("$ {command}"),
            (None, Some(question)) => format!("? {}", question.message),
            (None, None) => match decl.concurrent {
                Some(concurrent) => format!("{} subtasks, {} concurrency", decl.tasks.len(), concurrent),
                None => format!("{} subtasks", decl.tasks.len()),
            },
        };

        let mut line = format!("{indent}- {}: {body}", decl.display_title());
        match &decl.skip {
            Some(SkipDecl::Flag(true)) => line.push_str(" [skip]"),
            Some(SkipDecl::Reason(reason)) => line.push_str(&format!(" [skip: {reason}]")),
            _ => {}
        }
        if !decl.requires.is_empty() {
            line.push_str(&format!(" [requires: {}]", decl.requires.join(", ")));
        }
        lines.push(line);

        describe_into(&decl.tasks, level + 1, lines);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RendererKind;
    use crate::task::{Concurrency, TaskState};

    fn quiet_overrides() -> RunOverrides {
        RunOverrides {
            register_signal_listeners: Some(false),
            ..RunOverrides::default()
        }
    }

    #[test]
    fn test_overrides_win_over_file_options() {
        let file = FileOptions {
            concurrent: Some(Concurrency::Limit(2)),
            exit_on_error: Some(true),
            renderer: None,
            show_timer: Some(true),
        };
        let overrides = RunOverrides {
            exit_on_error: Some(false),
            ..RunOverrides::default()
        };

        let options = list_options(&file, &overrides);

        assert_eq!(options.concurrency(), Concurrency::Limit(2));
        assert!(!options.exits_on_error());
        assert!(options.renderer_options.show_timer);
        assert!(options.registers_signal_listeners());
    }

    #[test]
    fn test_describe_outline() {
        let file = TaskFile::from_toml_str(
            r#"
            [[tasks]]
            title = "Build"
            run = "make"

            [[tasks]]
            title = "Group"
            concurrent = true
            skip = "later"
            tasks = [ { title = "a", run = "echo a", requires = ["target"] } ]
            "#,
        )
        .unwrap();

        assert_eq!(
            describe(&file.tasks),
            vec![
                "- Build: $ make",
                "- Group: 1 subtasks, unbounded concurrency [skip: later]",
                "  - a: $ echo a [requires: target]",
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_output_and_capture() {
        let file = TaskFile::from_toml_str(
            r#"
            [[tasks]]
            title = "Greet"
            run = "echo first; echo second"
            capture = "greeting"
            "#,
        )
        .unwrap();
        let overrides = RunOverrides {
            renderer: Some(RendererKind::Silent),
            ..quiet_overrides()
        };
        let list = build_list(&file, &overrides);
        assert_eq!(list.renderer_kind(), RendererKind::Silent);

        let ctx = list.run().await.unwrap();

        let task = list.tasks()[0].clone();
        assert_eq!(task.state(), Some(TaskState::Completed));
        assert_eq!(task.output().as_deref(), Some("second"));
        assert_eq!(ctx.get("greeting"), Some(serde_json::json!("second")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command_reports_stderr() {
        let decl = TaskDecl {
            title: Some("Broken".to_string()),
            run: Some("echo 'no such target' >&2; exit 3".to_string()),
            ..TaskDecl::default()
        };
        let list = TaskList::new(vec![build_task(&decl)], ListOptions::new().quiet());

        let error = list.run().await.unwrap_err();

        assert_eq!(error.to_string(), "no such target");
        assert_eq!(list.tasks()[0].title().as_deref(), Some("no such target"));
    }

    #[tokio::test]
    async fn test_requires_gates_on_context_keys() {
        let decl = TaskDecl {
            title: Some("Deploy".to_string()),
            run: Some("true".to_string()),
            requires: vec!["target".to_string()],
            ..TaskDecl::default()
        };
        let list = TaskList::new(vec![build_task(&decl)], ListOptions::new().quiet());

        list.run().await.unwrap();

        let task = list.tasks()[0].clone();
        assert_eq!(task.enabled(), Some(false));
        assert_eq!(task.state(), None);
    }

    #[tokio::test]
    async fn test_static_skip() {
        let decl = TaskDecl {
            title: Some("Lint".to_string()),
            run: Some("false".to_string()),
            skip: Some(SkipDecl::Reason("linted upstream".to_string())),
            ..TaskDecl::default()
        };
        let list = TaskList::new(vec![build_task(&decl)], ListOptions::new().quiet());

        list.run().await.unwrap();

        let task = list.tasks()[0].clone();
        assert!(task.is_skipped());
        assert_eq!(task.output().as_deref(), Some("linted upstream"));
    }
}
