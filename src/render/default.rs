use crate::render::{RenderContext, Renderer, RendererOptions, SnapshotSource, format_elapsed, spawn_render_loop};
use crate::task::error::TaskError;
use crate::task::types::{TaskSnapshot, TaskState};
use crossterm::cursor::{MoveToColumn, MoveUp};
use crossterm::queue;
use crossterm::terminal::{self, Clear, ClearType};
use std::io::{Stdout, Write};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

const DEFAULT_WIDTH: usize = 80;

/// Task tree redrawn in place on every bus tick.
pub struct DefaultRenderer {
    context: RenderContext,
    screen: Arc<Mutex<Screen>>,
    worker: Option<JoinHandle<()>>,
}

struct Screen {
    out: Stdout,
    drawn_lines: usize,
}

impl DefaultRenderer {
    pub fn new(context: RenderContext) -> Self {
        Self {
            context,
            screen: Arc::new(Mutex::new(Screen {
                out: std::io::stdout(),
                drawn_lines: 0,
            })),
            worker: None,
        }
    }

    fn redraw(screen: &Mutex<Screen>, source: &SnapshotSource, options: &RendererOptions) {
        let mut screen = match screen.lock() {
            Ok(screen) => screen,
            Err(poisoned) => poisoned.into_inner(),
        };
        let width = terminal::size()
            .map(|(columns, _)| columns as usize)
            .unwrap_or(DEFAULT_WIDTH)
            .max(1);
        let lines = render_lines(&source(), options, 0);

        // Terminal write failures only cost a frame
        let _ = screen.draw(&lines, width);
    }
}

impl Screen {
    fn draw(&mut self, lines: &[String], width: usize) -> std::io::Result<()> {
        if self.drawn_lines > 0 {
            queue!(
                self.out,
                MoveUp(self.drawn_lines as u16),
                MoveToColumn(0),
                Clear(ClearType::FromCursorDown)
            )?;
        }

        for line in lines {
            let visible: String = line.chars().take(width).collect();
            writeln!(self.out, "{visible}")?;
        }
        self.drawn_lines = lines.len();
        self.out.flush()
    }
}

impl Renderer for DefaultRenderer {
    fn render(&mut self) {
        if self.worker.is_some() {
            return;
        }

        let screen = Arc::clone(&self.screen);
        let source = Arc::clone(&self.context.snapshot);
        let options = self.context.options.clone();
        self.worker = spawn_render_loop(&self.context.bus, move || {
            Self::redraw(&screen, &source, &options);
        });
    }

    fn end(&mut self, error: Option<&TaskError>) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        Self::redraw(&self.screen, &self.context.snapshot, &self.context.options);

        let mut screen = match self.screen.lock() {
            Ok(screen) => screen,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Keep the final frame; a later run draws below it
        screen.drawn_lines = 0;
        if let Some(TaskError::Interrupted) = error {
            let _ = writeln!(screen.out, "✖ {}", TaskError::Interrupted);
        }
    }
}

fn symbol(task: &TaskSnapshot) -> &'static str {
    match task.state {
        Some(TaskState::Pending) if task.prompt.is_active() => "?",
        Some(TaskState::Pending) => "❯",
        Some(TaskState::Completed) => "✔",
        Some(TaskState::Failed) => "✖",
        Some(TaskState::Skipped) => "↓",
        None => "◼",
    }
}

/// Lines of the task tree, disabled tasks left out.
///
/// Untitled tasks draw nothing themselves; their subtasks appear at their level.
pub(crate) fn render_lines(tasks: &[TaskSnapshot], options: &RendererOptions, level: usize) -> Vec<String> {
    let mut lines = Vec::new();

    for task in tasks.iter().filter(|task| task.is_enabled()) {
        let indent = "  ".repeat(level);

        if let Some(title) = &task.title {
            let mut line = format!("{indent}{} {title}", symbol(task));

            match (task.state, &task.output) {
                (Some(TaskState::Skipped), Some(reason)) if reason != title => {
                    line.push_str(&format!(" [SKIPPED: {reason}]"));
                }
                (Some(TaskState::Completed), _) if options.show_timer => {
                    if let Some(elapsed) = task.elapsed() {
                        line.push_str(&format!(" [{}]", format_elapsed(elapsed)));
                    }
                }
                _ => {}
            }
            lines.push(line);

            let shows_output = match task.state {
                Some(TaskState::Pending) => true,
                Some(TaskState::Completed) => task.options.persistent_output.unwrap_or(false),
                _ => false,
            };
            if let (true, Some(output)) = (shows_output, &task.output) {
                let keep = task.options.bottom_bar.unwrap_or(1).max(1);
                let output_lines: Vec<&str> = output
                    .lines()
                    .filter(|line| !line.trim().is_empty())
                    .collect();
                let start = output_lines.len().saturating_sub(keep);
                for output_line in &output_lines[start..] {
                    lines.push(format!("{indent}  → {output_line}"));
                }
            }
        }

        let expanded = !options.collapse
            || matches!(task.state, Some(TaskState::Pending) | Some(TaskState::Failed));
        if !task.subtasks.is_empty() && expanded {
            let child_level = if task.has_title() { level + 1 } else { level };
            lines.extend(render_lines(&task.subtasks, options, child_level));
        }
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::types::{PromptState, TaskOptions};
    use uuid::Uuid;

    fn task(title: Option<&str>, state: Option<TaskState>, output: Option<&str>) -> TaskSnapshot {
        TaskSnapshot {
            id: Uuid::new_v4(),
            title: title.map(str::to_string),
            state,
            output: output.map(str::to_string),
            enabled: Some(true),
            prompt: PromptState::Idle,
            options: TaskOptions::default(),
            started_at: None,
            finished_at: None,
            subtasks: Vec::new(),
        }
    }

    #[test]
    fn test_pending_task_shows_last_output_line() {
        let tasks = vec![task(Some("Build"), Some(TaskState::Pending), Some("one\ntwo\n"))];
        let lines = render_lines(&tasks, &RendererOptions::default(), 0);
        assert_eq!(lines, vec!["❯ Build".to_string(), "  → two".to_string()]);
    }

    #[test]
    fn test_bottom_bar_keeps_more_lines() {
        let mut build = task(Some("Build"), Some(TaskState::Pending), Some("one\ntwo\nthree"));
        build.options.bottom_bar = Some(2);
        let lines = render_lines(&[build], &RendererOptions::default(), 0);
        assert_eq!(lines[1..], ["  → two".to_string(), "  → three".to_string()]);
    }

    #[test]
    fn test_disabled_tasks_are_hidden() {
        let mut hidden = task(Some("Hidden"), None, None);
        hidden.enabled = Some(false);
        let lines = render_lines(
            &[hidden, task(Some("Shown"), None, None)],
            &RendererOptions::default(),
            0,
        );
        assert_eq!(lines, vec!["◼ Shown".to_string()]);
    }

    #[test]
    fn test_subtasks_collapse_after_completion() {
        let mut parent = task(Some("Group"), Some(TaskState::Completed), None);
        parent.subtasks = vec![task(Some("child"), Some(TaskState::Completed), None)];

        let collapsed = render_lines(&[parent.clone()], &RendererOptions::default(), 0);
        assert_eq!(collapsed, vec!["✔ Group".to_string()]);

        let options = RendererOptions {
            collapse: false,
            ..RendererOptions::default()
        };
        let expanded = render_lines(&[parent], &options, 0);
        assert_eq!(expanded, vec!["✔ Group".to_string(), "  ✔ child".to_string()]);
    }

    #[test]
    fn test_skip_reason_and_untitled_parent() {
        let mut parent = task(None, Some(TaskState::Pending), None);
        parent.subtasks = vec![task(Some("Lint"), Some(TaskState::Skipped), Some("no changes"))];

        let lines = render_lines(&[parent], &RendererOptions::default(), 0);
        assert_eq!(lines, vec!["↓ Lint [SKIPPED: no changes]".to_string()]);
    }
}
