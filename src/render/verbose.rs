use crate::render::{RenderContext, Renderer, RendererOptions, SnapshotSource, format_elapsed, spawn_render_loop};
use crate::task::error::TaskError;
use crate::task::types::{TaskId, TaskSnapshot, TaskState};
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Line-per-change renderer for logs, CI and other non-terminal output.
///
/// Each bus tick diffs fresh snapshots against what was last printed, so
/// coalesced ticks only merge consecutive outputs of the same task.
pub struct VerboseRenderer {
    context: RenderContext,
    log: Arc<Mutex<ChangeLog>>,
    worker: Option<JoinHandle<()>>,
}

struct ChangeLog {
    seen: HashMap<TaskId, Seen>,
    out: Box<dyn Write + Send>,
}

#[derive(Default)]
struct Seen {
    state: Option<TaskState>,
    title: Option<String>,
    output: Option<String>,
}

impl VerboseRenderer {
    pub fn new(context: RenderContext) -> Self {
        Self::with_writer(context, Box::new(std::io::stdout()))
    }

    pub fn with_writer(context: RenderContext, out: Box<dyn Write + Send>) -> Self {
        Self {
            context,
            log: Arc::new(Mutex::new(ChangeLog {
                seen: HashMap::new(),
                out,
            })),
            worker: None,
        }
    }

    fn flush_changes(log: &Mutex<ChangeLog>, source: &SnapshotSource, options: &RendererOptions) {
        let mut log = match log.lock() {
            Ok(log) => log,
            Err(poisoned) => poisoned.into_inner(),
        };
        let tasks = source();
        log.record(&tasks, options);
        let _ = log.out.flush();
    }
}

impl ChangeLog {
    fn record(&mut self, tasks: &[TaskSnapshot], options: &RendererOptions) {
        for task in tasks {
            let mut lines = Vec::new();
            let seen = self.seen.entry(task.id).or_default();
            let state_changed = task.state != seen.state;

            if let Some(title) = &task.title {
                let failed_now = state_changed && task.state == Some(TaskState::Failed);
                if seen.title.is_some() && seen.title != task.title && !failed_now {
                    lines.push(format!("[TITLE] {title}"));
                }

                if state_changed {
                    match task.state {
                        Some(TaskState::Pending) => lines.push(format!("[STARTED] {title}")),
                        Some(TaskState::Completed) => {
                            let timer = match task.elapsed() {
                                Some(elapsed) if options.show_timer => {
                                    format!(" ({})", format_elapsed(elapsed))
                                }
                                _ => String::new(),
                            };
                            lines.push(format!("[COMPLETED] {title}{timer}"));
                        }
                        Some(TaskState::Failed) => lines.push(format!("[FAILED] {title}")),
                        Some(TaskState::Skipped) => {
                            let reason = task.output.as_deref().unwrap_or(title);
                            lines.push(format!("[SKIPPED] {reason}"));
                        }
                        None => {}
                    }
                }
            }

            if task.output != seen.output && task.state != Some(TaskState::Skipped) {
                if let Some(output) = &task.output {
                    lines.extend(
                        output
                            .lines()
                            .filter(|line| !line.trim().is_empty())
                            .map(|line| format!("[DATA] {line}")),
                    );
                }
            }

            seen.state = task.state;
            seen.title = task.title.clone();
            seen.output = task.output.clone();

            for line in lines {
                let _ = writeln!(self.out, "{line}");
            }

            self.record(&task.subtasks, options);
        }
    }
}

impl Renderer for VerboseRenderer {
    fn render(&mut self) {
        if self.worker.is_some() {
            return;
        }

        let log = Arc::clone(&self.log);
        let source = Arc::clone(&self.context.snapshot);
        let options = self.context.options.clone();
        self.worker = spawn_render_loop(&self.context.bus, move || {
            Self::flush_changes(&log, &source, &options);
        });
    }

    fn end(&mut self, error: Option<&TaskError>) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        Self::flush_changes(&self.log, &self.context.snapshot, &self.context.options);

        if let Some(TaskError::Interrupted) = error {
            let mut log = match self.log.lock() {
                Ok(log) => log,
                Err(poisoned) => poisoned.into_inner(),
            };
            let _ = writeln!(log.out, "[FAILED] {}", TaskError::Interrupted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::bus::NotificationBus;
    use crate::task::types::{PromptState, TaskOptions};
    use uuid::Uuid;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn snapshot(id: Uuid, title: &str, state: Option<TaskState>, output: Option<&str>) -> TaskSnapshot {
        TaskSnapshot {
            id,
            title: Some(title.to_string()),
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
    fn test_logs_each_change_once() {
        let id = Uuid::new_v4();
        let frames = Arc::new(Mutex::new(vec![
            vec![snapshot(id, "Build", Some(TaskState::Pending), None)],
            vec![snapshot(id, "Build", Some(TaskState::Pending), Some("compiling"))],
            vec![snapshot(id, "Build", Some(TaskState::Completed), Some("compiling"))],
        ]));
        let current = Arc::new(Mutex::new(Vec::new()));

        let source_frame = Arc::clone(&current);
        let source: SnapshotSource = Arc::new(move || source_frame.lock().unwrap().clone());
        let buffer = SharedBuffer::default();
        let mut renderer = VerboseRenderer::with_writer(
            RenderContext {
                snapshot: source,
                options: RendererOptions::default(),
                bus: NotificationBus::new(),
            },
            Box::new(buffer.clone()),
        );

        for frame in frames.lock().unwrap().drain(..) {
            *current.lock().unwrap() = frame;
            VerboseRenderer::flush_changes(&renderer.log, &renderer.context.snapshot, &renderer.context.options);
        }
        renderer.end(None);

        let written = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert_eq!(
            written,
            "[STARTED] Build\n[DATA] compiling\n[COMPLETED] Build\n"
        );
    }

    #[test]
    fn test_failed_title_is_not_logged_as_rename() {
        let id = Uuid::new_v4();
        let current = Arc::new(Mutex::new(vec![snapshot(id, "Deploy", Some(TaskState::Pending), None)]));
        let source_frame = Arc::clone(&current);
        let buffer = SharedBuffer::default();
        let mut renderer = VerboseRenderer::with_writer(
            RenderContext {
                snapshot: Arc::new(move || source_frame.lock().unwrap().clone()),
                options: RendererOptions::default(),
                bus: NotificationBus::new(),
            },
            Box::new(buffer.clone()),
        );

        renderer.end(None);
        *current.lock().unwrap() = vec![snapshot(id, "boom", Some(TaskState::Failed), None)];
        renderer.end(None);

        let written = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert_eq!(written, "[STARTED] Deploy\n[FAILED] boom\n");
    }
}
