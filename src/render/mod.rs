//! Rendering collaborators for task lists.
//!
//! The scheduler only starts a renderer, lets it listen on the notification bus,
//! and finalizes it with an optional terminating error. Renderers read task
//! state exclusively through [`TaskSnapshot`]s.

pub mod default;
pub mod silent;
pub mod verbose;

pub use default::DefaultRenderer;
pub use silent::SilentRenderer;
pub use verbose::VerboseRenderer;

use crate::task::bus::NotificationBus;
use crate::task::error::TaskError;
use crate::task::types::{TaskOptions, TaskSnapshot};
use crossterm::tty::IsTty;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Terminal output driven by bus ticks
pub trait Renderer: Send {
    /// Start rendering; called at the beginning of every run.
    fn render(&mut self);

    /// Finalize, optionally with the error that ended the run.
    fn end(&mut self, error: Option<&TaskError>);
}

/// Source of fresh task snapshots for a renderer
pub type SnapshotSource = Arc<dyn Fn() -> Vec<TaskSnapshot> + Send + Sync>;

/// Builds a custom renderer for a task list
pub type RendererFactory = Arc<dyn Fn(RenderContext) -> Box<dyn Renderer> + Send + Sync>;

/// Everything a renderer is constructed from
#[derive(Clone)]
pub struct RenderContext {
    pub snapshot: SnapshotSource,
    pub options: RendererOptions,
    pub bus: NotificationBus,
}

impl fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderContext")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Built-in renderers
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RendererKind {
    /// Redrawn task tree; needs a terminal
    #[default]
    Default,
    /// One line per change; works on any output
    Verbose,
    /// No output
    Silent,
}

impl RendererKind {
    pub fn requires_tty(&self) -> bool {
        matches!(self, RendererKind::Default)
    }
}

impl FromStr for RendererKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(RendererKind::Default),
            "verbose" => Ok(RendererKind::Verbose),
            "silent" => Ok(RendererKind::Silent),
            other => Err(format!(
                "unknown renderer '{other}', expected default, verbose or silent"
            )),
        }
    }
}

/// Options passed through to renderers
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct RendererOptions {
    /// Hide subtasks once their parent finished successfully
    pub collapse: bool,
    /// Show elapsed time on finished tasks
    pub show_timer: bool,
    /// Defaults for per-task options
    pub task: TaskOptions,
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self {
            collapse: true,
            show_timer: false,
            task: TaskOptions::default(),
        }
    }
}

/// Outcome of renderer selection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RendererSelection {
    pub kind: RendererKind,
    /// Whether the non-TTY renderer was picked
    pub non_tty: bool,
}

/// Pick the renderer for the current stdout.
pub fn select(
    renderer: RendererKind,
    non_tty_renderer: RendererKind,
    fallback: bool,
    silent: bool,
) -> RendererSelection {
    select_for(
        renderer,
        non_tty_renderer,
        fallback,
        silent,
        std::io::stdout().is_tty(),
    )
}

pub(crate) fn select_for(
    renderer: RendererKind,
    non_tty_renderer: RendererKind,
    fallback: bool,
    silent: bool,
    is_tty: bool,
) -> RendererSelection {
    if silent {
        RendererSelection {
            kind: RendererKind::Silent,
            non_tty: false,
        }
    } else if fallback || (renderer.requires_tty() && !is_tty) {
        RendererSelection {
            kind: non_tty_renderer,
            non_tty: true,
        }
    } else {
        RendererSelection {
            kind: renderer,
            non_tty: false,
        }
    }
}

/// Construct a built-in renderer.
pub fn create(kind: RendererKind, context: RenderContext) -> Box<dyn Renderer> {
    match kind {
        RendererKind::Default => Box::new(DefaultRenderer::new(context)),
        RendererKind::Verbose => Box::new(VerboseRenderer::new(context)),
        RendererKind::Silent => Box::new(SilentRenderer),
    }
}

/// Run `redraw` on every bus tick until aborted.
///
/// Outside a tokio runtime nothing is spawned; the renderer then only draws
/// when it is ended.
pub(crate) fn spawn_render_loop<F>(bus: &NotificationBus, mut redraw: F) -> Option<JoinHandle<()>>
where
    F: FnMut() + Send + 'static,
{
    let runtime = tokio::runtime::Handle::try_current().ok()?;
    let mut ticks = bus.subscribe();

    Some(runtime.spawn(async move {
        loop {
            match ticks.recv().await {
                // Lagging only means ticks were coalesced
                Ok(()) | Err(RecvError::Lagged(_)) => redraw(),
                Err(RecvError::Closed) => break,
            }
        }
    }))
}

/// Format an elapsed duration the way the renderers display it.
pub(crate) fn format_elapsed(elapsed: chrono::Duration) -> String {
    let millis = elapsed.num_milliseconds().max(0);
    if millis < 60_000 {
        format!("{:.1}s", millis as f64 / 1000.0)
    } else {
        format!("{}m {}s", millis / 60_000, (millis % 60_000) / 1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_wins_over_everything() {
        let selection = select_for(RendererKind::Default, RendererKind::Verbose, true, true, true);
        assert_eq!(selection.kind, RendererKind::Silent);
        assert!(!selection.non_tty);
    }

    #[test]
    fn test_default_falls_back_without_tty() {
        let selection = select_for(RendererKind::Default, RendererKind::Verbose, false, false, false);
        assert_eq!(selection.kind, RendererKind::Verbose);
        assert!(selection.non_tty);

        let on_tty = select_for(RendererKind::Default, RendererKind::Verbose, false, false, true);
        assert_eq!(on_tty.kind, RendererKind::Default);
    }

    #[test]
    fn test_verbose_does_not_need_tty() {
        let selection = select_for(RendererKind::Verbose, RendererKind::Silent, false, false, false);
        assert_eq!(selection.kind, RendererKind::Verbose);
        assert!(!selection.non_tty);
    }

    #[test]
    fn test_forced_fallback() {
        let selection = select_for(RendererKind::Default, RendererKind::Silent, true, false, true);
        assert_eq!(selection.kind, RendererKind::Silent);
        assert!(selection.non_tty);
    }

    #[test]
    fn test_renderer_kind_from_str() {
        assert_eq!("Verbose".parse::<RendererKind>(), Ok(RendererKind::Verbose));
        assert!("fancy".parse::<RendererKind>().is_err());
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(chrono::Duration::milliseconds(1200)), "1.2s");
        assert_eq!(format_elapsed(chrono::Duration::seconds(75)), "1m 15s");
    }
}
