use crate::render::Renderer;
use crate::task::error::TaskError;

/// Renders nothing. Nested lists always use this, their parent draws them.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentRenderer;

impl Renderer for SilentRenderer {
    fn render(&mut self) {}

    fn end(&mut self, _error: Option<&TaskError>) {}
}
