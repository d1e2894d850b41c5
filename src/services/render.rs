use crate::error::Result;

/// Template renderer supplied by the host workflow engine
pub trait Renderer: Send + Sync {
    fn render(&self, template: &str) -> Result<String>;
}

/// Renderer that returns templates unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainRenderer;

impl Renderer for PlainRenderer {
    fn render(&self, template: &str) -> Result<String> {
        Ok(template.to_string())
    }
}
