//! In-memory [`PdfRenderer`]: produces deterministic placeholder bytes
//! instead of shelling out to a real rendering engine, sized off the
//! input HTML so `store-pdf`'s size accounting still exercises real
//! numbers.

use async_trait::async_trait;
use serde_json::Value;
use tasker_shared::error::TaskerResult;
use tasker_shared::ports::{PdfRenderer, RenderedPdf};

#[derive(Debug, Default)]
pub struct InMemoryPdfRenderer;

impl InMemoryPdfRenderer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PdfRenderer for InMemoryPdfRenderer {
    async fn render(&self, template_type: &str, data: Value) -> TaskerResult<RenderedPdf> {
        let html_len = data
            .get("html")
            .and_then(Value::as_str)
            .map_or_else(|| data.to_string().len(), str::len);
        let bytes = format!("%PDF-1.4\n% {template_type}\n% {html_len} bytes of source\n").into_bytes();
        Ok(RenderedPdf {
            bytes,
            file_name: format!("{template_type}.pdf"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn renders_nonempty_bytes_for_any_template() {
        let renderer = InMemoryPdfRenderer::new();
        let rendered = renderer
            .render("invoice", serde_json::json!({ "html": "<html></html>" }))
            .await
            .unwrap();
        assert!(!rendered.bytes.is_empty());
        assert_eq!(rendered.file_name, "invoice.pdf");
    }
}
