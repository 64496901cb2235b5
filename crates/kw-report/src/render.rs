//! Writes report outlines to disk: a UTF-8 text file always, plus a PDF when
//! the backend is available.

use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use kw_core::ReportOutline;
use kw_storage::ArtifactStore;
use serde::Serialize;
use tracing::{info, warn};

/// Proof that a PDF backend is compiled in and enabled. Resolved once at
/// startup via [`PdfCapability::detect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdfCapability {
    _resolved: (),
}

impl PdfCapability {
    pub fn detect(enabled: bool) -> Option<Self> {
        if enabled && cfg!(feature = "pdf") {
            Some(Self { _resolved: () })
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    Text,
    Pdf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedArtifact {
    /// Canonical artifact: the PDF when produced, otherwise the text file.
    pub filename: String,
    pub path: PathBuf,
    pub format: ArtifactFormat,
    pub text_filename: String,
}

/// Reduce a title to alphanumerics and underscores for use in a filename.
pub fn sanitize_title(title: &str) -> String {
    let kept: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '_')
        .collect();
    let sanitized = kept.trim().replace(' ', "_");
    if sanitized.is_empty() {
        "report".to_string()
    } else {
        sanitized
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactRenderer {
    store: ArtifactStore,
    pdf: Option<PdfCapability>,
}

impl ArtifactRenderer {
    pub fn new(store: ArtifactStore, pdf: Option<PdfCapability>) -> Self {
        Self { store, pdf }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn pdf_enabled(&self) -> bool {
        self.pdf.is_some()
    }

    pub async fn render(
        &self,
        outline: &ReportOutline,
        title: &str,
        stamp: DateTime<Utc>,
    ) -> anyhow::Result<RenderedArtifact> {
        self.render_named(outline, title, title, stamp).await
    }

    /// Like [`render`](Self::render), but the file stem comes from `name`
    /// while `title` heads the document.
    pub async fn render_named(
        &self,
        outline: &ReportOutline,
        title: &str,
        name: &str,
        stamp: DateTime<Utc>,
    ) -> anyhow::Result<RenderedArtifact> {
        let base = format!("{}_{}", sanitize_title(name), stamp.timestamp());
        let text = self
            .store
            .write_new(&base, "txt", outline.to_text().as_bytes())
            .await
            .context("writing text report")?;
        info!(filename = %text.filename, bytes = text.byte_size, "text report written");

        if self.pdf.is_some() {
            match self.write_pdf(outline, title, &text.stem).await {
                Ok((filename, path)) => {
                    info!(filename = %filename, "pdf report written");
                    return Ok(RenderedArtifact {
                        filename,
                        path,
                        format: ArtifactFormat::Pdf,
                        text_filename: text.filename,
                    });
                }
                Err(err) => {
                    let reason = format!("{err:#}");
                    warn!(stem = %text.stem, error = %reason, "pdf rendering failed; keeping text report");
                }
            }
        }

        Ok(RenderedArtifact {
            filename: text.filename.clone(),
            path: text.absolute_path,
            format: ArtifactFormat::Text,
            text_filename: text.filename,
        })
    }

    async fn write_pdf(
        &self,
        outline: &ReportOutline,
        title: &str,
        stem: &str,
    ) -> anyhow::Result<(String, PathBuf)> {
        let lines = outline.lines.clone();
        let doc_title = title.to_string();
        let bytes = tokio::task::spawn_blocking(move || pdf::render(&lines, &doc_title))
            .await
            .context("pdf render task panicked")??;
        // Shares the stem of the text file so both artifacts pair up.
        let stored = self.store.write_exact(stem, "pdf", &bytes).await?;
        Ok((stored.filename, stored.absolute_path))
    }
}

#[cfg(feature = "pdf")]
mod pdf {
    use std::io::BufWriter;

    use anyhow::anyhow;
    use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument};

    const PAGE_WIDTH_MM: f32 = 210.0;
    const PAGE_HEIGHT_MM: f32 = 297.0;
    const MARGIN_MM: f32 = 20.0;
    const TITLE_PT: f32 = 18.0;
    const BODY_PT: f32 = 10.0;
    const TITLE_LEADING_MM: f32 = 9.0;
    const BODY_LEADING_MM: f32 = 4.6;
    const PARAGRAPH_SPACING_MM: f32 = 2.1;
    // Rough glyph budgets for Helvetica across the printable width.
    const TITLE_WRAP: usize = 52;
    const BODY_WRAP: usize = 95;

    pub(super) fn render(lines: &[String], title: &str) -> anyhow::Result<Vec<u8>> {
        let (doc, page, layer) =
            PdfDocument::new(title, Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Layer 1");
        let body_font = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|e| anyhow!("loading body font: {e:?}"))?;
        let title_font = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(|e| anyhow!("loading title font: {e:?}"))?;

        let mut current = doc.get_page(page).get_layer(layer);
        let mut y = PAGE_HEIGHT_MM - MARGIN_MM;
        for (idx, line) in lines.iter().enumerate() {
            let (font, size, leading, width): (&IndirectFontRef, f32, f32, usize) = if idx == 0 {
                (&title_font, TITLE_PT, TITLE_LEADING_MM, TITLE_WRAP)
            } else {
                (&body_font, BODY_PT, BODY_LEADING_MM, BODY_WRAP)
            };
            for row in wrap(line, width) {
                if y - leading < MARGIN_MM {
                    let (next_page, next_layer) =
                        doc.add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Layer 1");
                    current = doc.get_page(next_page).get_layer(next_layer);
                    y = PAGE_HEIGHT_MM - MARGIN_MM;
                }
                y -= leading;
                current.use_text(row, size, Mm(MARGIN_MM), Mm(y), font);
            }
            y -= PARAGRAPH_SPACING_MM;
        }

        let mut out = BufWriter::new(Vec::new());
        doc.save(&mut out).map_err(|e| anyhow!("serializing pdf: {e:?}"))?;
        out.into_inner().map_err(|e| anyhow!("flushing pdf buffer: {}", e.error()))
    }

    /// Greedy word wrap on character counts. Blank input yields no rows.
    fn wrap(line: &str, width: usize) -> Vec<String> {
        let mut rows = Vec::new();
        for segment in line.split('\n') {
            let mut row = String::new();
            for word in segment.split_whitespace() {
                let needed = if row.is_empty() { 0 } else { 1 } + word.chars().count();
                if !row.is_empty() && row.chars().count() + needed > width {
                    rows.push(std::mem::take(&mut row));
                }
                if !row.is_empty() {
                    row.push(' ');
                }
                row.push_str(word);
            }
            if !row.is_empty() {
                rows.push(row);
            }
        }
        rows
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn wrap_breaks_on_word_boundaries() {
            let rows = wrap("alpha beta gamma delta", 11);
            assert_eq!(rows, vec!["alpha beta", "gamma delta"]);
            assert!(wrap("   ", 10).is_empty());
            assert_eq!(wrap("one\ntwo", 10), vec!["one", "two"]);
        }

        #[test]
        fn long_documents_render() {
            let lines: Vec<String> = (0..200).map(|i| format!("line {i}")).collect();
            let bytes = render(&lines, "Long").expect("render");
            assert!(bytes.starts_with(b"%PDF"));
        }
    }
}

#[cfg(not(feature = "pdf"))]
mod pdf {
    pub(super) fn render(_lines: &[String], _title: &str) -> anyhow::Result<Vec<u8>> {
        anyhow::bail!("pdf backend not compiled in")
    }
}
