use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use scrollpdf_core::TextSpan;
use url::Url;

#[cfg(feature = "pdf")]
mod pdfium;

#[cfg(feature = "pdf")]
pub use pdfium::PdfiumProvider;

#[cfg(feature = "pdf")]
pub type PdfDocumentProvider = PdfiumProvider;

/// Accepts plain filesystem paths and `file://` URLs.
pub fn locator_to_path(locator: &str) -> Result<PathBuf> {
    let trimmed = locator.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("empty document locator"));
    }
    if trimmed.contains("://") {
        let url = Url::parse(trimmed).with_context(|| format!("invalid locator {trimmed:?}"))?;
        if url.scheme() != "file" {
            return Err(anyhow!(
                "unsupported locator scheme {:?}; only local files can be opened",
                url.scheme()
            ));
        }
        return url
            .to_file_path()
            .map_err(|_| anyhow!("locator {trimmed:?} does not name a local file"));
    }
    Ok(PathBuf::from(trimmed))
}

/// Maps a rectangle in PDF user space (origin bottom-left, points) onto the
/// raster's coordinate space (origin top-left, scaled).
pub fn span_from_bounds(
    text: String,
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
    page_height: f32,
    scale: f32,
) -> Option<TextSpan> {
    let width = (right - left) * scale;
    let height = (top - bottom) * scale;
    if text.trim().is_empty() || width <= 0.0 || height <= 0.0 {
        return None;
    }
    Some(TextSpan {
        text,
        left: left * scale,
        top: (page_height - top) * scale,
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_paths_pass_through() {
        assert_eq!(
            locator_to_path(" /tmp/book.pdf ").unwrap(),
            PathBuf::from("/tmp/book.pdf")
        );
        assert_eq!(
            locator_to_path("docs/a.pdf").unwrap(),
            PathBuf::from("docs/a.pdf")
        );
    }

    #[cfg(unix)]
    #[test]
    fn file_urls_become_paths() {
        assert_eq!(
            locator_to_path("file:///tmp/my%20book.pdf").unwrap(),
            PathBuf::from("/tmp/my book.pdf")
        );
    }

    #[test]
    fn remote_and_empty_locators_are_rejected() {
        assert!(locator_to_path("https://example.org/a.pdf").is_err());
        assert!(locator_to_path("   ").is_err());
    }

    #[test]
    fn spans_flip_to_top_left_origin() {
        let span = span_from_bounds("Title".into(), 72.0, 720.0, 172.0, 700.0, 792.0, 2.0).unwrap();
        assert_eq!(span.left, 144.0);
        assert_eq!(span.top, 144.0);
        assert_eq!(span.width, 200.0);
        assert_eq!(span.height, 40.0);
    }

    #[test]
    fn degenerate_spans_are_dropped() {
        assert!(span_from_bounds("x".into(), 10.0, 10.0, 10.0, 0.0, 100.0, 1.0).is_none());
        assert!(span_from_bounds("  ".into(), 0.0, 10.0, 10.0, 0.0, 100.0, 1.0).is_none());
    }
}
