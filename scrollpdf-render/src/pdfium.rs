use std::convert::TryFrom;
use std::mem;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use scrollpdf_core::{
    Destination, DocumentBackend, DocumentProvider, OutlineNode, PageHandle, PageViewport,
    RasterSurface, TextOverlay,
};
use tracing::{debug, instrument, warn};

use crate::{locator_to_path, span_from_bounds};

pub struct PdfiumProvider {
    pdfium: Arc<Pdfium>,
}

impl PdfiumProvider {
    pub fn new() -> Result<Self> {
        Ok(Self {
            pdfium: Arc::new(bind_pdfium()?),
        })
    }
}

#[async_trait]
impl DocumentProvider for PdfiumProvider {
    async fn open(&self, locator: &str) -> Result<Arc<dyn DocumentBackend>> {
        let path = locator_to_path(locator)?;
        let absolute = path
            .canonicalize()
            .with_context(|| format!("failed to resolve path for {:?}", path))?;
        let pdfium = Arc::clone(&self.pdfium);
        let document = blocking(move || PdfiumDocument::load(pdfium, absolute)).await?;
        Ok(Arc::new(PdfiumBackend {
            document: Arc::new(document),
        }))
    }
}

async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .context("pdfium worker task failed")?
}

struct PdfiumDocument {
    // Declared before `_pdfium` so it drops first.
    document: Mutex<PdfDocument<'static>>,
    path: PathBuf,
    page_count: usize,
    _pdfium: Arc<Pdfium>,
}

impl PdfiumDocument {
    fn load(pdfium: Arc<Pdfium>, path: PathBuf) -> Result<Self> {
        let document = pdfium
            .load_pdf_from_file(&path, None)
            .with_context(|| format!("failed to open {:?}", path))?;
        // SAFETY: the document borrows the bindings behind `pdfium`. This
        // struct keeps its own clone of that Arc and the document field is
        // dropped before it, so the bindings outlive the document.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        let page_count = usize::try_from(document.pages().len()).unwrap_or_default();
        debug!(path = %path.display(), page_count, "pdfium document loaded");
        Ok(Self {
            document: Mutex::new(document),
            path,
            page_count,
            _pdfium: pdfium,
        })
    }

    fn with_document<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&PdfDocument<'static>) -> Result<R>,
    {
        let guard = self.document.lock();
        f(&*guard)
    }

    fn page_size(&self, index: usize) -> Result<(f32, f32)> {
        self.with_document(|document| {
            with_page(document, index, |page| {
                Ok((page.width().value, page.height().value))
            })
        })
    }

    #[instrument(skip(self))]
    fn render(&self, index: usize, scale: f32) -> Result<RasterSurface> {
        self.with_document(|document| {
            with_page(document, index, |page| render_page(page, index, scale))
        })
    }

    fn text(&self, index: usize, scale: f32) -> Result<TextOverlay> {
        self.with_document(|document| {
            with_page(document, index, |page| page_text(page, index, scale))
        })
    }

    fn outline(&self) -> Result<Vec<OutlineNode>> {
        self.with_document(|document| Ok(collect_outline(document.bookmarks().root())))
    }
}

fn with_page<R, F>(document: &PdfDocument<'_>, index: usize, f: F) -> Result<R>
where
    F: FnOnce(&PdfPage<'_>) -> Result<R>,
{
    let page_index: PdfPageIndex = index
        .try_into()
        .map_err(|_| anyhow!("page {} is out of supported range", index))?;
    let page = document
        .pages()
        .get(page_index)
        .with_context(|| format!("page {} out of range", index))?;
    f(&page)
}

fn render_page(page: &PdfPage<'_>, index: usize, scale: f32) -> Result<RasterSurface> {
    let config = PdfRenderConfig::new().scale_page_by_factor(scale.max(0.1));
    let bitmap = page
        .render_with_config(&config)
        .with_context(|| format!("failed to render page {}", index))?;
    let pixels = bitmap.as_image().to_rgba8().into_raw();
    Ok(RasterSurface {
        width: u32::try_from(bitmap.width()).unwrap_or_default(),
        height: u32::try_from(bitmap.height()).unwrap_or_default(),
        pixels,
    })
}

fn page_text(page: &PdfPage<'_>, index: usize, scale: f32) -> Result<TextOverlay> {
    let page_height = page.height().value;
    let text = page
        .text()
        .with_context(|| format!("failed to extract text for page {}", index))?;
    let spans = text
        .segments()
        .iter()
        .filter_map(|segment| {
            let bounds = segment.bounds();
            span_from_bounds(
                segment.text(),
                bounds.left().value,
                bounds.top().value,
                bounds.right().value,
                bounds.bottom().value,
                page_height,
                scale,
            )
        })
        .collect();
    Ok(TextOverlay { spans })
}

/// Builds the outline tree. Entries without an explicit page destination
/// are kept under their title so their children stay reachable.
fn collect_outline(first: Option<PdfBookmark<'_>>) -> Vec<OutlineNode> {
    let mut nodes = Vec::new();
    let mut cursor = first;
    while let Some(bookmark) = cursor {
        let title = bookmark.title().unwrap_or_default();
        let destination = match bookmark.destination().map(|d| d.page_index()) {
            Some(Ok(index)) => Destination::PageIndex(index as usize),
            Some(Err(err)) => {
                warn!(?err, title = %title, "outline entry has unreadable destination");
                Destination::Named(title.clone())
            }
            None => Destination::Named(title.clone()),
        };
        let children = collect_outline(bookmark.first_child());
        nodes.push(OutlineNode {
            title,
            destination,
            children,
        });
        cursor = bookmark.next_sibling();
    }
    nodes
}

struct PdfiumBackend {
    document: Arc<PdfiumDocument>,
}

#[async_trait]
impl DocumentBackend for PdfiumBackend {
    fn page_count(&self) -> usize {
        self.document.page_count
    }

    async fn outline(&self) -> Result<Vec<OutlineNode>> {
        let document = Arc::clone(&self.document);
        blocking(move || document.outline()).await
    }

    async fn page(&self, index: usize) -> Result<Arc<dyn PageHandle>> {
        let document = Arc::clone(&self.document);
        let (width, height) = blocking(move || document.page_size(index)).await?;
        Ok(Arc::new(PdfiumPage {
            document: Arc::clone(&self.document),
            index,
            width,
            height,
        }))
    }

    async fn resolve_destination(&self, destination: &Destination) -> Result<usize> {
        match destination {
            Destination::PageIndex(index) if *index < self.document.page_count => Ok(*index),
            Destination::PageIndex(index) => bail!(
                "destination page {} outside {:?} ({} pages)",
                index,
                self.document.path,
                self.document.page_count
            ),
            Destination::Named(name) => bail!("named destination {name:?} has no page target"),
        }
    }
}

struct PdfiumPage {
    document: Arc<PdfiumDocument>,
    index: usize,
    width: f32,
    height: f32,
}

#[async_trait]
impl PageHandle for PdfiumPage {
    fn viewport(&self, scale: f32) -> PageViewport {
        PageViewport::from_page_size(self.width, self.height, scale)
    }

    async fn render(&self, viewport: PageViewport) -> Result<RasterSurface> {
        let document = Arc::clone(&self.document);
        let index = self.index;
        blocking(move || document.render(index, viewport.scale)).await
    }

    async fn text_content(&self, viewport: PageViewport) -> Result<TextOverlay> {
        let document = Arc::clone(&self.document);
        let index = self.index;
        blocking(move || document.text(index, viewport.scale)).await
    }
}

fn bind_pdfium() -> Result<Pdfium> {
    let mut errors = Vec::new();

    if let Some(path) = std::env::var_os("SCROLLPDF_PDFIUM_LIBRARY_PATH") {
        match Pdfium::bind_to_library(&path) {
            Ok(bindings) => return Ok(Pdfium::new(bindings)),
            Err(err) => errors.push(format!("{}: {}", PathBuf::from(path).display(), err)),
        }
    }

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => errors.push(format!("{}: {}", cwd_path.display(), err)),
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; ensure it is installed ({})",
                errors.join(", ")
            ))
        }
    }
}
