use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{info, instrument};

use crate::error::{LoadError, NavigationError, RenderError};
use crate::{PageViewport, RasterSurface, TextOverlay};

/// Outline target as reported by the decoder. Only the decoder knows how to
/// turn it into a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Destination {
    PageIndex(usize),
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineNode {
    pub title: String,
    pub destination: Destination,
    #[serde(default)]
    pub children: Vec<OutlineNode>,
}

impl OutlineNode {
    pub fn new(title: impl Into<String>, destination: Destination) -> Self {
        Self {
            title: title.into(),
            destination,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<OutlineNode>) -> Self {
        self.children = children;
        self
    }

    /// Depth-first walk in document order, paired with nesting depth.
    pub fn flatten(nodes: &[OutlineNode]) -> Vec<(usize, &OutlineNode)> {
        let mut out = Vec::new();
        collect(nodes, 0, &mut out);
        out
    }
}

fn collect<'a>(nodes: &'a [OutlineNode], depth: usize, out: &mut Vec<(usize, &'a OutlineNode)>) {
    for node in nodes {
        out.push((depth, node));
        collect(&node.children, depth + 1, out);
    }
}

#[async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(&self, locator: &str) -> Result<Arc<dyn DocumentBackend>>;
}

#[async_trait]
pub trait DocumentBackend: Send + Sync {
    fn page_count(&self) -> usize;
    async fn outline(&self) -> Result<Vec<OutlineNode>>;
    /// `index` is 0-based.
    async fn page(&self, index: usize) -> Result<Arc<dyn PageHandle>>;
    /// Returns a 0-based page index.
    async fn resolve_destination(&self, destination: &Destination) -> Result<usize>;
}

#[async_trait]
pub trait PageHandle: Send + Sync {
    fn viewport(&self, scale: f32) -> PageViewport;
    async fn render(&self, viewport: PageViewport) -> Result<RasterSurface>;
    async fn text_content(&self, viewport: PageViewport) -> Result<TextOverlay>;
}

/// A decoder job running on its own task. Awaiting yields the result;
/// `cancel` aborts the task at its next suspension point.
pub struct RenderJob<T> {
    page: usize,
    handle: JoinHandle<Result<T>>,
}

impl<T: Send + 'static> RenderJob<T> {
    fn spawn<F>(page: usize, future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            page,
            handle: tokio::spawn(future),
        }
    }
}

impl<T> RenderJob<T> {
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.handle.abort_handle()
    }
}

impl<T> Future for RenderJob<T> {
    type Output = Result<T, RenderError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let page = self.page;
        let joined = ready!(Pin::new(&mut self.handle).poll(cx));
        Poll::Ready(match joined {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(RenderError::Decoder { page, source }),
            Err(err) if err.is_cancelled() => Err(RenderError::Cancelled { page }),
            Err(_) => Err(RenderError::Panicked { page }),
        })
    }
}

pub struct PageJobs {
    pub raster: RenderJob<RasterSurface>,
    pub text: RenderJob<TextOverlay>,
}

impl PageJobs {
    pub fn cancel(&self) {
        self.raster.cancel();
        self.text.cancel();
    }

    pub fn abort_handles(&self) -> [AbortHandle; 2] {
        [self.raster.abort_handle(), self.text.abort_handle()]
    }
}

pub struct DocumentSession {
    locator: String,
    backend: Arc<dyn DocumentBackend>,
    page_count: usize,
    outline: Vec<OutlineNode>,
}

impl DocumentSession {
    #[instrument(skip(provider))]
    pub async fn open(provider: &dyn DocumentProvider, locator: &str) -> Result<Self, LoadError> {
        if locator.trim().is_empty() {
            return Err(LoadError::EmptyLocator);
        }
        let backend = provider
            .open(locator)
            .await
            .map_err(|source| LoadError::Decoder {
                locator: locator.to_owned(),
                source,
            })?;
        let outline = backend
            .outline()
            .await
            .map_err(|source| LoadError::Outline {
                locator: locator.to_owned(),
                source,
            })?;
        let page_count = backend.page_count();
        info!(page_count, outline_entries = outline.len(), "document opened");
        Ok(Self {
            locator: locator.to_owned(),
            backend,
            page_count,
            outline,
        })
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn outline(&self) -> &[OutlineNode] {
        &self.outline
    }

    pub fn contains(&self, page_number: usize) -> bool {
        (1..=self.page_count).contains(&page_number)
    }

    fn check_page(&self, page_number: usize) -> Result<usize, RenderError> {
        if self.contains(page_number) {
            Ok(page_number - 1)
        } else {
            Err(RenderError::OutOfRange {
                page: page_number,
                page_count: self.page_count,
            })
        }
    }

    /// Starts the raster and text jobs for one page. Both run independently
    /// and can be cancelled without waiting on the other.
    pub fn get_page(&self, page_number: usize, scale: f32) -> Result<PageJobs, RenderError> {
        let index = self.check_page(page_number)?;

        let backend = Arc::clone(&self.backend);
        let raster = RenderJob::spawn(page_number, async move {
            let page = backend.page(index).await?;
            let viewport = page.viewport(scale);
            page.render(viewport).await
        });

        let backend = Arc::clone(&self.backend);
        let text = RenderJob::spawn(page_number, async move {
            let page = backend.page(index).await?;
            let viewport = page.viewport(scale);
            page.text_content(viewport).await
        });

        Ok(PageJobs { raster, text })
    }

    pub async fn page_viewport(
        &self,
        page_number: usize,
        scale: f32,
    ) -> Result<PageViewport, RenderError> {
        let index = self.check_page(page_number)?;
        let page = self
            .backend
            .page(index)
            .await
            .map_err(|source| RenderError::Decoder {
                page: page_number,
                source,
            })?;
        Ok(page.viewport(scale))
    }

    /// Resolves an outline destination to a 1-based page number.
    #[instrument(skip(self))]
    pub async fn resolve_destination(
        &self,
        destination: &Destination,
    ) -> Result<usize, NavigationError> {
        let index = self
            .backend
            .resolve_destination(destination)
            .await
            .map_err(NavigationError::Unresolvable)?;
        let page = index + 1;
        if page > self.page_count {
            return Err(NavigationError::OutOfRange {
                page,
                page_count: self.page_count,
            });
        }
        Ok(page)
    }
}
