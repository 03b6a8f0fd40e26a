//! In-memory decoder used by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::document::{Destination, DocumentBackend, DocumentProvider, OutlineNode, PageHandle};
use crate::{quantize_scale, PageViewport, RasterSurface, TextOverlay, TextSpan};

pub const PAGE_WIDTH: f32 = 100.0;
pub const PAGE_HEIGHT: f32 = 150.0;

#[derive(Default)]
struct FakeState {
    gates: Mutex<HashMap<(usize, u32), Arc<Semaphore>>>,
    failing: Mutex<HashSet<usize>>,
    renders: AtomicUsize,
}

pub struct FakeProvider {
    page_count: usize,
    state: Arc<FakeState>,
}

impl FakeProvider {
    pub fn new(page_count: usize) -> Self {
        Self {
            page_count,
            state: Arc::new(FakeState::default()),
        }
    }

    /// Blocks rasterization of `page` at `scale` until `release` is called.
    pub fn hold(&self, page: usize, scale: f32) {
        self.state
            .gates
            .lock()
            .insert((page, quantize_scale(scale)), Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, page: usize, scale: f32) {
        if let Some(gate) = self.state.gates.lock().get(&(page, quantize_scale(scale))) {
            gate.add_permits(1024);
        }
    }

    pub fn fail(&self, page: usize) {
        self.state.failing.lock().insert(page);
    }

    pub fn heal(&self, page: usize) {
        self.state.failing.lock().remove(&page);
    }

    pub fn renders(&self) -> usize {
        self.state.renders.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentProvider for FakeProvider {
    async fn open(&self, locator: &str) -> Result<Arc<dyn DocumentBackend>> {
        if locator.starts_with("missing") {
            bail!("no such document: {locator}");
        }
        Ok(Arc::new(FakeBackend {
            page_count: self.page_count,
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeBackend {
    page_count: usize,
    state: Arc<FakeState>,
}

#[async_trait]
impl DocumentBackend for FakeBackend {
    fn page_count(&self) -> usize {
        self.page_count
    }

    async fn outline(&self) -> Result<Vec<OutlineNode>> {
        Ok(vec![
            OutlineNode::new("Start", Destination::PageIndex(0)).with_children(vec![
                OutlineNode::new("Chapter 10", Destination::PageIndex(9)),
            ]),
            OutlineNode::new("Appendix", Destination::Named("appendix".into())),
        ])
    }

    async fn page(&self, index: usize) -> Result<Arc<dyn PageHandle>> {
        if index >= self.page_count {
            bail!("page index {index} out of range");
        }
        Ok(Arc::new(FakePage {
            page: index + 1,
            state: Arc::clone(&self.state),
        }))
    }

    async fn resolve_destination(&self, destination: &Destination) -> Result<usize> {
        match destination {
            Destination::PageIndex(index) => Ok(*index),
            Destination::Named(name) if name == "appendix" => Ok(self.page_count - 1),
            Destination::Named(name) => Err(anyhow!("unknown named destination {name:?}")),
        }
    }
}

struct FakePage {
    page: usize,
    state: Arc<FakeState>,
}

#[async_trait]
impl PageHandle for FakePage {
    fn viewport(&self, scale: f32) -> PageViewport {
        PageViewport::from_page_size(PAGE_WIDTH, PAGE_HEIGHT, scale)
    }

    async fn render(&self, viewport: PageViewport) -> Result<RasterSurface> {
        self.state.renders.fetch_add(1, Ordering::SeqCst);
        let gate = self
            .state
            .gates
            .lock()
            .get(&(self.page, quantize_scale(viewport.scale)))
            .cloned();
        if let Some(gate) = gate {
            gate.acquire().await?.forget();
        }
        if self.state.failing.lock().contains(&self.page) {
            bail!("corrupt content stream on page {}", self.page);
        }
        let (width, height) = viewport.pixel_size();
        Ok(RasterSurface {
            width,
            height,
            pixels: vec![self.page as u8; (width * height * 4) as usize],
        })
    }

    async fn text_content(&self, viewport: PageViewport) -> Result<TextOverlay> {
        Ok(TextOverlay {
            spans: vec![TextSpan {
                text: format!("page {}", self.page),
                left: 0.0,
                top: 0.0,
                width: viewport.width,
                height: viewport.height / 10.0,
            }],
        })
    }
}
