use tracing::{debug, instrument};

use crate::document::{Destination, DocumentSession};
use crate::error::NavigationError;
use crate::visibility::PageLayout;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavigationTarget {
    pub page: usize,
    /// Scroll position that brings the page's container to the top.
    pub scroll_offset: f32,
}

/// Resolves jumps and keeps a back/forward jump list.
#[derive(Debug, Default)]
pub struct NavigationController {
    back: Vec<usize>,
    forward: Vec<usize>,
}

impl NavigationController {
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(skip(self, session, layout))]
    pub async fn resolve(
        &self,
        session: &DocumentSession,
        layout: &PageLayout,
        destination: &Destination,
    ) -> Result<NavigationTarget, NavigationError> {
        let page = session.resolve_destination(destination).await?;
        debug!(page, "destination resolved");
        self.target_for_page(session, layout, page)
    }

    pub fn target_for_page(
        &self,
        session: &DocumentSession,
        layout: &PageLayout,
        page: usize,
    ) -> Result<NavigationTarget, NavigationError> {
        if !session.contains(page) {
            return Err(NavigationError::OutOfRange {
                page,
                page_count: session.page_count(),
            });
        }
        Ok(NavigationTarget {
            page,
            scroll_offset: layout.offset_of(page).unwrap_or(0.0),
        })
    }

    pub fn record_jump(&mut self, from: usize, to: usize) {
        if from != to {
            self.back.push(from);
            self.forward.clear();
        }
    }

    pub fn back(&mut self, current: usize) -> Option<usize> {
        let page = self.back.pop()?;
        self.forward.push(current);
        Some(page)
    }

    pub fn forward(&mut self, current: usize) -> Option<usize> {
        let page = self.forward.pop()?;
        self.back.push(current);
        Some(page)
    }

    pub fn reset(&mut self) {
        self.back.clear();
        self.forward.clear();
    }
}
