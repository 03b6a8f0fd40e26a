use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::ViewerConfig;
use crate::document::{Destination, DocumentProvider, DocumentSession, OutlineNode};
use crate::error::{LoadError, NavigationError, RenderError, ViewerError};
use crate::navigation::{NavigationController, NavigationTarget};
use crate::progress::ProgressStore;
use crate::slot::{PageSlotController, RenderOutcome};
use crate::visibility::{PageLayout, VisibilityTracker};
use crate::window::{SchedulePass, WindowScheduler};
use crate::same_scale;

const FALLBACK_PAGE_HEIGHT: f32 = 792.0;
const DEFAULT_VIEWPORT_HEIGHT: f32 = 800.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportState {
    pub current_page: usize,
    pub scale: f32,
    pub window_radius: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    DocumentOpened { locator: String, page_count: usize },
    DocumentClosed { locator: String },
    PageChanged(usize),
    ScaleChanged(f32),
    PageRendered(usize),
    PageReleased(usize),
    RenderFailed(usize),
}

struct OpenDocument {
    session: DocumentSession,
    slots: PageSlotController,
    layout: PageLayout,
}

/// Owns the viewport state and drives scheduling after every mutation.
/// All methods take `&mut self`; the caller's event loop serializes them.
pub struct Viewer {
    config: ViewerConfig,
    provider: Arc<dyn DocumentProvider>,
    progress: ProgressStore,
    navigation: NavigationController,
    scheduler: WindowScheduler,
    tracker: VisibilityTracker,
    viewport: ViewportState,
    viewport_height: f32,
    scroll_top: f32,
    document: Option<OpenDocument>,
    events: Mutex<Vec<ViewerEvent>>,
}

impl Viewer {
    pub fn new(
        config: ViewerConfig,
        provider: Arc<dyn DocumentProvider>,
        progress: ProgressStore,
    ) -> Self {
        let viewport = ViewportState {
            current_page: 1,
            scale: config.default_scale,
            window_radius: config.window_radius,
        };
        Self {
            tracker: VisibilityTracker::new(config.visibility_threshold),
            config,
            provider,
            progress,
            navigation: NavigationController::new(),
            scheduler: WindowScheduler::new(),
            viewport,
            viewport_height: DEFAULT_VIEWPORT_HEIGHT,
            scroll_top: 0.0,
            document: None,
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn viewport(&self) -> ViewportState {
        self.viewport
    }

    pub fn current_page(&self) -> usize {
        self.viewport.current_page
    }

    pub fn scale(&self) -> f32 {
        self.viewport.scale
    }

    pub fn scroll_top(&self) -> f32 {
        self.scroll_top
    }

    pub fn viewport_height(&self) -> f32 {
        self.viewport_height
    }

    pub fn session(&self) -> Option<&DocumentSession> {
        self.document.as_ref().map(|doc| &doc.session)
    }

    pub fn slots(&self) -> Option<&PageSlotController> {
        self.document.as_ref().map(|doc| &doc.slots)
    }

    pub fn layout(&self) -> Option<&PageLayout> {
        self.document.as_ref().map(|doc| &doc.layout)
    }

    pub fn tracker(&self) -> &VisibilityTracker {
        &self.tracker
    }

    pub fn page_count(&self) -> usize {
        self.session().map_or(0, DocumentSession::page_count)
    }

    pub fn outline(&self) -> &[OutlineNode] {
        match self.session() {
            Some(session) => session.outline(),
            None => &[],
        }
    }

    pub fn drain_events(&self) -> Vec<ViewerEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    fn emit(&self, event: ViewerEvent) {
        self.events.lock().push(event);
    }

    /// Reopening the document that is already open is a no-op.
    #[instrument(skip(self))]
    pub async fn open(&mut self, locator: &str) -> Result<(), LoadError> {
        if self
            .session()
            .is_some_and(|session| session.locator() == locator)
        {
            return Ok(());
        }
        self.close();

        let session = DocumentSession::open(self.provider.as_ref(), locator).await?;
        let page_count = session.page_count();
        let scale = self.config.clamp_scale(self.config.default_scale);
        let page_height = match session.page_viewport(1, scale).await {
            Ok(viewport) => viewport.height,
            Err(err) => {
                warn!(error = %err, "could not size first page, using fallback height");
                FALLBACK_PAGE_HEIGHT * scale
            }
        };
        let layout = PageLayout::uniform(page_count, page_height, self.config.page_gap);

        let current_page = match self.progress.load(locator) {
            Some(page) if session.contains(page) => page,
            Some(page) => {
                warn!(page, page_count, "saved progress out of range, starting at page 1");
                1
            }
            None => 1,
        };
        info!(current_page, page_count, "resuming document");

        self.viewport = ViewportState {
            current_page,
            scale,
            window_radius: self.config.window_radius,
        };
        self.scroll_top = layout.offset_of(current_page).unwrap_or(0.0);
        self.scheduler = WindowScheduler::new();
        self.tracker = VisibilityTracker::new(self.config.visibility_threshold);
        self.navigation.reset();
        self.document = Some(OpenDocument {
            session,
            slots: PageSlotController::new(page_count),
            layout,
        });
        self.emit(ViewerEvent::DocumentOpened {
            locator: locator.to_owned(),
            page_count,
        });

        self.reschedule();
        self.refresh_visibility();
        Ok(())
    }

    pub fn close(&mut self) {
        let Some(mut doc) = self.document.take() else {
            return;
        };
        let released = doc.slots.release_all();
        debug!(released = released.len(), "document torn down");
        self.tracker.clear();
        self.navigation.reset();
        self.scroll_top = 0.0;
        self.viewport = ViewportState {
            current_page: 1,
            scale: self.config.clamp_scale(self.config.default_scale),
            window_radius: self.config.window_radius,
        };
        self.emit(ViewerEvent::DocumentClosed {
            locator: doc.session.locator().to_owned(),
        });
    }

    fn reschedule(&mut self) -> Option<SchedulePass> {
        let doc = self.document.as_mut()?;
        let pass = self
            .scheduler
            .schedule(&self.viewport, &doc.session, &mut doc.slots);
        let mut events = self.events.lock();
        events.extend(pass.released.iter().copied().map(ViewerEvent::PageReleased));
        events.extend(pass.failures.iter().map(|err| ViewerEvent::RenderFailed(err.page())));
        Some(pass)
    }

    // Mounted = intersecting pages plus the window.
    fn refresh_visibility(&mut self) -> Option<usize> {
        let doc = self.document.as_ref()?;
        let hits = doc.layout.intersections(self.scroll_top, self.viewport_height);
        let mut mounted: BTreeSet<usize> = hits.iter().map(|(page, _)| *page).collect();
        if let Some(window) = WindowScheduler::window(
            self.viewport.current_page,
            self.viewport.window_radius,
            doc.session.page_count(),
        ) {
            mounted.extend(window);
        }

        for page in self.tracker.observed_pages() {
            if !mounted.contains(&page) {
                self.tracker.unobserve(page);
            }
        }
        for page in &mounted {
            self.tracker.observe(*page);
        }
        for page in &mounted {
            let ratio = hits
                .iter()
                .find(|(hit, _)| hit == page)
                .map_or(0.0, |(_, ratio)| *ratio);
            self.tracker.report(*page, ratio);
        }
        self.tracker.flush()
    }

    fn adopt_visible_page(&mut self, page: Option<usize>) -> Option<usize> {
        let page = page?;
        if !self.commit_page(page) {
            return None;
        }
        self.refresh_visibility();
        Some(page)
    }

    fn commit_page(&mut self, page: usize) -> bool {
        if page == self.viewport.current_page {
            return false;
        }
        self.viewport.current_page = page;
        self.emit(ViewerEvent::PageChanged(page));
        self.reschedule();
        if let Some(doc) = &self.document {
            self.progress.save(doc.session.locator(), page);
        }
        true
    }

    pub fn set_viewport_height(&mut self, height: f32) {
        if height.is_finite() && height > 0.0 {
            self.viewport_height = height;
            let page = self.refresh_visibility();
            self.adopt_visible_page(page);
        }
    }

    /// Returns the new current page if the scroll changed it.
    pub fn scroll_to(&mut self, offset: f32) -> Option<usize> {
        let doc = self.document.as_ref()?;
        let max = (doc.layout.total_height() - self.viewport_height).max(0.0);
        self.scroll_top = if offset.is_finite() {
            offset.clamp(0.0, max)
        } else {
            0.0
        };
        let page = self.refresh_visibility();
        self.adopt_visible_page(page)
    }

    pub fn scroll_by(&mut self, delta: f32) -> Option<usize> {
        self.scroll_to(self.scroll_top + delta)
    }

    /// Entry point for hosts that observe intersections themselves. One call
    /// is one batch.
    pub fn report_visibility(&mut self, reports: &[(usize, f32)]) -> Option<usize> {
        self.document.as_ref()?;
        for (page, ratio) in reports {
            self.tracker.observe(*page);
            self.tracker.report(*page, *ratio);
        }
        let page = self.tracker.flush()?;
        self.commit_page(page).then_some(page)
    }

    pub fn unmount(&mut self, page: usize) -> bool {
        self.tracker.unobserve(page)
    }

    /// Changes zoom. Every materialized page is released and re-rendered at
    /// the new scale; the current page stays anchored at the top.
    pub fn set_scale(&mut self, scale: f32) -> Result<f32, ViewerError> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(ViewerError::InvalidScale(scale));
        }
        let doc = self.document.as_mut().ok_or(ViewerError::NoDocument)?;
        let scale = self.config.clamp_scale(scale);
        if same_scale(scale, self.viewport.scale) {
            return Ok(self.viewport.scale);
        }
        doc.layout.scale_heights(scale / self.viewport.scale);
        self.scroll_top = doc
            .layout
            .offset_of(self.viewport.current_page)
            .unwrap_or(0.0);
        self.viewport.scale = scale;
        self.emit(ViewerEvent::ScaleChanged(scale));
        self.reschedule();
        self.refresh_visibility();
        Ok(scale)
    }

    pub fn zoom_by(&mut self, factor: f32) -> Result<f32, ViewerError> {
        self.set_scale(self.viewport.scale * factor)
    }

    pub async fn go_to(&mut self, destination: &Destination) -> Result<usize, NavigationError> {
        let doc = self.document.as_ref().ok_or(NavigationError::NoDocument)?;
        let target = self
            .navigation
            .resolve(&doc.session, &doc.layout, destination)
            .await?;
        Ok(self.commit_navigation(target))
    }

    pub fn go_to_page(&mut self, page: usize) -> Result<usize, NavigationError> {
        let doc = self.document.as_ref().ok_or(NavigationError::NoDocument)?;
        let target = self
            .navigation
            .target_for_page(&doc.session, &doc.layout, page)?;
        Ok(self.commit_navigation(target))
    }

    pub fn back(&mut self) -> Option<usize> {
        self.document.as_ref()?;
        let page = self.navigation.back(self.viewport.current_page)?;
        self.jump_without_history(page)
    }

    pub fn forward(&mut self) -> Option<usize> {
        self.document.as_ref()?;
        let page = self.navigation.forward(self.viewport.current_page)?;
        self.jump_without_history(page)
    }

    fn jump_without_history(&mut self, page: usize) -> Option<usize> {
        let doc = self.document.as_ref()?;
        let target = self
            .navigation
            .target_for_page(&doc.session, &doc.layout, page)
            .ok()?;
        self.apply_target(target);
        Some(target.page)
    }

    fn commit_navigation(&mut self, target: NavigationTarget) -> usize {
        self.navigation
            .record_jump(self.viewport.current_page, target.page);
        self.apply_target(target);
        target.page
    }

    fn apply_target(&mut self, target: NavigationTarget) {
        self.scroll_top = target.scroll_offset;
        if !self.commit_page(target.page) {
            if let Some(doc) = &self.document {
                self.progress.save(doc.session.locator(), target.page);
            }
        }
        // The jump decides the page; crossings caused by it are consumed here.
        self.refresh_visibility();
    }

    /// Applies one render completion, waiting for it if work is in flight.
    /// Returns `None` when no document is open or nothing is pending.
    pub async fn pump(&mut self) -> Option<Result<RenderOutcome, RenderError>> {
        let doc = self.document.as_mut()?;
        let completion = match doc.slots.try_next_completion() {
            Some(completion) => completion,
            None if !doc.slots.has_in_flight() => return None,
            None => doc.slots.next_completion().await?,
        };
        let outcome = doc.slots.apply(completion);
        match &outcome {
            Ok(RenderOutcome::Committed { page }) => {
                let height = doc
                    .slots
                    .slot(*page)
                    .and_then(|slot| slot.raster())
                    .map(|raster| raster.height as f32);
                if let Some(height) = height {
                    // Keep the current page where it is on screen.
                    let current = self.viewport.current_page;
                    let before = doc.layout.offset_of(current).unwrap_or(0.0);
                    if doc.layout.set_height(*page, height) {
                        let after = doc.layout.offset_of(current).unwrap_or(0.0);
                        self.scroll_top = (self.scroll_top + after - before).max(0.0);
                    }
                }
                self.emit(ViewerEvent::PageRendered(*page));
            }
            Err(err) => self.emit(ViewerEvent::RenderFailed(err.page())),
            Ok(_) => {}
        }
        Some(outcome)
    }

    pub async fn settle(&mut self) -> Vec<RenderError> {
        let mut failures = Vec::new();
        while self
            .document
            .as_ref()
            .is_some_and(|doc| doc.slots.has_in_flight())
        {
            match self.pump().await {
                Some(Err(err)) => failures.push(err),
                Some(Ok(_)) => {}
                None => break,
            }
        }
        failures
    }
}

impl Drop for Viewer {
    fn drop(&mut self) {
        self.close();
    }
}
