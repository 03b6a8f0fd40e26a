use std::ops::RangeInclusive;

use tracing::{debug, instrument, warn};

use crate::document::DocumentSession;
use crate::error::RenderError;
use crate::slot::{PageSlotController, RenderOutcome};
use crate::viewer::ViewportState;
use crate::same_scale;

/// What one scheduling pass changed.
#[derive(Debug, Default)]
pub struct SchedulePass {
    pub window: Option<RangeInclusive<usize>>,
    pub released: Vec<usize>,
    pub requested: Vec<usize>,
    pub failures: Vec<RenderError>,
}

/// Keeps the pages within `window_radius` of the current page materialized
/// and everything else released.
#[derive(Debug, Default)]
pub struct WindowScheduler {
    last_scale: Option<f32>,
    passes: u64,
}

impl WindowScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// `[current - radius, current + radius] ∩ [1, page_count]`.
    pub fn window(
        current_page: usize,
        radius: usize,
        page_count: usize,
    ) -> Option<RangeInclusive<usize>> {
        if page_count == 0 {
            return None;
        }
        let current = current_page.clamp(1, page_count);
        let start = current.saturating_sub(radius).max(1);
        let end = current.saturating_add(radius).min(page_count);
        Some(start..=end)
    }

    /// Runs to completion without awaiting; renders are only issued here and
    /// land later through `PageSlotController::apply`.
    #[instrument(
        skip_all,
        fields(current_page = viewport.current_page, scale = viewport.scale)
    )]
    pub fn schedule(
        &mut self,
        viewport: &ViewportState,
        session: &DocumentSession,
        slots: &mut PageSlotController,
    ) -> SchedulePass {
        self.passes += 1;
        let mut pass = SchedulePass::default();

        if self
            .last_scale
            .is_some_and(|last| !same_scale(last, viewport.scale))
        {
            pass.released.extend(slots.release_all());
        }
        self.last_scale = Some(viewport.scale);

        let Some(window) = Self::window(
            viewport.current_page,
            viewport.window_radius,
            session.page_count(),
        ) else {
            return pass;
        };

        for page in slots.active_pages() {
            if !window.contains(&page) && slots.release(page) {
                pass.released.push(page);
            }
        }

        for page in window.clone() {
            match slots.render(session, page, viewport.scale) {
                Ok(RenderOutcome::Started { .. }) => pass.requested.push(page),
                Ok(_) => {}
                Err(err) => {
                    warn!(page, error = %err, "could not start page render");
                    pass.failures.push(err);
                }
            }
        }

        debug!(
            window = ?window,
            released = pass.released.len(),
            requested = pass.requested.len(),
            "scheduling pass"
        );
        pass.window = Some(window);
        pass
    }
}
