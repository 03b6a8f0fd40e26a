use std::mem;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::document::{DocumentSession, PageJobs};
use crate::error::RenderError;
use crate::{same_scale, RasterSurface, TextOverlay};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Empty,
    Loading,
    Rendered,
}

enum SlotState {
    Empty,
    Loading {
        scale: f32,
        jobs: [AbortHandle; 2],
    },
    Rendered {
        scale: f32,
        raster: RasterSurface,
        text: TextOverlay,
    },
}

/// Render state of one page. Raster and text exist only while `Rendered`.
pub struct PageSlot {
    page_number: usize,
    generation: u64,
    state: SlotState,
}

impl PageSlot {
    fn new(page_number: usize) -> Self {
        Self {
            page_number,
            generation: 0,
            state: SlotState::Empty,
        }
    }

    pub fn page_number(&self) -> usize {
        self.page_number
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn status(&self) -> SlotStatus {
        match self.state {
            SlotState::Empty => SlotStatus::Empty,
            SlotState::Loading { .. } => SlotStatus::Loading,
            SlotState::Rendered { .. } => SlotStatus::Rendered,
        }
    }

    pub fn scale(&self) -> Option<f32> {
        match self.state {
            SlotState::Empty => None,
            SlotState::Loading { scale, .. } | SlotState::Rendered { scale, .. } => Some(scale),
        }
    }

    pub fn raster(&self) -> Option<&RasterSurface> {
        match &self.state {
            SlotState::Rendered { raster, .. } => Some(raster),
            _ => None,
        }
    }

    pub fn text_overlay(&self) -> Option<&TextOverlay> {
        match &self.state {
            SlotState::Rendered { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Loading or Rendered at `scale`.
    pub fn is_current(&self, scale: f32) -> bool {
        self.scale().is_some_and(|own| same_scale(own, scale))
    }

    fn clear(&mut self) -> bool {
        match mem::replace(&mut self.state, SlotState::Empty) {
            SlotState::Empty => false,
            SlotState::Loading { jobs, .. } => {
                self.generation += 1;
                for job in jobs {
                    job.abort();
                }
                true
            }
            SlotState::Rendered { .. } => true,
        }
    }
}

/// Result of one render, tagged with the generation it was started under.
pub struct RenderCompletion {
    page: usize,
    generation: u64,
    scale: f32,
    result: Result<(RasterSurface, TextOverlay), RenderError>,
}

impl RenderCompletion {
    pub fn page(&self) -> usize {
        self.page
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Started { generation: u64 },
    Unchanged,
    Committed { page: usize },
    Stale { page: usize },
    Cancelled { page: usize },
}

pub struct PageSlotController {
    slots: Vec<PageSlot>,
    completions_tx: mpsc::UnboundedSender<RenderCompletion>,
    completions_rx: mpsc::UnboundedReceiver<RenderCompletion>,
}

impl PageSlotController {
    pub fn new(page_count: usize) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            slots: (1..=page_count).map(PageSlot::new).collect(),
            completions_tx,
            completions_rx,
        }
    }

    pub fn page_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, page_number: usize) -> Option<&PageSlot> {
        page_number
            .checked_sub(1)
            .and_then(|index| self.slots.get(index))
    }

    fn slot_mut(&mut self, page_number: usize) -> Option<&mut PageSlot> {
        page_number
            .checked_sub(1)
            .and_then(|index| self.slots.get_mut(index))
    }

    pub fn status(&self, page_number: usize) -> SlotStatus {
        self.slot(page_number)
            .map_or(SlotStatus::Empty, PageSlot::status)
    }

    /// Pages whose status is not `Empty`, ascending.
    pub fn active_pages(&self) -> Vec<usize> {
        self.slots
            .iter()
            .filter(|slot| slot.status() != SlotStatus::Empty)
            .map(PageSlot::page_number)
            .collect()
    }

    pub fn has_in_flight(&self) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.status() == SlotStatus::Loading)
    }

    pub fn resident_bytes(&self) -> usize {
        self.slots
            .iter()
            .filter_map(PageSlot::raster)
            .map(RasterSurface::byte_len)
            .sum()
    }

    /// Starts rendering `page_number` at `scale` unless the slot is already
    /// loading or rendered at that scale. Any previous content or in-flight
    /// work on the slot is released first.
    pub fn render(
        &mut self,
        session: &DocumentSession,
        page_number: usize,
        scale: f32,
    ) -> Result<RenderOutcome, RenderError> {
        let page_count = self.slots.len();
        let tx = self.completions_tx.clone();
        let slot = self
            .slot_mut(page_number)
            .ok_or(RenderError::OutOfRange {
                page: page_number,
                page_count,
            })?;
        if slot.is_current(scale) {
            return Ok(RenderOutcome::Unchanged);
        }
        slot.clear();

        let jobs = session.get_page(page_number, scale)?;
        slot.generation += 1;
        let generation = slot.generation;
        slot.state = SlotState::Loading {
            scale,
            jobs: jobs.abort_handles(),
        };
        debug!(page = page_number, generation, scale, "render started");

        tokio::spawn(async move {
            let PageJobs { raster, text } = jobs;
            let (raster, text) = tokio::join!(raster, text);
            let result = raster.and_then(|raster| text.map(|text| (raster, text)));
            let _ = tx.send(RenderCompletion {
                page: page_number,
                generation,
                scale,
                result,
            });
        });

        Ok(RenderOutcome::Started { generation })
    }

    /// Commits a completion if its generation is still live. Stale results
    /// are dropped on the spot. A failed render leaves the slot `Empty`.
    pub fn apply(&mut self, completion: RenderCompletion) -> Result<RenderOutcome, RenderError> {
        let RenderCompletion {
            page,
            generation,
            scale,
            result,
        } = completion;
        let Some(slot) = self.slot_mut(page) else {
            return Ok(RenderOutcome::Stale { page });
        };
        let live = matches!(slot.state, SlotState::Loading { .. }) && slot.generation == generation;
        if !live {
            debug!(page, generation, live = slot.generation, "discarding stale render");
            return Ok(RenderOutcome::Stale { page });
        }

        match result {
            Ok((raster, text)) => {
                slot.state = SlotState::Rendered {
                    scale,
                    raster,
                    text,
                };
                debug!(page, generation, "render committed");
                Ok(RenderOutcome::Committed { page })
            }
            Err(err) if err.is_cancelled() => {
                slot.state = SlotState::Empty;
                Ok(RenderOutcome::Cancelled { page })
            }
            Err(err) => {
                slot.state = SlotState::Empty;
                warn!(page, error = %err, "page render failed");
                Err(err)
            }
        }
    }

    /// Frees the slot's content and invalidates in-flight work. Safe on
    /// any page, including `Empty` and out-of-range ones.
    pub fn release(&mut self, page_number: usize) -> bool {
        let released = self
            .slot_mut(page_number)
            .is_some_and(|slot| slot.clear());
        if released {
            debug!(page = page_number, "slot released");
        }
        released
    }

    pub fn release_all(&mut self) -> Vec<usize> {
        let pages = self.active_pages();
        for page in &pages {
            self.release(*page);
        }
        pages
    }

    pub async fn next_completion(&mut self) -> Option<RenderCompletion> {
        self.completions_rx.recv().await
    }

    pub fn try_next_completion(&mut self) -> Option<RenderCompletion> {
        self.completions_rx.try_recv().ok()
    }
}

impl Drop for PageSlotController {
    fn drop(&mut self) {
        for slot in &mut self.slots {
            slot.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeProvider;

    async fn open(provider: &FakeProvider) -> DocumentSession {
        DocumentSession::open(provider, "doc.pdf").await.unwrap()
    }

    async fn apply_next(slots: &mut PageSlotController) -> Result<RenderOutcome, RenderError> {
        let completion = slots.next_completion().await.unwrap();
        slots.apply(completion)
    }

    #[tokio::test]
    async fn render_commits_raster_and_text() {
        let provider = FakeProvider::new(5);
        let session = open(&provider).await;
        let mut slots = PageSlotController::new(5);

        let outcome = slots.render(&session, 2, 1.5).unwrap();
        assert_eq!(outcome, RenderOutcome::Started { generation: 1 });
        assert_eq!(slots.status(2), SlotStatus::Loading);
        assert!(slots.slot(2).unwrap().raster().is_none());

        assert_eq!(
            apply_next(&mut slots).await.unwrap(),
            RenderOutcome::Committed { page: 2 }
        );
        let slot = slots.slot(2).unwrap();
        assert_eq!(slot.status(), SlotStatus::Rendered);
        assert_eq!(slot.scale(), Some(1.5));
        let raster = slot.raster().unwrap();
        assert_eq!((raster.width, raster.height), (150, 225));
        assert_eq!(slot.text_overlay().unwrap().plain_text(), "page 2");
        assert!(!slots.has_in_flight());
    }

    #[tokio::test]
    async fn render_at_current_scale_is_noop() {
        let provider = FakeProvider::new(5);
        let session = open(&provider).await;
        let mut slots = PageSlotController::new(5);

        slots.render(&session, 1, 1.0).unwrap();
        assert_eq!(
            slots.render(&session, 1, 1.0).unwrap(),
            RenderOutcome::Unchanged
        );
        apply_next(&mut slots).await.unwrap();
        assert_eq!(
            slots.render(&session, 1, 1.0).unwrap(),
            RenderOutcome::Unchanged
        );
        assert_eq!(slots.slot(1).unwrap().generation(), 1);
    }

    #[tokio::test]
    async fn older_completion_arriving_late_is_discarded() {
        let provider = FakeProvider::new(5);
        let session = open(&provider).await;
        let mut slots = PageSlotController::new(5);

        slots.render(&session, 3, 1.0).unwrap();
        let first = slots.next_completion().await.unwrap();
        assert!(first.result.is_ok());
        assert_eq!(first.page(), 3);
        assert_eq!(first.generation(), 1);
        assert_eq!(first.scale(), 1.0);

        slots.render(&session, 3, 2.0).unwrap();
        assert_eq!(
            slots.apply(first).unwrap(),
            RenderOutcome::Stale { page: 3 }
        );
        assert_eq!(slots.status(3), SlotStatus::Loading);

        assert_eq!(
            apply_next(&mut slots).await.unwrap(),
            RenderOutcome::Committed { page: 3 }
        );
        let slot = slots.slot(3).unwrap();
        assert_eq!(slot.scale(), Some(2.0));
        assert_eq!(slot.raster().unwrap().width, 200);
    }

    #[tokio::test]
    async fn superseded_render_never_mutates_slot() {
        let provider = FakeProvider::new(5);
        provider.hold(3, 1.0);
        let session = open(&provider).await;
        let mut slots = PageSlotController::new(5);

        slots.render(&session, 3, 1.0).unwrap();
        slots.render(&session, 3, 2.0).unwrap();
        provider.release(3, 1.0);

        let mut outcomes = Vec::new();
        for _ in 0..2 {
            outcomes.push(apply_next(&mut slots).await.unwrap());
        }
        assert!(outcomes.contains(&RenderOutcome::Stale { page: 3 }));
        assert!(outcomes.contains(&RenderOutcome::Committed { page: 3 }));

        let slot = slots.slot(3).unwrap();
        assert_eq!(slot.status(), SlotStatus::Rendered);
        assert_eq!(slot.scale(), Some(2.0));
        assert_eq!(slot.raster().unwrap().width, 200);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let provider = FakeProvider::new(5);
        let session = open(&provider).await;
        let mut slots = PageSlotController::new(5);

        assert!(!slots.release(4));
        assert!(!slots.release(4));
        assert!(!slots.release(99));
        assert_eq!(slots.status(4), SlotStatus::Empty);

        slots.render(&session, 4, 1.0).unwrap();
        apply_next(&mut slots).await.unwrap();
        assert!(slots.release(4));
        assert!(!slots.release(4));
        assert_eq!(slots.status(4), SlotStatus::Empty);
        assert!(slots.slot(4).unwrap().raster().is_none());
        assert_eq!(slots.resident_bytes(), 0);
    }

    #[tokio::test]
    async fn releasing_loading_slot_invalidates_completion() {
        let provider = FakeProvider::new(5);
        provider.hold(1, 1.0);
        let session = open(&provider).await;
        let mut slots = PageSlotController::new(5);

        slots.render(&session, 1, 1.0).unwrap();
        let generation = slots.slot(1).unwrap().generation();
        assert!(slots.release(1));
        assert!(slots.slot(1).unwrap().generation() > generation);

        assert_eq!(
            apply_next(&mut slots).await.unwrap(),
            RenderOutcome::Stale { page: 1 }
        );
        assert_eq!(slots.status(1), SlotStatus::Empty);
    }

    #[tokio::test]
    async fn failed_render_resets_slot_for_retry() {
        let provider = FakeProvider::new(5);
        provider.fail(2);
        let session = open(&provider).await;
        let mut slots = PageSlotController::new(5);

        slots.render(&session, 2, 1.0).unwrap();
        let err = apply_next(&mut slots).await.unwrap_err();
        assert_eq!(err.page(), 2);
        assert!(matches!(err, RenderError::Decoder { .. }));
        assert_eq!(slots.status(2), SlotStatus::Empty);

        provider.heal(2);
        slots.render(&session, 2, 1.0).unwrap();
        assert_eq!(
            apply_next(&mut slots).await.unwrap(),
            RenderOutcome::Committed { page: 2 }
        );
    }

    #[tokio::test]
    async fn render_out_of_range_is_rejected() {
        let provider = FakeProvider::new(5);
        let session = open(&provider).await;
        let mut slots = PageSlotController::new(5);
        assert!(matches!(
            slots.render(&session, 6, 1.0),
            Err(RenderError::OutOfRange { page: 6, .. })
        ));
        assert!(!slots.has_in_flight());
    }

    #[tokio::test]
    async fn resident_bytes_tracks_rendered_rasters() {
        let provider = FakeProvider::new(5);
        let session = open(&provider).await;
        let mut slots = PageSlotController::new(5);

        slots.render(&session, 1, 1.0).unwrap();
        slots.render(&session, 2, 1.0).unwrap();
        apply_next(&mut slots).await.unwrap();
        apply_next(&mut slots).await.unwrap();
        assert_eq!(slots.resident_bytes(), 2 * 100 * 150 * 4);
        assert_eq!(slots.release_all(), vec![1, 2]);
        assert_eq!(slots.resident_bytes(), 0);
    }
}
