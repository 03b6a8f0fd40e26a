use std::collections::{BTreeSet, HashMap};

use tracing::trace;

/// Derives the current page from per-container intersection ratios.
///
/// Reports are buffered: a page becomes a candidate when its ratio rises
/// past the threshold, and `flush` resolves all candidates of a batch to the
/// one with the highest ratio. Arrival order within a batch never matters.
#[derive(Debug)]
pub struct VisibilityTracker {
    threshold: f32,
    observed: HashMap<usize, f32>,
    candidates: BTreeSet<usize>,
}

impl VisibilityTracker {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            observed: HashMap::new(),
            candidates: BTreeSet::new(),
        }
    }

    /// Registers a mounted page container. Re-registering keeps its ratio.
    pub fn observe(&mut self, page: usize) {
        self.observed.entry(page).or_insert(0.0);
    }

    /// Deregisters an unmounted container and drops any pending candidacy.
    pub fn unobserve(&mut self, page: usize) -> bool {
        self.candidates.remove(&page);
        self.observed.remove(&page).is_some()
    }

    pub fn is_observed(&self, page: usize) -> bool {
        self.observed.contains_key(&page)
    }

    pub fn observed_pages(&self) -> Vec<usize> {
        let mut pages: Vec<_> = self.observed.keys().copied().collect();
        pages.sort_unstable();
        pages
    }

    pub fn ratio(&self, page: usize) -> Option<f32> {
        self.observed.get(&page).copied()
    }

    /// Records a new ratio for an observed container. Returns whether the
    /// report was an upward threshold crossing. Unobserved pages are ignored.
    pub fn report(&mut self, page: usize, ratio: f32) -> bool {
        let ratio = if ratio.is_nan() {
            0.0
        } else {
            ratio.clamp(0.0, 1.0)
        };
        let Some(previous) = self.observed.get_mut(&page) else {
            return false;
        };
        let crossed = *previous < self.threshold && ratio >= self.threshold;
        *previous = ratio;
        if crossed {
            trace!(page, ratio, "visibility threshold crossed");
            self.candidates.insert(page);
        }
        crossed
    }

    /// Ends the current batch. Returns the crossing page with the highest
    /// ratio (lowest page on ties), if any still clears the threshold.
    pub fn flush(&mut self) -> Option<usize> {
        let threshold = self.threshold;
        let best = self
            .candidates
            .iter()
            .filter_map(|page| self.observed.get(page).map(|ratio| (*page, *ratio)))
            .filter(|(_, ratio)| *ratio >= threshold)
            .fold(None, |best: Option<(usize, f32)>, (page, ratio)| match best {
                Some((_, best_ratio)) if best_ratio >= ratio => best,
                _ => Some((page, ratio)),
            });
        self.candidates.clear();
        best.map(|(page, _)| page)
    }

    pub fn clear(&mut self) {
        self.observed.clear();
        self.candidates.clear();
    }
}

/// Vertical stacking of page containers separated by a fixed gap.
#[derive(Debug, Clone)]
pub struct PageLayout {
    heights: Vec<f32>,
    offsets: Vec<f32>,
    gap: f32,
}

impl PageLayout {
    pub fn uniform(page_count: usize, height: f32, gap: f32) -> Self {
        let mut layout = Self {
            heights: vec![height.max(0.0); page_count],
            offsets: Vec::new(),
            gap: gap.max(0.0),
        };
        layout.recompute();
        layout
    }

    fn recompute(&mut self) {
        self.offsets.clear();
        let mut top = 0.0;
        for height in &self.heights {
            self.offsets.push(top);
            top += height + self.gap;
        }
    }

    pub fn page_count(&self) -> usize {
        self.heights.len()
    }

    pub fn height_of(&self, page: usize) -> Option<f32> {
        page.checked_sub(1).and_then(|i| self.heights.get(i)).copied()
    }

    /// Top edge of the page's container.
    pub fn offset_of(&self, page: usize) -> Option<f32> {
        page.checked_sub(1).and_then(|i| self.offsets.get(i)).copied()
    }

    pub fn total_height(&self) -> f32 {
        match (self.offsets.last(), self.heights.last()) {
            (Some(top), Some(height)) => top + height,
            _ => 0.0,
        }
    }

    /// Replaces a measured height. Returns whether anything moved.
    pub fn set_height(&mut self, page: usize, height: f32) -> bool {
        let Some(slot) = page.checked_sub(1).and_then(|i| self.heights.get_mut(i)) else {
            return false;
        };
        let height = height.max(0.0);
        if (*slot - height).abs() < f32::EPSILON {
            return false;
        }
        *slot = height;
        self.recompute();
        true
    }

    pub fn scale_heights(&mut self, factor: f32) {
        if !factor.is_finite() || factor <= 0.0 {
            return;
        }
        for height in &mut self.heights {
            *height *= factor;
        }
        self.recompute();
    }

    /// Page containers overlapping `[scroll_top, scroll_top + viewport_height)`
    /// with their intersection ratio (visible height / container height).
    pub fn intersections(&self, scroll_top: f32, viewport_height: f32) -> Vec<(usize, f32)> {
        let bottom = scroll_top + viewport_height.max(0.0);
        let first = self
            .offsets
            .iter()
            .zip(&self.heights)
            .position(|(top, height)| top + height > scroll_top)
            .unwrap_or(self.heights.len());

        let mut hits = Vec::new();
        for index in first..self.heights.len() {
            let top = self.offsets[index];
            if top >= bottom {
                break;
            }
            let height = self.heights[index];
            if height <= 0.0 {
                continue;
            }
            let visible = (top + height).min(bottom) - top.max(scroll_top);
            if visible > 0.0 {
                hits.push((index + 1, visible / height));
            }
        }
        hits
    }
}
