mod config;
mod document;
mod error;
mod navigation;
mod progress;
mod slot;
mod viewer;
mod visibility;
mod window;

#[cfg(test)]
mod fake;

use serde::{Deserialize, Serialize};

pub use config::ViewerConfig;
pub use document::{
    Destination, DocumentBackend, DocumentProvider, DocumentSession, OutlineNode, PageHandle,
    PageJobs, RenderJob,
};
pub use error::{ConfigError, LoadError, NavigationError, RenderError, ViewerError};
pub use navigation::{NavigationController, NavigationTarget};
pub use progress::{
    progress_key, FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, ProgressRecord,
    ProgressStore,
};
pub use slot::{PageSlot, PageSlotController, RenderCompletion, RenderOutcome, SlotStatus};
pub use viewer::{Viewer, ViewerEvent, ViewportState};
pub use visibility::{PageLayout, VisibilityTracker};
pub use window::{SchedulePass, WindowScheduler};

/// Sizing descriptor for one page at a given zoom scale, in device-independent units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageViewport {
    pub width: f32,
    pub height: f32,
    pub scale: f32,
}

impl PageViewport {
    pub fn from_page_size(width: f32, height: f32, scale: f32) -> Self {
        Self {
            width: width * scale,
            height: height * scale,
            scale,
        }
    }

    pub fn pixel_size(&self) -> (u32, u32) {
        (
            self.width.round().max(1.0) as u32,
            self.height.round().max(1.0) as u32,
        )
    }
}

#[derive(Debug, Clone)]
pub struct RasterSurface {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RasterSurface {
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

/// One positioned run of text, in the same coordinate space as the raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSpan {
    pub text: String,
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextOverlay {
    pub spans: Vec<TextSpan>,
}

impl TextOverlay {
    pub fn plain_text(&self) -> String {
        self.spans
            .iter()
            .map(|span| span.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Scales are compared at 1/1000 precision so that float noise from repeated
/// zoom steps does not force a re-render.
pub fn quantize_scale(scale: f32) -> u32 {
    let scaled = (scale * 1000.0).round();
    if !scaled.is_finite() || scaled <= 0.0 {
        1
    } else if scaled > u32::MAX as f32 {
        u32::MAX
    } else {
        scaled as u32
    }
}

pub fn same_scale(a: f32, b: f32) -> bool {
    quantize_scale(a) == quantize_scale(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_scales_page_size() {
        let viewport = PageViewport::from_page_size(612.0, 792.0, 1.5);
        assert_eq!(viewport.pixel_size(), (918, 1188));
    }

    #[test]
    fn scales_compare_at_milli_precision() {
        assert!(same_scale(1.0, 1.0004));
        assert!(!same_scale(1.0, 1.25));
        assert_eq!(quantize_scale(f32::NAN), 1);
        assert_eq!(quantize_scale(-2.0), 1);
    }

    #[test]
    fn overlay_joins_span_text() {
        let overlay = TextOverlay {
            spans: vec![
                TextSpan {
                    text: "Hello".into(),
                    left: 0.0,
                    top: 0.0,
                    width: 10.0,
                    height: 2.0,
                },
                TextSpan {
                    text: "world".into(),
                    left: 12.0,
                    top: 0.0,
                    width: 10.0,
                    height: 2.0,
                },
            ],
        };
        assert_eq!(overlay.plain_text(), "Hello world");
    }
}
