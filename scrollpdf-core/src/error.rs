use thiserror::Error;

/// Whole-document failure. The viewer is left without an open document.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("document locator is empty")]
    EmptyLocator,
    #[error("failed to open document {locator:?}")]
    Decoder {
        locator: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to read outline of {locator:?}")]
    Outline {
        locator: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Per-page failure. Never affects sibling pages.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("page {page} out of range (document has {page_count} pages)")]
    OutOfRange { page: usize, page_count: usize },
    #[error("failed to render page {page}")]
    Decoder {
        page: usize,
        #[source]
        source: anyhow::Error,
    },
    #[error("render of page {page} was cancelled")]
    Cancelled { page: usize },
    #[error("render task for page {page} panicked")]
    Panicked { page: usize },
}

impl RenderError {
    pub fn page(&self) -> usize {
        match self {
            RenderError::OutOfRange { page, .. }
            | RenderError::Decoder { page, .. }
            | RenderError::Cancelled { page }
            | RenderError::Panicked { page } => *page,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RenderError::Cancelled { .. })
    }
}

#[derive(Debug, Error)]
pub enum NavigationError {
    #[error("no document is open")]
    NoDocument,
    #[error("destination could not be resolved")]
    Unresolvable(#[source] anyhow::Error),
    #[error("page {page} out of range (document has {page_count} pages)")]
    OutOfRange { page: usize, page_count: usize },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("no document is open")]
    NoDocument,
    #[error("scale must be a positive finite number, got {0}")]
    InvalidScale(f32),
}
