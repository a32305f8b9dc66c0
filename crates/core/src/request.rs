//! Image requests and URL canonicalization.
//!
//! A request is a source URL plus the transform parameters that change the
//! decoded output. Both are normalized before a cache key is derived so that
//! requests differing only in irrelevant details share one entry.

use url::Url;

use crate::Error;

/// Error type for URL canonicalization failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<UrlError> for Error {
    fn from(err: UrlError) -> Self {
        Error::InvalidRequest(err.to_string())
    }
}

/// Canonicalize a URL string for consistent cache keys.
///
/// Normalization steps:
/// 1. Trim leading/trailing whitespace
/// 2. Default scheme to https:// if missing
/// 3. Lowercase the host
/// 4. Remove fragment (#...)
/// 5. Keep query string intact (do not reorder)
pub fn canonicalize(input: &str) -> Result<Url, UrlError> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let url_str = if trimmed.contains("://") { trimmed.to_string() } else { format!("https://{trimmed}") };

    let mut parsed = Url::parse(&url_str).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }

    if let Some(host) = parsed.host_str() {
        let host = host.to_lowercase();
        parsed
            .set_host(Some(&host))
            .map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    }

    parsed.set_fragment(None);

    Ok(parsed)
}

/// Requested output size.
///
/// `Native` keeps the source resolution. `Target` asks the codec to subsample
/// at decode time to at least the given size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Scale {
    #[default]
    Native,
    Target { width: u32, height: u32 },
}

impl Scale {
    /// Build from the consumer-facing pair where `-1` means "no scaling".
    ///
    /// Scaling only applies when both values are positive; any other
    /// combination is the same request as `-1, -1`.
    pub fn from_dimensions(width: i32, height: i32) -> Self {
        match (u32::try_from(width), u32::try_from(height)) {
            (Ok(width), Ok(height)) if width > 0 && height > 0 => Scale::Target { width, height },
            _ => Scale::Native,
        }
    }

    /// Canonical string form used as a key component.
    pub fn canonical(&self) -> String {
        match self {
            Scale::Native => "native".to_string(),
            Scale::Target { width, height } => format!("{width}x{height}"),
        }
    }
}

/// A request for a decoded image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    url: String,
    scale: Scale,
}

impl ImageRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), scale: Scale::Native }
    }

    /// Request subsampling to at least `width` x `height` (`-1` disables).
    pub fn with_scale(mut self, width: i32, height: i32) -> Self {
        self.scale = Scale::from_dimensions(width, height);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn scale(&self) -> Scale {
        self.scale
    }

    /// Validate and canonicalize the URL.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRequest` if the URL is empty, malformed, or not
    /// http(s).
    pub fn canonical_url(&self) -> Result<Url, Error> {
        Ok(canonicalize(&self.url)?)
    }
}
