//! Image codec seam.
//!
//! A [`Codec`] turns raw bytes into a displayable artifact and back. Calls are
//! CPU-bound and run on the blocking pool, so implementations must be
//! `Send + Sync + 'static` and keep no mutable state.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Options passed to [`Codec::decode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Power-of-two subsample factor; 1 decodes at full resolution.
    pub sample_size: u32,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self { sample_size: 1 }
    }
}

/// Format used when persisting artifacts to the disk tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodeFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
}

impl EncodeFormat {
    /// Whether `quality` has any effect for this format.
    pub fn is_lossy(&self) -> bool {
        matches!(self, EncodeFormat::Jpeg)
    }

    /// Conventional file extension.
    pub fn extension(&self) -> &'static str {
        match self {
            EncodeFormat::Png => "png",
            EncodeFormat::Jpeg => "jpg",
            EncodeFormat::Webp => "webp",
        }
    }
}

/// Options passed to [`Codec::encode`]. Defaults to lossless PNG at quality 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeOptions {
    pub format: EncodeFormat,
    /// 1..=100; ignored by lossless formats.
    pub quality: u8,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self { format: EncodeFormat::Png, quality: 100 }
    }
}

/// Decodes raw bytes into an artifact and encodes artifacts for persistence.
pub trait Codec: Send + Sync + 'static {
    /// The decoded, ready-to-use representation.
    type Artifact: Send + Sync + 'static;

    /// Read the source `(width, height)` without decoding pixel data.
    fn dimensions(&self, bytes: &[u8]) -> Result<(u32, u32), Error>;

    /// Decode `bytes`, subsampling by `options.sample_size` as part of the decode.
    fn decode(&self, bytes: &[u8], options: &DecodeOptions) -> Result<Self::Artifact, Error>;

    /// Encode an artifact for the disk tier.
    fn encode(&self, artifact: &Self::Artifact, options: &EncodeOptions) -> Result<Vec<u8>, Error>;
}
