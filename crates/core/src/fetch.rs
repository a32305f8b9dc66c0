//! Network fetch seam.
//!
//! The cache never talks to the network directly; it asks a [`Fetcher`] for
//! the raw bytes behind a canonical URL. `pixstash-client` provides the HTTP
//! implementation; tests plug in fakes.

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::Error;

/// Retrieves the raw bytes for a URL.
///
/// Implementations must allow concurrent independent calls. An `Ok` with an
/// empty body is allowed here; the orchestrator turns it into
/// `Error::EmptyResponse`.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Bytes, Error>;
}
