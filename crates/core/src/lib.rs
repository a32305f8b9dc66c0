//! Core types and shared functionality for pixstash.
//!
//! This crate provides:
//! - Two-tier (memory + disk) image cache orchestration
//! - Cache key derivation and request normalization
//! - The fetcher and codec seams implemented by `pixstash-client`
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod fetch;
pub mod loader;
pub mod request;

pub use cache::{CacheKey, DiskStore, MemoryStore};
pub use codec::{Codec, DecodeOptions, EncodeFormat, EncodeOptions};
pub use config::AppConfig;
pub use error::Error;
pub use fetch::Fetcher;
pub use loader::{Completion, ConsumerId, ImageCache, LoaderOptions, Resolution, ResolveHandle, Tier};
pub use request::{ImageRequest, Scale};
