//! Asynchronous completion delivery.
//!
//! Two ways to receive a resolve that runs as its own task:
//!
//! - [`ImageCache::spawn_resolve`] returns a [`ResolveHandle`], a future that
//!   can be awaited or aborted.
//! - [`ImageCache::load_into`] binds a consumer and sends a [`Completion`] on a
//!   channel. Only the consumer's most recent binding is ever delivered: an
//!   older load that finishes later is dropped. A memory clear does not change
//!   this. If the receiver is gone, the completion is dropped silently.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{ImageCache, Resolution};
use crate::Error;
use crate::codec::Codec;
use crate::request::ImageRequest;

/// Identifies a display slot (a view, a list row, a widget) that receives images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(pub u64);

/// Proof of a specific binding of a consumer to a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    consumer: ConsumerId,
    generation: u64,
}

impl Ticket {
    pub fn consumer(&self) -> ConsumerId {
        self.consumer
    }
}

/// Bookkeeping of which load each consumer is currently waiting for.
///
/// Only pending bindings are kept: a binding is released when its completion
/// is delivered, so the registry is bounded by the loads in flight.
#[derive(Debug, Default)]
pub struct BindingRegistry {
    next_generation: AtomicU64,
    bound: DashMap<ConsumerId, u64>,
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `consumer` to a new load, superseding any earlier binding.
    pub fn bind(&self, consumer: ConsumerId) -> Ticket {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.bound.insert(consumer, generation);
        Ticket { consumer, generation }
    }

    /// Whether `ticket` is still the consumer's pending binding.
    pub fn is_current(&self, ticket: &Ticket) -> bool {
        self.bound
            .get(&ticket.consumer)
            .is_some_and(|generation| *generation == ticket.generation)
    }

    /// Release `ticket` if it is still current. Returns whether its completion
    /// should be delivered.
    pub fn complete(&self, ticket: &Ticket) -> bool {
        self.bound
            .remove_if(&ticket.consumer, |_, generation| *generation == ticket.generation)
            .is_some()
    }

    /// Forget `consumer`'s binding, e.g. when the display slot is discarded.
    /// A load still in flight for it is not delivered.
    pub fn unbind(&self, consumer: ConsumerId) {
        self.bound.remove(&consumer);
    }

    pub fn len(&self) -> usize {
        self.bound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bound.is_empty()
    }
}

/// A finished load addressed to a consumer.
#[derive(Debug)]
pub struct Completion<A> {
    pub consumer: ConsumerId,
    pub request: ImageRequest,
    pub result: Result<Resolution<A>, Error>,
}

/// Handle to a resolve running on its own task.
///
/// Dropping the handle detaches the task: the resolve still completes and
/// still populates the cache.
pub struct ResolveHandle<A> {
    inner: JoinHandle<Result<Resolution<A>, Error>>,
}

impl<A> ResolveHandle<A> {
    /// Cancel the resolve. Awaiting the handle afterwards yields `Error::Internal`.
    pub fn abort(&self) {
        self.inner.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

impl<A> Future for ResolveHandle<A> {
    type Output = Result<Resolution<A>, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx).map(|joined| joined.map_err(Error::from).and_then(|result| result))
    }
}

impl<C: Codec> ImageCache<C> {
    /// Run a resolve as an independent task.
    pub fn spawn_resolve(self: &Arc<Self>, request: ImageRequest) -> ResolveHandle<C::Artifact> {
        let cache = Arc::clone(self);
        let inner = tokio::spawn(async move { cache.resolve_with_tier(&request).await });
        ResolveHandle { inner }
    }

    /// Bind `consumer` to `request` and deliver the result on `sender`.
    ///
    /// Rebinding the same consumer before this load finishes makes this load's
    /// completion stale; stale completions are never sent. Clearing the memory
    /// tier meanwhile does not revive them.
    pub fn load_into(
        self: &Arc<Self>, consumer: ConsumerId, request: ImageRequest,
        sender: mpsc::UnboundedSender<Completion<C::Artifact>>,
    ) -> Ticket {
        let ticket = self.bindings.bind(consumer);
        let cache = Arc::clone(self);

        tokio::spawn(async move {
            let result = cache.resolve_with_tier(&request).await;

            if !cache.bindings.complete(&ticket) {
                tracing::debug!(consumer = ticket.consumer.0, url = request.url(), "dropping stale completion");
                return;
            }

            if sender.send(Completion { consumer, request, result }).is_err() {
                tracing::trace!(consumer = consumer.0, "completion receiver gone");
            }
        });

        ticket
    }
}
