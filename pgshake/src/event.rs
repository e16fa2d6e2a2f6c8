//! The [`Subscribable`] event bus.
use std::fmt;

use futures_core::future::BoxFuture;

use crate::{ErrorKind, Result, common::BoxError};

type Handler<E> = Box<dyn FnMut(E) -> BoxFuture<'static, Result<(), BoxError>> + Send>;

/// Token returned by [`Subscribable::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// In-order asynchronous fan-out of a single event kind.
///
/// On publish, subscribers are called one at a time in subscription order, each handler future
/// runs to completion before the next one is called. Publish is awaited by the connection before
/// it reads the next message, so a slow handler stalls the connection.
///
/// If a handler fails, the remaining subscribers are skipped and the error is returned to whichever
/// operation triggered the publish.
pub struct Subscribable<E> {
    next_id: u64,
    subscribers: Vec<(SubscriptionId, Handler<E>)>,
}

impl<E> Subscribable<E> {
    /// Create empty event bus.
    pub fn new() -> Self {
        Self { next_id: 0, subscribers: Vec::new() }
    }

    /// Add an asynchronous event handler.
    pub fn subscribe<F, Fut>(&mut self, mut handler: F) -> SubscriptionId
    where
        F: FnMut(E) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, Box::new(move |event| Box::pin(handler(event)))));
        id
    }

    /// Remove a handler, returns `false` if it was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let len = self.subscribers.len();
        self.subscribers.retain(|(sub, _)| *sub != id);
        self.subscribers.len() != len
    }

    /// Number of subscribers.
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Returns `true` if there is no subscriber.
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl<E: Clone> Subscribable<E> {
    /// Deliver `event` to every subscriber, sequentially.
    pub async fn publish(&mut self, event: E) -> Result<()> {
        for (_, handler) in &mut self.subscribers {
            handler(event.clone()).await.map_err(ErrorKind::Subscriber)?;
        }
        Ok(())
    }
}

impl<E> Default for Subscribable<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Subscribable<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribable").field("subscribers", &self.subscribers.len()).finish()
    }
}
