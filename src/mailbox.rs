//! Push-to-pull bridge: a queue plus at most one parked consumer.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

/// What [`Mailbox::try_next`] found.
#[derive(Debug)]
pub enum Next<T> {
    Item(T),
    Closed,
    /// Nothing queued yet; the next push or close resolves this receiver.
    /// `None` means the mailbox closed.
    Wait(oneshot::Receiver<Option<T>>),
}

#[derive(Debug)]
struct State<T> {
    queue: VecDeque<T>,
    waiter: Option<oneshot::Sender<Option<T>>>,
    closed: bool,
}

/// Items pushed before the consumer asks are queued; a consumer that asks
/// first parks and is handed the next item directly. Either order delivers
/// every item exactly once, in push order.
#[derive(Debug)]
pub struct Mailbox<T> {
    state: Arc<Mutex<State<T>>>,
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                queue: VecDeque::new(),
                waiter: None,
                closed: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // The state stays consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Deliver an item. Ignored after [`Mailbox::close`].
    pub fn push(&self, item: T) {
        let mut state = self.lock();
        if state.closed {
            return;
        }

        match state.waiter.take() {
            Some(waiter) => {
                if let Err(Some(item)) = waiter.send(Some(item)) {
                    // The parked consumer went away; keep the item for the next one.
                    state.queue.push_back(item);
                }
            }
            None => state.queue.push_back(item),
        }
    }

    /// No more items will arrive. Already queued items are still delivered.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        if let Some(waiter) = state.waiter.take() {
            let _ = waiter.send(None);
        }
    }

    pub fn try_next(&self) -> Next<T> {
        let mut state = self.lock();
        if let Some(item) = state.queue.pop_front() {
            return Next::Item(item);
        }
        if state.closed {
            return Next::Closed;
        }

        let (tx, rx) = oneshot::channel();
        state.waiter = Some(tx);
        Next::Wait(rx)
    }

    /// The next item, or `None` once closed and drained.
    #[cfg(test)]
    pub async fn next(&self) -> Option<T> {
        match self.try_next() {
            Next::Item(item) => Some(item),
            Next::Closed => None,
            Next::Wait(rx) => rx.await.ok().flatten(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
