//! Bounded cross-thread envelope queue.
//!
//! The only way work crosses event loops: any thread pushes boxed
//! envelopes, a user-event pump on the consumer's loop drains them in FIFO
//! order. A full queue bounces the envelope back to the producer, which is
//! expected to hold it and block its upstream pump; the consumer fires an
//! optional *space trigger* after draining so the producer's loop can wake
//! up and retry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::upump::{PumpCb, Upump, UpumpMgr, UpumpTrigger};

/// Why a push was refused, carrying the envelope back.
#[derive(Debug)]
pub enum UqueuePushError<T> {
    /// The queue is at capacity; retry after the space trigger fires.
    Full(T),
    /// The consumer side is gone.
    Closed(T),
}

struct Shared {
    len: AtomicUsize,
    capacity: usize,
    space_trigger: Mutex<Option<UpumpTrigger>>,
}

/// Producer half. Clonable and `Send`; any thread may push.
pub struct Uqueue<T> {
    tx: SyncSender<T>,
    trigger: UpumpTrigger,
    shared: Arc<Shared>,
}

impl<T> Clone for Uqueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            trigger: self.trigger.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> Uqueue<T> {
    /// Push an envelope. On success the consumer's loop is woken.
    pub fn push(&self, item: T) -> std::result::Result<(), UqueuePushError<T>> {
        match self.tx.try_send(item) {
            Ok(()) => {
                self.shared.len.fetch_add(1, Ordering::Release);
                self.trigger.trigger();
                Ok(())
            }
            Err(TrySendError::Full(item)) => Err(UqueuePushError::Full(item)),
            Err(TrySendError::Disconnected(item)) => Err(UqueuePushError::Closed(item)),
        }
    }

    /// Envelopes currently queued (racy snapshot).
    pub fn len(&self) -> usize {
        self.shared.len.load(Ordering::Acquire)
    }

    /// True when nothing is queued (racy snapshot).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue capacity.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Install the trigger fired after the consumer drains envelopes.
    /// Typically a user-event pump on the producer's loop.
    pub fn set_space_trigger(&self, trigger: UpumpTrigger) {
        *self.shared.space_trigger.lock().unwrap() = Some(trigger);
    }
}

/// Create a queue of `depth` envelopes whose consumer is a user-event
/// pump on `mgr`'s loop. Every drained envelope is handed to `handler`
/// in push order. The returned pump is stopped; start it to begin
/// consuming.
pub fn uqueue<T: Send + 'static>(
    mgr: &UpumpMgr,
    depth: usize,
    mut handler: impl FnMut(T) + 'static,
) -> Result<(Uqueue<T>, Upump)> {
    let (tx, rx): (SyncSender<T>, Receiver<T>) = sync_channel(depth);
    let shared = Arc::new(Shared {
        len: AtomicUsize::new(0),
        capacity: depth,
        space_trigger: Mutex::new(None),
    });

    let drain_shared = Arc::clone(&shared);
    let cb: PumpCb = Box::new(move || {
        let mut drained = false;
        while let Ok(item) = rx.try_recv() {
            drain_shared.len.fetch_sub(1, Ordering::Release);
            drained = true;
            handler(item);
        }
        if drained {
            if let Some(trigger) = drain_shared.space_trigger.lock().unwrap().as_ref() {
                trigger.trigger();
            }
        }
    });
    let (pump, trigger) = mgr.alloc_user_event(cb)?;

    Ok((
        Uqueue {
            tx,
            trigger,
            shared,
        },
        pump,
    ))
}
