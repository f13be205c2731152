//! Single-slot frame mailbox between capture and delivery
//!
//! The producer never blocks: a frame that has not been picked up by the time
//! the next one arrives is discarded and replaced.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::utils::CachePadded;
use flume::{Receiver, RecvTimeoutError, Sender, TrySendError};

#[derive(Debug, Default)]
pub struct MailboxStats {
    posted: AtomicU64,
    taken: AtomicU64,
    discarded: AtomicU64,
}

impl MailboxStats {
    /// (posted, taken, discarded)
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.posted.load(Ordering::Relaxed),
            self.taken.load(Ordering::Relaxed),
            self.discarded.load(Ordering::Relaxed),
        )
    }
}

/// Create a connected mailbox pair.
pub fn mailbox<T>() -> (MailboxSender<T>, MailboxReceiver<T>) {
    let (tx, rx) = flume::bounded(1);
    let stats = Arc::new(CachePadded::new(MailboxStats::default()));
    (
        MailboxSender {
            tx,
            stale: rx.clone(),
            stats: stats.clone(),
        },
        MailboxReceiver { rx, stats },
    )
}

pub struct MailboxSender<T> {
    tx: Sender<T>,
    /// Used to evict the unconsumed item when a newer one arrives.
    stale: Receiver<T>,
    stats: Arc<CachePadded<MailboxStats>>,
}

impl<T> MailboxSender<T> {
    /// Post an item, replacing any unconsumed one. Returns true if a stale
    /// item was discarded to make room.
    pub fn post(&self, mut item: T) -> bool {
        let mut replaced = false;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => {
                    self.stats.posted.fetch_add(1, Ordering::Relaxed);
                    return replaced;
                }
                Err(TrySendError::Full(returned)) => {
                    if self.stale.try_recv().is_ok() {
                        self.stats.discarded.fetch_add(1, Ordering::Relaxed);
                        metrics::counter!("frames_dropped").increment(1);
                        replaced = true;
                    }
                    item = returned;
                }
                // Unreachable while `stale` is alive
                Err(TrySendError::Disconnected(_)) => return replaced,
            }
        }
    }

    pub fn stats(&self) -> Arc<CachePadded<MailboxStats>> {
        self.stats.clone()
    }
}

pub struct MailboxReceiver<T> {
    rx: Receiver<T>,
    stats: Arc<CachePadded<MailboxStats>>,
}

/// Outcome of waiting on the mailbox
#[derive(Debug)]
pub enum Take<T> {
    Item(T),
    Empty,
    Closed,
}

impl<T> MailboxReceiver<T> {
    /// Wait up to `timeout` for the latest item.
    pub fn take(&self, timeout: Duration) -> Take<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => {
                self.stats.taken.fetch_add(1, Ordering::Relaxed);
                Take::Item(item)
            }
            Err(RecvTimeoutError::Timeout) => Take::Empty,
            Err(RecvTimeoutError::Disconnected) => Take::Closed,
        }
    }

    pub fn stats(&self) -> Arc<CachePadded<MailboxStats>> {
        self.stats.clone()
    }
}
