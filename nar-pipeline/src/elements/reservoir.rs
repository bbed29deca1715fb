//! Bounded hand-off between the push side and the pull chain
//!
//! The producer half is the push-side terminus (behind the
//! [`super::StreamValidator`]); the consumer half is the head of the pull
//! chain. The producer blocks while the reservoir is full and the consumer
//! blocks while it is empty.

use crate::msg::{Msg, PipelineElementDownstream, PipelineElementUpstream};
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use tracing::trace;

/// Occupancy counters readable from any thread
#[derive(Default)]
struct ReservoirLevels {
    msgs: AtomicUsize,
    jiffies: AtomicU64,
}

struct ReservoirShared {
    // Ring buffer halves are only touched with this held, so waits never miss a wake
    lock: Mutex<()>,
    not_full: Condvar,
    not_empty: Condvar,
    levels: ReservoirLevels,
    capacity: usize,
}

/// Create a reservoir holding at most `capacity` messages
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn msg_reservoir(capacity: usize) -> (ReservoirProducer, ReservoirConsumer) {
    assert!(capacity > 0, "reservoir capacity must be non-zero");
    let (prod, cons) = HeapRb::<Msg>::new(capacity).split();
    let shared = Arc::new(ReservoirShared {
        lock: Mutex::new(()),
        not_full: Condvar::new(),
        not_empty: Condvar::new(),
        levels: ReservoirLevels::default(),
        capacity,
    });
    (
        ReservoirProducer {
            prod,
            shared: Arc::clone(&shared),
        },
        ReservoirConsumer { cons, shared },
    )
}

/// Read-only view of a reservoir's fill level
#[derive(Clone)]
pub struct ReservoirLevel {
    shared: Arc<ReservoirShared>,
}

impl ReservoirLevel {
    pub fn msgs(&self) -> usize {
        self.shared.levels.msgs.load(Ordering::Acquire)
    }

    /// Audio currently buffered
    pub fn jiffies(&self) -> u64 {
        self.shared.levels.jiffies.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

/// Push half
pub struct ReservoirProducer {
    prod: HeapProd<Msg>,
    shared: Arc<ReservoirShared>,
}

impl ReservoirProducer {
    pub fn level(&self) -> ReservoirLevel {
        ReservoirLevel {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl PipelineElementDownstream for ReservoirProducer {
    fn push(&mut self, msg: Msg) {
        let jiffies = msg.jiffies();
        let mut guard = self.shared.lock.lock().unwrap();
        let mut pending = msg;
        loop {
            match self.prod.try_push(pending) {
                Ok(()) => break,
                Err(msg) => {
                    trace!("Reservoir full, producer waiting");
                    pending = msg;
                    guard = self.shared.not_full.wait(guard).unwrap();
                }
            }
        }
        self.shared.levels.msgs.fetch_add(1, Ordering::AcqRel);
        self.shared.levels.jiffies.fetch_add(jiffies, Ordering::AcqRel);
        drop(guard);
        self.shared.not_empty.notify_one();
    }
}

/// Pull half
pub struct ReservoirConsumer {
    cons: HeapCons<Msg>,
    shared: Arc<ReservoirShared>,
}

impl ReservoirConsumer {
    pub fn level(&self) -> ReservoirLevel {
        ReservoirLevel {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl PipelineElementUpstream for ReservoirConsumer {
    fn pull(&mut self) -> Msg {
        let mut guard = self.shared.lock.lock().unwrap();
        let msg = loop {
            if let Some(msg) = self.cons.try_pop() {
                break msg;
            }
            guard = self.shared.not_empty.wait(guard).unwrap();
        };
        self.shared.levels.msgs.fetch_sub(1, Ordering::AcqRel);
        self.shared
            .levels
            .jiffies
            .fetch_sub(msg.jiffies(), Ordering::AcqRel);
        drop(guard);
        self.shared.not_full.notify_one();
        msg
    }
}
