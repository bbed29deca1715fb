//! Bounded, prunable backlog for [`super::SenderThread`]
//!
//! Entries live in a fixed arena and are linked by index; freed slots go on
//! a free list so steady-state enqueue and dequeue never allocate. When the
//! backlog is full, a pruning pass throws away what a consumer that has
//! fallen behind no longer needs before the new message is accepted.

use crate::msg::{Msg, MsgFactory, MsgKind};
use std::sync::Arc;
use tracing::{debug, error};

/// Default maximum backlog
pub const DEFAULT_MAX_BACKLOG: usize = 100;

#[derive(Debug)]
struct Slot {
    msg: Option<Msg>,
    next: Option<usize>,
}

/// FIFO of messages awaiting a slow consumer
pub struct SenderMsgQueue {
    factory: Arc<MsgFactory>,
    slots: Vec<Slot>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    count: usize,
}

impl SenderMsgQueue {
    /// # Panics
    ///
    /// Panics if `max_count` is zero.
    pub fn new(factory: Arc<MsgFactory>, max_count: usize) -> Self {
        assert!(max_count > 0, "sender backlog must be non-zero");
        let slots = (0..max_count)
            .map(|_| Slot {
                msg: None,
                next: None,
            })
            .collect();
        Self {
            factory,
            slots,
            free: (0..max_count).rev().collect(),
            head: None,
            tail: None,
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Append `msg`, pruning first if the backlog is full
    ///
    /// # Panics
    ///
    /// Panics if the backlog is still full after pruning.
    pub fn enqueue(&mut self, msg: Msg) {
        if self.free.is_empty() {
            self.prune();
        }
        let Some(index) = self.free.pop() else {
            error!(
                "SenderMsgQueue: backlog of {} exceeded by {:?}",
                self.capacity(),
                msg
            );
            panic!("sender backlog of {} exceeded", self.capacity());
        };
        self.slots[index] = Slot {
            msg: Some(msg),
            next: None,
        };
        match self.tail {
            Some(tail) => self.slots[tail].next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.count += 1;
    }

    pub fn dequeue(&mut self) -> Option<Msg> {
        let index = self.head?;
        let slot = &mut self.slots[index];
        let msg = slot.msg.take();
        self.head = slot.next.take();
        if self.head.is_none() {
            self.tail = None;
        }
        self.free.push(index);
        self.count -= 1;
        msg
    }

    fn drain_all(&mut self) -> Vec<Msg> {
        let mut msgs = Vec::with_capacity(self.count);
        while let Some(msg) = self.dequeue() {
            msgs.push(msg);
        }
        msgs
    }

    /// Drop messages a lagging consumer no longer needs
    ///
    /// Audio goes first, then everything superseded by the newest mode,
    /// start-of-stream track and decoded stream in turn. Finally only the
    /// newest delay, metatext and halt survive anywhere in the queue.
    fn prune(&mut self) {
        let before = self.count;
        let msgs = self.drain_all();
        let msgs = self.collapse_audio(msgs);
        let msgs = drop_before_last(msgs, |m| m.kind() == MsgKind::Mode, |m| {
            !matches!(
                m.kind(),
                MsgKind::Mode | MsgKind::StreamInterrupted | MsgKind::Quit
            )
        });
        let msgs = drop_before_last(msgs, is_start_of_stream, |m| match m {
            Msg::Track(_) => is_start_of_stream(m),
            _ => !matches!(
                m.kind(),
                MsgKind::Mode | MsgKind::Delay | MsgKind::StreamInterrupted | MsgKind::Quit
            ),
        });
        let msgs = drop_before_last(msgs, |m| m.kind() == MsgKind::DecodedStream, |m| {
            !matches!(
                m.kind(),
                MsgKind::Mode
                    | MsgKind::Track
                    | MsgKind::Delay
                    | MsgKind::EncodedStream
                    | MsgKind::StreamInterrupted
                    | MsgKind::Quit
            )
        });
        let msgs = [MsgKind::Delay, MsgKind::MetaText, MsgKind::Halt]
            .into_iter()
            .fold(msgs, keep_latest);
        for msg in msgs {
            self.enqueue_unpruned(msg);
        }
        debug!("SenderMsgQueue: pruned {} -> {} msgs", before, self.count);
    }

    fn enqueue_unpruned(&mut self, msg: Msg) {
        let index = self.free.pop().unwrap_or_else(|| unreachable!("pruning grew the queue"));
        self.slots[index] = Slot {
            msg: Some(msg),
            next: None,
        };
        match self.tail {
            Some(tail) => self.slots[tail].next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.count += 1;
    }

    /// Replace each run of audio with a `StreamInterrupted` carrying its length
    fn collapse_audio(&self, msgs: Vec<Msg>) -> Vec<Msg> {
        let mut out = Vec::with_capacity(msgs.len());
        let mut discarded: Option<u64> = None;
        for msg in msgs {
            if msg.is_audio() {
                *discarded.get_or_insert(0) += msg.jiffies();
                continue;
            }
            if let Some(jiffies) = discarded.take() {
                out.push(self.factory.create_stream_interrupted(jiffies));
            }
            out.push(msg);
        }
        if let Some(jiffies) = discarded {
            out.push(self.factory.create_stream_interrupted(jiffies));
        }
        out
    }
}

fn is_start_of_stream(msg: &Msg) -> bool {
    matches!(msg, Msg::Track(track) if track.start_of_stream())
}

/// Remove every message matching `stale` that precedes the last one matching `marker`
fn drop_before_last(
    msgs: Vec<Msg>,
    marker: impl Fn(&Msg) -> bool,
    stale: impl Fn(&Msg) -> bool,
) -> Vec<Msg> {
    let Some(last) = msgs.iter().rposition(&marker) else {
        return msgs;
    };
    msgs.into_iter()
        .enumerate()
        .filter(|(i, msg)| *i >= last || !stale(msg))
        .map(|(_, msg)| msg)
        .collect()
}

/// Remove every message of `kind` except the last one
fn keep_latest(msgs: Vec<Msg>, kind: MsgKind) -> Vec<Msg> {
    drop_before_last(msgs, |m| m.kind() == kind, |m| m.kind() == kind)
}

impl Drop for SenderMsgQueue {
    fn drop(&mut self) {
        if self.count > 0 {
            debug!("SenderMsgQueue: discarding {} queued msgs", self.count);
        }
    }
}
