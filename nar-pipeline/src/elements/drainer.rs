//! Paired drain barriers
//!
//! A drainer emits a `Drain` message and then holds back the next message it
//! would have passed until the renderer reports that `Drain` played out.
//! Audio already downstream keeps flowing; nothing new enters until the
//! pipeline past this point is empty.
//!
//! [`DrainerLeft`] sits near the source. It stands in as stream handler for
//! every `EncodedStream` it passes so it can drain when a producer reports
//! starvation. [`DrainerRight`] sits near the renderer and drains on every
//! `Halt` and on any change of audio format.

use crate::msg::{
    ensure_supported, DecodedStreamInfo, Msg, MsgFactory, MsgKind, MsgKinds,
    PipelineElementUpstream, StreamHandler, StreamPlay,
};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

const SUPPORTED_MSG_KINDS: MsgKinds = MsgKinds::ALL.without(MsgKind::Playable);

#[derive(Debug, Default)]
struct DrainState {
    /// A drain should be emitted on the next pull
    generate: bool,
    /// Drain requests so far (every trigger counts)
    requested: u64,
    /// Highest request count covered by a completed drain
    acknowledged: u64,
}

struct DrainShared {
    name: &'static str,
    state: Mutex<DrainState>,
    drained: Condvar,
}

impl DrainShared {
    fn trigger(&self, reason: &str) {
        let mut state = self.state.lock().unwrap();
        state.requested += 1;
        if !state.generate {
            debug!("{}: drain requested ({})", self.name, reason);
        }
        state.generate = true;
    }

    /// Claim a pending drain request, returning the request count it covers
    fn take_request(&self) -> Option<u64> {
        let mut state = self.state.lock().unwrap();
        if state.generate {
            state.generate = false;
            Some(state.requested)
        } else {
            None
        }
    }

    fn acknowledge(&self, ticket: u64) {
        let mut state = self.state.lock().unwrap();
        state.acknowledged = state.acknowledged.max(ticket);
        trace!("{}: drain {} acknowledged", self.name, ticket);
        self.drained.notify_all();
    }

    fn wait_for(&self, ticket: u64) {
        let mut state = self.state.lock().unwrap();
        while state.acknowledged < ticket {
            state = self.drained.wait(state).unwrap();
        }
    }
}

/// Control surface for a drainer
#[derive(Clone)]
pub struct DrainerHandle {
    shared: Arc<DrainShared>,
}

impl DrainerHandle {
    /// Ask the drainer to emit a drain on its next pull
    pub fn request_drain(&self) {
        self.shared.trigger("control");
    }

    /// Block until every drain requested so far has completed
    ///
    /// Returns `false` on timeout.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock().unwrap();
        let target = state.requested;
        while state.acknowledged < target {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self.shared.drained.wait_timeout(state, deadline - now).unwrap().0;
        }
        true
    }
}

/// Pull logic shared by both drainer halves
struct DrainerCore {
    upstream: Box<dyn PipelineElementUpstream>,
    factory: Arc<MsgFactory>,
    shared: Arc<DrainShared>,
    pending: Option<Msg>,
    awaiting: Option<u64>,
    next_drain_id: u32,
}

impl DrainerCore {
    fn new(
        name: &'static str,
        upstream: Box<dyn PipelineElementUpstream>,
        factory: Arc<MsgFactory>,
    ) -> Self {
        Self {
            upstream,
            factory,
            shared: Arc::new(DrainShared {
                name,
                state: Mutex::new(DrainState::default()),
                drained: Condvar::new(),
            }),
            pending: None,
            awaiting: None,
            next_drain_id: 1,
        }
    }

    fn create_drain(&mut self, ticket: u64) -> Msg {
        let shared = Arc::clone(&self.shared);
        let id = self.next_drain_id;
        self.next_drain_id = self.next_drain_id.wrapping_add(1).max(1);
        self.awaiting = Some(ticket);
        debug!("{}: emitting drain {}", self.shared.name, id);
        self.factory
            .create_drain(id, Some(Box::new(move || shared.acknowledge(ticket))))
    }

    /// Next unprocessed message from upstream, or `Err` carrying a drain
    /// that must be returned as-is
    fn pull(&mut self) -> Result<Msg, Msg> {
        if let Some(ticket) = self.awaiting.take() {
            self.shared.wait_for(ticket);
        }
        if let Some(ticket) = self.shared.take_request() {
            return Err(self.create_drain(ticket));
        }
        let msg = match self.pending.take() {
            Some(msg) => msg,
            None => self.upstream.pull(),
        };
        // Upstream pull can take arbitrarily long; a drain requested meanwhile
        // must precede this message
        if let Some(ticket) = self.shared.take_request() {
            self.pending = Some(msg);
            return Err(self.create_drain(ticket));
        }
        Ok(msg)
    }

    fn handle(&self) -> DrainerHandle {
        DrainerHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Stream handler forwarding to the current producer, draining on starvation
struct DrainerStreamHandler {
    shared: Arc<DrainShared>,
    upstream: Mutex<Option<Arc<dyn StreamHandler>>>,
}

impl DrainerStreamHandler {
    fn current(&self) -> Option<Arc<dyn StreamHandler>> {
        self.upstream.lock().unwrap().clone()
    }
}

impl StreamHandler for DrainerStreamHandler {
    fn ok_to_play(&self, stream_id: u32) -> StreamPlay {
        self.current()
            .map_or(StreamPlay::No, |h| h.ok_to_play(stream_id))
    }

    fn try_seek(&self, stream_id: u32, offset: u64) -> Option<u32> {
        self.current().and_then(|h| h.try_seek(stream_id, offset))
    }

    fn try_discard(&self, jiffies: u64) -> Option<u32> {
        self.current().and_then(|h| h.try_discard(jiffies))
    }

    fn try_stop(&self, stream_id: u32) -> Option<u32> {
        self.current().and_then(|h| h.try_stop(stream_id))
    }

    fn notify_starving(&self, mode: &str, stream_id: u32, starving: bool) {
        if starving {
            self.shared.trigger("starving");
        }
        if let Some(handler) = self.current() {
            handler.notify_starving(mode, stream_id, starving);
        }
    }
}

/// Source-side drainer
pub struct DrainerLeft {
    core: DrainerCore,
    stream_handler: Arc<DrainerStreamHandler>,
    format: Option<DecodedStreamInfo>,
}

impl DrainerLeft {
    pub fn new(upstream: Box<dyn PipelineElementUpstream>, factory: Arc<MsgFactory>) -> Self {
        let core = DrainerCore::new("DrainerLeft", upstream, factory);
        let stream_handler = Arc::new(DrainerStreamHandler {
            shared: Arc::clone(&core.shared),
            upstream: Mutex::new(None),
        });
        Self {
            core,
            stream_handler,
            format: None,
        }
    }

    pub fn handle(&self) -> DrainerHandle {
        self.core.handle()
    }
}

impl PipelineElementUpstream for DrainerLeft {
    fn pull(&mut self) -> Msg {
        let msg = match self.core.pull() {
            Ok(msg) => msg,
            Err(drain) => return drain,
        };
        ensure_supported("DrainerLeft", SUPPORTED_MSG_KINDS, &msg);
        match msg {
            Msg::EncodedStream(mut stream) => {
                let proxy: Arc<dyn StreamHandler> = self.stream_handler.clone();
                let original = stream.replace_stream_handler(Some(proxy));
                *self.stream_handler.upstream.lock().unwrap() = original;
                Msg::EncodedStream(stream)
            }
            Msg::DecodedStream(stream) => {
                let changed = self
                    .format
                    .as_ref()
                    .map_or(true, |format| !format.same_format(stream.info()));
                if changed {
                    self.format = Some(stream.info().clone());
                    self.core.shared.trigger("format change");
                }
                Msg::DecodedStream(stream)
            }
            other => other,
        }
    }
}

/// Renderer-side drainer
pub struct DrainerRight {
    core: DrainerCore,
    format: Option<DecodedStreamInfo>,
}

impl DrainerRight {
    pub fn new(upstream: Box<dyn PipelineElementUpstream>, factory: Arc<MsgFactory>) -> Self {
        Self {
            core: DrainerCore::new("DrainerRight", upstream, factory),
            format: None,
        }
    }

    pub fn handle(&self) -> DrainerHandle {
        self.core.handle()
    }
}

impl PipelineElementUpstream for DrainerRight {
    fn pull(&mut self) -> Msg {
        let msg = match self.core.pull() {
            Ok(msg) => msg,
            Err(drain) => return drain,
        };
        ensure_supported("DrainerRight", SUPPORTED_MSG_KINDS, &msg);
        match msg {
            Msg::Halt(halt) => {
                self.core.shared.trigger("halt");
                Msg::Halt(halt)
            }
            Msg::DecodedStream(stream) => {
                let changed = self
                    .format
                    .as_ref()
                    .map_or(true, |format| !format.same_format(stream.info()));
                if changed {
                    self.format = Some(stream.info().clone());
                    self.core.shared.trigger("format change");
                }
                Msg::DecodedStream(stream)
            }
            other => other,
        }
    }
}
