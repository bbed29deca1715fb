//! Discard-until-marker element
//!
//! A control thread that has asked an upstream producer to stop or seek is
//! told the id of the `Halt` or `Flush` that producer will emit once it has
//! acted. Everything pulled before that marker is stale; this element drops
//! it. The last `MetaText` seen while discarding is replayed straight after
//! the marker so downstream does not lose current metadata.

use crate::msg::{
    Msg, PipelineElementUpstream, FLUSH_ID_INVALID, HALT_ID_INVALID, HALT_ID_NONE,
};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

#[derive(Debug)]
struct Targets {
    halt: u32,
    flush: u32,
    last_halt: u32,
    last_flush: u32,
}

impl Targets {
    fn is_flushing(&self) -> bool {
        self.halt != HALT_ID_INVALID || self.flush != FLUSH_ID_INVALID
    }
}

/// Control surface for a [`Flusher`]
#[derive(Clone)]
pub struct FlusherHandle {
    name: Arc<str>,
    targets: Arc<Mutex<Targets>>,
}

impl FlusherHandle {
    /// Discard everything up to the `Halt` with this id
    ///
    /// Ignored if a halt with this id (or a later one) has already passed.
    ///
    /// # Panics
    ///
    /// Panics if a halt target is already outstanding.
    pub fn discard_until_halt(&self, id: u32) {
        let mut targets = self.targets.lock().unwrap();
        assert!(
            targets.halt == HALT_ID_INVALID,
            "{}: discard_until_halt({}) while halt target {} outstanding",
            self.name,
            id,
            targets.halt
        );
        if id == HALT_ID_INVALID || (targets.last_halt != HALT_ID_NONE && id <= targets.last_halt) {
            debug!("{}: halt {} already passed, not discarding", self.name, id);
            return;
        }
        debug!("{}: discarding until halt {}", self.name, id);
        targets.halt = id;
    }

    /// Discard everything up to the `Flush` with this id
    ///
    /// # Panics
    ///
    /// Panics if a flush target is already outstanding.
    pub fn discard_until_flush(&self, id: u32) {
        let mut targets = self.targets.lock().unwrap();
        assert!(
            targets.flush == FLUSH_ID_INVALID,
            "{}: discard_until_flush({}) while flush target {} outstanding",
            self.name,
            id,
            targets.flush
        );
        if id == FLUSH_ID_INVALID || id <= targets.last_flush {
            debug!("{}: flush {} already passed, not discarding", self.name, id);
            return;
        }
        debug!("{}: discarding until flush {}", self.name, id);
        targets.flush = id;
    }

    pub fn is_flushing(&self) -> bool {
        self.targets.lock().unwrap().is_flushing()
    }
}

/// Pull element discarding messages until a target marker
pub struct Flusher {
    upstream: Box<dyn PipelineElementUpstream>,
    handle: FlusherHandle,
    pending_meta_text: Option<Msg>,
    replay: Option<Msg>,
}

impl Flusher {
    /// `name` distinguishes multiple flushers in logs
    pub fn new(upstream: Box<dyn PipelineElementUpstream>, name: &str) -> Self {
        Self {
            upstream,
            handle: FlusherHandle {
                name: Arc::from(name),
                targets: Arc::new(Mutex::new(Targets {
                    halt: HALT_ID_INVALID,
                    flush: FLUSH_ID_INVALID,
                    last_halt: HALT_ID_NONE,
                    last_flush: FLUSH_ID_INVALID,
                })),
            },
            pending_meta_text: None,
            replay: None,
        }
    }

    pub fn handle(&self) -> FlusherHandle {
        self.handle.clone()
    }

    /// Forward a marker that ended discarding, queueing any held metadata behind it
    fn end_discard(&mut self, targets: &Targets, msg: Msg) -> Option<Msg> {
        if !targets.is_flushing() {
            debug!("{}: discard complete", self.handle.name);
            self.replay = self.pending_meta_text.take();
        }
        Some(msg)
    }

    fn process(&mut self, msg: Msg) -> Option<Msg> {
        let targets = Arc::clone(&self.handle.targets);
        let mut targets = targets.lock().unwrap();
        match msg {
            Msg::Halt(halt) => {
                let id = halt.id();
                if id != HALT_ID_NONE && id != HALT_ID_INVALID {
                    targets.last_halt = id;
                }
                if targets.halt != HALT_ID_INVALID && id == targets.halt {
                    targets.halt = HALT_ID_INVALID;
                    return self.end_discard(&targets, Msg::Halt(halt));
                }
                self.discard_if_flushing(&targets, Msg::Halt(halt))
            }
            Msg::Flush(flush) => {
                let id = flush.id();
                targets.last_flush = targets.last_flush.max(id);
                if targets.flush != FLUSH_ID_INVALID && id == targets.flush {
                    targets.flush = FLUSH_ID_INVALID;
                    return self.end_discard(&targets, Msg::Flush(flush));
                }
                self.discard_if_flushing(&targets, Msg::Flush(flush))
            }
            Msg::MetaText(text) if targets.is_flushing() => {
                trace!("{}: holding metatext", self.handle.name);
                self.pending_meta_text = Some(Msg::MetaText(text));
                None
            }
            Msg::Quit(quit) => {
                if targets.is_flushing() {
                    debug!("{}: quit while discarding", self.handle.name);
                }
                targets.halt = HALT_ID_INVALID;
                targets.flush = FLUSH_ID_INVALID;
                self.pending_meta_text = None;
                Some(Msg::Quit(quit))
            }
            other => self.discard_if_flushing(&targets, other),
        }
    }

    fn discard_if_flushing(&self, targets: &Targets, msg: Msg) -> Option<Msg> {
        if targets.is_flushing() {
            trace!("{}: discarding {:?}", self.handle.name, msg);
            None
        } else {
            Some(msg)
        }
    }
}

impl PipelineElementUpstream for Flusher {
    fn pull(&mut self) -> Msg {
        if let Some(msg) = self.replay.take() {
            return msg;
        }
        loop {
            let msg = self.upstream.pull();
            if let Some(msg) = self.process(msg) {
                return msg;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::testing::{factory, pcm, ScriptedSource};

    #[test]
    fn test_passes_everything_when_idle() {
        let factory = factory();
        let source = ScriptedSource::new(vec![
            factory.create_meta_text("a"),
            pcm(&factory, 10),
            factory.create_flush_with_id(3),
        ]);
        let mut flusher = Flusher::new(Box::new(source), "Test");
        assert!(matches!(flusher.pull(), Msg::MetaText(_)));
        assert!(matches!(flusher.pull(), Msg::AudioPcm(_)));
        assert!(matches!(flusher.pull(), Msg::Flush(_)));
    }

    #[test]
    fn test_discards_until_flush_and_replays_latest_metatext() {
        let factory = factory();
        let source = ScriptedSource::new(vec![
            pcm(&factory, 10),
            factory.create_meta_text("old"),
            factory.create_flush_with_id(4),
            factory.create_meta_text("new"),
            pcm(&factory, 10),
            factory.create_flush_with_id(5),
            pcm(&factory, 20),
        ]);
        let mut flusher = Flusher::new(Box::new(source), "Test");
        flusher.handle().discard_until_flush(5);
        match flusher.pull() {
            Msg::Flush(flush) => assert_eq!(flush.id(), 5),
            other => panic!("unexpected {:?}", other),
        }
        match flusher.pull() {
            Msg::MetaText(text) => assert_eq!(text.text(), "new"),
            other => panic!("unexpected {:?}", other),
        }
        match flusher.pull() {
            Msg::AudioPcm(audio) => assert_eq!(audio.jiffies(), 20 * 1280),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!flusher.handle().is_flushing());
    }

    #[test]
    fn test_discards_until_halt() {
        let factory = factory();
        let source = ScriptedSource::new(vec![
            factory.create_halt(7, None),
            pcm(&factory, 10),
            factory.create_halt(8, None),
            pcm(&factory, 10),
        ]);
        let mut flusher = Flusher::new(Box::new(source), "Test");
        flusher.handle().discard_until_halt(8);
        match flusher.pull() {
            Msg::Halt(halt) => assert_eq!(halt.id(), 8),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(flusher.pull(), Msg::AudioPcm(_)));
    }

    #[test]
    fn test_target_already_passed_is_ignored() {
        let factory = factory();
        let source = ScriptedSource::new(vec![factory.create_flush_with_id(9), pcm(&factory, 10)]);
        let mut flusher = Flusher::new(Box::new(source), "Test");
        flusher.pull();
        flusher.handle().discard_until_flush(9);
        assert!(!flusher.handle().is_flushing());
        assert!(matches!(flusher.pull(), Msg::AudioPcm(_)));
    }

    #[test]
    fn test_quit_ends_discard() {
        let factory = factory();
        let source = ScriptedSource::new(vec![
            factory.create_meta_text("held"),
            factory.create_quit(),
        ]);
        let mut flusher = Flusher::new(Box::new(source), "Test");
        flusher.handle().discard_until_flush(100);
        assert!(matches!(flusher.pull(), Msg::Quit(_)));
        assert!(!flusher.handle().is_flushing());
    }

    #[test]
    #[should_panic(expected = "while flush target")]
    fn test_second_flush_target_panics() {
        let flusher = Flusher::new(Box::new(ScriptedSource::default()), "Test");
        flusher.handle().discard_until_flush(1);
        flusher.handle().discard_until_flush(2);
    }

    #[test]
    fn test_discarded_messages_return_to_pool() {
        let factory = factory();
        let source = ScriptedSource::new(vec![
            pcm(&factory, 10),
            pcm(&factory, 10),
            factory.create_flush_with_id(2),
        ]);
        let mut flusher = Flusher::new(Box::new(source), "Test");
        flusher.handle().discard_until_flush(2);
        let flush = flusher.pull();
        assert_eq!(factory.buffers_in_use(), 0);
        drop(flush);
        assert_eq!(factory.in_use(), 0);
    }
}
