//! Push-side format gate
//!
//! Every `DecodedStream` is checked against what the renderer can play. A
//! stream it cannot play is stopped at its producer, and everything from the
//! rejected `DecodedStream` up to the producer's matching `Flush` is dropped
//! here rather than reaching the renderer. Audio that arrives before any
//! `DecodedStream` has described its format is dropped too.

use crate::msg::{
    ensure_supported, Msg, MsgKind, MsgKinds, PipelineAnimator, PipelineElementDownstream,
    FLUSH_ID_INVALID,
};
use std::sync::Arc;
use tracing::{debug, warn};

const SUPPORTED_MSG_KINDS: MsgKinds = MsgKinds::ALL
    .without(MsgKind::AudioEncoded)
    .without(MsgKind::Playable);

/// Push element validating stream formats against the animator
pub struct StreamValidator {
    downstream: Box<dyn PipelineElementDownstream>,
    animator: Arc<dyn PipelineAnimator>,
    target_flush_id: u32,
    flushing: bool,
    have_stream: bool,
}

impl StreamValidator {
    pub fn new(
        downstream: Box<dyn PipelineElementDownstream>,
        animator: Arc<dyn PipelineAnimator>,
    ) -> Self {
        Self {
            downstream,
            animator,
            target_flush_id: FLUSH_ID_INVALID,
            flushing: false,
            have_stream: false,
        }
    }

    /// Whether audio for a rejected stream is currently being dropped
    pub fn is_flushing(&self) -> bool {
        self.flushing
    }

    fn process(&mut self, msg: Msg) -> Option<Msg> {
        match msg {
            Msg::Mode(_) | Msg::Track(_) => {
                self.flushing = false;
                Some(msg)
            }
            Msg::Flush(flush) => {
                if self.target_flush_id != FLUSH_ID_INVALID && flush.id() == self.target_flush_id {
                    debug!("StreamValidator: reached flush {}", flush.id());
                    self.target_flush_id = FLUSH_ID_INVALID;
                    return None;
                }
                Some(Msg::Flush(flush))
            }
            Msg::DecodedStream(stream) => {
                let info = stream.info();
                let delay = self.animator.delay_jiffies(
                    info.format,
                    info.sample_rate,
                    info.bit_depth,
                    info.channels,
                );
                match delay {
                    Ok(_) => {
                        self.flushing = false;
                        self.have_stream = true;
                    }
                    Err(e) => {
                        warn!(
                            "StreamValidator: stream {} rejected ({}), stopping it",
                            info.stream_id, e
                        );
                        self.flushing = true;
                        if let Some(handler) = &info.stream_handler {
                            let _ = handler.ok_to_play(info.stream_id);
                            self.target_flush_id =
                                handler.try_stop(info.stream_id).unwrap_or(FLUSH_ID_INVALID);
                        }
                    }
                }
                self.flushable(Msg::DecodedStream(stream))
            }
            Msg::MetaText(_) | Msg::AudioPcm(_) | Msg::AudioDsd(_) | Msg::Silence(_) => {
                if msg.is_audio() && !self.have_stream {
                    warn!("StreamValidator: {:?} before any DecodedStream, discarding", msg);
                    return None;
                }
                self.flushable(msg)
            }
            Msg::Quit(quit) => {
                self.flushing = false;
                self.target_flush_id = FLUSH_ID_INVALID;
                Some(Msg::Quit(quit))
            }
            other => Some(other),
        }
    }

    fn flushable(&self, msg: Msg) -> Option<Msg> {
        if self.flushing {
            None
        } else {
            Some(msg)
        }
    }
}

impl PipelineElementDownstream for StreamValidator {
    fn push(&mut self, msg: Msg) {
        ensure_supported("StreamValidator", SUPPORTED_MSG_KINDS, &msg);
        if let Some(msg) = self.process(msg) {
            self.downstream.push(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::testing::{factory, pcm, stream, FakeAnimator, RecordingSink};
    use crate::msg::{DecodedStreamInfo, StreamHandler, StreamPlay, Track};

    struct StoppableHandler;

    impl StreamHandler for StoppableHandler {
        fn ok_to_play(&self, _stream_id: u32) -> StreamPlay {
            StreamPlay::No
        }
        fn try_seek(&self, _stream_id: u32, _offset: u64) -> Option<u32> {
            None
        }
        fn try_discard(&self, _jiffies: u64) -> Option<u32> {
            None
        }
        fn try_stop(&self, _stream_id: u32) -> Option<u32> {
            Some(42)
        }
        fn notify_starving(&self, _mode: &str, _stream_id: u32, _starving: bool) {}
    }

    fn validator() -> (StreamValidator, RecordingSink) {
        let sink = RecordingSink::default();
        let animator = Arc::new(FakeAnimator { buffer_jiffies: 0 });
        (StreamValidator::new(Box::new(sink.clone()), animator), sink)
    }

    #[test]
    fn test_supported_stream_passes() {
        let factory = factory();
        let (mut validator, sink) = validator();
        validator.push(stream(&factory, 1));
        validator.push(pcm(&factory, 10));
        assert_eq!(sink.kinds(), vec![MsgKind::DecodedStream, MsgKind::AudioPcm]);
    }

    #[test]
    fn test_audio_before_stream_is_dropped() {
        let factory = factory();
        let (mut validator, sink) = validator();
        validator.push(pcm(&factory, 10));
        validator.push(factory.create_meta_text("title"));
        assert_eq!(sink.kinds(), vec![MsgKind::MetaText]);
    }

    #[test]
    fn test_unsupported_stream_stopped_and_flushed() {
        let factory = factory();
        let (mut validator, sink) = validator();
        let mut info = DecodedStreamInfo::pcm(5, 384_000, 24, 2);
        info.stream_handler = Some(Arc::new(StoppableHandler));
        validator.push(factory.create_decoded_stream(info));
        validator.push(pcm(&factory, 10));
        assert!(validator.is_flushing());
        validator.push(factory.create_flush_with_id(42));
        let track = Track {
            uri: "file:///next.flac".to_string(),
            meta_data: String::new(),
            id: 2,
        };
        validator.push(factory.create_track(Arc::new(track), true));
        validator.push(stream(&factory, 6));
        validator.push(pcm(&factory, 10));
        assert_eq!(
            sink.kinds(),
            vec![MsgKind::Track, MsgKind::DecodedStream, MsgKind::AudioPcm]
        );
    }
}
