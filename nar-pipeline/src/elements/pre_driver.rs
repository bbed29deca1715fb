//! Last element before the renderer
//!
//! Turns decoded audio into [`Msg::Playable`], forwards a `DecodedStream`
//! only when the format really changes, and measures how long the renderer
//! was fed silence between two runs of real audio.

use crate::msg::{
    ensure_supported, AudioFormat, DecodedStreamInfo, Msg, MsgFactory, MsgKind, MsgKinds,
    PipelineElementUpstream,
};
use crate::observer::ObserverHook;
use nar_common::timing::jiffies_to_ms;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

const SUPPORTED_MSG_KINDS: MsgKinds = MsgKinds::ALL
    .without(MsgKind::AudioEncoded)
    .without(MsgKind::Playable);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RenderFormat {
    sample_rate: u32,
    bit_depth: u32,
    channels: u32,
    format: AudioFormat,
}

impl From<&DecodedStreamInfo> for RenderFormat {
    fn from(info: &DecodedStreamInfo) -> Self {
        Self {
            sample_rate: info.sample_rate,
            bit_depth: info.bit_depth,
            channels: info.channels,
            format: info.format,
        }
    }
}

/// Read side of the starvation-gap measurement
#[derive(Clone, Default)]
pub struct PreDriverStats {
    last_gap_jiffies: Arc<AtomicU64>,
    gaps: Arc<AtomicU64>,
}

impl PreDriverStats {
    /// Silence played before the most recent resumption of audio
    pub fn last_gap_jiffies(&self) -> u64 {
        self.last_gap_jiffies.load(Ordering::Acquire)
    }

    /// Number of silence gaps that ended in real audio
    pub fn gaps(&self) -> u64 {
        self.gaps.load(Ordering::Acquire)
    }
}

/// Pull element producing render-ready messages
pub struct PreDriver {
    upstream: Box<dyn PipelineElementUpstream>,
    factory: Arc<MsgFactory>,
    format: Option<RenderFormat>,
    mode_has_pullable_clock: bool,
    silence_since_audio: bool,
    silence_jiffies: u64,
    stats: PreDriverStats,
    observer: Option<ObserverHook>,
}

impl PreDriver {
    /// # Arguments
    /// * `observer` - Scheduled whenever a silence gap ends
    pub fn new(
        upstream: Box<dyn PipelineElementUpstream>,
        factory: Arc<MsgFactory>,
        observer: Option<ObserverHook>,
    ) -> Self {
        Self {
            upstream,
            factory,
            format: None,
            mode_has_pullable_clock: false,
            silence_since_audio: false,
            silence_jiffies: 0,
            stats: PreDriverStats::default(),
            observer,
        }
    }

    pub fn stats(&self) -> PreDriverStats {
        self.stats.clone()
    }

    fn process(&mut self, msg: Msg) -> Option<Msg> {
        match msg {
            Msg::Mode(mode) => {
                if self.mode_has_pullable_clock {
                    // The old mode may have left the clock skewed; resend format
                    self.format = None;
                }
                self.mode_has_pullable_clock = mode.info().has_pullable_clock;
                Some(Msg::Mode(mode))
            }
            Msg::Drain(drain) => {
                self.silence_jiffies = 0;
                self.silence_since_audio = false;
                Some(Msg::Drain(drain))
            }
            Msg::StreamInterrupted(_) => None,
            Msg::DecodedStream(stream) => {
                let format = RenderFormat::from(stream.info());
                if self.format == Some(format) {
                    trace!("PreDriver: stream {} has unchanged format", stream.info().stream_id);
                    return None;
                }
                debug!("PreDriver: format now {:?}", format);
                self.format = Some(format);
                Some(Msg::DecodedStream(stream))
            }
            Msg::AudioPcm(audio) => {
                self.silence_since_audio = false;
                Some(Msg::Playable(audio.create_playable(&self.factory)))
            }
            Msg::AudioDsd(audio) => {
                self.silence_since_audio = false;
                Some(Msg::Playable(audio.create_playable(&self.factory)))
            }
            Msg::Silence(silence) => {
                self.silence_since_audio = true;
                self.silence_jiffies += silence.jiffies();
                Some(Msg::Playable(silence.create_playable(&self.factory)))
            }
            Msg::Halt(_) | Msg::Quit(_) => Some(msg),
            // Upstream-only control; nothing here for the renderer
            other => {
                trace!("PreDriver: dropping {:?}", other);
                None
            }
        }
    }

    fn report_gap(&mut self) {
        let jiffies = std::mem::take(&mut self.silence_jiffies);
        debug!("PreDriver: silence since last audio - {}ms", jiffies_to_ms(jiffies));
        self.stats.last_gap_jiffies.store(jiffies, Ordering::Release);
        self.stats.gaps.fetch_add(1, Ordering::AcqRel);
        if let Some(observer) = &self.observer {
            observer.fire();
        }
    }
}

impl PipelineElementUpstream for PreDriver {
    fn pull(&mut self) -> Msg {
        loop {
            let msg = self.upstream.pull();
            ensure_supported("PreDriver", SUPPORTED_MSG_KINDS, &msg);
            let silence_before = self.silence_since_audio;
            let msg = self.process(msg);
            if silence_before && !self.silence_since_audio {
                self.report_gap();
            }
            if let Some(msg) = msg {
                return msg;
            }
        }
    }
}
