//! Ramp-up at the start of discontinuous streams
//!
//! A stream that starts somewhere other than where the previous one left off
//! (a seek, a live stream, any DSD stream) begins with a ramp from silence to
//! full scale. Audio longer than the remaining ramp is split so that only the
//! ramped portion is marked; the tail waits in a local queue for the next
//! pull.

use crate::msg::{
    ensure_supported, AudioFormat, DecodedStreamInfo, Msg, MsgAudio, MsgKind, MsgKinds, MsgQueue,
    PipelineElementUpstream, RampDirection, RAMP_MAX, RAMP_MIN, STREAM_ID_INVALID,
};
use tracing::{debug, trace};

const SUPPORTED_MSG_KINDS: MsgKinds = MsgKinds::ALL
    .without(MsgKind::AudioEncoded)
    .without(MsgKind::Playable);

/// Pull element applying stream-start ramps
pub struct Ramper {
    upstream: Box<dyn PipelineElementUpstream>,

    // Split tails awaiting delivery
    queue: MsgQueue,

    stream_id: u32,

    // Ramp configuration (jiffies)
    ramp_jiffies_long: u64,
    ramp_jiffies_short: u64,
    ramp_jiffies: u64,

    // Ramp progress
    ramping: bool,
    remaining_ramp_size: u64,
    current_ramp_value: u32,
}

impl Ramper {
    /// # Arguments
    /// * `upstream` - Element to pull from
    /// * `ramp_jiffies_long` - Ramp duration for modes that pause/resume with long ramps
    /// * `ramp_jiffies_short` - Ramp duration for every other mode
    pub fn new(
        upstream: Box<dyn PipelineElementUpstream>,
        ramp_jiffies_long: u64,
        ramp_jiffies_short: u64,
    ) -> Self {
        Self {
            upstream,
            queue: MsgQueue::new(),
            stream_id: STREAM_ID_INVALID,
            ramp_jiffies_long,
            ramp_jiffies_short,
            ramp_jiffies: ramp_jiffies_long,
            ramping: false,
            remaining_ramp_size: 0,
            current_ramp_value: RAMP_MIN,
        }
    }

    /// Whether a ramp is in progress
    pub fn is_ramping(&self) -> bool {
        self.ramping
    }

    fn is_ramp_applicable(&self, info: &DecodedStreamInfo) -> bool {
        if self.ramp_jiffies == 0 {
            return false;
        }
        if info.live {
            return true;
        }
        let new_stream = info.stream_id != self.stream_id;
        if new_stream && info.sample_start > 0 {
            return true;
        }
        info.format == AudioFormat::Dsd
    }

    fn process(&mut self, msg: Msg) -> Msg {
        match msg {
            Msg::Mode(mode) => {
                self.ramp_jiffies = if mode.info().ramp_pause_resume_long {
                    self.ramp_jiffies_long
                } else {
                    self.ramp_jiffies_short
                };
                Msg::Mode(mode)
            }
            Msg::Halt(halt) => {
                self.ramping = false;
                Msg::Halt(halt)
            }
            Msg::DecodedStream(stream) => {
                let info = stream.info();
                if self.is_ramp_applicable(info) {
                    debug!(
                        "Ramper: ramping up stream {} over {} jiffies",
                        info.stream_id, self.ramp_jiffies
                    );
                    self.ramping = true;
                    self.current_ramp_value = RAMP_MIN;
                    self.remaining_ramp_size = self.ramp_jiffies;
                } else {
                    self.ramping = false;
                    self.current_ramp_value = RAMP_MAX;
                    self.remaining_ramp_size = 0;
                }
                self.stream_id = info.stream_id;
                Msg::DecodedStream(stream)
            }
            Msg::AudioPcm(audio) => self.ramp_audio(audio, Msg::AudioPcm),
            Msg::AudioDsd(audio) => self.ramp_audio(audio, Msg::AudioDsd),
            Msg::Silence(silence) => {
                self.ramping = false;
                self.current_ramp_value = RAMP_MAX;
                self.remaining_ramp_size = 0;
                Msg::Silence(silence)
            }
            Msg::Quit(quit) => {
                self.ramping = false;
                Msg::Quit(quit)
            }
            other => other,
        }
    }

    fn ramp_audio<P: Clone>(&mut self, mut audio: MsgAudio<P>, wrap: fn(MsgAudio<P>) -> Msg) -> Msg {
        if !self.ramping {
            return wrap(audio);
        }
        if audio.jiffies() > self.remaining_ramp_size {
            let tail = audio.split(self.remaining_ramp_size);
            self.queue.enqueue(wrap(tail));
        }
        let (value, split) = audio.set_ramp(
            self.current_ramp_value,
            &mut self.remaining_ramp_size,
            RampDirection::Up,
        );
        self.current_ramp_value = value;
        if let Some(split) = split {
            self.queue.enqueue_at_head(wrap(split));
        }
        trace!(
            "Ramper: ramp {}..{} remaining {}",
            audio.ramp().start(),
            audio.ramp().end(),
            self.remaining_ramp_size
        );
        if self.remaining_ramp_size == 0 || self.current_ramp_value == RAMP_MAX {
            debug!("Ramper: ramp complete for stream {}", self.stream_id);
            self.ramping = false;
        }
        wrap(audio)
    }
}

impl PipelineElementUpstream for Ramper {
    fn pull(&mut self) -> Msg {
        let msg = match self.queue.dequeue() {
            Some(msg) => msg,
            None => self.upstream.pull(),
        };
        ensure_supported("Ramper", SUPPORTED_MSG_KINDS, &msg);
        self.process(msg)
    }
}
