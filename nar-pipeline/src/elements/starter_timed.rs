//! Clock-aligned stream start
//!
//! `start_at(ticks)` arms the element for the next stream. When that
//! stream's first audio arrives, the element works out how far away the
//! target tick is, subtracts latency the rest of the pipeline will add, and
//! plays silence for the remainder before releasing the held audio.

use crate::audio_time::AudioTime;
use crate::msg::{AudioFormat, Msg, MsgFactory, PipelineAnimator, PipelineElementUpstream};
use nar_common::timing::{jiffies_to_ms, ticks_to_jiffies, JIFFIES_PER_MS};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace, warn};

/// Longest single silence message generated while waiting
pub const MAX_SILENCE_CHUNK_JIFFIES: u64 = 5 * JIFFIES_PER_MS;

/// Tick value meaning "no timed start pending"
pub const START_TICKS_DISABLED: u64 = 0;

/// Control surface for a [`StarterTimed`]
#[derive(Clone)]
pub struct StarterHandle {
    start_ticks: Arc<Mutex<u64>>,
}

impl StarterHandle {
    /// Start the next stream when the clock reads `ticks`
    ///
    /// Units match [`AudioTime::tick_count`]. [`START_TICKS_DISABLED`]
    /// cancels a pending start.
    pub fn start_at(&self, ticks: u64) {
        debug!("StarterTimed: start_at({})", ticks);
        *self.start_ticks.lock().unwrap() = ticks;
    }
}

#[derive(Debug, Clone, Copy)]
struct StreamFormat {
    format: AudioFormat,
    sample_rate: u32,
    bit_depth: u32,
    channels: u32,
}

/// Pull element delaying stream start to a clock tick
pub struct StarterTimed {
    upstream: Box<dyn PipelineElementUpstream>,
    factory: Arc<MsgFactory>,
    audio_time: Arc<dyn AudioTime>,
    animator: Arc<dyn PipelineAnimator>,
    start_ticks: Arc<Mutex<u64>>,
    max_silence_jiffies: u64,
    pipeline_delay_jiffies: u64,
    format: Option<StreamFormat>,
    starting_stream: bool,
    pending: Option<Msg>,
    jiffies_remaining: u64,
}

impl StarterTimed {
    /// # Arguments
    /// * `max_silence_jiffies` - Upper bound on silence inserted for one start
    pub fn new(
        upstream: Box<dyn PipelineElementUpstream>,
        factory: Arc<MsgFactory>,
        audio_time: Arc<dyn AudioTime>,
        animator: Arc<dyn PipelineAnimator>,
        max_silence_jiffies: u64,
    ) -> Self {
        Self {
            upstream,
            factory,
            audio_time,
            animator,
            start_ticks: Arc::new(Mutex::new(START_TICKS_DISABLED)),
            max_silence_jiffies,
            pipeline_delay_jiffies: 0,
            format: None,
            starting_stream: false,
            pending: None,
            jiffies_remaining: 0,
        }
    }

    pub fn handle(&self) -> StarterHandle {
        StarterHandle {
            start_ticks: Arc::clone(&self.start_ticks),
        }
    }

    /// Silence still to be played before the held audio
    pub fn jiffies_remaining(&self) -> u64 {
        self.jiffies_remaining
    }

    fn delay_jiffies(&self, start_ticks: u64, format: StreamFormat) -> u64 {
        let (now, frequency) = self.audio_time.tick_count(format.sample_rate);
        if start_ticks <= now || frequency == 0 {
            debug!(
                "StarterTimed: start tick {} already passed (now {})",
                start_ticks, now
            );
            return 0;
        }
        let mut jiffies = ticks_to_jiffies(start_ticks - now, frequency);
        jiffies = jiffies.saturating_sub(self.pipeline_delay_jiffies);
        if let Ok(animator_delay) = self.animator.delay_jiffies(
            format.format,
            format.sample_rate,
            format.bit_depth,
            format.channels,
        ) {
            jiffies = jiffies.saturating_sub(animator_delay);
        }
        if jiffies > self.max_silence_jiffies {
            warn!(
                "StarterTimed: start is {}ms away, capping silence at {}ms",
                jiffies_to_ms(jiffies),
                jiffies_to_ms(self.max_silence_jiffies)
            );
            jiffies = self.max_silence_jiffies;
        }
        debug!(
            "StartAt: delay jiffies={} ({}ms)",
            jiffies,
            jiffies_to_ms(jiffies)
        );
        jiffies
    }

    /// First audio of a stream: hold it back if a timed start is armed
    fn audio_received(&mut self, msg: Msg) -> Option<Msg> {
        if !self.starting_stream {
            return Some(msg);
        }
        self.starting_stream = false;
        let start_ticks = std::mem::replace(
            &mut *self.start_ticks.lock().unwrap(),
            START_TICKS_DISABLED,
        );
        let format = match self.format {
            Some(format) if start_ticks != START_TICKS_DISABLED => format,
            _ => return Some(msg),
        };
        self.jiffies_remaining = self.delay_jiffies(start_ticks, format);
        if self.jiffies_remaining == 0 {
            return Some(msg);
        }
        self.pending = Some(msg);
        None
    }

    fn next_silence(&mut self, format: StreamFormat) -> Msg {
        let jiffies = self.jiffies_remaining.min(MAX_SILENCE_CHUNK_JIFFIES);
        let silence = self.factory.create_silence(
            jiffies,
            format.sample_rate,
            format.bit_depth,
            format.channels,
        );
        // Silence is rounded up to a whole sample, so the last chunk may overshoot
        self.jiffies_remaining = self.jiffies_remaining.saturating_sub(silence.jiffies());
        trace!(
            "StarterTimed: {} jiffies silence, {} remaining",
            silence.jiffies(),
            self.jiffies_remaining
        );
        Msg::Silence(silence)
    }

    fn process(&mut self, msg: Msg) -> Option<Msg> {
        match msg {
            Msg::Delay(delay) => {
                self.pipeline_delay_jiffies = delay.total_jiffies();
                Some(Msg::Delay(delay))
            }
            Msg::DecodedStream(stream) => {
                let info = stream.info();
                self.format = Some(StreamFormat {
                    format: info.format,
                    sample_rate: info.sample_rate,
                    bit_depth: info.bit_depth,
                    channels: info.channels,
                });
                self.starting_stream = true;
                Some(Msg::DecodedStream(stream))
            }
            Msg::AudioPcm(_) | Msg::AudioDsd(_) | Msg::Silence(_) => self.audio_received(msg),
            Msg::Quit(quit) => {
                self.jiffies_remaining = 0;
                self.starting_stream = false;
                Some(Msg::Quit(quit))
            }
            other => Some(other),
        }
    }
}

impl PipelineElementUpstream for StarterTimed {
    fn pull(&mut self) -> Msg {
        loop {
            if self.jiffies_remaining != 0 {
                if let Some(format) = self.format {
                    return self.next_silence(format);
                }
                self.jiffies_remaining = 0;
            }
            if let Some(msg) = self.pending.take() {
                return msg;
            }
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
    use crate::elements::testing::{factory, pcm, stream, FakeAnimator, FakeClock, ScriptedSource};
    use crate::msg::MsgKind;

    fn starter(msgs: Vec<Msg>, clock: Arc<FakeClock>, max_ms: u64) -> (StarterTimed, Arc<MsgFactory>) {
        let factory = factory();
        let starter = StarterTimed::new(
            Box::new(ScriptedSource::new(msgs)),
            Arc::clone(&factory),
            clock,
            Arc::new(FakeAnimator { buffer_jiffies: 0 }),
            max_ms * JIFFIES_PER_MS,
        );
        (starter, factory)
    }

    #[test]
    fn test_passes_through_when_not_armed() {
        let factory = factory();
        let clock = Arc::new(FakeClock::new(0, 100_000));
        let (mut starter, _) = starter(vec![stream(&factory, 1), pcm(&factory, 10)], clock, 100);
        assert!(matches!(starter.pull(), Msg::DecodedStream(_)));
        assert!(matches!(starter.pull(), Msg::AudioPcm(_)));
    }

    #[test]
    fn test_inserts_silence_until_start_tick() {
        let factory = factory();
        // 100 ticks per ms, target 200 ticks away => 2ms
        let clock = Arc::new(FakeClock::new(9_800, 100_000));
        let (mut starter, _) = starter(vec![stream(&factory, 1), pcm(&factory, 10)], clock, 100);
        starter.handle().start_at(10_000);
        assert!(matches!(starter.pull(), Msg::DecodedStream(_)));

        let mut silence = 0;
        let audio = loop {
            let msg = starter.pull();
            match msg.kind() {
                MsgKind::Silence => silence += msg.jiffies(),
                _ => break msg,
            }
        };
        assert!(matches!(audio, Msg::AudioPcm(_)));
        let expected = 2 * JIFFIES_PER_MS;
        // Rounded up to a whole 44.1kHz sample
        assert!(silence >= expected && silence < expected + 1280);
    }

    #[test]
    fn test_silence_capped_when_target_unreachable() {
        let factory = factory();
        let clock = Arc::new(FakeClock::new(0, 1_000));
        let (mut starter, _) = starter(vec![stream(&factory, 1), pcm(&factory, 10)], clock, 12);
        // An hour away
        starter.handle().start_at(3_600_000);
        starter.pull();
        let mut chunks = Vec::new();
        loop {
            let msg = starter.pull();
            if msg.kind() != MsgKind::Silence {
                break;
            }
            chunks.push(msg.jiffies());
        }
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|&j| j <= MAX_SILENCE_CHUNK_JIFFIES + 1280));
        let total: u64 = chunks.iter().sum();
        assert!(total >= 12 * JIFFIES_PER_MS);
    }

    #[test]
    fn test_pipeline_delay_is_subtracted() {
        let factory = factory();
        let clock = Arc::new(FakeClock::new(0, 1_000));
        let msgs = vec![
            factory.create_delay(0, 3 * JIFFIES_PER_MS),
            stream(&factory, 1),
            pcm(&factory, 10),
        ];
        let (mut starter, _) = starter(msgs, clock, 100);
        starter.handle().start_at(5);
        starter.pull();
        starter.pull();
        let silence = starter.pull();
        assert_eq!(silence.kind(), MsgKind::Silence);
        assert!(silence.jiffies() >= 2 * JIFFIES_PER_MS);
        assert!(silence.jiffies() < 2 * JIFFIES_PER_MS + 1280);
        assert!(matches!(starter.pull(), Msg::AudioPcm(_)));
    }

    #[test]
    fn test_start_tick_in_past_plays_immediately() {
        let factory = factory();
        let clock = Arc::new(FakeClock::new(50_000, 1_000));
        let (mut starter, _) = starter(vec![stream(&factory, 1), pcm(&factory, 10)], clock, 100);
        starter.handle().start_at(10);
        starter.pull();
        assert!(matches!(starter.pull(), Msg::AudioPcm(_)));
    }
}
