//! Shared fixtures for nar-pipeline integration tests
//!
//! - `ScriptedSource` / `RecordingSink`: upstream and downstream stand-ins
//! - `TestAnimator`: renderer accepting PCM up to 192kHz/24-bit and DSD128
//! - `FakeClock`: `AudioTime` frozen until the test moves it

#![allow(dead_code)]

use nar_pipeline::msg::{
    AudioFormat, DecodedStreamInfo, Msg, MsgFactory, MsgFactoryConfig, MsgKind, ModeInfo,
    PipelineAnimator, PipelineElementDownstream, PipelineElementUpstream, Track,
};
use nar_pipeline::{AudioTime, FormatError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub const SAMPLE_RATE: u32 = 44_100;
pub const JIFFIES_PER_SAMPLE: u64 = 1280;

/// Upstream handing out a script that tests may extend while it runs
#[derive(Clone, Default)]
pub struct ScriptedSource {
    msgs: Arc<Mutex<VecDeque<Msg>>>,
}

impl ScriptedSource {
    pub fn new(msgs: Vec<Msg>) -> Self {
        Self {
            msgs: Arc::new(Mutex::new(msgs.into())),
        }
    }

    pub fn push(&self, msg: Msg) {
        self.msgs.lock().unwrap().push_back(msg);
    }

    pub fn remaining(&self) -> usize {
        self.msgs.lock().unwrap().len()
    }
}

impl PipelineElementUpstream for ScriptedSource {
    fn pull(&mut self) -> Msg {
        self.msgs
            .lock()
            .unwrap()
            .pop_front()
            .expect("scripted source exhausted")
    }
}

/// Downstream keeping everything pushed to it
#[derive(Clone, Default)]
pub struct RecordingSink {
    msgs: Arc<Mutex<Vec<Msg>>>,
}

impl RecordingSink {
    pub fn len(&self) -> usize {
        self.msgs.lock().unwrap().len()
    }

    pub fn kinds(&self) -> Vec<MsgKind> {
        self.msgs.lock().unwrap().iter().map(Msg::kind).collect()
    }

    pub fn take(&self) -> Vec<Msg> {
        std::mem::take(&mut *self.msgs.lock().unwrap())
    }
}

impl PipelineElementDownstream for RecordingSink {
    fn push(&mut self, msg: Msg) {
        self.msgs.lock().unwrap().push(msg);
    }
}

/// Renderer with a configurable buffer and extra delay
pub struct TestAnimator {
    pub buffer_jiffies: u64,
    pub delay_jiffies: u64,
}

impl TestAnimator {
    pub fn new(buffer_jiffies: u64) -> Self {
        Self {
            buffer_jiffies,
            delay_jiffies: 0,
        }
    }
}

impl PipelineAnimator for TestAnimator {
    fn buffer_jiffies(&self) -> u64 {
        self.buffer_jiffies
    }

    fn delay_jiffies(
        &self,
        format: AudioFormat,
        sample_rate: u32,
        bit_depth: u32,
        _channels: u32,
    ) -> Result<u64, FormatError> {
        let (max_pcm, max_dsd) = self.max_sample_rates();
        match format {
            AudioFormat::Pcm if sample_rate > max_pcm => {
                Err(FormatError::SampleRateUnsupported(sample_rate))
            }
            AudioFormat::Pcm if bit_depth > self.max_bit_depth() => {
                Err(FormatError::BitDepthUnsupported(bit_depth))
            }
            AudioFormat::Dsd if sample_rate > max_dsd => {
                Err(FormatError::SampleRateUnsupported(sample_rate))
            }
            _ => Ok(self.delay_jiffies),
        }
    }

    fn dsd_block_size_words(&self) -> u32 {
        1
    }

    fn max_bit_depth(&self) -> u32 {
        24
    }

    fn max_sample_rates(&self) -> (u32, u32) {
        (192_000, 5_644_800)
    }
}

/// Clock frozen at a chosen tick
pub struct FakeClock {
    ticks: Mutex<u64>,
    frequency: u64,
}

impl FakeClock {
    pub fn new(ticks: u64, frequency: u64) -> Self {
        Self {
            ticks: Mutex::new(ticks),
            frequency,
        }
    }
}

impl AudioTime for FakeClock {
    fn tick_count(&self, _sample_rate: u32) -> (u64, u64) {
        (*self.ticks.lock().unwrap(), self.frequency)
    }

    fn set_tick_count(&self, ticks: u64) {
        *self.ticks.lock().unwrap() = ticks;
    }
}

pub fn factory() -> Arc<MsgFactory> {
    Arc::new(MsgFactory::new(&MsgFactoryConfig::default()))
}

/// Stereo 16-bit 44.1kHz PCM at a constant level
pub fn pcm(factory: &MsgFactory, samples: usize) -> Msg {
    let data = vec![0x40; samples * 4];
    Msg::AudioPcm(factory.create_audio_pcm(&data, 2, SAMPLE_RATE, 16, 0))
}

pub fn stream(factory: &MsgFactory, stream_id: u32) -> Msg {
    factory.create_decoded_stream(DecodedStreamInfo::pcm(stream_id, SAMPLE_RATE, 16, 2))
}

/// Stream that always starts with a ramp
pub fn live_stream(factory: &MsgFactory, stream_id: u32) -> Msg {
    let mut info = DecodedStreamInfo::pcm(stream_id, SAMPLE_RATE, 16, 2);
    info.live = true;
    factory.create_decoded_stream(info)
}

/// Mode using short ramps everywhere
pub fn short_ramp_mode(factory: &MsgFactory) -> Msg {
    let info = ModeInfo {
        ramp_pause_resume_long: false,
        ..ModeInfo::default()
    };
    factory.create_mode("Test", info)
}

pub fn track(factory: &MsgFactory, id: u32) -> Msg {
    let track = Arc::new(Track {
        uri: format!("test://track/{}", id),
        meta_data: String::new(),
        id,
    });
    factory.create_track(track, true)
}

/// Report `Halt` and `Drain` as played, the way a renderer would
pub fn acknowledge(msg: &mut Msg) {
    match msg {
        Msg::Halt(halt) => halt.report_halted(),
        Msg::Drain(drain) => drain.report_drained(),
        _ => {}
    }
}

/// Pull until `Quit`, acknowledging as a renderer does
///
/// Returns everything pulled, including the `Quit`.
pub fn pull_until_quit(upstream: &mut dyn PipelineElementUpstream) -> Vec<Msg> {
    let mut msgs = Vec::new();
    loop {
        let mut msg = upstream.pull();
        acknowledge(&mut msg);
        let quit = matches!(msg, Msg::Quit(_));
        msgs.push(msg);
        if quit {
            return msgs;
        }
    }
}

pub fn kinds(msgs: &[Msg]) -> Vec<MsgKind> {
    msgs.iter().map(Msg::kind).collect()
}

/// Kinds pulled, ignoring the drains a format change or halt generates
pub fn kinds_without_drains(msgs: &[Msg]) -> Vec<MsgKind> {
    msgs.iter()
        .map(Msg::kind)
        .filter(|kind| *kind != MsgKind::Drain)
        .collect()
}
