//! Shared fixtures for element unit tests

use crate::audio_time::AudioTime;
use crate::error::FormatError;
use crate::msg::{
    AudioFormat, DecodedStreamInfo, Msg, MsgFactory, MsgFactoryConfig, MsgKind,
    PipelineAnimator, PipelineElementDownstream, PipelineElementUpstream,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Upstream that hands out a fixed script, shared so tests can append to it
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

/// Downstream that keeps everything pushed to it
#[derive(Clone, Default)]
pub struct RecordingSink {
    msgs: Arc<Mutex<Vec<Msg>>>,
}

impl RecordingSink {
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

/// Animator accepting everything up to 192kHz/24-bit PCM and DSD128
pub struct FakeAnimator {
    pub buffer_jiffies: u64,
}

impl PipelineAnimator for FakeAnimator {
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
            _ => Ok(0),
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

/// Clock frozen at a chosen tick until moved by the test
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

/// Stereo 16-bit 44.1kHz PCM
pub fn pcm(factory: &MsgFactory, samples: usize) -> Msg {
    let data = vec![0x40; samples * 4];
    Msg::AudioPcm(factory.create_audio_pcm(&data, 2, 44_100, 16, 0))
}

pub fn stream(factory: &MsgFactory, stream_id: u32) -> Msg {
    factory.create_decoded_stream(DecodedStreamInfo::pcm(stream_id, 44_100, 16, 2))
}
