//! Synthetic producer: a sine tone (PCM) or an idle-pattern bitstream (DSD)

use nar_common::timing::samples_to_jiffies;
use nar_pipeline::dsd::{DsdFiller, DsdPaddingWriter};
use nar_pipeline::msg::{
    DecodedStreamInfo, Msg, MsgFactory, ModeInfo, PipelineElementDownstream, Track, HALT_ID_NONE,
};
use nar_pipeline::PipelineInput;
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

const STREAM_ID: u32 = 1;
const CHANNELS: u32 = 2;
const PCM_BIT_DEPTH: u32 = 16;
const TONE_HZ: f64 = 440.0;
const TONE_AMPLITUDE: f64 = 0.25;
/// Audio per pushed message
const CHUNKS_PER_SECOND: u32 = 200;
/// Alternating bits: a DSD stream with no audible content
const DSD_IDLE_BYTE: u8 = 0x55;

/// What the source generates
#[derive(Debug, Clone, Copy)]
pub enum SourceFormat {
    Pcm { sample_rate: u32 },
    Dsd { sample_rate: u32, block_bytes: usize },
}

/// Producer thread pushing into a [`PipelineInput`] until stopped
pub struct SyntheticSource {
    handle: JoinHandle<u64>,
    stop: Arc<AtomicBool>,
}

impl SyntheticSource {
    pub fn spawn(
        input: PipelineInput,
        factory: Arc<MsgFactory>,
        format: SourceFormat,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("Source".to_string())
            .spawn(move || {
                let mut producer = Producer {
                    input,
                    factory,
                    track_jiffies: 0,
                    audio_msgs: 0,
                };
                producer.run(format, &thread_stop);
                producer.audio_msgs
            })?;
        Ok(Self { handle, stop })
    }

    /// Ask the source to end its stream with `Halt` and `Quit`
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Returns the number of audio messages pushed
    pub fn join(self) -> u64 {
        self.stop();
        match self.handle.join() {
            Ok(count) => count,
            Err(_) => {
                error!("Source thread panicked");
                0
            }
        }
    }
}

struct Producer {
    input: PipelineInput,
    factory: Arc<MsgFactory>,
    track_jiffies: u64,
    audio_msgs: u64,
}

impl Producer {
    fn push(&mut self, msg: Msg) {
        self.input.push(msg);
    }

    fn run(&mut self, format: SourceFormat, stop: &AtomicBool) {
        let (uri, info) = match format {
            SourceFormat::Pcm { sample_rate } => (
                "synthetic://sine",
                DecodedStreamInfo::pcm(STREAM_ID, sample_rate, PCM_BIT_DEPTH, CHANNELS),
            ),
            SourceFormat::Dsd { sample_rate, .. } => (
                "synthetic://dsd-idle",
                DecodedStreamInfo::dsd(STREAM_ID, sample_rate, CHANNELS),
            ),
        };
        info!("Source: starting {}", uri);

        let mode = self.factory.create_mode("Synthetic", ModeInfo::default());
        self.push(mode);
        let track = Arc::new(Track {
            uri: uri.to_string(),
            meta_data: String::new(),
            id: 1,
        });
        let track = self.factory.create_track(track, true);
        self.push(track);
        let encoded = self
            .factory
            .create_encoded_stream(uri, "", 0, STREAM_ID, false, true, None);
        self.push(encoded);
        let decoded = self.factory.create_decoded_stream(info);
        self.push(decoded);

        match format {
            SourceFormat::Pcm { sample_rate } => self.run_pcm(sample_rate, stop),
            SourceFormat::Dsd {
                sample_rate,
                block_bytes,
            } => self.run_dsd(sample_rate, block_bytes, stop),
        }

        debug!("Source: stopping after {} audio messages", self.audio_msgs);
        let halt = self.factory.create_halt(HALT_ID_NONE, None);
        self.push(halt);
        let quit = self.factory.create_quit();
        self.push(quit);
        if self.input.is_flushing() {
            info!("Source: stream was rejected by the renderer");
        }
    }

    fn run_pcm(&mut self, sample_rate: u32, stop: &AtomicBool) {
        let frames = (sample_rate / CHUNKS_PER_SECOND) as usize;
        let step = TAU * TONE_HZ / sample_rate as f64;
        let mut phase = 0.0_f64;
        let mut data = Vec::with_capacity(frames * (CHANNELS * PCM_BIT_DEPTH / 8) as usize);

        while !stop.load(Ordering::Acquire) {
            data.clear();
            for _ in 0..frames {
                let sample = (phase.sin() * TONE_AMPLITUDE * i16::MAX as f64) as i16;
                for _ in 0..CHANNELS {
                    data.extend_from_slice(&sample.to_be_bytes());
                }
                phase = (phase + step) % TAU;
            }
            let audio = self.factory.create_audio_pcm(
                &data,
                CHANNELS,
                sample_rate,
                PCM_BIT_DEPTH,
                self.track_jiffies,
            );
            self.track_jiffies += samples_to_jiffies(frames as u64, sample_rate);
            self.audio_msgs += 1;
            self.push(Msg::AudioPcm(audio));
        }
    }

    fn run_dsd(&mut self, sample_rate: u32, block_bytes: usize, stop: &AtomicBool) {
        let writer = DsdPaddingWriter::new(0);
        let output_block = writer.output_block_bytes(block_bytes);
        let mut filler = DsdFiller::new(block_bytes, output_block, writer);
        // Eight samples per byte per channel
        let chunk_bytes = (sample_rate / CHUNKS_PER_SECOND / 8 * CHANNELS) as usize;
        let raw = vec![DSD_IDLE_BYTE; chunk_bytes];

        loop {
            let stopping = stop.load(Ordering::Acquire);
            if stopping {
                filler.drain();
            } else {
                filler.push(&raw);
                filler.flush();
            }
            for span in filler.writer_mut().take_output() {
                let audio = self.factory.create_audio_dsd(
                    &span,
                    CHANNELS,
                    sample_rate,
                    (block_bytes * 8) as u32,
                    self.track_jiffies,
                );
                let samples = span.len() as u64 * 8 / CHANNELS as u64;
                self.track_jiffies += samples_to_jiffies(samples, sample_rate);
                self.audio_msgs += 1;
                self.push(Msg::AudioDsd(audio));
            }
            if stopping {
                break;
            }
        }
    }
}
