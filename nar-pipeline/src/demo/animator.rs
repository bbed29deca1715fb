//! Software animator: pulls the pipeline in real time and discards the output

use nar_common::timing::{jiffies_to_samples, samples_to_jiffies, JIFFIES_PER_SECOND};
use nar_pipeline::msg::{AudioFormat, Msg, MsgFactory, MsgPlayable, PipelineAnimator, PipelineElementUpstream};
use nar_pipeline::{FormatError, PipelineOutput};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace};

const MAX_PCM_SAMPLE_RATE: u32 = 192_000;
const MAX_DSD_SAMPLE_RATE: u32 = 11_289_600;
const MAX_BIT_DEPTH: u32 = 24;
const DSD_BLOCK_WORDS: u32 = 1;

/// Renderer capabilities of the software output
pub struct SoftwareAnimator {
    buffer_jiffies: u64,
}

impl SoftwareAnimator {
    pub fn new(buffer_jiffies: u64) -> Self {
        Self { buffer_jiffies }
    }
}

impl PipelineAnimator for SoftwareAnimator {
    fn buffer_jiffies(&self) -> u64 {
        self.buffer_jiffies
    }

    fn delay_jiffies(
        &self,
        format: AudioFormat,
        sample_rate: u32,
        bit_depth: u32,
        channels: u32,
    ) -> Result<u64, FormatError> {
        if channels == 0 || channels > 2 {
            return Err(FormatError::FormatUnsupported);
        }
        match format {
            AudioFormat::Pcm => {
                if sample_rate > MAX_PCM_SAMPLE_RATE {
                    return Err(FormatError::SampleRateUnsupported(sample_rate));
                }
                if bit_depth > MAX_BIT_DEPTH || bit_depth % 8 != 0 {
                    return Err(FormatError::BitDepthUnsupported(bit_depth));
                }
            }
            AudioFormat::Dsd => {
                if sample_rate > MAX_DSD_SAMPLE_RATE {
                    return Err(FormatError::SampleRateUnsupported(sample_rate));
                }
            }
        }
        Ok(0)
    }

    fn dsd_block_size_words(&self) -> u32 {
        DSD_BLOCK_WORDS
    }

    fn max_bit_depth(&self) -> u32 {
        MAX_BIT_DEPTH
    }

    fn max_sample_rates(&self) -> (u32, u32) {
        (MAX_PCM_SAMPLE_RATE, MAX_DSD_SAMPLE_RATE)
    }
}

/// Totals reported when the render thread exits
#[derive(Debug, Default, Clone, Copy)]
pub struct RenderStats {
    pub playable_msgs: u64,
    pub bytes: u64,
    pub silent_bytes: u64,
    pub halts: u64,
    pub rendered_jiffies: u64,
}

#[derive(Clone, Copy)]
struct OutputFormat {
    format: AudioFormat,
    sample_rate: u32,
    bit_depth: u32,
    channels: u32,
}

/// Thread pulling [`PipelineOutput`] at the pace of a real device
pub struct RenderThread {
    handle: JoinHandle<RenderStats>,
}

impl RenderThread {
    pub fn spawn(
        output: PipelineOutput,
        factory: Arc<MsgFactory>,
        buffer_jiffies: u64,
    ) -> std::io::Result<Self> {
        let handle = thread::Builder::new()
            .name("Animator".to_string())
            .spawn(move || render_loop(output, factory, buffer_jiffies))?;
        Ok(Self { handle })
    }

    /// Wait for the thread to see `Quit`
    pub fn join(self) -> RenderStats {
        match self.handle.join() {
            Ok(stats) => stats,
            Err(_) => {
                error!("Animator thread panicked");
                RenderStats::default()
            }
        }
    }
}

fn jiffies_to_duration(jiffies: u64) -> Duration {
    Duration::from_nanos((jiffies as u128 * 1_000_000_000 / JIFFIES_PER_SECOND as u128) as u64)
}

fn playable_jiffies(playable: &MsgPlayable) -> u64 {
    let frame_bits = (playable.bit_depth() * playable.channels()).max(1) as u64;
    let samples = playable.bytes() as u64 * 8 / frame_bits;
    samples_to_jiffies(samples, playable.sample_rate())
}

/// Sleep until the device would have room for more audio
fn pace(started: Instant, rendered_jiffies: u64, buffer_jiffies: u64) {
    if rendered_jiffies <= buffer_jiffies {
        return;
    }
    let due = started + jiffies_to_duration(rendered_jiffies - buffer_jiffies);
    let now = Instant::now();
    if due > now {
        thread::sleep(due - now);
    }
}

fn render_loop(
    mut output: PipelineOutput,
    factory: Arc<MsgFactory>,
    buffer_jiffies: u64,
) -> RenderStats {
    let started = Instant::now();
    let mut stats = RenderStats::default();
    let mut buf = Vec::new();
    let mut format: Option<OutputFormat> = None;

    loop {
        match output.pull() {
            Msg::Playable(playable) => {
                buf.clear();
                playable.read(&mut buf);
                stats.playable_msgs += 1;
                stats.bytes += buf.len() as u64;
                if playable.is_silence() {
                    stats.silent_bytes += buf.len() as u64;
                }
                stats.rendered_jiffies += playable_jiffies(&playable);
                trace!("Animator: rendered {} bytes", buf.len());
                pace(started, stats.rendered_jiffies, buffer_jiffies);
            }
            Msg::DecodedStream(stream) => {
                let info = stream.info();
                info!(
                    "Animator: {:?} {} Hz, {} bit, {} ch",
                    info.format, info.sample_rate, info.bit_depth, info.channels
                );
                format = Some(OutputFormat {
                    format: info.format,
                    sample_rate: info.sample_rate,
                    bit_depth: info.bit_depth,
                    channels: info.channels,
                });
            }
            Msg::Halt(mut halt) => {
                debug!("Animator: halt {}", halt.id());
                halt.report_halted();
                stats.halts += 1;
                // Run the device out on silence
                if let Some(f) = format {
                    let samples = jiffies_to_samples(buffer_jiffies, f.sample_rate);
                    let bytes = (samples * (f.bit_depth * f.channels) as u64 / 8) as usize;
                    let silence = factory.create_playable_silence(
                        bytes,
                        f.format,
                        f.sample_rate,
                        f.bit_depth,
                        f.channels,
                    );
                    buf.clear();
                    silence.read(&mut buf);
                    stats.silent_bytes += buf.len() as u64;
                }
            }
            Msg::Drain(mut drain) => {
                debug!("Animator: drain {}", drain.id());
                drain.report_drained();
            }
            Msg::Mode(mode) => {
                info!("Animator: mode {}", mode.mode());
            }
            Msg::Quit(_) => {
                info!("Animator: quit");
                break;
            }
            other => {
                trace!("Animator: ignoring {:?}", other.kind());
            }
        }
    }
    stats
}
