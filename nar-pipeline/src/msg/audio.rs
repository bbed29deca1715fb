//! Decoded audio, silence and render-ready playable messages
//!
//! Decoded audio lives in a pooled byte buffer shared by every message that
//! references it. A message covers a window of that buffer measured in
//! jiffies, so splitting a message at a ramp boundary never copies samples.
//! Samples are stored big-endian and interleaved.

use super::factory::{BufferPool, MsgFactory, PoolCell};
use super::ramp::{Ramp, RampDirection, RampSplit, RAMP_MAX, RAMP_MIN};
use nar_common::timing::jiffies_per_sample;
use std::sync::Arc;

/// DSD silence pattern
pub const DSD_SILENCE_BYTE: u8 = 0x69;

/// Bit depth reported for DSD streams (one bit per sample)
pub const DSD_BIT_DEPTH: u32 = 1;

/// Encoding of decoded audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Pcm,
    Dsd,
}

/// Pooled byte buffer holding decoded samples
///
/// Returned to its pool's free-list when the last message referencing it is
/// dropped.
pub struct DecodedAudio {
    bytes: Vec<u8>,
    pool: Arc<BufferPool>,
}

impl DecodedAudio {
    pub(crate) fn new(bytes: Vec<u8>, pool: Arc<BufferPool>) -> Self {
        Self { bytes, pool }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Drop for DecodedAudio {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.bytes));
    }
}

impl std::fmt::Debug for DecodedAudio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedAudio")
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// PCM sample data
#[derive(Debug, Clone)]
pub struct PcmPayload {
    pub(crate) data: Arc<DecodedAudio>,
}

/// DSD sample data
#[derive(Debug, Clone)]
pub struct DsdPayload {
    pub(crate) data: Arc<DecodedAudio>,
    pub(crate) sample_block_bits: u32,
}

/// Silence carries no sample data
#[derive(Debug, Clone, Copy)]
pub struct SilencePayload;

/// A window of audio with an optional ramp
#[derive(Debug)]
pub struct MsgAudio<P> {
    pub(crate) payload: P,
    pub(crate) offset: u64,
    pub(crate) size: u64,
    pub(crate) sample_rate: u32,
    pub(crate) bit_depth: u32,
    pub(crate) channels: u32,
    pub(crate) track_offset: u64,
    pub(crate) ramp: Ramp,
    pub(crate) cell: PoolCell,
}

pub type MsgAudioPcm = MsgAudio<PcmPayload>;
pub type MsgAudioDsd = MsgAudio<DsdPayload>;
pub type MsgSilence = MsgAudio<SilencePayload>;

impl<P: Clone> MsgAudio<P> {
    /// Duration in jiffies
    pub fn jiffies(&self) -> u64 {
        self.size
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn bit_depth(&self) -> u32 {
        self.bit_depth
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    /// Position of the first sample within its track, in jiffies
    pub fn track_offset(&self) -> u64 {
        self.track_offset
    }

    pub fn ramp(&self) -> &Ramp {
        &self.ramp
    }

    /// Split off everything after the first `jiffies`, returning the tail
    ///
    /// The tail shares this message's payload. Any ramp is divided between
    /// the two parts by interpolation.
    ///
    /// # Panics
    ///
    /// Panics unless `0 < jiffies < self.jiffies()`.
    pub fn split(&mut self, jiffies: u64) -> Self {
        assert!(jiffies > 0, "split at zero jiffies");
        assert!(jiffies < self.size, "split beyond end of message");
        let ramp = if self.ramp.is_enabled() {
            self.ramp.split(jiffies, self.size)
        } else {
            Ramp::new()
        };
        let remaining = Self {
            payload: self.payload.clone(),
            offset: self.offset + jiffies,
            size: self.size - jiffies,
            sample_rate: self.sample_rate,
            bit_depth: self.bit_depth,
            channels: self.channels,
            track_offset: self.track_offset + jiffies,
            ramp,
            cell: self.cell.sibling(),
        };
        self.size = jiffies;
        remaining
    }

    /// Merge a ramp starting at `start` into this message
    ///
    /// `remaining` is the ramp duration left in jiffies and is reduced by
    /// the amount this message consumed (zeroed if the ramp completed
    /// early). Returns the gain at the end of this message, plus a tail
    /// message if an opposing ramp forced a split.
    pub fn set_ramp(
        &mut self,
        start: u32,
        remaining: &mut u64,
        direction: RampDirection,
    ) -> (u32, Option<Self>) {
        assert!(
            matches!(direction, RampDirection::Up | RampDirection::Down),
            "set_ramp direction must be Up or Down"
        );
        if self.ramp.is_enabled() && self.ramp.direction() == RampDirection::Mute {
            if direction == RampDirection::Down {
                *remaining = 0;
            }
            return (self.ramp.end(), None);
        }

        let mut split_msg = None;
        if let Some(RampSplit { position, ramp }) =
            self.ramp.set(start, self.size, *remaining, direction)
        {
            if position == 0 {
                self.ramp = ramp;
            } else if position < self.size {
                let first = self.ramp;
                let mut tail = self.split(position);
                self.ramp = first;
                tail.ramp = ramp;
                split_msg = Some(tail);
            }
        }

        *remaining = remaining.saturating_sub(self.size);
        if let Some(tail) = &split_msg {
            if tail.ramp.direction() != direction && direction == RampDirection::Up {
                *remaining += tail.size;
            }
        }
        if (direction == RampDirection::Down && self.ramp.end() == RAMP_MIN)
            || (direction == RampDirection::Up && self.ramp.end() == RAMP_MAX)
        {
            *remaining = 0;
        }
        (self.ramp.end(), split_msg)
    }

    pub fn set_muted(&mut self) {
        self.ramp.set_muted();
    }

    pub fn clear_ramp(&mut self) {
        self.ramp.reset();
    }

    pub(crate) fn clone_for_branch(&self) -> Self {
        Self {
            payload: self.payload.clone(),
            offset: self.offset,
            size: self.size,
            sample_rate: self.sample_rate,
            bit_depth: self.bit_depth,
            channels: self.channels,
            track_offset: self.track_offset,
            ramp: self.ramp,
            cell: self.cell.sibling(),
        }
    }

    fn window_samples(&self) -> (u64, u64) {
        let per_sample = jiffies_per_sample(self.sample_rate);
        (self.offset / per_sample, self.size / per_sample)
    }
}

impl MsgAudioPcm {
    /// Number of bytes in the underlying shared buffer
    pub fn buffer_bytes(&self) -> usize {
        self.payload.data.len()
    }

    /// Convert into a render-ready message
    pub fn create_playable(self, factory: &MsgFactory) -> MsgPlayable {
        let (offset_samples, samples) = self.window_samples();
        let frame_bytes = (self.bit_depth / 8 * self.channels) as u64;
        let offset_bytes = (offset_samples * frame_bytes) as usize;
        let bytes = (samples * frame_bytes) as usize;
        let source = if self.ramp.direction() == RampDirection::Mute {
            PlayableSource::Silence(AudioFormat::Pcm)
        } else {
            PlayableSource::Pcm {
                data: self.payload.data.clone(),
                offset_bytes,
            }
        };
        factory.create_playable(
            source,
            bytes,
            self.sample_rate,
            self.bit_depth,
            self.channels,
            self.ramp,
        )
    }
}

impl MsgAudioDsd {
    pub fn sample_block_bits(&self) -> u32 {
        self.payload.sample_block_bits
    }

    /// Convert into a render-ready message
    ///
    /// Offsets and lengths are rounded down to whole sample blocks.
    pub fn create_playable(self, factory: &MsgFactory) -> MsgPlayable {
        let (offset_samples, samples) = self.window_samples();
        let block_bytes = ((self.payload.sample_block_bits + 7) / 8).max(1) as usize;
        let mut offset_bytes = (offset_samples * self.channels as u64 / 8) as usize;
        offset_bytes -= offset_bytes % block_bytes;
        let mut bytes = (samples * self.channels as u64 / 8) as usize;
        bytes -= bytes % block_bytes;
        let source = if self.ramp.direction() == RampDirection::Mute {
            PlayableSource::Silence(AudioFormat::Dsd)
        } else {
            PlayableSource::Dsd {
                data: self.payload.data.clone(),
                offset_bytes,
            }
        };
        factory.create_playable(
            source,
            bytes,
            self.sample_rate,
            DSD_BIT_DEPTH,
            self.channels,
            self.ramp,
        )
    }
}

impl MsgSilence {
    pub fn format(&self) -> AudioFormat {
        if self.bit_depth == DSD_BIT_DEPTH {
            AudioFormat::Dsd
        } else {
            AudioFormat::Pcm
        }
    }

    /// Convert into a render-ready message
    pub fn create_playable(self, factory: &MsgFactory) -> MsgPlayable {
        let (_, samples) = self.window_samples();
        let format = self.format();
        let bytes = match format {
            AudioFormat::Pcm => samples * (self.bit_depth / 8 * self.channels) as u64,
            AudioFormat::Dsd => samples * self.channels as u64 / 8,
        } as usize;
        factory.create_playable(
            PlayableSource::Silence(format),
            bytes,
            self.sample_rate,
            self.bit_depth,
            self.channels,
            Ramp::new(),
        )
    }
}

/// Where a playable message's bytes come from
#[derive(Debug, Clone)]
pub enum PlayableSource {
    Pcm {
        data: Arc<DecodedAudio>,
        offset_bytes: usize,
    },
    Dsd {
        data: Arc<DecodedAudio>,
        offset_bytes: usize,
    },
    Silence(AudioFormat),
}

/// Audio ready for the renderer
#[derive(Debug)]
pub struct MsgPlayable {
    pub(crate) source: PlayableSource,
    pub(crate) bytes: usize,
    pub(crate) sample_rate: u32,
    pub(crate) bit_depth: u32,
    pub(crate) channels: u32,
    pub(crate) ramp: Ramp,
    pub(crate) cell: PoolCell,
}

impl MsgPlayable {
    /// Length of the rendered output in bytes
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn bit_depth(&self) -> u32 {
        self.bit_depth
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn ramp(&self) -> &Ramp {
        &self.ramp
    }

    pub fn is_silence(&self) -> bool {
        matches!(self.source, PlayableSource::Silence(_))
    }

    /// Render into `out`, applying any ramp
    ///
    /// PCM is scaled linearly sample by sample. DSD cannot be scaled, so a
    /// DSD fragment under anything other than a full-scale ramp renders as
    /// DSD silence.
    pub fn read(&self, out: &mut Vec<u8>) {
        match &self.source {
            PlayableSource::Silence(AudioFormat::Pcm) => {
                out.resize(out.len() + self.bytes, 0);
            }
            PlayableSource::Silence(AudioFormat::Dsd) => {
                out.resize(out.len() + self.bytes, DSD_SILENCE_BYTE);
            }
            PlayableSource::Dsd { data, offset_bytes } => {
                if self.ramp.is_unity() {
                    out.extend_from_slice(&data.bytes()[*offset_bytes..*offset_bytes + self.bytes]);
                } else {
                    out.resize(out.len() + self.bytes, DSD_SILENCE_BYTE);
                }
            }
            PlayableSource::Pcm { data, offset_bytes } => {
                let start = out.len();
                out.extend_from_slice(&data.bytes()[*offset_bytes..*offset_bytes + self.bytes]);
                if !self.ramp.is_unity() {
                    apply_ramp_pcm(
                        &mut out[start..],
                        &self.ramp,
                        self.bit_depth,
                        self.channels,
                    );
                }
            }
        }
    }

    /// Gain applied to each sample frame, in order
    pub fn gains(&self) -> Vec<u32> {
        let frame_bytes = match self.bit_depth {
            DSD_BIT_DEPTH => return Vec::new(),
            depth => (depth / 8 * self.channels) as usize,
        };
        let frames = (self.bytes / frame_bytes.max(1)) as u64;
        (0..frames).map(|i| self.ramp.gain_at(i, frames)).collect()
    }
}

/// Scale big-endian signed PCM in place by a linear ramp
pub fn apply_ramp_pcm(buf: &mut [u8], ramp: &Ramp, bit_depth: u32, channels: u32) {
    let width = (bit_depth / 8) as usize;
    assert!(matches!(width, 1..=4), "unsupported PCM bit depth {}", bit_depth);
    let frame_bytes = width * channels as usize;
    let frames = (buf.len() / frame_bytes) as u64;
    for (index, frame) in buf.chunks_exact_mut(frame_bytes).enumerate() {
        let gain = ramp.gain_at(index as u64, frames) as i64;
        if gain == RAMP_MAX as i64 {
            continue;
        }
        for subsample in frame.chunks_exact_mut(width) {
            let value = read_be_signed(subsample);
            let scaled = (value * gain) >> 14;
            write_be_signed(subsample, scaled);
        }
    }
}

fn read_be_signed(bytes: &[u8]) -> i64 {
    let mut value: i64 = 0;
    for b in bytes {
        value = (value << 8) | *b as i64;
    }
    let shift = 64 - 8 * bytes.len() as u32;
    (value << shift) >> shift
}

fn write_be_signed(bytes: &mut [u8], value: i64) {
    let len = bytes.len();
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = (value >> (8 * (len - 1 - i))) as u8;
    }
}
