//! Stream descriptors and the seams to collaborators outside the pipeline
//!
//! [`StreamHandler`] is implemented by whatever produced a stream (protocol
//! or codec layer) and lets downstream elements ask it to seek, stop or
//! discard. [`PipelineAnimator`] is implemented by the renderer and answers
//! questions about what formats it can play and how much audio it buffers.

use super::audio::AudioFormat;
use crate::error::FormatError;
use std::sync::Arc;

/// Stream id that never matches a real stream
pub const STREAM_ID_INVALID: u32 = 0;

/// Answer to [`StreamHandler::ok_to_play`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPlay {
    Yes,
    No,
    Later,
}

/// Control surface for the producer of one stream
///
/// Methods returning a flush id return `None` when the request could not be
/// honoured. A returned id identifies the `Flush` message the producer will
/// emit once it has acted on the request.
pub trait StreamHandler: Send + Sync {
    fn ok_to_play(&self, stream_id: u32) -> StreamPlay;
    fn try_seek(&self, stream_id: u32, offset: u64) -> Option<u32>;
    fn try_discard(&self, jiffies: u64) -> Option<u32>;
    fn try_stop(&self, stream_id: u32) -> Option<u32>;
    fn notify_starving(&self, mode: &str, stream_id: u32, starving: bool);
}

/// Capabilities of the renderer at the end of the pipeline
pub trait PipelineAnimator: Send + Sync {
    /// Jiffies of audio the renderer holds once it has pulled a message
    fn buffer_jiffies(&self) -> u64;

    /// Extra latency the renderer adds for a given format, or why it
    /// cannot play that format at all
    fn delay_jiffies(
        &self,
        format: AudioFormat,
        sample_rate: u32,
        bit_depth: u32,
        channels: u32,
    ) -> Result<u64, FormatError>;

    /// DSD block size the renderer expects, in 32-bit words
    fn dsd_block_size_words(&self) -> u32;

    fn max_bit_depth(&self) -> u32;

    /// Highest supported `(pcm, dsd)` sample rates; zero means unsupported
    fn max_sample_rates(&self) -> (u32, u32);
}

/// Properties of the active playback mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeInfo {
    pub supports_latency: bool,
    pub supports_pause: bool,
    pub supports_next: bool,
    pub supports_prev: bool,
    /// Use the long ramp duration when pausing and resuming
    pub ramp_pause_resume_long: bool,
    /// Use the long ramp duration when skipping tracks
    pub ramp_skip_long: bool,
    /// Mode adjusts the renderer clock to track a remote source
    pub has_pullable_clock: bool,
}

impl Default for ModeInfo {
    fn default() -> Self {
        Self {
            supports_latency: false,
            supports_pause: true,
            supports_next: true,
            supports_prev: true,
            ramp_pause_resume_long: true,
            ramp_skip_long: false,
            has_pullable_clock: false,
        }
    }
}

/// A track queued for playback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub uri: String,
    pub meta_data: String,
    pub id: u32,
}

/// Format and origin of a decoded stream
#[derive(Clone)]
pub struct DecodedStreamInfo {
    pub stream_id: u32,
    pub bit_rate: u32,
    pub bit_depth: u32,
    pub sample_rate: u32,
    pub channels: u32,
    pub codec_name: String,
    pub track_length: u64,
    /// First sample of the stream within its track; non-zero after a seek
    pub sample_start: u64,
    pub lossless: bool,
    pub seekable: bool,
    pub live: bool,
    pub analog_bypass: bool,
    pub format: AudioFormat,
    pub stream_handler: Option<Arc<dyn StreamHandler>>,
}

impl DecodedStreamInfo {
    /// PCM stream with no handler; remaining fields take neutral values
    pub fn pcm(stream_id: u32, sample_rate: u32, bit_depth: u32, channels: u32) -> Self {
        Self {
            stream_id,
            bit_rate: sample_rate * bit_depth * channels,
            bit_depth,
            sample_rate,
            channels,
            codec_name: "PCM".to_string(),
            track_length: 0,
            sample_start: 0,
            lossless: true,
            seekable: false,
            live: false,
            analog_bypass: false,
            format: AudioFormat::Pcm,
            stream_handler: None,
        }
    }

    /// DSD stream with no handler
    pub fn dsd(stream_id: u32, sample_rate: u32, channels: u32) -> Self {
        Self {
            bit_depth: super::audio::DSD_BIT_DEPTH,
            codec_name: "DSD".to_string(),
            format: AudioFormat::Dsd,
            bit_rate: sample_rate * channels,
            ..Self::pcm(stream_id, sample_rate, 1, channels)
        }
    }

    /// Whether two streams share sample rate, depth, channel count and encoding
    pub fn same_format(&self, other: &DecodedStreamInfo) -> bool {
        self.sample_rate == other.sample_rate
            && self.bit_depth == other.bit_depth
            && self.channels == other.channels
            && self.format == other.format
    }
}

impl std::fmt::Debug for DecodedStreamInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedStreamInfo")
            .field("stream_id", &self.stream_id)
            .field("format", &self.format)
            .field("sample_rate", &self.sample_rate)
            .field("bit_depth", &self.bit_depth)
            .field("channels", &self.channels)
            .field("sample_start", &self.sample_start)
            .field("live", &self.live)
            .field("has_handler", &self.stream_handler.is_some())
            .finish()
    }
}
