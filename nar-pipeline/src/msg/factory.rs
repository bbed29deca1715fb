//! Pooled message allocation
//!
//! Every message holds a [`PoolCell`] drawn from the allocator for its kind.
//! Dropping the message releases the cell, so a message can never be released
//! twice and leaks show up as a non-zero [`AllocatorStats::in_use`] after the
//! pipeline is torn down. Decoded sample buffers are recycled through a
//! separate free-list.

use super::audio::{
    AudioFormat, DecodedAudio, DsdPayload, MsgAudio, MsgAudioDsd, MsgAudioPcm, MsgPlayable,
    MsgSilence, PcmPayload, PlayableSource, SilencePayload, DSD_BIT_DEPTH,
};
use super::ramp::Ramp;
use super::stream::{DecodedStreamInfo, ModeInfo, StreamHandler, Track};
use super::{
    Callback, Msg, MsgAudioEncoded, MsgDecodedStream, MsgDelay, MsgDrain, MsgEncodedStream,
    MsgFlush, MsgHalt, MsgKind, MsgMetaText, MsgMode, MsgQuit, MsgStreamInterrupted, MsgTrack,
    MsgWait, FLUSH_ID_INVALID,
};
use nar_common::timing::{jiffies_per_sample, round_up_to_sample};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Expected number of live messages per kind
///
/// Exceeding a capacity is not fatal: messages are allocated on demand and a
/// warning is logged the first time a kind overflows.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MsgFactoryConfig {
    pub control_msg_count: usize,
    pub decoded_stream_count: usize,
    pub audio_msg_count: usize,
    pub playable_count: usize,
    pub audio_buffer_count: usize,
}

impl Default for MsgFactoryConfig {
    fn default() -> Self {
        Self {
            control_msg_count: 64,
            decoded_stream_count: 16,
            audio_msg_count: 512,
            playable_count: 64,
            audio_buffer_count: 256,
        }
    }
}

/// Per-kind allocation counters
#[derive(Debug)]
pub(crate) struct Allocator {
    kind: MsgKind,
    capacity: usize,
    in_use: AtomicUsize,
    peak: AtomicUsize,
    overflow_logged: AtomicBool,
}

impl Allocator {
    fn new(kind: MsgKind, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            kind,
            capacity,
            in_use: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            overflow_logged: AtomicBool::new(false),
        })
    }

    fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            kind: self.kind,
            capacity: self.capacity,
            in_use: self.in_use.load(Ordering::Acquire),
            peak: self.peak.load(Ordering::Acquire),
        }
    }
}

/// Snapshot of one allocator's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorStats {
    pub kind: MsgKind,
    pub capacity: usize,
    pub in_use: usize,
    pub peak: usize,
}

/// Ownership token for one pooled message
#[derive(Debug)]
pub struct PoolCell {
    allocator: Arc<Allocator>,
}

impl PoolCell {
    fn allocate(allocator: &Arc<Allocator>) -> Self {
        let in_use = allocator.in_use.fetch_add(1, Ordering::AcqRel) + 1;
        allocator.peak.fetch_max(in_use, Ordering::AcqRel);
        if in_use > allocator.capacity && !allocator.overflow_logged.swap(true, Ordering::AcqRel)
        {
            warn!(
                "{:?} allocator exceeded its capacity of {} messages",
                allocator.kind, allocator.capacity
            );
        }
        Self {
            allocator: Arc::clone(allocator),
        }
    }

    /// Allocate another cell of the same kind
    pub(crate) fn sibling(&self) -> Self {
        Self::allocate(&self.allocator)
    }
}

impl Drop for PoolCell {
    fn drop(&mut self) {
        self.allocator.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Free-list of decoded sample buffers
#[derive(Debug)]
pub(crate) struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    max_free: usize,
    in_use: AtomicUsize,
}

impl BufferPool {
    fn new(max_free: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::with_capacity(max_free)),
            max_free,
            in_use: AtomicUsize::new(0),
        })
    }

    fn acquire(&self) -> Vec<u8> {
        self.in_use.fetch_add(1, Ordering::AcqRel);
        let mut free = self.free.lock().unwrap();
        free.pop().unwrap_or_default()
    }

    pub(crate) fn release(&self, mut buf: Vec<u8>) {
        self.in_use.fetch_sub(1, Ordering::AcqRel);
        buf.clear();
        let mut free = self.free.lock().unwrap();
        if free.len() < self.max_free {
            free.push(buf);
        }
    }
}

/// Creates every message that flows through the pipeline
///
/// Shared by all elements behind an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct MsgFactory {
    allocators: Vec<Arc<Allocator>>,
    buffers: Arc<BufferPool>,
    next_flush_id: AtomicU32,
}

impl MsgFactory {
    pub fn new(config: &MsgFactoryConfig) -> Self {
        let allocators = MsgKind::ALL_KINDS
            .iter()
            .map(|kind| {
                let capacity = match kind {
                    MsgKind::DecodedStream => config.decoded_stream_count,
                    MsgKind::AudioPcm | MsgKind::AudioDsd | MsgKind::Silence => {
                        config.audio_msg_count
                    }
                    MsgKind::Playable => config.playable_count,
                    _ => config.control_msg_count,
                };
                Allocator::new(*kind, capacity)
            })
            .collect();
        Self {
            allocators,
            buffers: BufferPool::new(config.audio_buffer_count),
            next_flush_id: AtomicU32::new(FLUSH_ID_INVALID + 1),
        }
    }

    fn cell(&self, kind: MsgKind) -> PoolCell {
        PoolCell::allocate(&self.allocators[kind as usize])
    }

    /// Counters for one message kind
    pub fn stats(&self, kind: MsgKind) -> AllocatorStats {
        self.allocators[kind as usize].stats()
    }

    /// Total live messages across every kind
    pub fn in_use(&self) -> usize {
        self.allocators
            .iter()
            .map(|a| a.in_use.load(Ordering::Acquire))
            .sum()
    }

    /// Decoded sample buffers currently referenced by messages
    pub fn buffers_in_use(&self) -> usize {
        self.buffers.in_use.load(Ordering::Acquire)
    }

    pub fn create_mode(&self, mode: impl Into<String>, info: ModeInfo) -> Msg {
        Msg::Mode(MsgMode {
            mode: mode.into(),
            info,
            cell: self.cell(MsgKind::Mode),
        })
    }

    pub fn create_track(&self, track: Arc<Track>, start_of_stream: bool) -> Msg {
        Msg::Track(MsgTrack {
            track,
            start_of_stream,
            cell: self.cell(MsgKind::Track),
        })
    }

    /// Drain request; `callback` runs once the drain reaches the renderer
    pub fn create_drain(&self, id: u32, callback: Option<Callback>) -> Msg {
        Msg::Drain(MsgDrain {
            id,
            callback,
            cell: self.cell(MsgKind::Drain),
        })
    }

    pub fn create_delay(&self, remaining_jiffies: u64, total_jiffies: u64) -> Msg {
        Msg::Delay(MsgDelay {
            remaining_jiffies,
            total_jiffies,
            cell: self.cell(MsgKind::Delay),
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_encoded_stream(
        &self,
        uri: impl Into<String>,
        meta_text: impl Into<String>,
        total_bytes: u64,
        stream_id: u32,
        seekable: bool,
        live: bool,
        stream_handler: Option<Arc<dyn StreamHandler>>,
    ) -> Msg {
        Msg::EncodedStream(MsgEncodedStream {
            uri: uri.into(),
            meta_text: meta_text.into(),
            total_bytes,
            stream_id,
            seekable,
            live,
            stream_handler,
            cell: self.cell(MsgKind::EncodedStream),
        })
    }

    pub fn create_audio_encoded(&self, data: &[u8]) -> Msg {
        Msg::AudioEncoded(MsgAudioEncoded {
            data: data.to_vec(),
            cell: self.cell(MsgKind::AudioEncoded),
        })
    }

    pub fn create_meta_text(&self, text: impl Into<String>) -> Msg {
        Msg::MetaText(MsgMetaText {
            text: text.into(),
            cell: self.cell(MsgKind::MetaText),
        })
    }

    /// `jiffies` is the length of audio dropped in place of this message
    pub fn create_stream_interrupted(&self, jiffies: u64) -> Msg {
        Msg::StreamInterrupted(MsgStreamInterrupted {
            jiffies,
            cell: self.cell(MsgKind::StreamInterrupted),
        })
    }

    pub fn create_halt(&self, id: u32, callback: Option<Callback>) -> Msg {
        Msg::Halt(MsgHalt {
            id,
            callback,
            cell: self.cell(MsgKind::Halt),
        })
    }

    /// Flush carrying the next id in sequence
    pub fn create_flush(&self) -> Msg {
        let id = self.next_flush_id.fetch_add(1, Ordering::AcqRel);
        self.create_flush_with_id(id)
    }

    /// Flush carrying a previously reserved id
    pub fn create_flush_with_id(&self, id: u32) -> Msg {
        Msg::Flush(MsgFlush {
            id,
            cell: self.cell(MsgKind::Flush),
        })
    }

    /// Reserve a flush id for a flush that will be created later
    pub fn next_flush_id(&self) -> u32 {
        self.next_flush_id.fetch_add(1, Ordering::AcqRel)
    }

    pub fn create_wait(&self) -> Msg {
        Msg::Wait(MsgWait {
            cell: self.cell(MsgKind::Wait),
        })
    }

    pub fn create_decoded_stream(&self, info: DecodedStreamInfo) -> Msg {
        Msg::DecodedStream(MsgDecodedStream {
            info,
            cell: self.cell(MsgKind::DecodedStream),
        })
    }

    /// PCM audio from big-endian interleaved samples
    ///
    /// # Panics
    ///
    /// Panics if `data` does not hold a whole, non-zero number of frames.
    pub fn create_audio_pcm(
        &self,
        data: &[u8],
        channels: u32,
        sample_rate: u32,
        bit_depth: u32,
        track_offset: u64,
    ) -> MsgAudioPcm {
        let frame_bytes = (bit_depth / 8 * channels) as usize;
        assert!(frame_bytes > 0, "invalid PCM frame size");
        assert!(
            !data.is_empty() && data.len() % frame_bytes == 0,
            "PCM data must hold whole frames"
        );
        let samples = (data.len() / frame_bytes) as u64;
        MsgAudio {
            payload: PcmPayload {
                data: self.decoded_audio(data),
            },
            offset: 0,
            size: samples * jiffies_per_sample(sample_rate),
            sample_rate,
            bit_depth,
            channels,
            track_offset,
            ramp: Ramp::new(),
            cell: self.cell(MsgKind::AudioPcm),
        }
    }

    /// DSD audio from interleaved sample blocks
    ///
    /// # Panics
    ///
    /// Panics if `data` is empty or `channels` is zero.
    pub fn create_audio_dsd(
        &self,
        data: &[u8],
        channels: u32,
        sample_rate: u32,
        sample_block_bits: u32,
        track_offset: u64,
    ) -> MsgAudioDsd {
        assert!(channels > 0 && !data.is_empty(), "empty DSD data");
        let samples = (data.len() as u64 * 8) / channels as u64;
        MsgAudio {
            payload: DsdPayload {
                data: self.decoded_audio(data),
                sample_block_bits,
            },
            offset: 0,
            size: samples * jiffies_per_sample(sample_rate),
            sample_rate,
            bit_depth: DSD_BIT_DEPTH,
            channels,
            track_offset,
            ramp: Ramp::new(),
            cell: self.cell(MsgKind::AudioDsd),
        }
    }

    /// Silence of at least `jiffies`, rounded up to a whole sample
    pub fn create_silence(
        &self,
        jiffies: u64,
        sample_rate: u32,
        bit_depth: u32,
        channels: u32,
    ) -> MsgSilence {
        MsgAudio {
            payload: SilencePayload,
            offset: 0,
            size: round_up_to_sample(jiffies, sample_rate),
            sample_rate,
            bit_depth,
            channels,
            track_offset: 0,
            ramp: Ramp::new(),
            cell: self.cell(MsgKind::Silence),
        }
    }

    pub fn create_quit(&self) -> Msg {
        Msg::Quit(MsgQuit {
            cell: self.cell(MsgKind::Quit),
        })
    }

    pub(crate) fn create_playable(
        &self,
        source: PlayableSource,
        bytes: usize,
        sample_rate: u32,
        bit_depth: u32,
        channels: u32,
        ramp: Ramp,
    ) -> MsgPlayable {
        MsgPlayable {
            source,
            bytes,
            sample_rate,
            bit_depth,
            channels,
            ramp,
            cell: self.cell(MsgKind::Playable),
        }
    }

    /// Silence in the format of `format`, for renderers that need padding
    pub fn create_playable_silence(
        &self,
        bytes: usize,
        format: AudioFormat,
        sample_rate: u32,
        bit_depth: u32,
        channels: u32,
    ) -> MsgPlayable {
        self.create_playable(
            PlayableSource::Silence(format),
            bytes,
            sample_rate,
            bit_depth,
            channels,
            Ramp::new(),
        )
    }

    fn decoded_audio(&self, data: &[u8]) -> Arc<DecodedAudio> {
        let mut buf = self.buffers.acquire();
        buf.extend_from_slice(data);
        Arc::new(DecodedAudio::new(buf, Arc::clone(&self.buffers)))
    }
}
