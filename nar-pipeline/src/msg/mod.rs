//! Pipeline messages
//!
//! Everything that moves through the pipeline is a [`Msg`]: a closed set of
//! control and audio variants. Elements match on the variants they care about
//! and pass the rest through unchanged. Each element declares the kinds it
//! accepts as a [`MsgKinds`] set and calls [`ensure_supported`] on every
//! message it receives, so a misrouted message fails loudly instead of being
//! silently mishandled.
//!
//! Messages are exclusively owned. Moving a `Msg` transfers ownership;
//! dropping it returns its pool cell (and any sample buffer it was the last
//! user of) to the [`MsgFactory`].

pub mod audio;
pub mod factory;
pub mod queue;
pub mod ramp;
pub mod stream;

pub use audio::{
    AudioFormat, MsgAudio, MsgAudioDsd, MsgAudioPcm, MsgPlayable, MsgSilence, DSD_BIT_DEPTH,
    DSD_SILENCE_BYTE,
};
pub use factory::{AllocatorStats, MsgFactory, MsgFactoryConfig, PoolCell};
pub use queue::MsgQueue;
pub use ramp::{Ramp, RampDirection, RAMP_MAX, RAMP_MIN};
pub use stream::{
    DecodedStreamInfo, ModeInfo, PipelineAnimator, StreamHandler, StreamPlay, Track,
    STREAM_ID_INVALID,
};

use std::sync::Arc;

/// Halt id used by halts that nobody waits for
pub const HALT_ID_NONE: u32 = 0;

/// Halt id that never matches a real halt
pub const HALT_ID_INVALID: u32 = u32::MAX;

/// Flush id that never matches a real flush
pub const FLUSH_ID_INVALID: u32 = 0;

/// One-shot completion callback carried by `Halt` and `Drain`
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Pull side of a pipeline link
pub trait PipelineElementUpstream: Send {
    /// Return the next message, blocking until one is available
    fn pull(&mut self) -> Msg;
}

/// Push side of a pipeline link
pub trait PipelineElementDownstream: Send {
    fn push(&mut self, msg: Msg);
}

/// Discriminant for each message variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgKind {
    Mode,
    Track,
    Drain,
    Delay,
    EncodedStream,
    AudioEncoded,
    MetaText,
    StreamInterrupted,
    Halt,
    Flush,
    Wait,
    DecodedStream,
    AudioPcm,
    AudioDsd,
    Silence,
    Playable,
    Quit,
}

impl MsgKind {
    /// Every kind, in discriminant order
    pub const ALL_KINDS: [MsgKind; 17] = [
        MsgKind::Mode,
        MsgKind::Track,
        MsgKind::Drain,
        MsgKind::Delay,
        MsgKind::EncodedStream,
        MsgKind::AudioEncoded,
        MsgKind::MetaText,
        MsgKind::StreamInterrupted,
        MsgKind::Halt,
        MsgKind::Flush,
        MsgKind::Wait,
        MsgKind::DecodedStream,
        MsgKind::AudioPcm,
        MsgKind::AudioDsd,
        MsgKind::Silence,
        MsgKind::Playable,
        MsgKind::Quit,
    ];
}

/// Set of message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgKinds(u32);

impl MsgKinds {
    pub const NONE: MsgKinds = MsgKinds(0);
    pub const ALL: MsgKinds = MsgKinds((1 << MsgKind::ALL_KINDS.len()) - 1);

    /// Build a set from a list of kinds (usable in `const` items)
    pub const fn of(kinds: &[MsgKind]) -> MsgKinds {
        let mut bits = 0;
        let mut i = 0;
        while i < kinds.len() {
            bits |= 1 << kinds[i] as u32;
            i += 1;
        }
        MsgKinds(bits)
    }

    pub const fn with(self, kind: MsgKind) -> MsgKinds {
        MsgKinds(self.0 | (1 << kind as u32))
    }

    pub const fn without(self, kind: MsgKind) -> MsgKinds {
        MsgKinds(self.0 & !(1 << kind as u32))
    }

    pub const fn contains(self, kind: MsgKind) -> bool {
        self.0 & (1 << kind as u32) != 0
    }
}

/// Panic if `msg` is not one of the kinds `element` declared
///
/// A message an element never expects can only arrive through a wiring
/// mistake.
pub fn ensure_supported(element: &str, supported: MsgKinds, msg: &Msg) {
    let kind = msg.kind();
    if !supported.contains(kind) {
        tracing::error!("{} received unsupported message {:?}", element, kind);
        panic!("{} received unsupported message {:?}", element, kind);
    }
}

/// Playback mode change
pub struct MsgMode {
    pub(crate) mode: String,
    pub(crate) info: ModeInfo,
    pub(crate) cell: PoolCell,
}

impl MsgMode {
    pub fn mode(&self) -> &str {
        &self.mode
    }

    pub fn info(&self) -> &ModeInfo {
        &self.info
    }
}

/// Start of a new track
pub struct MsgTrack {
    pub(crate) track: Arc<Track>,
    pub(crate) start_of_stream: bool,
    pub(crate) cell: PoolCell,
}

impl MsgTrack {
    pub fn track(&self) -> &Arc<Track> {
        &self.track
    }

    pub fn start_of_stream(&self) -> bool {
        self.start_of_stream
    }
}

/// Request that the renderer acknowledge when everything before it has played
///
/// The callback runs exactly once: when [`MsgDrain::report_drained`] is
/// called, or when the message is dropped unreported, so a waiter is never
/// stranded by a discarded drain.
pub struct MsgDrain {
    pub(crate) id: u32,
    pub(crate) callback: Option<Callback>,
    pub(crate) cell: PoolCell,
}

impl MsgDrain {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn report_drained(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback();
        }
    }

    /// Replace the completion callback, returning the previous one
    pub fn replace_callback(&mut self, callback: Option<Callback>) -> Option<Callback> {
        std::mem::replace(&mut self.callback, callback)
    }
}

impl Drop for MsgDrain {
    fn drop(&mut self) {
        self.report_drained();
    }
}

/// Latency the pipeline should add downstream of this point
pub struct MsgDelay {
    pub(crate) remaining_jiffies: u64,
    pub(crate) total_jiffies: u64,
    pub(crate) cell: PoolCell,
}

impl MsgDelay {
    pub fn remaining_jiffies(&self) -> u64 {
        self.remaining_jiffies
    }

    pub fn total_jiffies(&self) -> u64 {
        self.total_jiffies
    }
}

/// Start of an encoded stream, carrying its handler
pub struct MsgEncodedStream {
    pub(crate) uri: String,
    pub(crate) meta_text: String,
    pub(crate) total_bytes: u64,
    pub(crate) stream_id: u32,
    pub(crate) seekable: bool,
    pub(crate) live: bool,
    pub(crate) stream_handler: Option<Arc<dyn StreamHandler>>,
    pub(crate) cell: PoolCell,
}

impl MsgEncodedStream {
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn meta_text(&self) -> &str {
        &self.meta_text
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    pub fn seekable(&self) -> bool {
        self.seekable
    }

    pub fn live(&self) -> bool {
        self.live
    }

    pub fn stream_handler(&self) -> Option<&Arc<dyn StreamHandler>> {
        self.stream_handler.as_ref()
    }

    /// Replace the handler, returning the previous one
    pub fn replace_stream_handler(
        &mut self,
        handler: Option<Arc<dyn StreamHandler>>,
    ) -> Option<Arc<dyn StreamHandler>> {
        std::mem::replace(&mut self.stream_handler, handler)
    }
}

/// Undecoded bytes
pub struct MsgAudioEncoded {
    pub(crate) data: Vec<u8>,
    pub(crate) cell: PoolCell,
}

impl MsgAudioEncoded {
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// In-stream metadata update
pub struct MsgMetaText {
    pub(crate) text: String,
    pub(crate) cell: PoolCell,
}

impl MsgMetaText {
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Upstream data stopped unexpectedly
pub struct MsgStreamInterrupted {
    pub(crate) jiffies: u64,
    pub(crate) cell: PoolCell,
}

impl MsgStreamInterrupted {
    /// Audio known to be missing at this point, zero if unknown
    pub fn jiffies(&self) -> u64 {
        self.jiffies
    }
}

/// Clean break in audio
pub struct MsgHalt {
    pub(crate) id: u32,
    pub(crate) callback: Option<Callback>,
    pub(crate) cell: PoolCell,
}

impl MsgHalt {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Run the completion callback, if any (at most once)
    pub fn report_halted(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback();
        }
    }

    /// Replace the completion callback, returning the previous one
    pub fn replace_callback(&mut self, callback: Option<Callback>) -> Option<Callback> {
        std::mem::replace(&mut self.callback, callback)
    }
}

/// Boundary of discarded stream data
pub struct MsgFlush {
    pub(crate) id: u32,
    pub(crate) cell: PoolCell,
}

impl MsgFlush {
    pub fn id(&self) -> u32 {
        self.id
    }
}

/// Upstream is waiting; downstream should not report starvation
pub struct MsgWait {
    pub(crate) cell: PoolCell,
}

/// Format of the audio that follows
pub struct MsgDecodedStream {
    pub(crate) info: DecodedStreamInfo,
    pub(crate) cell: PoolCell,
}

impl MsgDecodedStream {
    pub fn info(&self) -> &DecodedStreamInfo {
        &self.info
    }
}

/// Terminal message; every element resets and forwards it
pub struct MsgQuit {
    pub(crate) cell: PoolCell,
}

/// Any pipeline message
pub enum Msg {
    Mode(MsgMode),
    Track(MsgTrack),
    Drain(MsgDrain),
    Delay(MsgDelay),
    EncodedStream(MsgEncodedStream),
    AudioEncoded(MsgAudioEncoded),
    MetaText(MsgMetaText),
    StreamInterrupted(MsgStreamInterrupted),
    Halt(MsgHalt),
    Flush(MsgFlush),
    Wait(MsgWait),
    DecodedStream(MsgDecodedStream),
    AudioPcm(MsgAudioPcm),
    AudioDsd(MsgAudioDsd),
    Silence(MsgSilence),
    Playable(MsgPlayable),
    Quit(MsgQuit),
}

impl Msg {
    pub fn kind(&self) -> MsgKind {
        match self {
            Msg::Mode(_) => MsgKind::Mode,
            Msg::Track(_) => MsgKind::Track,
            Msg::Drain(_) => MsgKind::Drain,
            Msg::Delay(_) => MsgKind::Delay,
            Msg::EncodedStream(_) => MsgKind::EncodedStream,
            Msg::AudioEncoded(_) => MsgKind::AudioEncoded,
            Msg::MetaText(_) => MsgKind::MetaText,
            Msg::StreamInterrupted(_) => MsgKind::StreamInterrupted,
            Msg::Halt(_) => MsgKind::Halt,
            Msg::Flush(_) => MsgKind::Flush,
            Msg::Wait(_) => MsgKind::Wait,
            Msg::DecodedStream(_) => MsgKind::DecodedStream,
            Msg::AudioPcm(_) => MsgKind::AudioPcm,
            Msg::AudioDsd(_) => MsgKind::AudioDsd,
            Msg::Silence(_) => MsgKind::Silence,
            Msg::Playable(_) => MsgKind::Playable,
            Msg::Quit(_) => MsgKind::Quit,
        }
    }

    /// Decoded audio or silence
    pub fn is_audio(&self) -> bool {
        matches!(self, Msg::AudioPcm(_) | Msg::AudioDsd(_) | Msg::Silence(_))
    }

    /// Duration of an audio message in jiffies, zero for everything else
    pub fn jiffies(&self) -> u64 {
        match self {
            Msg::AudioPcm(audio) => audio.jiffies(),
            Msg::AudioDsd(audio) => audio.jiffies(),
            Msg::Silence(audio) => audio.jiffies(),
            _ => 0,
        }
    }

    /// Copy of this message for delivery down a branch
    ///
    /// Audio copies share the original's sample buffer. `Halt` and `Drain`
    /// copies carry no completion callback: only the original reports.
    ///
    /// # Panics
    ///
    /// Panics for `EncodedStream`, `AudioEncoded` and `Playable`, which
    /// cannot be branched.
    pub fn clone_for_branch(&self) -> Msg {
        match self {
            Msg::Mode(m) => Msg::Mode(MsgMode {
                mode: m.mode.clone(),
                info: m.info.clone(),
                cell: m.cell.sibling(),
            }),
            Msg::Track(m) => Msg::Track(MsgTrack {
                track: Arc::clone(&m.track),
                start_of_stream: m.start_of_stream,
                cell: m.cell.sibling(),
            }),
            Msg::Drain(m) => Msg::Drain(MsgDrain {
                id: m.id,
                callback: None,
                cell: m.cell.sibling(),
            }),
            Msg::Delay(m) => Msg::Delay(MsgDelay {
                remaining_jiffies: m.remaining_jiffies,
                total_jiffies: m.total_jiffies,
                cell: m.cell.sibling(),
            }),
            Msg::MetaText(m) => Msg::MetaText(MsgMetaText {
                text: m.text.clone(),
                cell: m.cell.sibling(),
            }),
            Msg::StreamInterrupted(m) => Msg::StreamInterrupted(MsgStreamInterrupted {
                jiffies: m.jiffies,
                cell: m.cell.sibling(),
            }),
            Msg::Halt(m) => Msg::Halt(MsgHalt {
                id: m.id,
                callback: None,
                cell: m.cell.sibling(),
            }),
            Msg::Flush(m) => Msg::Flush(MsgFlush {
                id: m.id,
                cell: m.cell.sibling(),
            }),
            Msg::Wait(m) => Msg::Wait(MsgWait {
                cell: m.cell.sibling(),
            }),
            Msg::DecodedStream(m) => Msg::DecodedStream(MsgDecodedStream {
                info: m.info.clone(),
                cell: m.cell.sibling(),
            }),
            Msg::AudioPcm(m) => Msg::AudioPcm(m.clone_for_branch()),
            Msg::AudioDsd(m) => Msg::AudioDsd(m.clone_for_branch()),
            Msg::Silence(m) => Msg::Silence(m.clone_for_branch()),
            Msg::Quit(m) => Msg::Quit(MsgQuit {
                cell: m.cell.sibling(),
            }),
            Msg::EncodedStream(_) | Msg::AudioEncoded(_) | Msg::Playable(_) => {
                panic!("{:?} cannot be cloned for a branch", self.kind())
            }
        }
    }
}

impl std::fmt::Debug for Msg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Msg::Mode(m) => write!(f, "Mode({})", m.mode),
            Msg::Drain(m) => write!(f, "Drain({})", m.id),
            Msg::Halt(m) => write!(f, "Halt({})", m.id),
            Msg::Flush(m) => write!(f, "Flush({})", m.id),
            Msg::MetaText(m) => write!(f, "MetaText({:?})", m.text),
            Msg::EncodedStream(m) => write!(f, "EncodedStream({})", m.stream_id),
            Msg::DecodedStream(m) => write!(f, "DecodedStream({:?})", m.info),
            Msg::AudioPcm(m) => write!(f, "AudioPcm({} jiffies, {:?})", m.jiffies(), m.ramp()),
            Msg::AudioDsd(m) => write!(f, "AudioDsd({} jiffies, {:?})", m.jiffies(), m.ramp()),
            Msg::Silence(m) => write!(f, "Silence({} jiffies)", m.jiffies()),
            Msg::StreamInterrupted(m) => write!(f, "StreamInterrupted({} jiffies)", m.jiffies),
            Msg::Playable(m) => write!(f, "Playable({} bytes)", m.bytes()),
            other => write!(f, "{:?}", other.kind()),
        }
    }
}
