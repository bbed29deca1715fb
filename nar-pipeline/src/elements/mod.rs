//! Pipeline elements
//!
//! Pull elements wrap the element upstream of them and implement
//! [`PipelineElementUpstream`](crate::msg::PipelineElementUpstream); push
//! elements wrap the element downstream and implement
//! [`PipelineElementDownstream`](crate::msg::PipelineElementDownstream).
//! Elements that accept commands from other threads hand out a cloneable
//! handle sharing their state.

pub mod brancher;
pub mod drainer;
pub mod flusher;
pub mod muter;
pub mod muter_volume;
pub mod pre_driver;
pub mod ramper;
pub mod reservoir;
pub mod starter_timed;
pub mod stream_validator;

#[cfg(test)]
pub(crate) mod testing;

pub use brancher::{
    Branch, BranchEnable, BranchPriority, BranchProcessor, Brancher, BrancherControllable,
    BrancherHandle,
};
pub use drainer::{DrainerHandle, DrainerLeft, DrainerRight};
pub use flusher::{Flusher, FlusherHandle};
pub use muter::{Muter, MuterHandle, MuterState};
pub use muter_volume::{
    MuterVolume, MuterVolumeHandle, MuterVolumeState, VolumeMuteStatus, VolumeMuter,
    VolumeRamperStub,
};
pub use pre_driver::{PreDriver, PreDriverStats};
pub use ramper::Ramper;
pub use reservoir::{msg_reservoir, ReservoirConsumer, ReservoirLevel, ReservoirProducer};
pub use starter_timed::{StarterHandle, StarterTimed};
pub use stream_validator::StreamValidator;

/// Mute control shared by the sample-domain and volume muters
///
/// `mute` blocks until the output is silent; `unmute` returns at once.
/// Both are idempotent.
pub trait Mute: Send + Sync {
    fn mute(&self);
    fn unmute(&self);
}
