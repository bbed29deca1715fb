//! Pipeline assembly
//!
//! ```text
//! push:  StreamValidator → reservoir
//! pull:  reservoir → DrainerLeft → Flusher → Ramper → Muter → Brancher
//!          → DrainerRight → StarterTimed → PreDriver → (animator)
//! ```
//!
//! [`Pipeline::new`] builds the chain and splits it into the push input,
//! the pull output and a cloneable set of control handles, so each can be
//! moved to the thread that owns it.

use crate::audio_time::AudioTime;
use crate::branch_controller::BranchController;
use crate::config::{MuterMode, PipelineConfig};
use crate::elements::{
    msg_reservoir, Branch, BranchPriority, Brancher, BrancherHandle, DrainerHandle, DrainerLeft,
    DrainerRight, Flusher, FlusherHandle, Mute, Muter, MuterVolume, MuterVolumeHandle, PreDriver,
    PreDriverStats, Ramper, ReservoirLevel, StarterHandle, StarterTimed, StreamValidator,
    VolumeMuter, VolumeRamperStub,
};
use crate::error::Result;
use crate::msg::{Msg, MsgFactory, PipelineAnimator, PipelineElementDownstream, PipelineElementUpstream};
use crate::observer::ObserverHook;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Id of the pipeline's brancher in its [`BranchController`]
pub const PIPELINE_BRANCH_ID: &str = "Sender";

/// Optional observer hooks for pipeline events
#[derive(Clone, Default)]
pub struct PipelineHooks {
    /// Scheduled on every mute state change
    pub muter: Option<ObserverHook>,
    /// Scheduled when audio resumes after a run of silence
    pub starvation: Option<ObserverHook>,
}

/// Push side: producers deliver decoded messages here
pub struct PipelineInput {
    validator: StreamValidator,
}

impl PipelineInput {
    pub fn is_flushing(&self) -> bool {
        self.validator.is_flushing()
    }
}

impl PipelineElementDownstream for PipelineInput {
    fn push(&mut self, msg: Msg) {
        self.validator.push(msg);
    }
}

/// Pull side: the animator pulls render-ready messages from here
pub struct PipelineOutput {
    pre_driver: PreDriver,
}

impl PipelineElementUpstream for PipelineOutput {
    fn pull(&mut self) -> Msg {
        self.pre_driver.pull()
    }
}

/// Commands that can be issued from any thread
#[derive(Clone)]
pub struct PipelineControls {
    mute: Arc<dyn Mute>,
    volume_muter: Option<MuterVolumeHandle>,
    flusher: FlusherHandle,
    starter: StarterHandle,
    drainer_left: DrainerHandle,
    drainer_right: DrainerHandle,
    brancher: BrancherHandle,
    branch_controller: Arc<BranchController>,
    reservoir: ReservoirLevel,
    pre_driver: PreDriverStats,
}

impl PipelineControls {
    /// Mute, blocking until output is silent
    pub fn mute(&self) {
        self.mute.mute();
    }

    pub fn unmute(&self) {
        self.mute.unmute();
    }

    /// Replace the volume stage driven by a volume-mode muter
    ///
    /// Returns `false` if the pipeline mutes samples instead.
    pub fn attach_volume(&self, volume: Box<dyn VolumeMuter>) -> bool {
        match &self.volume_muter {
            Some(handle) => {
                handle.start(volume);
                true
            }
            None => false,
        }
    }

    /// Drop everything up to the `Halt` with this id
    pub fn discard_until_halt(&self, id: u32) {
        self.flusher.discard_until_halt(id);
    }

    /// Drop everything up to the `Flush` with this id
    pub fn discard_until_flush(&self, id: u32) {
        self.flusher.discard_until_flush(id);
    }

    /// Start the next stream when the clock reads `ticks`
    pub fn start_at(&self, ticks: u64) {
        self.starter.start_at(ticks);
    }

    /// Drain the whole pull chain and wait for it to empty
    ///
    /// Returns `false` if the drain did not complete within `timeout`.
    pub fn drain(&self, timeout: Duration) -> bool {
        self.drainer_left.request_drain();
        self.drainer_left.wait_drained(timeout)
    }

    /// Drain only the renderer side of the branch point
    pub fn drain_output(&self, timeout: Duration) -> bool {
        self.drainer_right.request_drain();
        self.drainer_right.wait_drained(timeout)
    }

    /// Attach the branch fed by the pipeline's brancher
    pub fn set_branch(&self, branch: Branch) {
        self.brancher.set_branch(branch);
    }

    pub fn branch_controller(&self) -> &Arc<BranchController> {
        &self.branch_controller
    }

    pub fn reservoir(&self) -> &ReservoirLevel {
        &self.reservoir
    }

    pub fn starvation(&self) -> &PreDriverStats {
        &self.pre_driver
    }
}

/// An assembled pipeline, ready to be split across threads
pub struct Pipeline {
    factory: Arc<MsgFactory>,
    input: PipelineInput,
    output: PipelineOutput,
    controls: PipelineControls,
}

impl Pipeline {
    pub fn new(
        config: &PipelineConfig,
        animator: Arc<dyn PipelineAnimator>,
        audio_time: Arc<dyn AudioTime>,
        hooks: PipelineHooks,
    ) -> Result<Self> {
        config.validate()?;
        let factory = Arc::new(MsgFactory::new(&config.msg_pool));

        let (producer, consumer) = msg_reservoir(config.reservoir_msgs);
        let reservoir = consumer.level();
        let validator = StreamValidator::new(Box::new(producer), Arc::clone(&animator));

        let drainer_left = DrainerLeft::new(Box::new(consumer), Arc::clone(&factory));
        let drainer_left_handle = drainer_left.handle();
        let flusher = Flusher::new(Box::new(drainer_left), "Flusher");
        let flusher_handle = flusher.handle();
        let ramper = Ramper::new(
            Box::new(flusher),
            config.ramp_long_jiffies(),
            config.ramp_short_jiffies(),
        );

        let muted: Box<dyn PipelineElementUpstream>;
        let mute: Arc<dyn Mute>;
        let mut volume_muter = None;
        match config.muter.mode {
            MuterMode::Samples => {
                let muter = Muter::new(
                    Box::new(ramper),
                    Arc::clone(&animator),
                    config.muter_ramp_jiffies(),
                    hooks.muter.clone(),
                );
                mute = Arc::new(muter.handle());
                muted = Box::new(muter);
            }
            MuterMode::Volume => {
                let muter = MuterVolume::new(Box::new(ramper));
                let handle = muter.handle();
                handle.start(Box::new(VolumeRamperStub));
                mute = Arc::new(handle.clone());
                volume_muter = Some(handle);
                muted = Box::new(muter);
            }
        }

        let brancher = Brancher::new(muted, PIPELINE_BRANCH_ID, BranchPriority::Exclusive);
        let brancher_handle = brancher.handle();
        let branch_controller = Arc::new(BranchController::new());
        branch_controller.attach_brancher(Arc::new(brancher_handle.clone()))?;

        let drainer_right = DrainerRight::new(Box::new(brancher), Arc::clone(&factory));
        let drainer_right_handle = drainer_right.handle();
        let starter = StarterTimed::new(
            Box::new(drainer_right),
            Arc::clone(&factory),
            audio_time,
            Arc::clone(&animator),
            config.starter_max_silence_jiffies(),
        );
        let starter_handle = starter.handle();
        let pre_driver = PreDriver::new(Box::new(starter), Arc::clone(&factory), hooks.starvation);
        let pre_driver_stats = pre_driver.stats();

        info!(
            "Pipeline assembled (muter {:?}, reservoir {} msgs)",
            config.muter.mode, config.reservoir_msgs
        );
        Ok(Self {
            factory,
            input: PipelineInput { validator },
            output: PipelineOutput { pre_driver },
            controls: PipelineControls {
                mute,
                volume_muter,
                flusher: flusher_handle,
                starter: starter_handle,
                drainer_left: drainer_left_handle,
                drainer_right: drainer_right_handle,
                brancher: brancher_handle,
                branch_controller,
                reservoir,
                pre_driver: pre_driver_stats,
            },
        })
    }

    /// Factory every producer feeding this pipeline must allocate from
    pub fn factory(&self) -> &Arc<MsgFactory> {
        &self.factory
    }

    pub fn controls(&self) -> PipelineControls {
        self.controls.clone()
    }

    pub fn into_parts(self) -> (PipelineInput, PipelineOutput, PipelineControls) {
        (self.input, self.output, self.controls)
    }
}
