//! # Network audio streaming pipeline (nar-pipeline)
//!
//! Core of a network audio renderer: a chain of elements that carries
//! decoded audio and control messages from producers to a clock-driven
//! animator.
//!
//! **Architecture:** producers push into a [`StreamValidator`](elements::StreamValidator)
//! feeding a bounded reservoir; the animator pulls from the far end of a
//! chain of pull elements (drain, flush, ramp, mute, branch, timed start,
//! pre-driver). All audio payloads come from the pooled [`msg::MsgFactory`].
//! Control threads act on the chain through the handles collected in
//! [`PipelineControls`].

pub mod audio_time;
pub mod branch_controller;
pub mod config;
pub mod dsd;
pub mod elements;
pub mod error;
pub mod msg;
pub mod observer;
pub mod pipeline;
pub mod sender;

pub use audio_time::{AudioTime, AudioTimeCpu};
pub use branch_controller::BranchController;
pub use config::PipelineConfig;
pub use error::{Error, FormatError, Result};
pub use pipeline::{Pipeline, PipelineControls, PipelineHooks, PipelineInput, PipelineOutput};
