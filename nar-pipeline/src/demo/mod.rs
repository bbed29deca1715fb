//! Synthetic producer and software renderer for running the pipeline standalone

pub mod animator;
pub mod source;

pub use animator::{RenderThread, SoftwareAnimator};
pub use source::{SourceFormat, SyntheticSource};
