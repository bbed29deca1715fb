//! Decoupling a slow consumer from the audio thread

pub mod queue;
pub mod thread;

pub use queue::{SenderMsgQueue, DEFAULT_MAX_BACKLOG};
pub use thread::SenderThread;
