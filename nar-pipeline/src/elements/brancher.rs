//! Copying messages to an alternate output
//!
//! A [`Brancher`] sits in the pull chain. When enabled and given a
//! [`Branch`], every message it pulls is cloned and pushed to the branch's
//! downstream (usually a [`crate::sender::SenderThread`]) before the
//! original continues down the main path.
//!
//! The message that switches a branch off is still delivered to it, so the
//! branch sees the exact transition (for example the `Mode` that ends a
//! broadcast) before it stops receiving anything.

use crate::msg::{Msg, MsgKind, PipelineElementDownstream, PipelineElementUpstream};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

/// How a brancher interacts with the others in a [`crate::BranchController`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchPriority {
    /// Active whenever no other branch is enabled
    Default,
    /// Disables every other branch when enabled
    Exclusive,
    /// Runs alongside other branches
    Concurrent,
}

/// Transform applied to messages before or after branching
pub trait BranchProcessor: Send {
    fn process(&mut self, msg: Msg) -> Msg;
}

/// Decides per message whether the branch wants it
pub trait BranchEnable: Send {
    fn peek(&mut self, msg: &Msg) -> bool;
}

/// Destination for branched messages plus its optional processing hooks
pub struct Branch {
    downstream: Box<dyn PipelineElementDownstream>,
    pre_processor: Option<Box<dyn BranchProcessor>>,
    enable: Option<Box<dyn BranchEnable>>,
    post_processor: Option<Box<dyn BranchProcessor>>,
}

impl Branch {
    pub fn new(downstream: Box<dyn PipelineElementDownstream>) -> Self {
        Self {
            downstream,
            pre_processor: None,
            enable: None,
            post_processor: None,
        }
    }

    /// Runs on every message, whether or not the branch is enabled
    pub fn with_pre_processor(mut self, processor: Box<dyn BranchProcessor>) -> Self {
        self.pre_processor = Some(processor);
        self
    }

    pub fn with_enable(mut self, enable: Box<dyn BranchEnable>) -> Self {
        self.enable = Some(enable);
        self
    }

    /// Runs on the main-path message after a copy went to the branch
    pub fn with_post_processor(mut self, processor: Box<dyn BranchProcessor>) -> Self {
        self.post_processor = Some(processor);
        self
    }

    fn pre_process(&mut self, msg: Msg) -> Msg {
        match &mut self.pre_processor {
            Some(processor) => processor.process(msg),
            None => msg,
        }
    }

    fn wants(&mut self, msg: &Msg) -> bool {
        match &mut self.enable {
            Some(enable) => enable.peek(msg),
            None => true,
        }
    }

    fn post_process(&mut self, msg: Msg) -> Msg {
        match &mut self.post_processor {
            Some(processor) => processor.process(msg),
            None => msg,
        }
    }
}

/// Control surface used by [`crate::BranchController`]
pub trait BrancherControllable: Send + Sync {
    fn id(&self) -> &str;
    fn priority(&self) -> BranchPriority;
    fn set_enabled(&self, enabled: bool);
    fn is_enabled(&self) -> bool;
}

struct BrancherState {
    branch: Option<Branch>,
    enabled: bool,
}

struct BrancherShared {
    id: String,
    priority: BranchPriority,
    state: Mutex<BrancherState>,
}

/// Cloneable handle to a [`Brancher`]
#[derive(Clone)]
pub struct BrancherHandle {
    shared: Arc<BrancherShared>,
}

impl BrancherHandle {
    /// Attach the branch that receives copies, replacing any previous one
    pub fn set_branch(&self, branch: Branch) {
        debug!("Brancher {}: branch attached", self.shared.id);
        self.shared.state.lock().unwrap().branch = Some(branch);
    }
}

impl BrancherControllable for BrancherHandle {
    fn id(&self) -> &str {
        &self.shared.id
    }

    fn priority(&self) -> BranchPriority {
        self.shared.priority
    }

    fn set_enabled(&self, enabled: bool) {
        let mut state = self.shared.state.lock().unwrap();
        if state.enabled != enabled {
            debug!("Brancher {}: enabled={}", self.shared.id, enabled);
            state.enabled = enabled;
        }
    }

    fn is_enabled(&self) -> bool {
        self.shared.state.lock().unwrap().enabled
    }
}

/// Pull element cloning messages to an optional branch
pub struct Brancher {
    upstream: Box<dyn PipelineElementUpstream>,
    shared: Arc<BrancherShared>,
    enabled_for_previous: bool,
}

impl Brancher {
    pub fn new(
        upstream: Box<dyn PipelineElementUpstream>,
        id: impl Into<String>,
        priority: BranchPriority,
    ) -> Self {
        Self {
            upstream,
            shared: Arc::new(BrancherShared {
                id: id.into(),
                priority,
                state: Mutex::new(BrancherState {
                    branch: None,
                    enabled: false,
                }),
            }),
            enabled_for_previous: false,
        }
    }

    pub fn handle(&self) -> BrancherHandle {
        BrancherHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    fn branchable(msg: &Msg) -> bool {
        !matches!(
            msg.kind(),
            MsgKind::EncodedStream | MsgKind::AudioEncoded | MsgKind::Playable
        )
    }
}

impl PipelineElementUpstream for Brancher {
    fn pull(&mut self) -> Msg {
        let msg = self.upstream.pull();
        let mut state = self.shared.state.lock().unwrap();
        let enabled = state.enabled;
        let Some(branch) = state.branch.as_mut() else {
            return msg;
        };
        let msg = branch.pre_process(msg);
        if !Self::branchable(&msg) {
            return msg;
        }
        let enabled_now = enabled && branch.wants(&msg);
        let forward = enabled_now || self.enabled_for_previous;
        self.enabled_for_previous = enabled_now;
        if !forward {
            return msg;
        }
        trace!("Brancher {}: branching {:?}", self.shared.id, msg);
        branch.downstream.push(msg.clone_for_branch());
        branch.post_process(msg)
    }
}
