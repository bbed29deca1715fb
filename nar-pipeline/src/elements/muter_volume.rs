//! Volume-domain muting
//!
//! Same contract as [`super::muter::Muter`], but the fade is performed by an
//! external volume stage (hardware or analog) stepped in time with the audio
//! this element passes. Samples are never modified.

use super::Mute;
use crate::msg::{
    ensure_supported, Callback, Msg, MsgKind, MsgKinds, PipelineElementUpstream,
};
use nar_common::timing::JIFFIES_PER_MS;
use std::sync::{Arc, Condvar, Mutex};
use tracing::{debug, trace};

const SUPPORTED_MSG_KINDS: MsgKinds = MsgKinds::ALL
    .without(MsgKind::AudioEncoded)
    .without(MsgKind::Playable);

/// Audio that must pass after the volume reaches zero before mute is reported
pub const JIFFIES_UNTIL_MUTE: u64 = 10 * JIFFIES_PER_MS;

/// Progress of a stepped volume transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeMuteStatus {
    InProgress,
    Complete,
}

/// Volume stage able to fade to and from silence in steps
///
/// `step_*` calls receive the duration of audio that has just passed the
/// muter, so the fade tracks playback rather than wall-clock time.
pub trait VolumeMuter: Send {
    fn begin_mute(&mut self) -> VolumeMuteStatus;
    fn step_mute(&mut self, jiffies: u64) -> VolumeMuteStatus;
    /// Jump straight to muted
    fn set_muted(&mut self);
    fn begin_unmute(&mut self) -> VolumeMuteStatus;
    fn step_unmute(&mut self, jiffies: u64) -> VolumeMuteStatus;
    /// Jump straight to full volume
    fn set_unmuted(&mut self);
}

/// Volume stage for renderers with no volume control: every step completes at once
#[derive(Debug, Default)]
pub struct VolumeRamperStub;

impl VolumeMuter for VolumeRamperStub {
    fn begin_mute(&mut self) -> VolumeMuteStatus {
        VolumeMuteStatus::Complete
    }

    fn step_mute(&mut self, _jiffies: u64) -> VolumeMuteStatus {
        VolumeMuteStatus::Complete
    }

    fn set_muted(&mut self) {}

    fn begin_unmute(&mut self) -> VolumeMuteStatus {
        VolumeMuteStatus::Complete
    }

    fn step_unmute(&mut self, _jiffies: u64) -> VolumeMuteStatus {
        VolumeMuteStatus::Complete
    }

    fn set_unmuted(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuterVolumeState {
    Running,
    MutingRamp,
    /// Volume is at zero; letting already-rendered audio play out
    MutingWait,
    Muted,
    UnmutingRamp,
}

struct MuterVolumeInner {
    state: MuterVolumeState,
    volume: Option<Box<dyn VolumeMuter>>,
    halted: bool,
    jiffies_until_mute: u64,
}

impl MuterVolumeInner {
    fn set_state(&mut self, state: MuterVolumeState, changed: &Condvar) {
        if self.state != state {
            debug!("MuterVolume: {:?} -> {:?}", self.state, state);
            self.state = state;
            changed.notify_all();
        }
    }

    fn is_muting(&self) -> bool {
        matches!(
            self.state,
            MuterVolumeState::MutingRamp | MuterVolumeState::MutingWait
        )
    }
}

struct MuterVolumeShared {
    inner: Mutex<MuterVolumeInner>,
    changed: Condvar,
}

impl MuterVolumeShared {
    fn pipeline_halted(&self) {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        inner.halted = true;
        inner.jiffies_until_mute = 0;
        match inner.state {
            MuterVolumeState::MutingRamp | MuterVolumeState::MutingWait => {
                if let Some(volume) = inner.volume.as_mut() {
                    volume.set_muted();
                }
                inner.set_state(MuterVolumeState::Muted, &self.changed);
            }
            MuterVolumeState::UnmutingRamp => {
                if let Some(volume) = inner.volume.as_mut() {
                    volume.set_unmuted();
                }
                inner.set_state(MuterVolumeState::Running, &self.changed);
            }
            MuterVolumeState::Running | MuterVolumeState::Muted => {}
        }
    }
}

/// Control surface for a [`MuterVolume`]
#[derive(Clone)]
pub struct MuterVolumeHandle {
    shared: Arc<MuterVolumeShared>,
}

impl MuterVolumeHandle {
    /// Attach the volume stage; until then mute and unmute only record state
    pub fn start(&self, mut volume: Box<dyn VolumeMuter>) {
        let mut inner = self.shared.inner.lock().unwrap();
        if inner.state == MuterVolumeState::Muted {
            volume.set_muted();
        }
        inner.volume = Some(volume);
    }

    /// Mute, blocking until the volume stage has faded and the tail has played
    pub fn mute(&self) {
        let shared = &self.shared;
        let mut guard = shared.inner.lock().unwrap();
        let inner = &mut *guard;
        let halted = inner.halted;
        let next = match inner.volume.as_mut() {
            None => Some(MuterVolumeState::Muted),
            Some(volume) => match inner.state {
                MuterVolumeState::MutingRamp
                | MuterVolumeState::MutingWait
                | MuterVolumeState::Muted => None,
                MuterVolumeState::Running | MuterVolumeState::UnmutingRamp => {
                    if halted {
                        volume.set_muted();
                        Some(MuterVolumeState::Muted)
                    } else if volume.begin_mute() == VolumeMuteStatus::Complete {
                        Some(MuterVolumeState::Muted)
                    } else {
                        Some(MuterVolumeState::MutingRamp)
                    }
                }
            },
        };
        if let Some(next) = next {
            inner.set_state(next, &shared.changed);
        }
        while guard.is_muting() {
            guard = shared.changed.wait(guard).unwrap();
        }
    }

    /// Unmute; releases any thread blocked in [`MuterVolumeHandle::mute`]
    pub fn unmute(&self) {
        let shared = &self.shared;
        let mut guard = shared.inner.lock().unwrap();
        let inner = &mut *guard;
        let halted = inner.halted;
        let next = match inner.volume.as_mut() {
            None => Some(MuterVolumeState::Running),
            Some(volume) => match inner.state {
                MuterVolumeState::Running | MuterVolumeState::UnmutingRamp => None,
                MuterVolumeState::MutingRamp
                | MuterVolumeState::MutingWait
                | MuterVolumeState::Muted => {
                    if halted {
                        volume.set_unmuted();
                        Some(MuterVolumeState::Running)
                    } else if volume.begin_unmute() == VolumeMuteStatus::Complete {
                        Some(MuterVolumeState::Running)
                    } else {
                        Some(MuterVolumeState::UnmutingRamp)
                    }
                }
            },
        };
        if let Some(next) = next {
            inner.set_state(next, &shared.changed);
        }
    }

    pub fn state(&self) -> MuterVolumeState {
        self.shared.inner.lock().unwrap().state
    }
}

impl Mute for MuterVolumeHandle {
    fn mute(&self) {
        MuterVolumeHandle::mute(self)
    }

    fn unmute(&self) {
        MuterVolumeHandle::unmute(self)
    }
}

/// Pull element stepping an external volume stage in time with audio
pub struct MuterVolume {
    upstream: Box<dyn PipelineElementUpstream>,
    shared: Arc<MuterVolumeShared>,
}

impl MuterVolume {
    pub fn new(upstream: Box<dyn PipelineElementUpstream>) -> Self {
        Self {
            upstream,
            shared: Arc::new(MuterVolumeShared {
                inner: Mutex::new(MuterVolumeInner {
                    state: MuterVolumeState::Running,
                    volume: None,
                    halted: true,
                    jiffies_until_mute: 0,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn handle(&self) -> MuterVolumeHandle {
        MuterVolumeHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    fn halt_callback(&self, original: Option<Callback>) -> Callback {
        let shared = Arc::clone(&self.shared);
        Box::new(move || {
            shared.pipeline_halted();
            if let Some(original) = original {
                original();
            }
        })
    }

    fn process_audio(&self, jiffies: u64, decoded: bool) {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().unwrap();
        if decoded {
            inner.halted = false;
        }
        let inner = &mut *inner;
        let Some(volume) = inner.volume.as_mut() else {
            return;
        };
        match inner.state {
            MuterVolumeState::MutingRamp => {
                if volume.step_mute(jiffies) == VolumeMuteStatus::Complete {
                    inner.jiffies_until_mute = JIFFIES_UNTIL_MUTE;
                    inner.set_state(MuterVolumeState::MutingWait, &shared.changed);
                }
            }
            MuterVolumeState::UnmutingRamp => {
                if volume.step_unmute(jiffies) == VolumeMuteStatus::Complete {
                    inner.set_state(MuterVolumeState::Running, &shared.changed);
                }
            }
            MuterVolumeState::MutingWait => {
                inner.jiffies_until_mute = inner.jiffies_until_mute.saturating_sub(jiffies);
                trace!("MuterVolume: {} jiffies until mute", inner.jiffies_until_mute);
                if inner.jiffies_until_mute == 0 {
                    inner.set_state(MuterVolumeState::Muted, &shared.changed);
                }
            }
            MuterVolumeState::Running | MuterVolumeState::Muted => {}
        }
    }
}

impl PipelineElementUpstream for MuterVolume {
    fn pull(&mut self) -> Msg {
        let msg = self.upstream.pull();
        ensure_supported("MuterVolume", SUPPORTED_MSG_KINDS, &msg);
        match msg {
            Msg::Halt(mut halt) => {
                let original = halt.replace_callback(None);
                halt.replace_callback(Some(self.halt_callback(original)));
                Msg::Halt(halt)
            }
            Msg::AudioPcm(audio) => {
                self.process_audio(audio.jiffies(), true);
                Msg::AudioPcm(audio)
            }
            Msg::AudioDsd(audio) => {
                self.process_audio(audio.jiffies(), true);
                Msg::AudioDsd(audio)
            }
            Msg::Silence(silence) => {
                self.process_audio(silence.jiffies(), false);
                Msg::Silence(silence)
            }
            Msg::Quit(quit) => {
                // Nothing further will be pulled; release any waiting mute
                self.shared.pipeline_halted();
                Msg::Quit(quit)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::testing::{factory, pcm, stream, ScriptedSource};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;
    use std::time::Duration;

    /// Volume stage needing `steps` calls to complete each fade
    struct SteppedVolume {
        steps: u32,
        remaining: u32,
        muted: Arc<AtomicU32>,
    }

    impl SteppedVolume {
        fn step(&mut self) -> VolumeMuteStatus {
            self.remaining = self.remaining.saturating_sub(1);
            if self.remaining == 0 {
                VolumeMuteStatus::Complete
            } else {
                VolumeMuteStatus::InProgress
            }
        }
    }

    impl VolumeMuter for SteppedVolume {
        fn begin_mute(&mut self) -> VolumeMuteStatus {
            self.remaining = self.steps;
            VolumeMuteStatus::InProgress
        }
        fn step_mute(&mut self, _jiffies: u64) -> VolumeMuteStatus {
            self.step()
        }
        fn set_muted(&mut self) {
            self.muted.store(1, Ordering::SeqCst);
        }
        fn begin_unmute(&mut self) -> VolumeMuteStatus {
            self.remaining = self.steps;
            VolumeMuteStatus::InProgress
        }
        fn step_unmute(&mut self, _jiffies: u64) -> VolumeMuteStatus {
            self.step()
        }
        fn set_unmuted(&mut self) {
            self.muted.store(0, Ordering::SeqCst);
        }
    }

    fn stepped(steps: u32) -> (Box<SteppedVolume>, Arc<AtomicU32>) {
        let muted = Arc::new(AtomicU32::new(0));
        (
            Box::new(SteppedVolume {
                steps,
                remaining: 0,
                muted: Arc::clone(&muted),
            }),
            muted,
        )
    }

    fn wait_for_state(handle: &MuterVolumeHandle, state: MuterVolumeState) {
        for _ in 0..200 {
            if handle.state() == state {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("state never reached {:?}", state);
    }

    #[test]
    fn test_mute_before_start_is_recorded() {
        let muter = MuterVolume::new(Box::new(ScriptedSource::default()));
        let handle = muter.handle();
        handle.mute();
        assert_eq!(handle.state(), MuterVolumeState::Muted);
        let (volume, muted) = stepped(1);
        handle.start(volume);
        assert_eq!(muted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stub_completes_immediately() {
        let factory = factory();
        let source = ScriptedSource::new(vec![stream(&factory, 1), pcm(&factory, 10)]);
        let mut muter = MuterVolume::new(Box::new(source));
        let handle = muter.handle();
        handle.start(Box::new(VolumeRamperStub));
        muter.pull();
        muter.pull();
        handle.mute();
        assert_eq!(handle.state(), MuterVolumeState::Muted);
        handle.unmute();
        assert_eq!(handle.state(), MuterVolumeState::Running);
    }

    #[test]
    fn test_stepped_mute_waits_for_tail() {
        let factory = factory();
        let source = ScriptedSource::new(vec![pcm(&factory, 10)]);
        let mut muter = MuterVolume::new(Box::new(source.clone()));
        let handle = muter.handle();
        let (volume, _) = stepped(2);
        handle.start(volume);
        // Audio clears the halted flag
        muter.pull();

        let mute_handle = handle.clone();
        let waiter = thread::spawn(move || mute_handle.mute());
        wait_for_state(&handle, MuterVolumeState::MutingRamp);

        // Two steps complete the fade
        source.push(pcm(&factory, 10));
        source.push(pcm(&factory, 10));
        muter.pull();
        muter.pull();
        assert_eq!(handle.state(), MuterVolumeState::MutingWait);

        // 10ms of audio (441 samples at 44.1kHz) plays out
        source.push(pcm(&factory, 441));
        muter.pull();
        waiter.join().unwrap();
        assert_eq!(handle.state(), MuterVolumeState::Muted);
    }

    #[test]
    fn test_halt_completes_pending_mute() {
        let factory = factory();
        let source = ScriptedSource::new(vec![pcm(&factory, 10)]);
        let mut muter = MuterVolume::new(Box::new(source.clone()));
        let handle = muter.handle();
        let (volume, muted) = stepped(100);
        handle.start(volume);
        muter.pull();

        let mute_handle = handle.clone();
        let waiter = thread::spawn(move || mute_handle.mute());
        wait_for_state(&handle, MuterVolumeState::MutingRamp);

        source.push(factory.create_halt(1, None));
        match muter.pull() {
            Msg::Halt(mut halt) => halt.report_halted(),
            other => panic!("unexpected {:?}", other),
        }
        waiter.join().unwrap();
        assert_eq!(handle.state(), MuterVolumeState::Muted);
        assert_eq!(muted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unmute_releases_blocked_mute() {
        let factory = factory();
        let source = ScriptedSource::new(vec![pcm(&factory, 10)]);
        let mut muter = MuterVolume::new(Box::new(source));
        let handle = muter.handle();
        let (volume, _) = stepped(100);
        handle.start(volume);
        muter.pull();

        let mute_handle = handle.clone();
        let waiter = thread::spawn(move || mute_handle.mute());
        wait_for_state(&handle, MuterVolumeState::MutingRamp);
        handle.unmute();
        waiter.join().unwrap();
        assert_eq!(handle.state(), MuterVolumeState::UnmutingRamp);
    }
}
