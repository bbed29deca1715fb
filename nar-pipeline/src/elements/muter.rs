//! Sample-domain muting
//!
//! Muting ramps audio down to silence, then keeps marking audio as muted
//! until the renderer has played out everything that was still audible.
//! Only then does [`MuterHandle::mute`] return. Unmuting ramps back up; an
//! unmute that arrives mid-way through a ramp down reverses the ramp from
//! its current gain so no silence is ever inserted.
//!
//! State machine: `Running → RampingDown → Muting → Muted → RampingUp → Running`

use crate::msg::{
    ensure_supported, AudioFormat, Callback, Msg, MsgAudio, MsgKind, MsgKinds, MsgQueue,
    PipelineAnimator, PipelineElementUpstream, RampDirection, RAMP_MAX, RAMP_MIN,
};
use super::Mute;
use crate::observer::ObserverHook;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use tracing::{debug, trace};

const SUPPORTED_MSG_KINDS: MsgKinds = MsgKinds::ALL
    .without(MsgKind::AudioEncoded)
    .without(MsgKind::Playable);

/// Mute state as seen by control threads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuterState {
    Running,
    RampingDown,
    /// Ramped down; waiting for the renderer to play out audible audio
    Muting,
    Muted,
    RampingUp,
}

impl MuterState {
    fn is_muting(self) -> bool {
        matches!(self, MuterState::RampingDown | MuterState::Muting)
    }
}

struct MuterInner {
    state: MuterState,
    remaining_ramp_size: u64,
    current_ramp_value: u32,
    jiffies_until_mute: u64,
    halted: bool,
    // Observer must run once the lock is released
    observer_pending: bool,
}

/// State shared between the audio thread and control threads
struct MuterShared {
    inner: Mutex<MuterInner>,
    changed: Condvar,
    ramp_duration: u64,
    observer: Option<ObserverHook>,
}

impl MuterShared {
    fn set_state(&self, inner: &mut MuterInner, state: MuterState) {
        if inner.state != state {
            debug!("Muter: {:?} -> {:?}", inner.state, state);
            inner.state = state;
            inner.observer_pending = true;
            self.changed.notify_all();
        }
    }

    /// Unlock, then notify the observer of any state change made under the lock
    fn release(&self, mut inner: MutexGuard<'_, MuterInner>) {
        let notify = std::mem::take(&mut inner.observer_pending);
        drop(inner);
        if notify {
            if let Some(observer) = &self.observer {
                observer.fire();
            }
        }
    }

    /// Renderer has stopped pulling or has drained: nothing audible remains
    fn pipeline_quiescent(&self, halted: bool) {
        let mut inner = self.inner.lock().unwrap();
        if halted {
            inner.halted = true;
        }
        match inner.state {
            MuterState::RampingDown | MuterState::Muting => {
                self.set_state(&mut inner, MuterState::Muted);
            }
            MuterState::RampingUp if halted => {
                inner.current_ramp_value = RAMP_MAX;
                self.set_state(&mut inner, MuterState::Running);
            }
            _ => {}
        }
        self.release(inner);
    }

    fn wrap_callback(self: &Arc<Self>, original: Option<Callback>, halted: bool) -> Callback {
        let shared = Arc::clone(self);
        Box::new(move || {
            shared.pipeline_quiescent(halted);
            if let Some(original) = original {
                original();
            }
        })
    }
}

/// Control surface for a [`Muter`], safe to use from any thread
#[derive(Clone)]
pub struct MuterHandle {
    shared: Arc<MuterShared>,
}

impl MuterHandle {
    /// Mute, blocking until the renderer is playing silence
    ///
    /// Returns immediately if already muted or if the pipeline is halted.
    /// Returns early if another thread unmutes while this call waits.
    pub fn mute(&self) {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().unwrap();
        match inner.state {
            MuterState::Running if inner.halted => {
                shared.set_state(&mut inner, MuterState::Muted);
            }
            MuterState::Running => {
                inner.remaining_ramp_size = shared.ramp_duration;
                inner.current_ramp_value = RAMP_MAX;
                shared.set_state(&mut inner, MuterState::RampingDown);
            }
            MuterState::RampingUp => {
                inner.remaining_ramp_size = shared.ramp_duration - inner.remaining_ramp_size;
                let next = if inner.halted || inner.remaining_ramp_size == 0 {
                    MuterState::Muted
                } else {
                    MuterState::RampingDown
                };
                shared.set_state(&mut inner, next);
            }
            MuterState::RampingDown | MuterState::Muting | MuterState::Muted => {}
        }
        if !inner.state.is_muting() {
            shared.release(inner);
            return;
        }
        shared.release(inner);

        let mut inner = shared.inner.lock().unwrap();
        while inner.state.is_muting() {
            inner = shared.changed.wait(inner).unwrap();
        }
    }

    /// Unmute, starting a ramp up (or reversing a ramp down)
    pub fn unmute(&self) {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().unwrap();
        match inner.state {
            MuterState::Running | MuterState::RampingUp => {}
            MuterState::RampingDown => {
                inner.remaining_ramp_size = shared.ramp_duration - inner.remaining_ramp_size;
                if inner.remaining_ramp_size == 0 {
                    inner.current_ramp_value = RAMP_MAX;
                    shared.set_state(&mut inner, MuterState::Running);
                } else {
                    shared.set_state(&mut inner, MuterState::RampingUp);
                }
            }
            MuterState::Muting | MuterState::Muted => {
                if inner.halted {
                    inner.current_ramp_value = RAMP_MAX;
                    shared.set_state(&mut inner, MuterState::Running);
                } else {
                    inner.current_ramp_value = RAMP_MIN;
                    inner.remaining_ramp_size = shared.ramp_duration;
                    shared.set_state(&mut inner, MuterState::RampingUp);
                }
            }
        }
        shared.release(inner);
    }

    pub fn state(&self) -> MuterState {
        self.shared.inner.lock().unwrap().state
    }
}

impl Mute for MuterHandle {
    fn mute(&self) {
        MuterHandle::mute(self)
    }

    fn unmute(&self) {
        MuterHandle::unmute(self)
    }
}

/// Pull element ramping samples to silence on demand
pub struct Muter {
    upstream: Box<dyn PipelineElementUpstream>,
    animator: Arc<dyn PipelineAnimator>,
    shared: Arc<MuterShared>,
    // Empty unless a message was split during a ramp
    queue: MsgQueue,
}

impl Muter {
    /// # Arguments
    /// * `upstream` - Element to pull from
    /// * `animator` - Renderer, queried for how much audio it buffers
    /// * `ramp_duration` - Mute/unmute ramp length in jiffies
    /// * `observer` - Optional hook scheduled on every state change
    pub fn new(
        upstream: Box<dyn PipelineElementUpstream>,
        animator: Arc<dyn PipelineAnimator>,
        ramp_duration: u64,
        observer: Option<ObserverHook>,
    ) -> Self {
        assert!(ramp_duration > 0, "muter ramp duration must be non-zero");
        Self {
            upstream,
            animator,
            shared: Arc::new(MuterShared {
                inner: Mutex::new(MuterInner {
                    state: MuterState::Running,
                    remaining_ramp_size: 0,
                    current_ramp_value: RAMP_MAX,
                    jiffies_until_mute: 0,
                    halted: true,
                    observer_pending: false,
                }),
                changed: Condvar::new(),
                ramp_duration,
                observer,
            }),
            queue: MsgQueue::new(),
        }
    }

    pub fn handle(&self) -> MuterHandle {
        MuterHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    fn process(&mut self, msg: Msg) -> Msg {
        match msg {
            Msg::Halt(mut halt) => {
                let original = halt.replace_callback(None);
                halt.replace_callback(Some(self.shared.wrap_callback(original, true)));
                Msg::Halt(halt)
            }
            Msg::Drain(mut drain) => {
                let original = drain.replace_callback(None);
                drain.replace_callback(Some(self.shared.wrap_callback(original, false)));
                Msg::Drain(drain)
            }
            Msg::DecodedStream(stream) => {
                let mut inner = self.shared.inner.lock().unwrap();
                if matches!(stream.info().format, AudioFormat::Pcm | AudioFormat::Dsd) {
                    inner.halted = false;
                }
                self.shared.release(inner);
                Msg::DecodedStream(stream)
            }
            Msg::AudioPcm(audio) => self.process_audio(audio, Msg::AudioPcm),
            Msg::AudioDsd(audio) => self.process_audio(audio, Msg::AudioDsd),
            Msg::Silence(silence) => {
                let mut inner = self.shared.inner.lock().unwrap();
                match inner.state {
                    MuterState::RampingDown => {
                        inner.jiffies_until_mute = self.animator.buffer_jiffies();
                        self.shared.set_state(&mut inner, MuterState::Muting);
                        self.count_down_mute(&mut inner, silence.jiffies());
                    }
                    MuterState::Muting => self.count_down_mute(&mut inner, silence.jiffies()),
                    _ => {}
                }
                self.shared.release(inner);
                Msg::Silence(silence)
            }
            Msg::Quit(quit) => {
                // No more audio will arrive to finish a ramp
                let mut inner = self.shared.inner.lock().unwrap();
                inner.remaining_ramp_size = 0;
                match inner.state {
                    MuterState::RampingDown | MuterState::Muting => {
                        inner.current_ramp_value = RAMP_MIN;
                        self.shared.set_state(&mut inner, MuterState::Muted);
                    }
                    MuterState::RampingUp => {
                        inner.current_ramp_value = RAMP_MAX;
                        self.shared.set_state(&mut inner, MuterState::Running);
                    }
                    MuterState::Running | MuterState::Muted => {}
                }
                self.shared.release(inner);
                Msg::Quit(quit)
            }
            other => other,
        }
    }

    fn count_down_mute(&self, inner: &mut MuterInner, jiffies: u64) {
        inner.jiffies_until_mute = inner.jiffies_until_mute.saturating_sub(jiffies);
        if inner.jiffies_until_mute == 0 {
            self.shared.set_state(inner, MuterState::Muted);
        }
    }

    fn process_audio<P: Clone>(&mut self, mut audio: MsgAudio<P>, wrap: fn(MsgAudio<P>) -> Msg) -> Msg {
        let shared = Arc::clone(&self.shared);
        let mut inner = shared.inner.lock().unwrap();
        match inner.state {
            MuterState::Running => {}
            MuterState::RampingDown | MuterState::RampingUp => {
                let direction = if inner.state == MuterState::RampingDown {
                    RampDirection::Down
                } else {
                    RampDirection::Up
                };
                if audio.jiffies() > inner.remaining_ramp_size {
                    let tail = audio.split(inner.remaining_ramp_size);
                    self.queue.enqueue_at_head(wrap(tail));
                }
                let start = inner.current_ramp_value;
                let (value, split) = audio.set_ramp(start, &mut inner.remaining_ramp_size, direction);
                inner.current_ramp_value = value;
                if let Some(split) = split {
                    self.queue.enqueue_at_head(wrap(split));
                }
                trace!(
                    "Muter: {:?} ramp {}..{} remaining {}",
                    direction,
                    audio.ramp().start(),
                    audio.ramp().end(),
                    inner.remaining_ramp_size
                );
                if inner.remaining_ramp_size == 0 {
                    if direction == RampDirection::Down {
                        inner.jiffies_until_mute = self.animator.buffer_jiffies();
                        shared.set_state(&mut inner, MuterState::Muting);
                        if inner.jiffies_until_mute == 0 {
                            shared.set_state(&mut inner, MuterState::Muted);
                        }
                    } else {
                        inner.current_ramp_value = RAMP_MAX;
                        shared.set_state(&mut inner, MuterState::Running);
                    }
                }
            }
            MuterState::Muting => {
                audio.set_muted();
                self.count_down_mute(&mut inner, audio.jiffies());
            }
            MuterState::Muted => audio.set_muted(),
        }
        shared.release(inner);
        wrap(audio)
    }
}

impl PipelineElementUpstream for Muter {
    fn pull(&mut self) -> Msg {
        let msg = match self.queue.dequeue() {
            Some(msg) => msg,
            None => self.upstream.pull(),
        };
        ensure_supported("Muter", SUPPORTED_MSG_KINDS, &msg);
        self.process(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::testing::{factory, pcm, stream, FakeAnimator, ScriptedSource};
    use crate::msg::MsgFactory;
    use std::thread;
    use std::time::Duration;

    const RAMP: u64 = 100 * 1280;

    fn muter(source: &ScriptedSource, buffer_jiffies: u64) -> Muter {
        Muter::new(
            Box::new(source.clone()),
            Arc::new(FakeAnimator { buffer_jiffies }),
            RAMP,
            None,
        )
    }

    fn wait_for_state(handle: &MuterHandle, state: MuterState) {
        for _ in 0..1000 {
            if handle.state() == state {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("muter never reached {:?}", state);
    }

    fn pull_audio_ramp(muter: &mut Muter) -> (u32, u32, RampDirection) {
        match muter.pull() {
            Msg::AudioPcm(audio) => (
                audio.ramp().start(),
                audio.ramp().end(),
                audio.ramp().direction(),
            ),
            other => panic!("unexpected {:?}", other),
        }
    }

    fn started(factory: &MsgFactory, source: &ScriptedSource, muter: &mut Muter) {
        source.push(stream(factory, 1));
        assert!(matches!(muter.pull(), Msg::DecodedStream(_)));
    }

    #[test]
    fn test_mute_while_halted_is_immediate() {
        let source = ScriptedSource::default();
        let muter = muter(&source, 0);
        let handle = muter.handle();
        handle.mute();
        assert_eq!(handle.state(), MuterState::Muted);
        handle.unmute();
        assert_eq!(handle.state(), MuterState::Running);
    }

    #[test]
    fn test_mute_ramps_down_then_waits_for_buffer() {
        let factory = factory();
        let source = ScriptedSource::default();
        let mut muter = muter(&source, 50 * 1280);
        started(&factory, &source, &mut muter);
        let handle = muter.handle();

        let control = {
            let handle = handle.clone();
            thread::spawn(move || handle.mute())
        };
        wait_for_state(&handle, MuterState::RampingDown);

        source.push(pcm(&factory, 100));
        let (start, end, direction) = pull_audio_ramp(&mut muter);
        assert_eq!((start, end, direction), (RAMP_MAX, RAMP_MIN, RampDirection::Down));
        assert_eq!(handle.state(), MuterState::Muting);

        source.push(pcm(&factory, 60));
        let (_, _, direction) = pull_audio_ramp(&mut muter);
        assert_eq!(direction, RampDirection::Mute);
        control.join().unwrap();
        assert_eq!(handle.state(), MuterState::Muted);
    }

    #[test]
    fn test_unmute_mid_ramp_reverses() {
        let factory = factory();
        let source = ScriptedSource::default();
        let mut muter = muter(&source, 0);
        started(&factory, &source, &mut muter);
        let handle = muter.handle();

        let control = {
            let handle = handle.clone();
            thread::spawn(move || handle.mute())
        };
        wait_for_state(&handle, MuterState::RampingDown);

        source.push(pcm(&factory, 40));
        let (_, down_end, _) = pull_audio_ramp(&mut muter);
        assert!(down_end > RAMP_MIN);

        handle.unmute();
        control.join().unwrap();
        assert_eq!(handle.state(), MuterState::RampingUp);

        source.push(pcm(&factory, 100));
        let (up_start, up_end, direction) = pull_audio_ramp(&mut muter);
        assert_eq!(up_start, down_end);
        assert_eq!(direction, RampDirection::Up);
        assert_eq!(up_end, RAMP_MAX);
        // Remainder of the buffer plays unramped
        match muter.pull() {
            Msg::AudioPcm(audio) => assert!(!audio.ramp().is_enabled()),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(handle.state(), MuterState::Running);
    }

    #[test]
    fn test_halt_completes_pending_mute() {
        let factory = factory();
        let source = ScriptedSource::default();
        let mut muter = muter(&source, 10_000 * 1280);
        started(&factory, &source, &mut muter);
        let handle = muter.handle();

        let control = {
            let handle = handle.clone();
            thread::spawn(move || handle.mute())
        };
        wait_for_state(&handle, MuterState::RampingDown);
        source.push(pcm(&factory, 100));
        muter.pull();
        assert_eq!(handle.state(), MuterState::Muting);

        source.push(factory.create_halt(1, None));
        match muter.pull() {
            Msg::Halt(mut halt) => halt.report_halted(),
            other => panic!("unexpected {:?}", other),
        }
        control.join().unwrap();
        assert_eq!(handle.state(), MuterState::Muted);
    }

    #[test]
    fn test_quit_releases_waiting_mute() {
        let factory = factory();
        let source = ScriptedSource::default();
        let mut muter = muter(&source, 0);
        started(&factory, &source, &mut muter);
        let handle = muter.handle();

        let control = {
            let handle = handle.clone();
            thread::spawn(move || handle.mute())
        };
        wait_for_state(&handle, MuterState::RampingDown);
        source.push(factory.create_quit());
        assert!(matches!(muter.pull(), Msg::Quit(_)));
        control.join().unwrap();
        assert_eq!(handle.state(), MuterState::Muted);
    }

    #[test]
    fn test_quit_mid_ramp_up_settles_running() {
        let factory = factory();
        let source = ScriptedSource::default();
        let mut muter = muter(&source, 0);
        started(&factory, &source, &mut muter);
        let handle = muter.handle();

        let control = {
            let handle = handle.clone();
            thread::spawn(move || handle.mute())
        };
        wait_for_state(&handle, MuterState::RampingDown);
        source.push(pcm(&factory, 40));
        pull_audio_ramp(&mut muter);
        handle.unmute();
        control.join().unwrap();
        assert_eq!(handle.state(), MuterState::RampingUp);

        source.push(factory.create_quit());
        assert!(matches!(muter.pull(), Msg::Quit(_)));
        assert_eq!(handle.state(), MuterState::Running);

        source.push(pcm(&factory, 10));
        match muter.pull() {
            Msg::AudioPcm(audio) => assert!(!audio.ramp().is_enabled()),
            other => panic!("unexpected {:?}", other),
        }
    }
}
