//! Timed input automation.
//!
//! A [`Sequencer`] owns a worker thread that fires scheduled presses and
//! releases and steps running tweens against a shared [`StateTracker`]. Each
//! input surface is a [`Channel`]; a channel is held by at most one chain of
//! events or one tween, and starting something new on a channel cancels what
//! held it.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use opends4::{Button, Sequencer, SequencerSettings, StateTracker, Target};
//!
//! let tracker = Arc::new(StateTracker::new());
//! let sequencer = Sequencer::new(tracker, SequencerSettings::default());
//! sequencer.start()?;
//! sequencer.press(&[Target::Button(Button::Cross)], Duration::from_millis(80))?;
//! # Ok::<(), opends4::SequencerError>(())
//! ```

mod channel;
mod event;
mod tween;
mod worker;

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, info_span, warn};

use crate::tracker::{StateTracker, TrackerError, TrackerState};

pub use crate::tracker::Pose;
pub use channel::{Channel, StickSide, StickUnit, Target, TriggerSide, STICK_CENTER};
pub use tween::{Animation, Easing, Motion};

use worker::{Book, Shared};

// Shortest release-to-press gap a host reliably sees as two presses
const MIN_RELEASE_GAP: f64 = 1.0 / 60.0;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum SequencerError {
    #[error("Sequencer halted: {0}")]
    Halted(String),

    #[error("Input rejected: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Failed to spawn sequencer thread: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SequencerSettings {
    /// How often running tweens are stepped
    pub tick_interval: Duration,
    /// Hold time used by [`Sequencer::tap`]
    pub default_hold: Duration,
}

impl Default for SequencerSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(4),
            default_hold: Duration::from_millis(50),
        }
    }
}

impl SequencerSettings {
    /// Delay between a forced release and the re-press that follows it.
    pub fn release_gap(&self) -> Duration {
        let gap = MIN_RELEASE_GAP.max(self.tick_interval.as_secs_f64() * 4.0);
        Duration::from_secs_f64(gap)
    }
}

/// Schedules presses, holds and tweens on a background thread.
pub struct Sequencer {
    shared: Arc<Shared>,
    settings: SequencerSettings,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Sequencer {
    pub fn new(tracker: Arc<StateTracker>, settings: SequencerSettings) -> Self {
        let span = info_span!(parent: tracker.span(), "sequencer");
        let shared = Arc::new(Shared {
            tracker,
            book: Mutex::new(Book::default()),
            wakeup: Condvar::new(),
            tick: settings.tick_interval.as_secs_f64(),
            span,
        });
        Self {
            shared,
            settings,
            worker: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &SequencerSettings {
        &self.settings
    }

    /// Spawn the worker thread. Does nothing if it is already running.
    ///
    /// # Errors
    ///
    /// Returns [`SequencerError::Spawn`] if the OS refuses the thread and
    /// [`SequencerError::Halted`] after a previous failure.
    pub fn start(&self) -> Result<(), SequencerError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        {
            let mut book = self.shared.book.lock();
            if let Some(reason) = &book.halted {
                return Err(SequencerError::Halted(reason.clone()));
            }
            book.shutdown = false;
        }

        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("sequencer".to_string())
            .spawn(move || worker::run(shared))
            .map_err(SequencerError::Spawn)?;
        *worker = Some(handle);
        info!("Sequencer started");
        Ok(())
    }

    /// Stop the worker thread, waiting briefly for it to exit.
    ///
    /// Pending events stay queued and fire if the sequencer is started again.
    pub fn shutdown(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        self.shared.book.lock().shutdown = true;
        self.shared.wakeup.notify_all();

        let deadline = Instant::now() + SHUTDOWN_TIMEOUT;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!("Sequencer worker did not stop in time, detaching it");
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        if handle.join().is_err() {
            warn!("Sequencer worker panicked");
        }
        info!("Sequencer stopped");
    }

    // Run `f` with the tracker lock and then the book lock held, and wake the worker after
    fn with_book<R>(
        &self,
        f: impl FnOnce(&mut Book, &mut TrackerState, f64) -> Result<R, TrackerError>,
    ) -> Result<R, SequencerError> {
        let mut state = self.shared.tracker.modify();
        let mut book = self.shared.book.lock();
        if let Some(reason) = &book.halted {
            return Err(SequencerError::Halted(reason.clone()));
        }
        let now = self.shared.now();
        let result = f(&mut *book, &mut *state, now)?;
        drop(book);
        drop(state);
        self.shared.wakeup.notify_all();
        Ok(result)
    }

    /// Press targets now and release them after `hold`.
    ///
    /// Pressing a channel that is already held releases it at once and
    /// presses again after [`SequencerSettings::release_gap`]. A neutral dpad
    /// target releases the dpad.
    ///
    /// # Errors
    ///
    /// Fails if the sequencer halted or the tracker rejects the input, for
    /// example when the touch frame queue for this cycle is full.
    pub fn press(&self, targets: &[Target], hold: Duration) -> Result<(), SequencerError> {
        let hold = hold.as_secs_f64();
        let gap = self.settings.release_gap().as_secs_f64();
        debug!(?targets, hold, "Press");
        self.with_book(|book, state, now| book.press(state, targets, hold, gap, now))
    }

    /// [`press`](Self::press) with the default hold time.
    pub fn tap(&self, targets: &[Target]) -> Result<(), SequencerError> {
        self.press(targets, self.settings.default_hold)
    }

    /// Press targets until they are released explicitly.
    pub fn hold(&self, targets: &[Target]) -> Result<(), SequencerError> {
        debug!(?targets, "Hold");
        self.with_book(|book, state, _| book.hold(state, targets))
    }

    /// Release channels now, cancelling anything scheduled on them.
    pub fn release(&self, channels: &[Channel]) -> Result<(), SequencerError> {
        debug!(?channels, "Release");
        self.with_book(|book, state, _| book.release(state, channels))
    }

    /// Set both sticks until changed again.
    pub fn hold_stick(
        &self,
        left: (f64, f64),
        right: (f64, f64),
        unit: StickUnit,
    ) -> Result<(), SequencerError> {
        self.with_book(|book, state, _| {
            book.hold_sticks(state, left, right, unit);
            Ok(())
        })
    }

    /// Center both sticks.
    pub fn release_stick(&self) -> Result<(), SequencerError> {
        self.release(&[
            Channel::Stick(StickSide::Left),
            Channel::Stick(StickSide::Right),
        ])
    }

    /// Start a tween on the motion's channel.
    ///
    /// # Errors
    ///
    /// Fails if the sequencer halted or the first value cannot be written.
    pub fn animate(&self, motion: Motion, animation: Animation) -> Result<(), SequencerError> {
        debug!(?motion, ?animation, "Animate");
        self.with_book(|book, state, now| book.animate(state, motion, &animation, now))
    }

    pub fn tween_stick(
        &self,
        side: StickSide,
        from: (f64, f64),
        to: (f64, f64),
        unit: StickUnit,
        animation: Animation,
    ) -> Result<(), SequencerError> {
        self.animate(
            Motion::Stick {
                side,
                from,
                to,
                unit,
            },
            animation,
        )
    }

    pub fn tween_trigger(
        &self,
        side: TriggerSide,
        from: f64,
        to: f64,
        animation: Animation,
    ) -> Result<(), SequencerError> {
        self.animate(Motion::Trigger { side, from, to }, animation)
    }

    /// Move the controller through space. Switches the IMU to attitude-position mode.
    pub fn tween_attitude(
        &self,
        from: Pose,
        to: Pose,
        animation: Animation,
    ) -> Result<(), SequencerError> {
        self.animate(Motion::Attitude { from, to }, animation)
    }

    /// Whether a chain or tween currently holds `channel`.
    pub fn is_active(&self, channel: Channel) -> bool {
        self.shared.book.lock().is_active(channel)
    }

    pub fn pending_events(&self) -> usize {
        self.shared.book.lock().pending_events()
    }

    pub fn is_halted(&self) -> bool {
        self.shared.book.lock().halted.is_some()
    }

    pub fn halt_reason(&self) -> Option<String> {
        self.shared.book.lock().halted.clone()
    }
}

impl Drop for Sequencer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{Button, DPadPosition, TouchPoint};
    use approx::assert_relative_eq;
    use tracing_test::traced_test;

    fn running() -> (Arc<StateTracker>, Sequencer) {
        let tracker = Arc::new(StateTracker::new());
        let sequencer = Sequencer::new(tracker.clone(), SequencerSettings::default());
        sequencer.start().unwrap();
        (tracker, sequencer)
    }

    #[test]
    fn release_gap_has_a_floor() {
        let settings = SequencerSettings::default();
        assert_eq!(settings.release_gap(), Duration::from_secs_f64(1.0 / 60.0));

        let slow = SequencerSettings {
            tick_interval: Duration::from_millis(10),
            ..Default::default()
        };
        assert_relative_eq!(slow.release_gap().as_secs_f64(), 0.04, epsilon = 1e-9);
    }

    #[test]
    fn press_is_released_by_the_worker() {
        let (tracker, sequencer) = running();
        sequencer
            .press(&[Target::Button(Button::Triangle)], Duration::from_millis(200))
            .unwrap();

        thread::sleep(Duration::from_millis(100));
        assert!(tracker.modify().report().button(Button::Triangle));
        assert!(sequencer.is_active(Channel::Button(Button::Triangle)));

        thread::sleep(Duration::from_millis(300));
        assert!(!tracker.modify().report().button(Button::Triangle));
        assert!(!sequencer.is_active(Channel::Button(Button::Triangle)));
        assert_eq!(sequencer.pending_events(), 0);
    }

    #[test]
    fn hold_survives_until_release() {
        let (tracker, sequencer) = running();
        sequencer
            .hold(&[Target::DPad(DPadPosition::SW)])
            .unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(tracker.modify().report().dpad().unwrap(), DPadPosition::SW);

        sequencer.release(&[Channel::DPad]).unwrap();
        assert_eq!(
            tracker.modify().report().dpad().unwrap(),
            DPadPosition::Neutral
        );
    }

    #[test]
    fn tween_reaches_end_value() {
        let (tracker, sequencer) = running();
        sequencer
            .tween_trigger(
                TriggerSide::Right,
                0.0,
                1.0,
                Animation::new(Duration::from_millis(100)).easing(Easing::PolyInOut(2.0)),
            )
            .unwrap();
        assert!(sequencer.is_active(Channel::Trigger(TriggerSide::Right)));

        thread::sleep(Duration::from_millis(400));
        assert_eq!(tracker.modify().report().triggers[1], 255);
        assert!(!sequencer.is_active(Channel::Trigger(TriggerSide::Right)));
    }

    #[test]
    fn sticks_hold_and_center() {
        let (tracker, sequencer) = running();
        sequencer
            .hold_stick((-1.0, 0.0), (0.0, 1.0), StickUnit::Cartesian)
            .unwrap();
        assert_eq!(tracker.modify().report().sticks, [0, 128, 128, 255]);

        sequencer.release_stick().unwrap();
        assert_eq!(tracker.modify().report().sticks, [STICK_CENTER; 4]);
    }

    #[test]
    #[traced_test]
    fn failing_event_halts_the_worker() {
        let (tracker, sequencer) = running();
        let touch = Target::Touch(TouchPoint::new(10, 10));
        sequencer.press(&[touch], Duration::from_millis(50)).unwrap();
        // Fill the touch queue so the scheduled lift has no room
        {
            let mut state = tracker.modify();
            state.queue_touch([None, None], [false, false]).unwrap();
            state.queue_touch([None, None], [false, false]).unwrap();
        }

        thread::sleep(Duration::from_millis(300));
        assert!(sequencer.is_halted());
        assert!(matches!(
            sequencer.tap(&[Target::Button(Button::Cross)]),
            Err(SequencerError::Halted(_))
        ));
        assert!(logs_contain("halting sequencer"));
    }

    #[test]
    fn shutdown_is_idempotent() {
        let (_tracker, sequencer) = running();
        sequencer.shutdown();
        sequencer.shutdown();
        sequencer.start().unwrap();
        sequencer.shutdown();
    }
}
