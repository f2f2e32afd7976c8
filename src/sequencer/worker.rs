use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use statum::{machine, state};
use tracing::{debug, error, info, trace, Span};

use crate::tracker::{StateTracker, TrackerError, TrackerState};

use super::channel::{release_channel, Channel, StickSide, StickUnit, Target};
use super::event::{Action, EventId, Timeline};
use super::tween::{ActiveTween, Animation, Motion};

const STATS_INTERVAL: Duration = Duration::from_secs(30);
const FALLBACK_WAIT: Duration = Duration::from_secs(1);

/// What currently owns a channel.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Holder {
    /// Head of the pending event chain
    Chain(EventId),
    Tween(ActiveTween),
}

/// Scheduling state shared between callers and the worker.
///
/// Every method takes the tracker state alongside, so callers must hold the
/// tracker lock before this one.
#[derive(Debug, Default)]
pub(crate) struct Book {
    timeline: Timeline,
    holding: HashMap<Channel, Holder>,
    last_tween_tick: f64,
    pub shutdown: bool,
    pub halted: Option<String>,
}

impl Book {
    pub fn is_active(&self, channel: Channel) -> bool {
        self.holding.contains_key(&channel)
    }

    pub fn pending_events(&self) -> usize {
        self.timeline.pending()
    }

    fn has_tweens(&self) -> bool {
        self.holding
            .values()
            .any(|holder| matches!(holder, Holder::Tween(_)))
    }

    /// Earliest time the worker has something to do.
    pub fn next_deadline(&self, tick: f64) -> Option<f64> {
        let tween_due = self.has_tweens().then(|| self.last_tween_tick + tick);
        match (self.timeline.next_due(), tween_due) {
            (Some(event), Some(tween)) => Some(event.min(tween)),
            (event, tween) => event.or(tween),
        }
    }

    // Forget whatever holds the channel, cancelling its pending events
    fn drop_holder(&mut self, channel: Channel) {
        if let Some(Holder::Chain(head)) = self.holding.remove(&channel) {
            self.timeline.cancel(head);
        }
    }

    /// Press each target now and release it after `hold`.
    ///
    /// A target whose channel is already held is released immediately and
    /// pressed again after `gap`, so the host sees a distinct edge.
    pub fn press(
        &mut self,
        state: &mut TrackerState,
        targets: &[Target],
        hold: f64,
        gap: f64,
        now: f64,
    ) -> Result<(), TrackerError> {
        // Every touch target queues a frame now, either the press or the forced lift
        let touch_frames = targets
            .iter()
            .filter(|target| target.channel() == Channel::Touch)
            .count();
        if touch_frames > state.touch_frames_free() {
            return Err(TrackerError::TouchQueueFull);
        }

        for target in targets {
            let channel = target.channel();
            if target.is_release() {
                self.release(state, &[channel])?;
                continue;
            }

            if self.holding.contains_key(&channel) {
                self.drop_holder(channel);
                release_channel(state, channel)?;
                let head = self.timeline.chain([
                    (now + gap, Action::Press(*target)),
                    (now + hold + gap, Action::Release(channel)),
                ]);
                if let Some(head) = head {
                    self.holding.insert(channel, Holder::Chain(head));
                }
                trace!(?channel, "Re-press scheduled after release gap");
            } else {
                target.press(state)?;
                let id = self.timeline.schedule(now + hold, Action::Release(channel));
                self.holding.insert(channel, Holder::Chain(id));
            }
        }
        Ok(())
    }

    /// Press and keep pressed until released.
    pub fn hold(&mut self, state: &mut TrackerState, targets: &[Target]) -> Result<(), TrackerError> {
        for target in targets {
            let channel = target.channel();
            self.drop_holder(channel);
            if target.is_release() {
                release_channel(state, channel)?;
            } else {
                target.press(state)?;
            }
        }
        Ok(())
    }

    pub fn release(
        &mut self,
        state: &mut TrackerState,
        channels: &[Channel],
    ) -> Result<(), TrackerError> {
        for &channel in channels {
            self.drop_holder(channel);
            release_channel(state, channel)?;
        }
        Ok(())
    }

    pub fn hold_sticks(
        &mut self,
        state: &mut TrackerState,
        left: (f64, f64),
        right: (f64, f64),
        unit: StickUnit,
    ) {
        self.drop_holder(Channel::Stick(StickSide::Left));
        self.drop_holder(Channel::Stick(StickSide::Right));
        state
            .report_mut()
            .set_sticks(unit.to_native(left.0, left.1), unit.to_native(right.0, right.1));
    }

    /// Start a tween, replacing whatever held its channel.
    pub fn animate(
        &mut self,
        state: &mut TrackerState,
        motion: Motion,
        animation: &Animation,
        now: f64,
    ) -> Result<(), TrackerError> {
        let channel = motion.channel();
        self.drop_holder(channel);
        motion.prepare(state, now);

        let tween = ActiveTween::new(motion, animation, now);
        if tween.step(state, now)? {
            self.finish_tween(state, channel, tween.release_after, now);
        } else {
            if !self.has_tweens() {
                self.last_tween_tick = now;
            }
            self.holding.insert(channel, Holder::Tween(tween));
        }
        Ok(())
    }

    fn finish_tween(
        &mut self,
        state: &mut TrackerState,
        channel: Channel,
        release_after: Option<f64>,
        now: f64,
    ) {
        // The pose stops at the end value, so the derived rates must stop with it
        if channel == Channel::Imu {
            state.settle_imu();
        }
        match release_after {
            Some(delay) => {
                let id = self.timeline.schedule(now + delay, Action::Release(channel));
                self.holding.insert(channel, Holder::Chain(id));
            }
            None => {
                self.holding.remove(&channel);
            }
        }
    }

    /// Fire everything due by `now`. Returns the number of events applied.
    pub fn apply_due(&mut self, state: &mut TrackerState, now: f64) -> Result<usize, TrackerError> {
        let fired = self.timeline.pop_due(now);
        for event in &fired {
            trace!(action = ?event.action, at = event.at, "Firing scheduled event");
            match event.action {
                Action::Press(target) => target.press(state)?,
                Action::Release(channel) => release_channel(state, channel)?,
            }

            let channel = event.action.channel();
            let holds = matches!(
                self.holding.get(&channel),
                Some(Holder::Chain(head)) if *head == event.id
            );
            if holds {
                match event.next {
                    Some(next) => {
                        self.holding.insert(channel, Holder::Chain(next));
                    }
                    None => {
                        self.holding.remove(&channel);
                    }
                }
            }
        }
        Ok(fired.len())
    }

    /// Advance every running tween to `now`.
    pub fn step_tweens(&mut self, state: &mut TrackerState, now: f64) -> Result<(), TrackerError> {
        let mut finished = Vec::new();
        for (channel, holder) in &self.holding {
            if let Holder::Tween(tween) = holder {
                if tween.step(state, now)? {
                    finished.push((*channel, tween.release_after));
                }
            }
        }
        for (channel, release_after) in finished {
            debug!(?channel, "Tween finished");
            self.finish_tween(state, channel, release_after, now);
        }
        self.last_tween_tick = now;
        Ok(())
    }
}

pub(crate) struct Shared {
    pub tracker: Arc<StateTracker>,
    pub book: Mutex<Book>,
    pub wakeup: Condvar,
    pub tick: f64,
    pub span: Span,
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("book", &self.book)
            .field("tick", &self.tick)
            .finish()
    }
}

impl Shared {
    pub fn now(&self) -> f64 {
        self.tracker.clock().now()
    }

    fn halt(&self, reason: String) {
        self.book.lock().halted = Some(reason);
        self.wakeup.notify_all();
    }
}

#[derive(Debug, Clone)]
pub struct Wakeup {
    pub due: f64,
    pub late_by: f64,
}

#[state]
#[derive(Debug, Clone)]
pub enum WorkerState {
    Idle,
    Due(Wakeup),
}

#[machine]
#[derive(Debug)]
pub struct TickWorker<S: WorkerState> {
    // Scheduling state and the tracker it drives
    shared: Arc<Shared>,

    // Cycles since the last stats line
    cycles: u64,

    // Events fired since the last stats line
    fired: usize,
}

impl<S: WorkerState> TickWorker<S> {
    fn take_stats(&mut self) -> (u64, usize) {
        let stats = (self.cycles, self.fired);
        self.cycles = 0;
        self.fired = 0;
        stats
    }
}

impl TickWorker<Idle> {
    pub fn create(shared: Arc<Shared>) -> Self {
        Self::new(shared, 0, 0)
    }

    /// Block until an event or tween tick is due. `None` once shut down.
    pub fn wait(self) -> Option<TickWorker<Due>> {
        let shared = self.shared.clone();
        let mut book = shared.book.lock();
        loop {
            if book.shutdown || book.halted.is_some() {
                return None;
            }
            let now = shared.now();
            match book.next_deadline(shared.tick) {
                Some(due) if due <= now => {
                    drop(book);
                    return Some(self.transition_with(Wakeup {
                        due,
                        late_by: now - due,
                    }));
                }
                Some(due) => {
                    let timeout = Duration::try_from_secs_f64(due - now).unwrap_or(FALLBACK_WAIT);
                    shared.wakeup.wait_for(&mut book, timeout);
                }
                None => shared.wakeup.wait(&mut book),
            }
        }
    }
}

impl TickWorker<Due> {
    /// Fire due events, then step tweens, under one tracker lock.
    pub fn run_cycle(mut self) -> Result<TickWorker<Idle>, TrackerError> {
        if let Some(wakeup) = self.get_state_data() {
            if wakeup.late_by > self.shared.tick {
                debug!(
                    due = wakeup.due,
                    "Cycle started {:.2} ms late",
                    wakeup.late_by * 1000.0
                );
            }
        }

        let shared = self.shared.clone();
        let mut state = shared.tracker.modify();
        let mut book = shared.book.lock();
        let now = shared.now();
        let fired = book.apply_due(&mut state, now)?;
        book.step_tweens(&mut state, now)?;
        drop(book);
        drop(state);

        self.cycles += 1;
        self.fired += fired;
        Ok(self.transition())
    }
}

/// Worker thread body.
pub(crate) fn run(shared: Arc<Shared>) {
    let _entered = shared.span.enter();
    info!("Sequencer worker started with {:.1} ms tick", shared.tick * 1000.0);

    let mut worker = TickWorker::create(shared.clone());
    let mut last_stats = Instant::now();
    loop {
        let Some(due) = worker.wait() else {
            break;
        };
        worker = match due.run_cycle() {
            Ok(idle) => idle,
            Err(e) => {
                error!("Scheduled input failed, halting sequencer: {}", e);
                shared.halt(e.to_string());
                break;
            }
        };

        if last_stats.elapsed() > STATS_INTERVAL {
            let (cycles, fired) = worker.take_stats();
            info!(
                "Sequencer stats: {} cycles, {} events in {} seconds",
                cycles,
                fired,
                last_stats.elapsed().as_secs()
            );
            last_stats = Instant::now();
        }
    }
    info!("Sequencer worker stopped");
}
