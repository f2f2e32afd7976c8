//! Double-buffered input state.
//!
//! One [`InputReport`] is being submitted while the other collects edits. All
//! edits go through [`StateTracker::modify`], which hands out the
//! [`TrackerState`] behind a mutex; [`StateTracker::prepare_submission`] takes
//! the same lock, so a submitted report never contains half of an edit.

mod imu;
mod touch;

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, info_span, trace, Span};

use crate::clock::{Clock, MonotonicClock};
use crate::report::input::TOUCH_FRAMES_PER_REPORT;
use crate::report::{FeedbackReport, InputReport, TouchPoint};

pub use imu::{
    ImuMode, ImuTracker, Pose, PoseUpdate, ACCEL_RES_PER_G, GYRO_RES_PER_DEG_S,
    TIMESTAMP_TICKS_PER_S,
};
pub use touch::TouchTracker;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrackerError {
    #[error("Touch frame queue is full for this report")]
    TouchQueueFull,

    #[error("{quantity} on {axis} axis out of range: {value}")]
    OutOfRange {
        quantity: &'static str,
        axis: &'static str,
        value: f64,
    },

    #[error("Operation requires IMU mode {required:?}")]
    ModeMismatch { required: ImuMode },

    #[error("Sample time {current} is not after the previous sample at {previous}")]
    NonMonotonicTime { previous: f64, current: f64 },
}

/// Everything guarded by the tracker lock.
#[derive(Debug)]
pub struct TrackerState {
    reports: [InputReport; 2],
    writable: usize,
    touch: TouchTracker,
    imu: ImuTracker,
}

impl TrackerState {
    fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            reports: [InputReport::default(); 2],
            writable: 1,
            touch: TouchTracker::default(),
            imu: ImuTracker::new(clock),
        }
    }

    /// The buffer that edits land in.
    pub fn report(&self) -> &InputReport {
        &self.reports[self.writable]
    }

    pub fn report_mut(&mut self) -> &mut InputReport {
        &mut self.reports[self.writable]
    }

    /// The buffer most recently handed out for transmission.
    pub fn submitting(&self) -> &InputReport {
        &self.reports[1 - self.writable]
    }

    pub fn touch(&self) -> &TouchTracker {
        &self.touch
    }

    pub fn imu(&self) -> &ImuTracker {
        &self.imu
    }

    /// Touch frames that can still be queued before this report is submitted.
    pub fn touch_frames_free(&self) -> usize {
        TOUCH_FRAMES_PER_REPORT.saturating_sub(usize::from(self.report().touch_frames_available))
    }

    pub fn queue_touch(
        &mut self,
        positions: [Option<TouchPoint>; 2],
        release: [bool; 2],
    ) -> Result<(), TrackerError> {
        let w = self.writable;
        self.touch.queue(&mut self.reports[w], positions, release)
    }

    pub fn set_imu_mode(&mut self, mode: ImuMode) {
        self.imu.set_mode(mode);
    }

    pub fn reset_imu_time(&mut self) {
        self.imu.reset_time();
    }

    pub fn set_angular_velocity(
        &mut self,
        pitch: Option<f64>,
        yaw: Option<f64>,
        roll: Option<f64>,
    ) -> Result<(), TrackerError> {
        let w = self.writable;
        self.imu
            .set_angular_velocity(&mut self.reports[w], pitch, yaw, roll)
    }

    pub fn set_linear_acceleration(
        &mut self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
    ) -> Result<(), TrackerError> {
        let w = self.writable;
        self.imu
            .set_linear_acceleration(&mut self.reports[w], x, y, z)
    }

    pub fn set_attitude_position(
        &mut self,
        time: f64,
        update: PoseUpdate,
    ) -> Result<(), TrackerError> {
        let w = self.writable;
        self.imu
            .set_attitude_position(&mut self.reports[w], time, update)
    }

    pub fn place_imu(&mut self, time: f64, pose: Pose) {
        self.imu.place(time, pose);
    }

    pub fn settle_imu(&mut self) {
        let w = self.writable;
        self.imu.settle(&mut self.reports[w]);
    }

    fn prepare_submission(&mut self) -> [u8; InputReport::SIZE] {
        let filled = self.writable;
        self.touch.sustain(&mut self.reports[filled]);
        self.imu.sustain(&mut self.reports[filled]);

        self.writable = 1 - filled;
        let next = self.writable;
        self.reports[next] = self.reports[filled];
        self.reports[next].inc_report_index();
        self.reports[next].clear_touchpad();

        self.reports[filled].to_bytes()
    }
}

/// Thread-safe owner of the controller's input state.
pub struct StateTracker {
    state: Mutex<TrackerState>,
    feedback: Mutex<FeedbackReport>,
    clock: Arc<dyn Clock>,
    span: Span,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTracker {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let span = info_span!("tracker");
        span.in_scope(|| debug!("State tracker created"));
        Self {
            state: Mutex::new(TrackerState::new(clock.clone())),
            feedback: Mutex::new(FeedbackReport::default()),
            clock,
            span,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Exclusive access to the writable buffer and sub-trackers until the guard drops.
    ///
    /// The lock is not re-entrant. While the guard is alive, make every edit
    /// through it and do not call the `&self` helpers on this tracker
    /// ([`queue_touch`](Self::queue_touch), [`set_imu_mode`](Self::set_imu_mode)
    /// and the rest) or [`prepare_submission`](Self::prepare_submission) from
    /// the same thread, as they take the lock again and block forever.
    /// [`TrackerState`] has a method for each of them.
    pub fn modify(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock()
    }

    /// Swap buffers and return the bytes to transmit.
    pub fn prepare_submission(&self) -> [u8; InputReport::SIZE] {
        let _entered = self.span.enter();
        let mut state = self.state.lock();
        let bytes = state.prepare_submission();
        trace!(counter = state.submitting().report_index(), "Report prepared");
        bytes
    }

    /// Store a feedback report from the host. Malformed input is logged and dropped.
    pub fn process_feedback(&self, data: &[u8]) {
        let _entered = self.span.enter();
        match FeedbackReport::from_bytes(data) {
            Ok(report) => {
                debug!(
                    rumble_left = report.rumble_left,
                    rumble_right = report.rumble_right,
                    led = ?report.led_color,
                    "Feedback received"
                );
                *self.feedback.lock() = report;
            }
            Err(e) => error!("Ignoring feedback report: {}", e),
        }
    }

    pub fn feedback(&self) -> FeedbackReport {
        *self.feedback.lock()
    }

    pub fn queue_touch(
        &self,
        positions: [Option<TouchPoint>; 2],
        release: [bool; 2],
    ) -> Result<(), TrackerError> {
        self.modify().queue_touch(positions, release)
    }

    pub fn set_imu_mode(&self, mode: ImuMode) {
        self.modify().set_imu_mode(mode);
    }

    pub fn set_angular_velocity(
        &self,
        pitch: Option<f64>,
        yaw: Option<f64>,
        roll: Option<f64>,
    ) -> Result<(), TrackerError> {
        self.modify().set_angular_velocity(pitch, yaw, roll)
    }

    pub fn set_linear_acceleration(
        &self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
    ) -> Result<(), TrackerError> {
        self.modify().set_linear_acceleration(x, y, z)
    }

    pub fn set_attitude_position(&self, time: f64, update: PoseUpdate) -> Result<(), TrackerError> {
        self.modify().set_attitude_position(time, update)
    }
}
