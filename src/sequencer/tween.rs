use std::time::Duration;

use crate::tracker::{ImuMode, Pose, PoseUpdate, TrackerError, TrackerState};

use super::channel::{trigger_to_native, Channel, StickSide, StickUnit, TriggerSide};

/// Shape of a tween's progress curve.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Easing {
    #[default]
    Linear,
    /// Symmetric polynomial ease-in-out of the given degree
    PolyInOut(f64),
}

impl Easing {
    /// Map linear progress in [0, 1] onto the curve.
    pub fn apply(self, p: f64) -> f64 {
        match self {
            Easing::Linear => p,
            Easing::PolyInOut(n) => {
                if p < 0.5 {
                    2f64.powf(n - 1.0) * p.powf(n)
                } else {
                    1.0 - (-2.0 * p + 2.0).powf(n) / 2.0
                }
            }
        }
    }
}

/// A value moving from one end to the other over time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Motion {
    /// Positions are in `unit` coordinates and interpolated there
    Stick {
        side: StickSide,
        from: (f64, f64),
        to: (f64, f64),
        unit: StickUnit,
    },
    /// Travel in [0, 1]
    Trigger {
        side: TriggerSide,
        from: f64,
        to: f64,
    },
    /// Drives the IMU in attitude-position mode
    Attitude { from: Pose, to: Pose },
}

fn lerp(from: f64, to: f64, t: f64) -> f64 {
    from + (to - from) * t
}

impl Motion {
    pub fn channel(&self) -> Channel {
        match self {
            Motion::Stick { side, .. } => Channel::Stick(*side),
            Motion::Trigger { side, .. } => Channel::Trigger(*side),
            Motion::Attitude { .. } => Channel::Imu,
        }
    }

    // Put the channel at the start value so the first step is continuous with it
    pub(crate) fn prepare(&self, state: &mut TrackerState, now: f64) {
        if let Motion::Attitude { from, .. } = *self {
            state.set_imu_mode(ImuMode::AttitudePosition);
            state.place_imu(now, from);
            state.settle_imu();
        }
    }

    // Write the value at eased position `t`
    fn apply(&self, state: &mut TrackerState, t: f64, now: f64) -> Result<(), TrackerError> {
        match *self {
            Motion::Stick {
                side,
                from,
                to,
                unit,
            } => {
                let (x, y) = unit.to_native(lerp(from.0, to.0, t), lerp(from.1, to.1, t));
                state
                    .report_mut()
                    .set_stick(side == StickSide::Left, x, y);
            }
            Motion::Trigger { side, from, to } => {
                let value = trigger_to_native(lerp(from, to, t));
                state
                    .report_mut()
                    .set_trigger(side == TriggerSide::Left, value);
            }
            Motion::Attitude { from, to } => {
                let pose = Pose {
                    pitch: lerp(from.pitch, to.pitch, t),
                    yaw: lerp(from.yaw, to.yaw, t),
                    roll: lerp(from.roll, to.roll, t),
                    x: lerp(from.x, to.x, t),
                    y: lerp(from.y, to.y, t),
                    z: lerp(from.z, to.z, t),
                };
                // Attitude samples need strictly increasing time
                let (last, _) = state.imu().pose();
                if now <= last {
                    state.place_imu(last, pose);
                } else {
                    state.set_attitude_position(now, PoseUpdate::from(pose))?;
                }
            }
        }
        Ok(())
    }
}

/// Timing for a tween.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use opends4::sequencer::{Animation, Easing};
///
/// let swipe = Animation::new(Duration::from_millis(300))
///     .easing(Easing::PolyInOut(2.0))
///     .then_release_after(Duration::from_millis(50));
/// assert_eq!(swipe.then_release_after, Some(Duration::from_millis(50)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Animation {
    pub duration: Duration,
    pub delay: Duration,
    pub easing: Easing,
    /// Release the channel this long after the tween ends; `None` leaves it at the end value
    pub then_release_after: Option<Duration>,
}

impl Animation {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            delay: Duration::ZERO,
            easing: Easing::Linear,
            then_release_after: None,
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn easing(mut self, easing: Easing) -> Self {
        self.easing = easing;
        self
    }

    pub fn then_release_after(mut self, after: Duration) -> Self {
        self.then_release_after = Some(after);
        self
    }
}

/// A tween in flight on one channel.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ActiveTween {
    pub motion: Motion,
    pub start: f64,
    pub duration: f64,
    pub easing: Easing,
    pub release_after: Option<f64>,
}

impl ActiveTween {
    pub fn new(motion: Motion, animation: &Animation, now: f64) -> Self {
        Self {
            motion,
            start: now + animation.delay.as_secs_f64(),
            duration: animation.duration.as_secs_f64(),
            easing: animation.easing,
            release_after: animation.then_release_after.map(|d| d.as_secs_f64()),
        }
    }

    /// Linear progress at `now`. Zero-length tweens finish as soon as they start.
    pub fn progress(&self, now: f64) -> f64 {
        let elapsed = now - self.start;
        if self.duration <= 0.0 {
            return if elapsed >= 0.0 { 1.0 } else { -1.0 };
        }
        elapsed / self.duration
    }

    /// Write the current value. Returns true once the end value has been written.
    pub fn step(&self, state: &mut TrackerState, now: f64) -> Result<bool, TrackerError> {
        let p = self.progress(now);
        let (t, done) = if p >= 1.0 {
            (1.0, true)
        } else if p < 0.0 {
            (0.0, false)
        } else {
            (self.easing.apply(p), false)
        };
        self.motion.apply(state, t, now)?;
        Ok(done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::StateTracker;
    use approx::assert_relative_eq;

    #[test]
    fn poly_in_out_is_symmetric() {
        let ease = Easing::PolyInOut(2.0);
        assert_relative_eq!(ease.apply(0.0), 0.0);
        assert_relative_eq!(ease.apply(0.25), 0.125);
        assert_relative_eq!(ease.apply(0.5), 0.5);
        assert_relative_eq!(ease.apply(0.75), 0.875);
        assert_relative_eq!(ease.apply(1.0), 1.0);

        let cubic = Easing::PolyInOut(3.0);
        assert_relative_eq!(cubic.apply(0.25), 0.0625);
        assert_relative_eq!(cubic.apply(0.25) + cubic.apply(0.75), 1.0);
    }

    #[test]
    fn linear_is_identity() {
        for p in [0.0, 0.1, 0.5, 0.9, 1.0] {
            assert_relative_eq!(Easing::Linear.apply(p), p);
        }
    }

    fn trigger_tween(duration: f64) -> ActiveTween {
        ActiveTween {
            motion: Motion::Trigger {
                side: TriggerSide::Right,
                from: 0.0,
                to: 1.0,
            },
            start: 10.0,
            duration,
            easing: Easing::Linear,
            release_after: None,
        }
    }

    #[test]
    fn step_clamps_to_endpoints() {
        let tween = trigger_tween(1.0);
        let tracker = StateTracker::new();
        let mut state = tracker.modify();

        assert!(!tween.step(&mut state, 9.0).unwrap());
        assert_eq!(state.report().triggers[1], 0);

        assert!(!tween.step(&mut state, 10.5).unwrap());
        assert_eq!(state.report().triggers[1], 128);

        assert!(tween.step(&mut state, 12.0).unwrap());
        assert_eq!(state.report().triggers[1], 255);
        assert_eq!(state.report().triggers[0], 0);
    }

    #[test]
    fn zero_duration_finishes_at_start() {
        let tween = trigger_tween(0.0);
        assert!(tween.progress(9.99) < 0.0);
        assert_relative_eq!(tween.progress(10.0), 1.0);
    }

    #[test]
    fn polar_stick_interpolates_angle() {
        let tween = ActiveTween {
            motion: Motion::Stick {
                side: StickSide::Left,
                from: (1.0, 0.0),
                to: (1.0, 180.0),
                unit: StickUnit::Polar,
            },
            start: 0.0,
            duration: 2.0,
            easing: Easing::Linear,
            release_after: None,
        };
        let tracker = StateTracker::new();
        let mut state = tracker.modify();
        tween.step(&mut state, 1.0).unwrap();
        // Halfway round the rim is straight down
        assert_eq!(state.report().sticks[0], 128);
        assert_eq!(state.report().sticks[1], 255);
    }

    #[test]
    fn attitude_starts_from_its_own_pose() {
        let tracker = StateTracker::new();
        let mut state = tracker.modify();
        let now = tracker.clock().now();
        let motion = Motion::Attitude {
            from: Pose {
                pitch: 30.0,
                ..Default::default()
            },
            to: Pose {
                pitch: 40.0,
                ..Default::default()
            },
        };
        motion.prepare(&mut state, now);
        assert_eq!(state.imu().pose().1.pitch, 30.0);
        assert_eq!(state.report().gyro, [0; 3]);

        let tween = ActiveTween {
            motion,
            start: now,
            duration: 1.0,
            easing: Easing::Linear,
            release_after: None,
        };
        // Same instant as the placement: no sample, no rate
        assert!(!tween.step(&mut state, now).unwrap());
        assert_eq!(state.report().gyro, [0; 3]);

        // 10 deg/s over the whole tween
        assert!(!tween.step(&mut state, now + 0.004).unwrap());
        assert_eq!(state.report().gyro, [164, 0, 0]);
    }

    #[test]
    fn zero_length_attitude_lands_on_target() {
        let tracker = StateTracker::new();
        let mut state = tracker.modify();
        let now = tracker.clock().now();
        let to = Pose {
            roll: -45.0,
            ..Default::default()
        };
        let motion = Motion::Attitude {
            from: Pose::default(),
            to,
        };
        motion.prepare(&mut state, now);
        let tween = ActiveTween {
            motion,
            start: now,
            duration: 0.0,
            easing: Easing::Linear,
            release_after: None,
        };
        assert!(tween.step(&mut state, now).unwrap());
        assert_eq!(state.imu().pose(), (now, to));
        assert_eq!(state.report().gyro, [0; 3]);
    }

    #[test]
    fn builder_sets_fields() {
        let animation = Animation::new(Duration::from_millis(200))
            .delay(Duration::from_millis(10))
            .easing(Easing::PolyInOut(3.0));
        let tween = ActiveTween::new(
            Motion::Trigger {
                side: TriggerSide::Left,
                from: 0.0,
                to: 0.5,
            },
            &animation,
            1.0,
        );
        assert_relative_eq!(tween.start, 1.01);
        assert_relative_eq!(tween.duration, 0.2);
        assert_eq!(tween.release_after, None);
    }
}
