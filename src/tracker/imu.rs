use std::sync::Arc;

use tracing::debug;

use crate::clock::Clock;
use crate::report::InputReport;

use super::TrackerError;

/// Gyro counts per deg/s.
pub const GYRO_RES_PER_DEG_S: f64 = 1000.0 / 61.0;
/// Accelerometer counts per g.
pub const ACCEL_RES_PER_G: f64 = 8192.0;
/// Sensor timestamp ticks per second.
pub const TIMESTAMP_TICKS_PER_S: f64 = 187_500.0;

const GRAVITY_M_S2: f64 = 9.8;
const MM_PER_M: f64 = 1000.0;

/// How the motion fields are fed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImuMode {
    /// Caller writes angular velocity and acceleration directly
    #[default]
    RawRate,
    /// Caller writes absolute attitude and position, rates are derived
    AttitudePosition,
}

/// Absolute attitude (degrees) and position (millimetres).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    pub pitch: f64,
    pub yaw: f64,
    pub roll: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Pose {
    fn attitude(&self) -> [f64; 3] {
        [self.pitch, self.yaw, self.roll]
    }

    fn position(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

/// A partial pose; `None` components keep their previous value.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PoseUpdate {
    pub pitch: Option<f64>,
    pub yaw: Option<f64>,
    pub roll: Option<f64>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

impl From<Pose> for PoseUpdate {
    fn from(pose: Pose) -> Self {
        Self {
            pitch: Some(pose.pitch),
            yaw: Some(pose.yaw),
            roll: Some(pose.roll),
            x: Some(pose.x),
            y: Some(pose.y),
            z: Some(pose.z),
        }
    }
}

impl PoseUpdate {
    fn apply_to(&self, base: Pose) -> Pose {
        Pose {
            pitch: self.pitch.unwrap_or(base.pitch),
            yaw: self.yaw.unwrap_or(base.yaw),
            roll: self.roll.unwrap_or(base.roll),
            x: self.x.unwrap_or(base.x),
            y: self.y.unwrap_or(base.y),
            z: self.z.unwrap_or(base.z),
        }
    }
}

const ROTATION_AXES: [&str; 3] = ["pitch", "yaw", "roll"];
const LINEAR_AXES: [&str; 3] = ["x", "y", "z"];

fn to_counts(
    quantity: &'static str,
    axis: &'static str,
    value: f64,
    res: f64,
) -> Result<i16, TrackerError> {
    let scaled = (value * res).round_ties_even();
    if !(f64::from(i16::MIN)..=f64::from(i16::MAX)).contains(&scaled) {
        return Err(TrackerError::OutOfRange {
            quantity,
            axis,
            value,
        });
    }
    Ok(scaled as i16)
}

// Converts every supplied axis before anything is written, so a bad axis leaves the report untouched
fn convert_axes(
    quantity: &'static str,
    axes: &[&'static str; 3],
    values: [Option<f64>; 3],
    res: f64,
) -> Result<[Option<i16>; 3], TrackerError> {
    let mut out = [None; 3];
    for (i, value) in values.into_iter().enumerate() {
        if let Some(value) = value {
            out[i] = Some(to_counts(quantity, axes[i], value, res)?);
        }
    }
    Ok(out)
}

fn write_axes(fields: &mut [i16; 3], values: [Option<i16>; 3]) {
    for (field, value) in fields.iter_mut().zip(values) {
        if let Some(value) = value {
            *field = value;
        }
    }
}

/// Motion sensor state carried across submissions.
pub struct ImuTracker {
    mode: ImuMode,
    clock: Arc<dyn Clock>,
    time_base: f64,
    time: f64,
    pose: Pose,
    last_gyro: [i16; 3],
    last_accel: [i16; 3],
    // True until a real sample lands in the current cycle
    sustain: bool,
}

impl std::fmt::Debug for ImuTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImuTracker")
            .field("mode", &self.mode)
            .field("time_base", &self.time_base)
            .field("time", &self.time)
            .field("pose", &self.pose)
            .field("last_gyro", &self.last_gyro)
            .field("last_accel", &self.last_accel)
            .finish()
    }
}

impl ImuTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            mode: ImuMode::RawRate,
            clock,
            time_base: now,
            time: now,
            pose: Pose::default(),
            last_gyro: [0; 3],
            last_accel: [0; 3],
            sustain: true,
        }
    }

    pub fn mode(&self) -> ImuMode {
        self.mode
    }

    /// Switch modes. Entering attitude-position mode rebases the sensor clock.
    pub fn set_mode(&mut self, mode: ImuMode) {
        if mode == self.mode {
            return;
        }
        debug!(?mode, "IMU mode changed");
        self.mode = mode;
        if mode == ImuMode::AttitudePosition {
            self.reset_time();
            self.sustain = true;
        }
    }

    pub fn reset_time(&mut self) {
        self.time_base = self.clock.now();
        self.time = self.time_base;
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// Time of the last attitude sample and the pose at that time.
    pub fn pose(&self) -> (f64, Pose) {
        (self.time, self.pose)
    }

    fn require(&self, mode: ImuMode) -> Result<(), TrackerError> {
        if self.mode != mode {
            return Err(TrackerError::ModeMismatch { required: mode });
        }
        Ok(())
    }

    /// Raw angular velocity in deg/s.
    pub fn set_angular_velocity(
        &mut self,
        report: &mut InputReport,
        pitch: Option<f64>,
        yaw: Option<f64>,
        roll: Option<f64>,
    ) -> Result<(), TrackerError> {
        self.require(ImuMode::RawRate)?;
        let counts = convert_axes(
            "angular velocity",
            &ROTATION_AXES,
            [pitch, yaw, roll],
            GYRO_RES_PER_DEG_S,
        )?;
        write_axes(&mut report.gyro, counts);
        self.last_gyro = report.gyro;
        Ok(())
    }

    /// Raw linear acceleration in g.
    pub fn set_linear_acceleration(
        &mut self,
        report: &mut InputReport,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
    ) -> Result<(), TrackerError> {
        self.require(ImuMode::RawRate)?;
        let counts = convert_axes(
            "linear acceleration",
            &LINEAR_AXES,
            [x, y, z],
            ACCEL_RES_PER_G,
        )?;
        write_axes(&mut report.accel, counts);
        self.last_accel = report.accel;
        Ok(())
    }

    /// Feed an absolute sample taken at `time` seconds on the tracker's clock.
    ///
    /// Angular velocity is the first difference of attitude, acceleration the
    /// second difference of position against the previous sample. Gravity is
    /// not added.
    pub fn set_attitude_position(
        &mut self,
        report: &mut InputReport,
        time: f64,
        update: PoseUpdate,
    ) -> Result<(), TrackerError> {
        self.require(ImuMode::AttitudePosition)?;
        let dt = time - self.time;
        if dt.is_nan() || dt <= 0.0 {
            return Err(TrackerError::NonMonotonicTime {
                previous: self.time,
                current: time,
            });
        }

        let pose = update.apply_to(self.pose);
        let mut rate = [None; 3];
        let mut accel = [None; 3];
        for (i, (curr, prev)) in pose
            .attitude()
            .into_iter()
            .zip(self.pose.attitude())
            .enumerate()
        {
            rate[i] = Some((curr - prev) / dt);
        }
        for (i, (curr, prev)) in pose
            .position()
            .into_iter()
            .zip(self.pose.position())
            .enumerate()
        {
            accel[i] = Some((curr - prev) / dt.powi(2) / GRAVITY_M_S2 / MM_PER_M);
        }

        let gyro = convert_axes("angular velocity", &ROTATION_AXES, rate, GYRO_RES_PER_DEG_S)?;
        let accel = convert_axes("linear acceleration", &LINEAR_AXES, accel, ACCEL_RES_PER_G)?;
        write_axes(&mut report.gyro, gyro);
        write_axes(&mut report.accel, accel);
        report.sensor_timestamp = self.timestamp_at(time);

        self.last_gyro = report.gyro;
        self.last_accel = report.accel;
        self.pose = pose;
        self.time = time;
        self.sustain = false;
        Ok(())
    }

    fn timestamp_at(&self, time: f64) -> u16 {
        let ticks = ((time - self.time_base) * TIMESTAMP_TICKS_PER_S).round_ties_even() as i64;
        ticks.rem_euclid(1 << 16) as u16
    }

    /// Keep the motion signal continuous across cycles with no new sample.
    pub fn sustain(&mut self, report: &mut InputReport) {
        if self.mode != ImuMode::AttitudePosition {
            return;
        }
        if self.sustain {
            report.gyro = self.last_gyro;
            report.accel = self.last_accel;
            report.sensor_timestamp = self.timestamp_at(self.clock.now());
        }
        self.sustain = true;
    }

    /// Move to `pose` at `time` without deriving a rate from the jump.
    ///
    /// The next attitude sample differences against this pose. Rates already
    /// written are left alone.
    pub fn place(&mut self, time: f64, pose: Pose) {
        debug!(time, ?pose, "IMU pose placed");
        self.pose = pose;
        self.time = time;
    }

    /// Zero the derived rates, leaving the pose where it is.
    pub fn settle(&mut self, report: &mut InputReport) {
        self.last_gyro = [0; 3];
        self.last_accel = [0; 3];
        report.gyro = [0; 3];
        report.accel = [0; 3];
    }
}
