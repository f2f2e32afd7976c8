use crate::report::{Button, DPadPosition, TouchPoint};
use crate::tracker::{TrackerError, TrackerState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StickSide {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerSide {
    Left,
    Right,
}

/// An independently driven input surface. At most one timed action holds a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Button(Button),
    DPad,
    Stick(StickSide),
    Trigger(TriggerSide),
    /// First touch point
    Touch,
    Imu,
}

/// Something that can be pressed and later released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Button(Button),
    DPad(DPadPosition),
    Touch(TouchPoint),
}

impl Target {
    pub fn channel(&self) -> Channel {
        match self {
            Target::Button(button) => Channel::Button(*button),
            Target::DPad(_) => Channel::DPad,
            Target::Touch(_) => Channel::Touch,
        }
    }

    pub(crate) fn press(&self, state: &mut TrackerState) -> Result<(), TrackerError> {
        match *self {
            Target::Button(button) => state.report_mut().set_button(button, true),
            Target::DPad(position) => state.report_mut().set_dpad(position),
            // Second point is left as it is
            Target::Touch(point) => state.queue_touch([Some(point), None], [false, false])?,
        }
        Ok(())
    }

    /// A neutral dpad "press" is a release.
    pub(crate) fn is_release(&self) -> bool {
        matches!(self, Target::DPad(DPadPosition::Neutral))
    }
}

impl From<Button> for Target {
    fn from(button: Button) -> Self {
        Target::Button(button)
    }
}

impl From<DPadPosition> for Target {
    fn from(position: DPadPosition) -> Self {
        Target::DPad(position)
    }
}

impl From<TouchPoint> for Target {
    fn from(point: TouchPoint) -> Self {
        Target::Touch(point)
    }
}

/// Put a channel back to its resting value.
pub(crate) fn release_channel(
    state: &mut TrackerState,
    channel: Channel,
) -> Result<(), TrackerError> {
    match channel {
        Channel::Button(button) => state.report_mut().set_button(button, false),
        Channel::DPad => state.report_mut().set_dpad(DPadPosition::Neutral),
        Channel::Stick(side) => {
            state
                .report_mut()
                .set_stick(side == StickSide::Left, STICK_CENTER, STICK_CENTER)
        }
        Channel::Trigger(side) => state.report_mut().set_trigger(side == TriggerSide::Left, 0),
        Channel::Touch => state.queue_touch([None, None], [true, false])?,
        Channel::Imu => state.settle_imu(),
    }
    Ok(())
}

pub const STICK_CENTER: u8 = 0x80;

/// Coordinate convention for stick positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StickUnit {
    /// x, y in [-1, 1], +y is down
    #[default]
    Cartesian,
    /// Magnitude in [0, 1] and angle in degrees
    Polar,
    /// Axis bytes in [0, 255]
    Raw,
}

impl StickUnit {
    pub fn to_native(self, a: f64, b: f64) -> (u8, u8) {
        let (x, y) = match self {
            StickUnit::Raw => return (clamp_byte(a.trunc()), clamp_byte(b.trunc())),
            StickUnit::Polar => {
                let angle = b.to_radians();
                (a * angle.cos(), a * angle.sin())
            }
            StickUnit::Cartesian => (a, b),
        };
        (unit_to_axis(x), unit_to_axis(y))
    }
}

fn clamp_byte(v: f64) -> u8 {
    v.clamp(0.0, 255.0) as u8
}

fn unit_to_axis(v: f64) -> u8 {
    clamp_byte(((v + 1.0) / 2.0 * 255.0).round_ties_even())
}

/// Trigger travel in [0, 1] to the report byte.
pub(crate) fn trigger_to_native(v: f64) -> u8 {
    clamp_byte((v * 255.0).round_ties_even())
}
