use super::wire::{WireReader, WireWriter};
use super::{CodecError, ReportType};

// Point word layout
const POINT_INVALID: u32 = 1 << 7;
const POINT_ID_MASK: u32 = 0x7f;
const POINT_X_SHIFT: u32 = 8;
const POINT_Y_SHIFT: u32 = 20;
const COORD_MASK: u32 = 0xfff;

// Buttons byte 2 carries the report counter in bits 2..7
const COUNTER_MASK: u8 = 0b1111_1100;
const DPAD_MASK: u8 = 0x0f;

/// Number of touch frames a single input report can carry.
pub const TOUCH_FRAMES_PER_REPORT: usize = 3;

/// Face, shoulder and system buttons, numbered as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Button {
    Square = 0,
    Cross = 1,
    Circle = 2,
    Triangle = 3,
    L1 = 4,
    R1 = 5,
    L2 = 6,
    R2 = 7,
    Share = 8,
    Options = 9,
    L3 = 10,
    R3 = 11,
    Ps = 12,
    Touchpad = 13,
}

impl Button {
    pub const ALL: [Button; 14] = [
        Button::Square,
        Button::Cross,
        Button::Circle,
        Button::Triangle,
        Button::L1,
        Button::R1,
        Button::L2,
        Button::R2,
        Button::Share,
        Button::Options,
        Button::L3,
        Button::R3,
        Button::Ps,
        Button::Touchpad,
    ];

    // (byte, mask) inside the 3-byte button field
    fn location(self) -> (usize, u8) {
        let bit = self as usize + 4;
        (bit / 8, 1 << (bit % 8))
    }
}

impl TryFrom<u8> for Button {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Button::ALL
            .get(value as usize)
            .copied()
            .ok_or(CodecError::InvalidField {
                field: "button",
                value,
            })
    }
}

/// Hat switch position. Directions go clockwise from north.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum DPadPosition {
    N = 0,
    NE = 1,
    E = 2,
    SE = 3,
    S = 4,
    SW = 5,
    W = 6,
    NW = 7,
    #[default]
    Neutral = 8,
}

impl TryFrom<u8> for DPadPosition {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::N,
            1 => Self::NE,
            2 => Self::E,
            3 => Self::SE,
            4 => Self::S,
            5 => Self::SW,
            6 => Self::W,
            7 => Self::NW,
            8 => Self::Neutral,
            other => {
                return Err(CodecError::InvalidField {
                    field: "dpad",
                    value: other,
                })
            }
        })
    }
}

/// A touch coordinate. Each axis is 12 bits wide on the wire; wider values are masked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TouchPoint {
    pub x: u16,
    pub y: u16,
}

impl TouchPoint {
    pub const fn new(x: u16, y: u16) -> Self {
        Self { x, y }
    }
}

/// One touchpad sample: a frame sequence byte and two packed point words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchFrame {
    pub seq: u8,
    pub points: [u32; 2],
}

impl Default for TouchFrame {
    fn default() -> Self {
        let mut frame = Self {
            seq: 0,
            points: [0; 2],
        };
        frame.clear();
        frame
    }
}

impl TouchFrame {
    pub const SIZE: usize = 9;

    /// Reset to sequence 0 with both points invalid.
    pub fn clear(&mut self) {
        self.seq = 0;
        self.points = [POINT_INVALID; 2];
    }

    pub fn set_invalid(&mut self, slot: usize, invalid: bool) {
        if invalid {
            self.points[slot] |= POINT_INVALID;
        } else {
            self.points[slot] &= !POINT_INVALID;
        }
    }

    pub fn is_invalid(&self, slot: usize) -> bool {
        self.points[slot] & POINT_INVALID != 0
    }

    pub fn both_invalid(&self) -> bool {
        self.is_invalid(0) && self.is_invalid(1)
    }

    /// Replace the coordinate, keeping the invalid flag and touch id.
    pub fn set_pos(&mut self, slot: usize, pos: TouchPoint) {
        let x = pos.x as u32 & COORD_MASK;
        let y = pos.y as u32 & COORD_MASK;
        self.points[slot] =
            (y << POINT_Y_SHIFT) | (x << POINT_X_SHIFT) | (self.points[slot] & 0xff);
    }

    pub fn pos(&self, slot: usize) -> TouchPoint {
        let word = self.points[slot];
        TouchPoint {
            x: ((word >> POINT_X_SHIFT) & COORD_MASK) as u16,
            y: ((word >> POINT_Y_SHIFT) & COORD_MASK) as u16,
        }
    }

    pub fn set_touch_id(&mut self, slot: usize, id: u8) {
        self.points[slot] = (self.points[slot] & !POINT_ID_MASK) | (id as u32 & POINT_ID_MASK);
    }

    pub fn touch_id(&self, slot: usize) -> u8 {
        (self.points[slot] & POINT_ID_MASK) as u8
    }

    fn write(&self, w: &mut WireWriter<'_>) {
        w.put_u8(self.seq);
        w.put_u32(self.points[0]);
        w.put_u32(self.points[1]);
    }

    fn read(r: &mut WireReader<'_>) -> Self {
        let seq = r.u8();
        let points = [r.u32(), r.u32()];
        Self { seq, points }
    }
}

/// The 64-byte periodic status report.
///
/// Field order mirrors the wire layout exactly. Helpers operate on the raw
/// fields so a report decoded from bytes behaves the same as one built here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputReport {
    pub report_type: u8,
    /// LX, LY, RX, RY; 0x80 is centre
    pub sticks: [u8; 4],
    pub buttons: [u8; 3],
    /// L2, R2
    pub triggers: [u8; 2],
    pub sensor_timestamp: u16,
    pub battery: u8,
    /// pitch, yaw, roll
    pub gyro: [i16; 3],
    /// x, y, z
    pub accel: [i16; 3],
    pub reserved25: [u8; 5],
    pub state_ext: u8,
    pub reserved31: u16,
    pub touch_frames_available: u8,
    pub touch_frames: [TouchFrame; TOUCH_FRAMES_PER_REPORT],
    pub padding: [u8; 3],
}

impl Default for InputReport {
    fn default() -> Self {
        let mut report = Self {
            report_type: ReportType::Input.id(),
            sticks: [0x80; 4],
            buttons: [0; 3],
            triggers: [0; 2],
            sensor_timestamp: 0,
            battery: 0xff,
            gyro: [0; 3],
            accel: [0; 3],
            reserved25: [0; 5],
            state_ext: 0x08,
            reserved31: 0,
            touch_frames_available: 0,
            touch_frames: [TouchFrame::default(); TOUCH_FRAMES_PER_REPORT],
            padding: [0; 3],
        };
        report.set_dpad(DPadPosition::Neutral);
        report.clear_touchpad();
        report
    }
}

impl InputReport {
    pub const SIZE: usize = 64;

    pub fn set_button(&mut self, button: Button, pressed: bool) {
        let (byte, mask) = button.location();
        if pressed {
            self.buttons[byte] |= mask;
        } else {
            self.buttons[byte] &= !mask;
        }
    }

    pub fn button(&self, button: Button) -> bool {
        let (byte, mask) = button.location();
        self.buttons[byte] & mask != 0
    }

    /// Release every button. The dpad nibble and the report counter survive.
    pub fn clear_buttons(&mut self) {
        self.buttons[0] &= DPAD_MASK;
        self.buttons[1] = 0;
        self.buttons[2] &= COUNTER_MASK;
    }

    pub fn set_dpad(&mut self, position: DPadPosition) {
        self.buttons[0] = (self.buttons[0] & !DPAD_MASK) | position as u8;
    }

    pub fn dpad(&self) -> Result<DPadPosition, CodecError> {
        DPadPosition::try_from(self.buttons[0] & DPAD_MASK)
    }

    /// `left` selects LX/LY, otherwise RX/RY.
    pub fn set_stick(&mut self, left: bool, x: u8, y: u8) {
        let base = if left { 0 } else { 2 };
        self.sticks[base] = x;
        self.sticks[base + 1] = y;
    }

    pub fn set_sticks(&mut self, left: (u8, u8), right: (u8, u8)) {
        self.set_stick(true, left.0, left.1);
        self.set_stick(false, right.0, right.1);
    }

    /// `left` selects L2, otherwise R2.
    pub fn set_trigger(&mut self, left: bool, value: u8) {
        self.triggers[if left { 0 } else { 1 }] = value;
    }

    pub fn inc_report_index(&mut self) {
        self.buttons[2] = self.buttons[2].wrapping_add(4);
    }

    /// The 6-bit report counter.
    pub fn report_index(&self) -> u8 {
        self.buttons[2] >> 2
    }

    pub fn clear_touchpad(&mut self) {
        self.touch_frames_available = 0;
        for frame in &mut self.touch_frames {
            frame.clear();
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut w = WireWriter::new(&mut buf);
        w.put_u8(self.report_type);
        w.put_slice(&self.sticks);
        w.put_slice(&self.buttons);
        w.put_slice(&self.triggers);
        w.put_u16(self.sensor_timestamp);
        w.put_u8(self.battery);
        for v in self.gyro {
            w.put_i16(v);
        }
        for v in self.accel {
            w.put_i16(v);
        }
        w.put_slice(&self.reserved25);
        w.put_u8(self.state_ext);
        w.put_u16(self.reserved31);
        w.put_u8(self.touch_frames_available);
        for frame in &self.touch_frames {
            frame.write(&mut w);
        }
        w.put_slice(&self.padding);
        debug_assert_eq!(w.position(), Self::SIZE);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = WireReader::exact("InputReport", bytes, Self::SIZE)?;
        Ok(Self {
            report_type: r.u8(),
            sticks: r.array(),
            buttons: r.array(),
            triggers: r.array(),
            sensor_timestamp: r.u16(),
            battery: r.u8(),
            gyro: [r.i16(), r.i16(), r.i16()],
            accel: [r.i16(), r.i16(), r.i16()],
            reserved25: r.array(),
            state_ext: r.u8(),
            reserved31: r.u16(),
            touch_frames_available: r.u8(),
            touch_frames: [
                TouchFrame::read(&mut r),
                TouchFrame::read(&mut r),
                TouchFrame::read(&mut r),
            ],
            padding: r.array(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRESH_REPORT: &str = concat!(
        "01",
        "80808080",
        "080000",
        "0000",
        "0000",
        "ff",
        "000000000000",
        "000000000000",
        "0000000000",
        "08",
        "0000",
        "00",
        "008000000080000000",
        "008000000080000000",
        "008000000080000000",
        "000000",
    );

    #[test]
    fn fresh_report_bytes() {
        let report = InputReport::default();
        assert_eq!(hex::encode(report.to_bytes()), FRESH_REPORT);
    }

    #[test]
    fn decode_is_inverse_of_encode() {
        let mut report = InputReport::default();
        report.set_sticks((0x10, 0x20), (0xf0, 0xe0));
        report.set_button(Button::Cross, true);
        report.gyro = [-1, 2, -300];
        report.touch_frames[1].set_pos(0, TouchPoint::new(0x123, 0x456));
        report.touch_frames_available = 2;

        let bytes = report.to_bytes();
        assert_eq!(InputReport::from_bytes(&bytes).unwrap(), report);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let err = InputReport::from_bytes(&[0u8; 63]).unwrap_err();
        assert_eq!(
            err,
            CodecError::WrongSize {
                structure: "InputReport",
                expected: 64,
                actual: 63
            }
        );
    }

    #[test]
    fn button_set_then_unset_restores_bytes() {
        let mut report = InputReport::default();
        report.set_dpad(DPadPosition::SW);
        report.inc_report_index();
        for button in Button::ALL {
            let before = report.to_bytes();
            report.set_button(button, true);
            assert!(report.button(button));
            assert_ne!(report.to_bytes(), before);
            report.set_button(button, false);
            assert_eq!(report.to_bytes(), before, "{button:?}");
        }
    }

    #[test]
    fn button_bits_follow_wire_mapping() {
        let mut report = InputReport::default();
        report.set_dpad(DPadPosition::S);
        for button in [
            Button::L3,
            Button::R1,
            Button::Ps,
            Button::Circle,
            Button::Triangle,
        ] {
            report.set_button(button, true);
        }
        assert_eq!(hex::encode(&report.to_bytes()[5..8]), "c44201");

        report.clear_buttons();
        assert_eq!(hex::encode(&report.to_bytes()[5..8]), "040000");
        assert_eq!(report.dpad().unwrap(), DPadPosition::S);
    }

    #[test]
    fn clear_buttons_keeps_counter() {
        let mut report = InputReport::default();
        report.inc_report_index();
        report.inc_report_index();
        report.set_button(Button::Touchpad, true);
        report.clear_buttons();
        assert_eq!(report.report_index(), 2);
        assert!(!report.button(Button::Touchpad));
    }

    #[test]
    fn report_counter_wraps_without_touching_buttons() {
        let mut report = InputReport::default();
        report.set_button(Button::Ps, true);
        report.set_button(Button::Touchpad, true);
        for _ in 0..64 {
            report.inc_report_index();
        }
        assert_eq!(report.report_index(), 0);
        assert!(report.button(Button::Ps));
        assert!(report.button(Button::Touchpad));
    }

    #[test]
    fn touch_point_packing() {
        let mut frame = TouchFrame::default();
        assert!(frame.both_invalid());

        frame.set_pos(0, TouchPoint::new(0xabc, 0x123));
        frame.set_touch_id(0, 0x7e);
        frame.set_invalid(0, false);
        assert_eq!(frame.points[0], 0x123a_bc7e);
        assert_eq!(frame.pos(0), TouchPoint::new(0xabc, 0x123));
        assert_eq!(frame.touch_id(0), 0x7e);
        assert!(!frame.is_invalid(0));
        assert!(frame.is_invalid(1));

        // Out of range coordinates are masked to 12 bits
        frame.set_pos(1, TouchPoint::new(0x1fff, 0xf001));
        assert_eq!(frame.pos(1), TouchPoint::new(0xfff, 0x001));
        assert!(frame.is_invalid(1));
    }

    #[test]
    fn dpad_rejects_reserved_values() {
        assert!(DPadPosition::try_from(9).is_err());
        let mut report = InputReport::default();
        report.buttons[0] = 0x0f;
        assert_eq!(
            report.dpad(),
            Err(CodecError::InvalidField {
                field: "dpad",
                value: 0x0f
            })
        );
    }
}
