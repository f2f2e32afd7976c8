use super::wire::{WireReader, WireWriter};
use super::{CodecError, ReportType};

/// Host-to-device output report: rumble motors and light bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackReport {
    pub report_type: u8,
    pub flags: u8,
    pub padding1: [u8; 2],
    pub rumble_right: u8,
    pub rumble_left: u8,
    /// R, G, B
    pub led_color: [u8; 3],
    pub led_flash_on: u8,
    pub led_flash_off: u8,
    pub padding: [u8; 21],
}

impl Default for FeedbackReport {
    fn default() -> Self {
        Self {
            report_type: ReportType::Feedback.id(),
            flags: 0,
            padding1: [0; 2],
            rumble_right: 0,
            rumble_left: 0,
            led_color: [0; 3],
            led_flash_on: 0,
            led_flash_off: 0,
            padding: [0; 21],
        }
    }
}

impl FeedbackReport {
    pub const SIZE: usize = 32;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut w = WireWriter::new(&mut buf);
        w.put_u8(self.report_type);
        w.put_u8(self.flags);
        w.put_slice(&self.padding1);
        w.put_u8(self.rumble_right);
        w.put_u8(self.rumble_left);
        w.put_slice(&self.led_color);
        w.put_u8(self.led_flash_on);
        w.put_u8(self.led_flash_off);
        w.put_slice(&self.padding);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = WireReader::exact("FeedbackReport", bytes, Self::SIZE)?;
        Ok(Self {
            report_type: r.u8(),
            flags: r.u8(),
            padding1: r.array(),
            rumble_right: r.u8(),
            rumble_left: r.u8(),
            led_color: r.array(),
            led_flash_on: r.u8(),
            led_flash_off: r.u8(),
            padding: r.array(),
        })
    }
}
