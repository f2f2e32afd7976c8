//! Wire structures exchanged with the host.
//!
//! Every structure here is a plain value with `to_bytes`/`from_bytes`; there
//! is no hidden state and the byte layout is the external contract:
//!
//! - [`input`] - 64-byte input report (sticks, buttons, motion, touch)
//! - [`feedback`] - 32-byte output report (rumble, light bar)
//! - [`feature`] - 48-byte capability descriptor
//! - [`auth`] - paged authentication envelopes

pub mod auth;
pub mod feature;
pub mod feedback;
pub mod input;
mod wire;

use std::fmt::{self, Display};

pub use auth::{AuthPageSizeReport, AuthReport, AuthStatusReport, AUTH_PAYLOAD_SIZE};
pub use feature::{ControllerFeature, ControllerType, FeatureConfiguration, ImuParameters};
pub use feedback::FeedbackReport;
pub use input::{Button, DPadPosition, InputReport, TouchFrame, TouchPoint};
pub use wire::trailing_crc32;

/// HID report ids used by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReportType {
    Input = 0x01,
    FeatureConfiguration = 0x03,
    Feedback = 0x05,
    SetChallenge = 0xf0,
    GetResponse = 0xf1,
    GetAuthStatus = 0xf2,
    GetAuthPageSize = 0xf3,
}

impl ReportType {
    pub fn id(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ReportType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Input),
            0x03 => Ok(Self::FeatureConfiguration),
            0x05 => Ok(Self::Feedback),
            0xf0 => Ok(Self::SetChallenge),
            0xf1 => Ok(Self::GetResponse),
            0xf2 => Ok(Self::GetAuthStatus),
            0xf3 => Ok(Self::GetAuthPageSize),
            other => Err(CodecError::UnknownReportType(other)),
        }
    }
}

impl Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReportType::Input => "input",
            ReportType::FeatureConfiguration => "feature-configuration",
            ReportType::Feedback => "feedback",
            ReportType::SetChallenge => "set-challenge",
            ReportType::GetResponse => "get-response",
            ReportType::GetAuthStatus => "get-auth-status",
            ReportType::GetAuthPageSize => "get-auth-page-size",
        };
        write!(f, "{} (0x{:02x})", name, self.id())
    }
}

/// Errors raised while decoding wire structures
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("{structure} must be {expected} bytes, got {actual}")]
    WrongSize {
        structure: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Unknown report type 0x{0:02x}")]
    UnknownReportType(u8),

    #[error("Invalid value 0x{value:02x} for field {field}")]
    InvalidField { field: &'static str, value: u8 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_type_ids_round_trip() {
        for id in [0x01u8, 0x03, 0x05, 0xf0, 0xf1, 0xf2, 0xf3] {
            let ty = ReportType::try_from(id).unwrap();
            assert_eq!(ty.id(), id);
        }
        assert_eq!(
            ReportType::try_from(0x42),
            Err(CodecError::UnknownReportType(0x42))
        );
    }

    #[test]
    fn crc_skips_trailing_field() {
        let mut packet = [0u8; 16];
        packet[0] = 0xf2;
        let crc = trailing_crc32(&packet);
        packet[12..].copy_from_slice(&crc.to_le_bytes());
        // The stored checksum must not influence the computed one.
        assert_eq!(trailing_crc32(&packet), crc);
        assert_eq!(crc, crc32fast::hash(&packet[..12]));
    }
}
