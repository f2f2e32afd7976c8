//! Envelopes paging the authentication exchange through 64-byte control transfers.
//!
//! [`AuthReport`] and [`AuthStatusReport`] end in a little-endian CRC32 over
//! every preceding byte. Decoding never rejects a bad checksum; callers decide
//! what a mismatch means via [`AuthReport::crc_valid`].

use super::wire::{trailing_crc32, WireReader, WireWriter};
use super::{CodecError, ReportType};

/// Payload capacity of one [`AuthReport`] page.
pub const AUTH_PAYLOAD_SIZE: usize = 56;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthPageSizeReport {
    pub report_type: u8,
    pub reserved1: u8,
    pub challenge_size: u8,
    pub response_size: u8,
    pub reserved4: [u8; 4],
}

impl AuthPageSizeReport {
    pub const SIZE: usize = 8;

    pub fn new(challenge_size: u8, response_size: u8) -> Self {
        Self {
            report_type: ReportType::GetAuthPageSize.id(),
            reserved1: 0,
            challenge_size,
            response_size,
            reserved4: [0; 4],
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut w = WireWriter::new(&mut buf);
        w.put_u8(self.report_type);
        w.put_u8(self.reserved1);
        w.put_u8(self.challenge_size);
        w.put_u8(self.response_size);
        w.put_slice(&self.reserved4);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = WireReader::exact("AuthPageSizeReport", bytes, Self::SIZE)?;
        Ok(Self {
            report_type: r.u8(),
            reserved1: r.u8(),
            challenge_size: r.u8(),
            response_size: r.u8(),
            reserved4: r.array(),
        })
    }
}

/// One page of challenge (host to device) or response (device to host) data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthReport {
    pub report_type: u8,
    pub seq: u8,
    pub page: u8,
    /// Should be zero
    pub reserved: u8,
    pub data: [u8; AUTH_PAYLOAD_SIZE],
    pub crc32: u32,
}

impl AuthReport {
    pub const SIZE: usize = 64;

    pub fn new(report_type: ReportType, seq: u8, page: u8) -> Self {
        Self {
            report_type: report_type.id(),
            seq,
            page,
            reserved: 0,
            data: [0; AUTH_PAYLOAD_SIZE],
            crc32: 0,
        }
    }

    pub fn fill_crc(&mut self) {
        self.crc32 = trailing_crc32(&self.to_bytes());
    }

    pub fn crc_valid(&self) -> bool {
        trailing_crc32(&self.to_bytes()) == self.crc32
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut w = WireWriter::new(&mut buf);
        w.put_u8(self.report_type);
        w.put_u8(self.seq);
        w.put_u8(self.page);
        w.put_u8(self.reserved);
        w.put_slice(&self.data);
        w.put_u32(self.crc32);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = WireReader::exact("AuthReport", bytes, Self::SIZE)?;
        Ok(Self {
            report_type: r.u8(),
            seq: r.u8(),
            page: r.u8(),
            reserved: r.u8(),
            data: r.array(),
            crc32: r.u32(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthStatusReport {
    pub report_type: u8,
    pub seq: u8,
    pub status: u8,
    pub padding: [u8; 9],
    pub crc32: u32,
}

impl AuthStatusReport {
    pub const SIZE: usize = 16;

    pub fn new(seq: u8, status: u8) -> Self {
        let mut report = Self {
            report_type: ReportType::GetAuthStatus.id(),
            seq,
            status,
            padding: [0; 9],
            crc32: 0,
        };
        report.crc32 = trailing_crc32(&report.to_bytes());
        report
    }

    pub fn crc_valid(&self) -> bool {
        trailing_crc32(&self.to_bytes()) == self.crc32
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut w = WireWriter::new(&mut buf);
        w.put_u8(self.report_type);
        w.put_u8(self.seq);
        w.put_u8(self.status);
        w.put_slice(&self.padding);
        w.put_u32(self.crc32);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = WireReader::exact("AuthStatusReport", bytes, Self::SIZE)?;
        Ok(Self {
            report_type: r.u8(),
            seq: r.u8(),
            status: r.u8(),
            padding: r.array(),
            crc32: r.u32(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_layout() {
        let report = AuthPageSizeReport::new(0x38, 0x20);
        assert_eq!(hex::encode(report.to_bytes()), "f300382000000000");
        assert_eq!(
            AuthPageSizeReport::from_bytes(&report.to_bytes()).unwrap(),
            report
        );
    }

    #[test]
    fn status_crc_is_little_endian_trailer() {
        let status = AuthStatusReport::new(7, 0x10);
        let bytes = status.to_bytes();
        assert_eq!(&bytes[..3], &[0xf2, 7, 0x10]);
        let crc = crc32fast::hash(&bytes[..12]);
        assert_eq!(&bytes[12..], &crc.to_le_bytes());
        assert!(status.crc_valid());
    }

    #[test]
    fn corrupted_page_fails_crc() {
        let mut page = AuthReport::new(ReportType::SetChallenge, 1, 0);
        page.data[..4].copy_from_slice(b"abcd");
        page.fill_crc();
        assert!(page.crc_valid());

        let mut bytes = page.to_bytes();
        bytes[10] ^= 0xff;
        let decoded = AuthReport::from_bytes(&bytes).unwrap();
        assert!(!decoded.crc_valid());
    }
}
