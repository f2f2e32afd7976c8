use bitflags::bitflags;
use tracing::warn;

use super::wire::{WireReader, WireWriter};
use super::{CodecError, ReportType};

bitflags! {
    /// Capability bits advertised in the feature configuration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ControllerFeature: u8 {
        /// Set on practically every licensed pad
        const UNK_BIT0 = 1 << 0;
        const MOTION = 1 << 1;
        const LED = 1 << 2;
        const RUMBLE = 1 << 3;
        const TOUCHPAD = 1 << 6;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ControllerType {
    #[default]
    Main = 0x00,
    Guitar = 0x01,
    Wheel = 0x06,
}

impl TryFrom<u8> for ControllerType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Main),
            0x01 => Ok(Self::Guitar),
            0x06 => Ok(Self::Wheel),
            other => Err(CodecError::InvalidField {
                field: "controller_type",
                value: other,
            }),
        }
    }
}

/// Motion sensor calibration constants, all u16 little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImuParameters {
    pub gyro_range: u16,
    pub gyro_res_denom: u16,
    pub gyro_res_num: u16,
    pub accel_range: u16,
    pub accel_res_per_g: u16,
}

impl ImuParameters {
    pub const SIZE: usize = 10;

    /// Values matching the conversion constants used by the IMU tracker.
    pub const STANDARD: ImuParameters = ImuParameters {
        gyro_range: 4000,
        gyro_res_denom: 61,
        gyro_res_num: 1000,
        accel_range: 1,
        accel_res_per_g: 8192,
    };
}

/// Static capability descriptor returned for feature report 0x03.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureConfiguration {
    pub report_type: u8,
    pub hid_usage: u16,
    /// Either 0x03 or 0x04 on real hardware, almost always 0x04
    pub u3: u8,
    pub features: ControllerFeature,
    pub controller_type: u8,
    pub touchpad_params: [u8; 2],
    pub imu: ImuParameters,
    pub magic: u16,
    pub reserved20: [u8; 4],
    pub wheel_params: [u8; 3],
    pub reserved27: [u8; 21],
}

impl Default for FeatureConfiguration {
    fn default() -> Self {
        Self {
            report_type: ReportType::FeatureConfiguration.id(),
            hid_usage: 0x2721,
            u3: 0x04,
            features: ControllerFeature::UNK_BIT0,
            controller_type: ControllerType::Main as u8,
            touchpad_params: [0; 2],
            imu: ImuParameters::default(),
            magic: 0x0d0d,
            reserved20: [0; 4],
            wheel_params: [0; 3],
            reserved27: [0; 21],
        }
    }
}

impl FeatureConfiguration {
    pub const SIZE: usize = 48;

    pub fn new(touchpad: bool, imu: bool, led: bool, rumble: bool) -> Self {
        let mut config = Self::default();
        config.enable_touchpad(touchpad);
        config.enable_imu(imu);
        config.enable_led(led);
        config.enable_rumble(rumble);
        config
    }

    pub fn enable_touchpad(&mut self, enabled: bool) {
        self.features.set(ControllerFeature::TOUCHPAD, enabled);
        self.touchpad_params = if enabled { [0x2c, 0x56] } else { [0; 2] };
    }

    pub fn enable_imu(&mut self, enabled: bool) {
        self.features.set(ControllerFeature::MOTION, enabled);
        self.imu = if enabled {
            ImuParameters::STANDARD
        } else {
            ImuParameters::default()
        };
    }

    pub fn enable_led(&mut self, enabled: bool) {
        self.features.set(ControllerFeature::LED, enabled);
    }

    /// Rumble reports share the LED output report, so enabling rumble also enables LED.
    pub fn enable_rumble(&mut self, enabled: bool) {
        if enabled && !self.features.contains(ControllerFeature::LED) {
            warn!("Rumble implies LED output but LED is disabled, enabling it");
            self.features.insert(ControllerFeature::LED);
        }
        self.features.set(ControllerFeature::RUMBLE, enabled);
    }

    pub fn set_controller_type(&mut self, controller_type: ControllerType) {
        self.controller_type = controller_type as u8;
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut w = WireWriter::new(&mut buf);
        w.put_u8(self.report_type);
        w.put_u16(self.hid_usage);
        w.put_u8(self.u3);
        w.put_u8(self.features.bits());
        w.put_u8(self.controller_type);
        w.put_slice(&self.touchpad_params);
        w.put_u16(self.imu.gyro_range);
        w.put_u16(self.imu.gyro_res_denom);
        w.put_u16(self.imu.gyro_res_num);
        w.put_u16(self.imu.accel_range);
        w.put_u16(self.imu.accel_res_per_g);
        w.put_u16(self.magic);
        w.put_slice(&self.reserved20);
        w.put_slice(&self.wheel_params);
        w.put_slice(&self.reserved27);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = WireReader::exact("FeatureConfiguration", bytes, Self::SIZE)?;
        Ok(Self {
            report_type: r.u8(),
            hid_usage: r.u16(),
            u3: r.u8(),
            features: ControllerFeature::from_bits_retain(r.u8()),
            controller_type: r.u8(),
            touchpad_params: r.array(),
            imu: ImuParameters {
                gyro_range: r.u16(),
                gyro_res_denom: r.u16(),
                gyro_res_num: r.u16(),
                accel_range: r.u16(),
                accel_res_per_g: r.u16(),
            },
            magic: r.u16(),
            reserved20: r.array(),
            wheel_params: r.array(),
            reserved27: r.array(),
        })
    }
}
