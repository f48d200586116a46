use std::fs::File;
use std::path::Path;

use i2c_linux::I2c;
use tracing::info;

use super::{Error, ServoDriver};

const REG_CONFIG: u8 = 0x00;
const REG_SERVO1: u8 = 0x01;
const REG_SERVO2: u8 = 0x03;

const ENABLE_SERVO1: u8 = 1 << 0;
const ENABLE_SERVO2: u8 = 1 << 1;

const PULSE_MIN_US: f64 = 575.0;
const PULSE_MAX_US: f64 = 2325.0;
const ANGLE_RANGE: f64 = 180.0;

/// Pimoroni Pan-Tilt HAT. Servo 1 pans, servo 2 tilts.
pub struct PanTiltHat {
    i2c: I2c<File>,
}

impl PanTiltHat {
    pub fn open(device: &Path, address: u16) -> Result<Self, Error> {
        let not_available = |source| Error::DeviceNotAvailable {
            path: device.display().to_string(),
            source,
        };

        let mut i2c = I2c::from_path(device).map_err(not_available)?;
        i2c.smbus_set_slave_address(address, false)
            .map_err(not_available)?;
        i2c.smbus_write_byte_data(REG_CONFIG, ENABLE_SERVO1 | ENABLE_SERVO2)
            .map_err(not_available)?;

        info!(device = %device.display(), address, "Pan-tilt HAT initialized");
        Ok(PanTiltHat { i2c })
    }
}

impl ServoDriver for PanTiltHat {
    fn set_angles(&mut self, pan: i32, tilt: i32) -> Result<(), Error> {
        self.i2c.smbus_write_word_data(REG_SERVO1, pulse_width_us(pan))?;
        self.i2c.smbus_write_word_data(REG_SERVO2, pulse_width_us(tilt))?;
        Ok(())
    }
}

/// Maps -90..=90 degrees onto the HAT's pulse range.
pub(crate) fn pulse_width_us(angle: i32) -> u16 {
    let angle = f64::from(angle.clamp(-90, 90)) + 90.0;
    let us = PULSE_MIN_US + (PULSE_MAX_US - PULSE_MIN_US) * angle / ANGLE_RANGE;
    math::round::half_up(us, 0) as u16
}
