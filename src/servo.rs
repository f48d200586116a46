use tracing::info;

use crate::config::ServoConfig;

#[cfg(feature = "servo")]
mod pantilt_hat;
mod test_servo;

#[cfg(feature = "servo")]
pub use pantilt_hat::PanTiltHat;
pub use test_servo::TestServo;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[cfg(not(feature = "servo"))]
    #[error("Servo feature is not enabled (rebuild with --features servo or run with --fake-servo)")]
    ServoNotEnabled,
    #[cfg(feature = "servo")]
    #[error("Failed to open servo control device {path}: {source}")]
    DeviceNotAvailable {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Error during communication with the servo device: {0}")]
    CommunicationFailure(#[from] std::io::Error),
}

/// Hardware that positions the pan/tilt mount.
///
/// Angles are already clamped by the caller. Implementations are expected to
/// return quickly; the angle store holds its lock while calling them.
pub trait ServoDriver: Send {
    fn set_angles(&mut self, pan: i32, tilt: i32) -> Result<(), Error>;
}

#[cfg(feature = "servo")]
pub fn init(config: &ServoConfig) -> Result<Box<dyn ServoDriver>, Error> {
    if config.fake {
        info!("Using test servo");
        return Ok(Box::new(TestServo::default()));
    }
    let hat = PanTiltHat::open(&config.i2c_device, config.i2c_address)?;
    Ok(Box::new(hat))
}

#[cfg(not(feature = "servo"))]
pub fn init(config: &ServoConfig) -> Result<Box<dyn ServoDriver>, Error> {
    if config.fake {
        info!("Using test servo");
        return Ok(Box::new(TestServo::default()));
    }
    Err(Error::ServoNotEnabled)
}
