use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::angles::Limits;
use crate::fs::Fs;

/// Furthest a configured angle limit may lie from center, in degrees.
const MAX_TRAVEL: i32 = 180;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Angle limits [{min}, {max}] must contain 0 and stay within ±180")]
    InvalidLimits { min: i32, max: i32 },
    #[error("Step must be positive, got {0}")]
    InvalidStep(i32),
    #[error("Park tick must be non-zero")]
    InvalidParkTick,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub display_name: String,
    pub servo: ServoConfig,
    pub camera: CameraConfig,
    pub http: HttpConfig,
    pub snapshots: SnapshotConfig,
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServoConfig {
    /// Degrees moved per key press or `/api/move` call.
    pub step: i32,
    pub min_angle: i32,
    pub max_angle: i32,
    pub park_tick_ms: u64,
    pub invert_pan: bool,
    pub invert_tilt: bool,
    pub i2c_device: PathBuf,
    pub i2c_address: u16,
    pub fake: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CameraConfig {
    pub command: String,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    /// Pause between two parts of an MJPEG stream.
    pub frame_interval_ms: u64,
    pub capture_timeout_ms: u64,
    pub fake: bool,
    pub fake_frame: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    pub bind: SocketAddr,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SnapshotConfig {
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

/// Command line values that take precedence over the config file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub bind: Option<SocketAddr>,
    pub step: Option<i32>,
    pub fake_camera: bool,
    pub fake_servo: bool,
    pub snapshot_dir: Option<PathBuf>,
}

impl Config {
    /// Reads `path`, or the XDG config file when no path is given. A missing
    /// XDG file yields the defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>, fs: &Fs) -> Result<Self, Error> {
        match path.map(Path::to_path_buf).or_else(|| fs.config_file()) {
            Some(path) => {
                let text = std::fs::read_to_string(&path).map_err(|source| Error::Read {
                    path: path.clone(),
                    source,
                })?;
                Self::parse(&text).map_err(|source| Error::Parse { path, source })
            }
            None => Ok(Config::default()),
        }
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Result<Self, Error> {
        if let Some(bind) = overrides.bind {
            self.http.bind = bind;
        }
        if let Some(step) = overrides.step {
            self.servo.step = step;
        }
        if let Some(dir) = overrides.snapshot_dir {
            self.snapshots.dir = Some(dir);
        }
        self.camera.fake |= overrides.fake_camera;
        self.servo.fake |= overrides.fake_servo;

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.servo.validate()
    }
}

impl ServoConfig {
    pub fn limits(&self) -> Limits {
        Limits {
            min: self.min_angle,
            max: self.max_angle,
        }
    }

    pub fn park_tick(&self) -> Duration {
        Duration::from_millis(self.park_tick_ms)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.min_angle > 0
            || self.max_angle < 0
            || self.min_angle < -MAX_TRAVEL
            || self.max_angle > MAX_TRAVEL
        {
            return Err(Error::InvalidLimits {
                min: self.min_angle,
                max: self.max_angle,
            });
        }
        if self.step <= 0 {
            return Err(Error::InvalidStep(self.step));
        }
        if self.park_tick_ms == 0 {
            return Err(Error::InvalidParkTick);
        }
        Ok(())
    }
}

impl CameraConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            display_name: "My Raspberry".into(),
            servo: ServoConfig::default(),
            camera: CameraConfig::default(),
            http: HttpConfig::default(),
            snapshots: SnapshotConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl Default for ServoConfig {
    fn default() -> Self {
        ServoConfig {
            step: 5,
            min_angle: -90,
            max_angle: 90,
            park_tick_ms: 20,
            invert_pan: false,
            invert_tilt: false,
            i2c_device: PathBuf::from("/dev/i2c-1"),
            i2c_address: 0x15,
            fake: false,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        CameraConfig {
            command: "rpicam-vid".into(),
            width: 1280,
            height: 720,
            framerate: 20,
            frame_interval_ms: 50,
            capture_timeout_ms: 2000,
            fake: false,
            fake_frame: None,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            bind: SocketAddr::from(([0, 0, 0, 0], 5000)),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig {
            enabled: false,
            interval_secs: 3,
        }
    }
}
