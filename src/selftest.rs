use std::time::Duration;

use tracing::{info, warn};

use crate::angles::AngleStore;
use crate::camera::{self, Camera};
use crate::config::Config;
use crate::servo;
use crate::snapshot::Snapshots;

/// How far the wake-up wiggle swings the pan axis each way.
const WIGGLE: i32 = 30;

pub type Outcome = Result<String, String>;

/// Result of each stage of the hardware check.
#[derive(Debug)]
pub struct Report {
    pub camera: Outcome,
    pub servos: Outcome,
    pub photo: Outcome,
}

impl Report {
    pub fn passed(&self) -> bool {
        self.camera.is_ok() && self.servos.is_ok() && self.photo.is_ok()
    }

    pub fn lines(&self) -> Vec<String> {
        [
            ("Camera", &self.camera),
            ("Servo", &self.servos),
            ("Photo", &self.photo),
        ]
        .into_iter()
        .map(|(part, outcome)| match outcome {
            Ok(message) => format!("SUCCESS: {message}"),
            Err(e) => format!("FAIL: {part} error: {e}"),
        })
        .collect()
    }
}

/// Starts the camera, wiggles the pan axis and saves a test photo. Every
/// stage runs even if an earlier one failed, so one run reports on all the
/// hardware. `pause` is the settle time between servo moves.
pub async fn run(config: &Config, snapshots: &Snapshots, pause: Duration) -> Report {
    info!("Initializing camera");
    let camera = camera::init(&config.camera).await;

    info!("Testing pan/tilt servos");
    let servos = wiggle(config, pause).await;

    let photo = match &camera {
        Ok(camera) => take_photo(camera.as_ref(), snapshots).await,
        Err(_) => Err("camera did not start".to_owned()),
    };

    if let Ok(camera) = &camera {
        if let Err(e) = camera.stop().await {
            warn!("Failed to stop camera: {}", e);
        }
    }

    Report {
        camera: camera
            .map(|_| "Camera started.".to_owned())
            .map_err(|e| e.to_string()),
        servos,
        photo,
    }
}

async fn wiggle(config: &Config, pause: Duration) -> Outcome {
    let driver = servo::init(&config.servo).map_err(|e| e.to_string())?;
    let store = AngleStore::new(driver, &config.servo);

    let steps = async {
        store.apply_current().await?;
        tokio::time::sleep(pause * 2).await;
        info!("Moving left");
        store.move_by(-WIGGLE, 0).await?;
        tokio::time::sleep(pause).await;
        info!("Moving right");
        store.move_by(2 * WIGGLE, 0).await?;
        tokio::time::sleep(pause).await;
        info!("Centering");
        store.park().await
    };
    steps
        .await
        .map(|_| "Servos moved.".to_owned())
        .map_err(|e: servo::Error| e.to_string())
}

async fn take_photo(camera: &dyn Camera, snapshots: &Snapshots) -> Outcome {
    info!("Taking a test photo");
    let frame = camera.capture_jpeg().await.map_err(|e| e.to_string())?;
    let path = snapshots.save(&frame).await.map_err(|e| e.to_string())?;
    Ok(format!("Saved '{}'.", path.display()))
}
