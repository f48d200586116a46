use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::ServoConfig;
use crate::servo::{self, ServoDriver};

/// Pan/tilt position of the mount, in degrees.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AnglePair {
    pub pan: i32,
    pub tilt: i32,
}

/// Closed interval both axes are confined to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub min: i32,
    pub max: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown direction '{0}', expected up, down, left or right")]
pub struct UnknownDirection(pub String);

impl AnglePair {
    pub const CENTER: AnglePair = AnglePair { pan: 0, tilt: 0 };

    pub fn new(pan: i32, tilt: i32) -> Self {
        AnglePair { pan, tilt }
    }

    pub fn is_centered(&self) -> bool {
        *self == Self::CENTER
    }

    fn offset(self, delta_pan: i32, delta_tilt: i32) -> Self {
        AnglePair {
            pan: self.pan.saturating_add(delta_pan),
            tilt: self.tilt.saturating_add(delta_tilt),
        }
    }

    /// One degree closer to center on each axis that is not there yet.
    fn toward_center(self) -> Self {
        AnglePair {
            pan: self.pan - self.pan.signum(),
            tilt: self.tilt - self.tilt.signum(),
        }
    }
}

impl Limits {
    pub fn clamp(&self, value: i32) -> i32 {
        value.max(self.min).min(self.max)
    }

    pub fn clamp_pair(&self, pair: AnglePair) -> AnglePair {
        AnglePair {
            pan: self.clamp(pair.pan),
            tilt: self.clamp(pair.tilt),
        }
    }
}

impl Direction {
    /// Pan and tilt deltas for one step, before any axis inversion.
    pub fn deltas(self, step: i32) -> (i32, i32) {
        match self {
            Direction::Up => (0, -step),
            Direction::Down => (0, step),
            Direction::Left => (-step, 0),
            Direction::Right => (step, 0),
        }
    }
}

impl FromStr for Direction {
    type Err = UnknownDirection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            other => Err(UnknownDirection(other.to_owned())),
        }
    }
}

struct State {
    current: AnglePair,
    driver: Box<dyn ServoDriver>,
}

/// Current mount position together with the driver that realizes it.
///
/// Every mutation runs under one lock: the new pair is computed, pushed to the
/// driver and committed without any other caller interleaving. The pair is
/// only committed once the driver has accepted it.
pub struct AngleStore {
    state: Mutex<State>,
    limits: Limits,
    step: i32,
    invert_pan: bool,
    invert_tilt: bool,
    park_tick: Duration,
}

impl AngleStore {
    pub fn new(driver: Box<dyn ServoDriver>, config: &ServoConfig) -> Self {
        AngleStore {
            state: Mutex::new(State {
                current: AnglePair::CENTER,
                driver,
            }),
            limits: config.limits(),
            step: config.step,
            invert_pan: config.invert_pan,
            invert_tilt: config.invert_tilt,
            park_tick: config.park_tick(),
        }
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub async fn current(&self) -> AnglePair {
        self.state.lock().await.current
    }

    /// Pushes the current pair to the driver again. Used at startup to center
    /// the mount and to find out early whether the hardware answers.
    pub async fn apply_current(&self) -> Result<AnglePair, servo::Error> {
        let mut state = self.state.lock().await;
        let current = state.current;
        state.driver.set_angles(current.pan, current.tilt)?;
        Ok(current)
    }

    pub async fn move_by(&self, delta_pan: i32, delta_tilt: i32) -> Result<AnglePair, servo::Error> {
        let mut state = self.state.lock().await;
        let target = self
            .limits
            .clamp_pair(state.current.offset(delta_pan, delta_tilt));
        state.driver.set_angles(target.pan, target.tilt)?;
        state.current = target;
        debug!(pan = target.pan, tilt = target.tilt, "Moved");
        Ok(target)
    }

    pub async fn move_direction(&self, direction: Direction) -> Result<AnglePair, servo::Error> {
        let (mut delta_pan, mut delta_tilt) = direction.deltas(self.step);
        if self.invert_pan {
            delta_pan = -delta_pan;
        }
        if self.invert_tilt {
            delta_tilt = -delta_tilt;
        }
        self.move_by(delta_pan, delta_tilt).await
    }

    /// Walks both axes back to center one degree per tick.
    ///
    /// The lock is held for the whole walk, so moves issued meanwhile wait and
    /// are applied from (0, 0) afterwards. If the driver fails part way, the
    /// last accepted pair stays committed.
    pub async fn park(&self) -> Result<AnglePair, servo::Error> {
        let mut state = self.state.lock().await;
        if !state.current.is_centered() {
            info!(pan = state.current.pan, tilt = state.current.tilt, "Parking servos");
        }

        while !state.current.is_centered() {
            let next = state.current.toward_center();
            state.driver.set_angles(next.pan, next.tilt)?;
            state.current = next;
            if !next.is_centered() {
                tokio::time::sleep(self.park_tick).await;
            }
        }
        Ok(state.current)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::servo::TestServo;

    fn store_with(config: ServoConfig) -> (AngleStore, Arc<Mutex<Vec<(i32, i32)>>>) {
        let history = Arc::new(Mutex::new(Vec::new()));
        let driver = TestServo::recording(history.clone());
        (AngleStore::new(Box::new(driver), &config), history)
    }

    fn store() -> (AngleStore, Arc<Mutex<Vec<(i32, i32)>>>) {
        store_with(ServoConfig::default())
    }

    #[tokio::test]
    async fn repeated_moves_stay_within_limits() {
        let (store, _) = store();
        for _ in 0..40 {
            store.move_direction(Direction::Left).await.unwrap();
        }
        assert_eq!(store.current().await, AnglePair::new(-90, 0));

        for _ in 0..100 {
            store.move_direction(Direction::Down).await.unwrap();
        }
        assert_eq!(store.current().await, AnglePair::new(-90, 90));
    }

    #[tokio::test]
    async fn extreme_deltas_are_clamped() {
        let (store, history) = store();
        let pair = store.move_by(i32::MAX, i32::MIN).await.unwrap();
        assert_eq!(pair, AnglePair::new(90, -90));
        let pair = store.move_by(i32::MAX, i32::MIN).await.unwrap();
        assert_eq!(pair, AnglePair::new(90, -90));
        assert_eq!(*history.lock().unwrap(), vec![(90, -90), (90, -90)]);
    }

    #[tokio::test]
    async fn opposite_steps_cancel() {
        let (store, _) = store();
        store.move_by(5, 0).await.unwrap();
        let pair = store.move_by(-5, 0).await.unwrap();
        assert_eq!(pair, AnglePair::CENTER);
    }

    #[tokio::test]
    async fn directions_follow_step_and_inversion() {
        let (store, _) = store_with(ServoConfig {
            step: 2,
            invert_pan: true,
            ..Default::default()
        });
        store.move_direction(Direction::Left).await.unwrap();
        store.move_direction(Direction::Up).await.unwrap();
        assert_eq!(store.current().await, AnglePair::new(2, -2));
    }

    #[tokio::test]
    async fn rejected_move_keeps_previous_pair() {
        let driver = TestServo::default().fail_after(1);
        let store = AngleStore::new(Box::new(driver), &ServoConfig::default());
        store.move_by(10, 10).await.unwrap();
        assert!(store.move_by(10, 10).await.is_err());
        assert_eq!(store.current().await, AnglePair::new(10, 10));
    }

    #[tokio::test(start_paused = true)]
    async fn park_steps_one_degree_per_tick() {
        let (store, history) = store();
        store.move_by(3, -5).await.unwrap();
        history.lock().unwrap().clear();

        let start = tokio::time::Instant::now();
        let pair = store.park().await.unwrap();
        assert_eq!(pair, AnglePair::CENTER);
        assert_eq!(
            *history.lock().unwrap(),
            vec![(2, -4), (1, -3), (0, -2), (0, -1), (0, 0)]
        );
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(4 * 20), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(5 * 20), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn park_after_up_takes_at_most_five_ticks() {
        let (store, history) = store();
        store.move_direction(Direction::Up).await.unwrap();
        assert_eq!(store.current().await, AnglePair::new(0, -5));
        history.lock().unwrap().clear();

        store.park().await.unwrap();
        assert!(history.lock().unwrap().len() <= 5);
        assert_eq!(store.current().await, AnglePair::CENTER);
    }

    #[tokio::test(start_paused = true)]
    async fn park_from_limits_reaches_center() {
        let (store, _) = store();
        store.move_by(90, -90).await.unwrap();
        assert_eq!(store.park().await.unwrap(), AnglePair::CENTER);
        assert_eq!(store.park().await.unwrap(), AnglePair::CENTER);
    }

    #[tokio::test(start_paused = true)]
    async fn moves_wait_for_park_to_finish() {
        let (store, _) = store();
        let store = Arc::new(store);
        store.move_by(10, 0).await.unwrap();

        let parking = tokio::spawn({
            let store = store.clone();
            async move { store.park().await }
        });
        tokio::task::yield_now().await;
        let pair = store.move_by(0, 5).await.unwrap();

        assert_eq!(pair, AnglePair::new(0, 5));
        assert_eq!(parking.await.unwrap().unwrap(), AnglePair::CENTER);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_moves_are_not_lost() {
        let (store, _) = store_with(ServoConfig {
            min_angle: -1000,
            max_angle: 1000,
            ..Default::default()
        });
        let store = Arc::new(store);

        let tasks: Vec<_> = (0..100)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let delta = if i % 2 == 0 { 3 } else { -1 };
                    store.move_by(delta, 1).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.current().await, AnglePair::new(50 * 3 - 50, 100));
    }

    #[test]
    fn parses_directions() {
        assert_eq!("left".parse::<Direction>().unwrap(), Direction::Left);
        assert_eq!("down".parse::<Direction>().unwrap(), Direction::Down);
        assert!("LEFT".parse::<Direction>().is_err());
        assert!("".parse::<Direction>().is_err());
    }
}
