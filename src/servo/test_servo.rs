use std::sync::{Arc, Mutex};

use tracing::debug;

use super::{Error, ServoDriver};

pub type History = Arc<Mutex<Vec<(i32, i32)>>>;

/// Servo stand-in that only logs, optionally recording every applied pair.
#[derive(Default)]
pub struct TestServo {
    history: Option<History>,
    fail_after: Option<usize>,
    applied: usize,
}

impl TestServo {
    #[cfg(test)]
    pub fn recording(history: History) -> Self {
        TestServo {
            history: Some(history),
            ..Default::default()
        }
    }

    /// Accepts `count` pairs, then reports a communication failure.
    #[cfg(test)]
    pub fn fail_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }
}

impl ServoDriver for TestServo {
    fn set_angles(&mut self, pan: i32, tilt: i32) -> Result<(), Error> {
        if self.fail_after.is_some_and(|limit| self.applied >= limit) {
            return Err(Error::CommunicationFailure(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "test servo stopped responding",
            )));
        }
        self.applied += 1;

        debug!(pan, tilt, "Rotating test servo");
        if let Some(history) = &self.history {
            if let Ok(mut history) = history.lock() {
                history.push((pan, tilt));
            }
        }
        Ok(())
    }
}
