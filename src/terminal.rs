use std::io::{Stdout, Write};
use std::sync::Arc;
use std::time::Duration;

use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::Print;
use crossterm::terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{execute, queue};
use tokio::sync::mpsc;
use tracing::warn;

use crate::angles::{AnglePair, AngleStore, Direction, Limits};
use crate::servo;

const REFRESH_INTERVAL: Duration = Duration::from_millis(100);
const KEY_POLL_INTERVAL: Duration = Duration::from_millis(50);
const PARKING_MESSAGE: &str = "PARKING SERVOS... PLEASE WAIT.";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Terminal I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to park servos: {0}")]
    Park(#[from] servo::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Move(Direction),
    Quit,
}

pub fn key_command(key: &KeyEvent) -> Option<Command> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    let command = match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Command::Quit,
        KeyCode::Char('q') | KeyCode::Char('Q') => Command::Quit,
        KeyCode::Char('w') | KeyCode::Up => Command::Move(Direction::Up),
        KeyCode::Char('s') | KeyCode::Down => Command::Move(Direction::Down),
        KeyCode::Char('a') | KeyCode::Left => Command::Move(Direction::Left),
        KeyCode::Char('d') | KeyCode::Right => Command::Move(Direction::Right),
        _ => return None,
    };
    Some(command)
}

fn bar(angle: i32, limits: Limits) -> String {
    "#".repeat((angle.saturating_sub(limits.min) / 10).max(0) as usize)
}

fn render(angles: AnglePair, limits: Limits, stream_url: Option<&str>, status: &str) -> Vec<String> {
    let mut lines = vec!["--- PI PAN-TILT CONTROL ---".to_owned()];
    if let Some(url) = stream_url {
        lines.push(format!("Camera Stream Running: {url}"));
    }
    lines.extend([
        "-".repeat(40),
        "Use WASD or ARROW KEYS to move".to_owned(),
        "Press 'q' to Quit and Park".to_owned(),
        String::new(),
        format!("PAN:  {:4}  [{}]", angles.pan, bar(angles.pan, limits)),
        format!("TILT: {:4}  [{}]", angles.tilt, bar(angles.tilt, limits)),
        String::new(),
        status.to_owned(),
    ]);
    lines
}

/// Raw mode plus alternate screen, undone on drop.
struct Screen {
    out: Stdout,
}

impl Screen {
    fn enter() -> std::io::Result<Self> {
        terminal::enable_raw_mode()?;
        let mut out = std::io::stdout();
        if let Err(e) = execute!(out, EnterAlternateScreen, Hide) {
            let _ = terminal::disable_raw_mode();
            return Err(e);
        }
        Ok(Screen { out })
    }

    fn draw(&mut self, lines: &[String]) -> std::io::Result<()> {
        queue!(self.out, Clear(ClearType::All))?;
        for (row, line) in lines.iter().enumerate() {
            queue!(self.out, MoveTo(0, row as u16), Print(line))?;
        }
        self.out.flush()
    }
}

impl Drop for Screen {
    fn drop(&mut self) {
        let _ = execute!(self.out, Show, LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
    }
}

/// Keyboard console. Returns after `q` once the servos are parked.
pub async fn run(store: Arc<AngleStore>, stream_url: Option<String>) -> Result<(), Error> {
    let (sender, mut commands) = mpsc::channel(16);
    let reader = tokio::task::spawn_blocking(move || read_keys(sender));

    let mut screen = Screen::enter()?;
    let mut refresh = tokio::time::interval(REFRESH_INTERVAL);
    let mut status = String::new();

    loop {
        let angles = store.current().await;
        screen.draw(&render(angles, store.limits(), stream_url.as_deref(), &status))?;

        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Move(direction)) => {
                    status = match store.move_direction(direction).await {
                        Ok(_) => String::new(),
                        Err(e) => {
                            warn!("Move {:?} failed: {}", direction, e);
                            format!("Servo error: {e}")
                        }
                    };
                }
                Some(Command::Quit) | None => break,
            },
            _ = refresh.tick() => {}
        }
    }

    let angles = store.current().await;
    screen.draw(&render(angles, store.limits(), stream_url.as_deref(), PARKING_MESSAGE))?;
    let parked = store.park().await;

    drop(commands);
    drop(screen);
    match reader.await {
        Ok(Err(e)) => warn!("Keyboard reader failed: {}", e),
        Err(e) => warn!("Keyboard reader panicked: {}", e),
        Ok(Ok(())) => {}
    }

    parked?;
    Ok(())
}

fn read_keys(sender: mpsc::Sender<Command>) -> std::io::Result<()> {
    while !sender.is_closed() {
        if !event::poll(KEY_POLL_INTERVAL)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if let Some(command) = key_command(&key) {
            if sender.blocking_send(command).is_err() || command == Command::Quit {
                break;
            }
        }
    }
    Ok(())
}
