//! Keyboard input and a one-line status display for interactive runs.

use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use flapbots_core::{Canceller, LatchedButton, LevelControl, Mode, WorldSnapshot};
use std::io::Write;
use std::thread;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const STATUS_INTERVAL: Duration = Duration::from_millis(200);

/// What a key press means for the running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Jump,
    Quit,
    /// Digit keys `1`..`9` pick a zero-based difficulty level.
    Level(usize),
    Ignore,
}

#[must_use]
pub fn classify_key(key: KeyEvent) -> KeyAction {
    if key.kind == KeyEventKind::Release {
        return KeyAction::Ignore;
    }
    match (key.code, key.modifiers) {
        (KeyCode::Esc, _)
        | (KeyCode::Char('q'), _)
        | (KeyCode::Char('Q'), _)
        | (KeyCode::Char('c'), KeyModifiers::CONTROL) => KeyAction::Quit,
        (KeyCode::Char(' '), _) | (KeyCode::Up, _) | (KeyCode::Enter, _) => KeyAction::Jump,
        (KeyCode::Char(digit @ '1'..='9'), _) => {
            KeyAction::Level(digit as usize - '1' as usize)
        }
        _ => KeyAction::Ignore,
    }
}

/// Raw-mode keyboard reader feeding a [`LatchedButton`].
///
/// Quit keys trip the shared canceller and digit keys request a level when
/// a [`LevelControl`] is attached. Raw mode is restored on drop.
pub struct TerminalInput {
    button: LatchedButton,
    handle: Option<thread::JoinHandle<()>>,
    canceller: Canceller,
}

impl TerminalInput {
    pub fn spawn(canceller: Canceller, levels: Option<LevelControl>) -> Result<Self> {
        enable_raw_mode().context("failed to enable raw mode")?;
        let button = LatchedButton::new();
        let worker_button = button.clone();
        let worker_cancel = canceller.clone();
        let handle = thread::Builder::new()
            .name("flapbots-terminal-input".into())
            .spawn(move || read_keys(&worker_button, &worker_cancel, levels.as_ref()))
            .context("failed to spawn terminal input thread")?;
        Ok(Self {
            button,
            handle: Some(handle),
            canceller,
        })
    }

    /// Input source to hand to an interactive decision.
    #[must_use]
    pub fn button(&self) -> LatchedButton {
        self.button.clone()
    }
}

fn read_keys(button: &LatchedButton, canceller: &Canceller, levels: Option<&LevelControl>) {
    while !canceller.is_cancelled() {
        match event::poll(POLL_INTERVAL) {
            Ok(false) => continue,
            Ok(true) => {}
            Err(err) => {
                warn!(error = %err, "terminal input unavailable");
                canceller.cancel();
                return;
            }
        }
        match event::read() {
            Ok(Event::Key(key)) => match classify_key(key) {
                KeyAction::Jump => button.press(),
                KeyAction::Quit => {
                    debug!("quit requested from keyboard");
                    canceller.cancel();
                }
                KeyAction::Level(level) => match levels.map(|control| control.request(level)) {
                    Some(Ok(())) => debug!(level, "level requested from keyboard"),
                    Some(Err(err)) => debug!(level, error = %err, "level request rejected"),
                    None => {}
                },
                KeyAction::Ignore => {}
            },
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "failed to read terminal event");
                canceller.cancel();
                return;
            }
        }
    }
}

impl Drop for TerminalInput {
    fn drop(&mut self) {
        self.canceller.cancel();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("terminal input thread panicked");
        }
        if let Err(err) = disable_raw_mode() {
            warn!(error = %err, "failed to restore terminal mode");
        }
    }
}

/// Single-line summary of a world snapshot.
#[must_use]
pub fn render_status(snapshot: &WorldSnapshot) -> String {
    let alive = snapshot.slots.iter().filter(|slot| slot.alive).count();
    let best_passes = snapshot
        .slots
        .iter()
        .map(|slot| slot.passes)
        .max()
        .unwrap_or(0);
    let mode = match snapshot.mode {
        Mode::Setup => "setup",
        Mode::Active => "active",
        Mode::Terminal => "done",
    };
    format!(
        "gen {:>4} | level {} | {:<6} | alive {:>3}/{:<3} | pipes {:>3} | tick {}",
        snapshot.generation,
        snapshot.level,
        mode,
        alive,
        snapshot.slots.len(),
        best_passes,
        snapshot.tick.0
    )
}

/// Redraw the status line on stderr until the controller goes away.
pub async fn watch_status(mut snapshots: watch::Receiver<WorldSnapshot>) {
    let mut stderr = std::io::stderr();
    loop {
        if snapshots.changed().await.is_err() {
            break;
        }
        let line = render_status(&snapshots.borrow_and_update());
        let _ = write!(stderr, "\r{line}\x1b[K");
        let _ = stderr.flush();
        tokio::time::sleep(STATUS_INTERVAL).await;
    }
    let _ = writeln!(stderr);
}

#[cfg(test)]
mod tests {
    use super::*;
    use flapbots_core::{CandidateId, SlotView, Tick};

    #[test]
    fn quit_jump_and_level_keys() {
        let esc = KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE);
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        let space = KeyEvent::new(KeyCode::Char(' '), KeyModifiers::NONE);
        let other = KeyEvent::new(KeyCode::Char('x'), KeyModifiers::NONE);
        let third = KeyEvent::new(KeyCode::Char('3'), KeyModifiers::NONE);
        let zero = KeyEvent::new(KeyCode::Char('0'), KeyModifiers::NONE);
        assert_eq!(classify_key(esc), KeyAction::Quit);
        assert_eq!(classify_key(ctrl_c), KeyAction::Quit);
        assert_eq!(classify_key(space), KeyAction::Jump);
        assert_eq!(classify_key(other), KeyAction::Ignore);
        assert_eq!(classify_key(third), KeyAction::Level(2));
        assert_eq!(classify_key(zero), KeyAction::Ignore);
    }

    #[test]
    fn status_line_counts_live_slots() {
        let slot = |index: usize, alive: bool, passes: u32| SlotView {
            index,
            candidate: Some(CandidateId(index as u64)),
            x: 0,
            y: 0,
            alive,
            jumps: 0,
            passes,
        };
        let snapshot = WorldSnapshot {
            tick: Tick(42),
            generation: 3,
            mode: Mode::Active,
            level: 1,
            scroll_x: 0,
            slots: vec![slot(0, true, 2), slot(1, false, 5)],
        };
        let line = render_status(&snapshot);
        assert!(line.contains("gen    3"));
        assert!(line.contains("alive   1/2"));
        assert!(line.contains("pipes   5"));
        assert!(line.contains("tick 42"));
    }
}
