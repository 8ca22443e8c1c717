//! Push-to-talk keying.
//!
//! `PttController` is the single state machine both directions report into,
//! each holding the key independently. `ReceivePtt` adds the receive-side
//! rule: key up on the first remote frame and release once nobody has been
//! heard for a while.

use std::collections::BTreeSet;
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::Mutex;

use crate::error::BridgeError;
use crate::liveness::SpeakerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PttState {
    Idle,
    KeyedUp,
}

/// Runs one external keying command to completion.
pub trait ActionRunner: Send + Sync {
    fn run(&self, command: &str) -> Result<()>;
}

/// Runs commands through `sh -c`.
pub struct ShellRunner;

impl ActionRunner for ShellRunner {
    fn run(&self, command: &str) -> Result<()> {
        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .status()
            .map_err(|e| BridgeError::Action {
                command: command.to_string(),
                reason: format!("failed to spawn: {}", e),
            })?;
        if !status.success() {
            return Err(BridgeError::Action {
                command: command.to_string(),
                reason: status.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// The pair of commands fired on key up and key down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PttActions {
    pub on: String,
    pub off: String,
}

/// Which direction is holding the transmitter keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PttSource {
    Capture,
    Receive,
}

/// Keyed while at least one source holds it. The "on" command fires when
/// the first hold is taken and "off" when the last one is released.
pub struct PttController {
    actions: Option<PttActions>,
    runner: Box<dyn ActionRunner>,
    holders: Mutex<BTreeSet<PttSource>>,
}

impl PttController {
    pub fn new(actions: Option<PttActions>, runner: Box<dyn ActionRunner>) -> Self {
        Self {
            actions,
            runner,
            holders: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.actions.is_some()
    }

    pub fn state(&self) -> PttState {
        if self.holders.lock().is_empty() {
            PttState::Idle
        } else {
            PttState::KeyedUp
        }
    }

    /// Take a hold for `source`. Returns true if this keyed the transmitter.
    pub fn key_up(&self, source: PttSource) -> bool {
        // Commands run with the lock held so a key down can never overtake
        // the key up it follows.
        let mut holders = self.holders.lock();
        let was_idle = holders.is_empty();
        if !holders.insert(source) || !was_idle {
            return false;
        }
        self.fire(PttState::KeyedUp);
        true
    }

    /// Release the hold of `source`. Returns true if this unkeyed the
    /// transmitter.
    pub fn key_down(&self, source: PttSource) -> bool {
        let mut holders = self.holders.lock();
        if !holders.remove(&source) || !holders.is_empty() {
            return false;
        }
        self.fire(PttState::Idle);
        true
    }

    fn fire(&self, target: PttState) {
        let Some(actions) = &self.actions else {
            return;
        };
        let command = match target {
            PttState::KeyedUp => &actions.on,
            PttState::Idle => &actions.off,
        };
        log::info!("PTT {:?}: {}", target, command);
        if let Err(e) = self.runner.run(command) {
            log::warn!("{:#}", e);
        }
    }
}

/// Receive-side keying. Tracks the most recent remote speaker; any inbound
/// frame keeps the key held.
pub struct ReceivePtt {
    ptt: Arc<PttController>,
    window: Duration,
    tracked: Mutex<Option<(SpeakerId, Instant)>>,
}

impl ReceivePtt {
    pub fn new(ptt: Arc<PttController>, window: Duration) -> Self {
        Self {
            ptt,
            window,
            tracked: Mutex::new(None),
        }
    }

    pub fn tracked(&self) -> Option<SpeakerId> {
        (*self.tracked.lock()).map(|(speaker, _)| speaker)
    }

    /// Called for every inbound frame.
    pub fn observe(&self, speaker: SpeakerId, now: Instant) {
        let mut tracked = self.tracked.lock();
        if let Some((_, seen)) = *tracked {
            if now.saturating_duration_since(seen) >= self.window {
                *tracked = None;
                self.ptt.key_down(PttSource::Receive);
            }
        }
        match *tracked {
            Some((id, _)) if id == speaker => {}
            Some((id, _)) => log::debug!("PTT handed from speaker {} to {}", id, speaker),
            None => {
                log::debug!("PTT tracking speaker {}", speaker);
                self.ptt.key_up(PttSource::Receive);
            }
        }
        *tracked = Some((speaker, now));
    }

    /// Release once nothing has been heard for the window. Returns true if
    /// it did.
    pub fn tick(&self, now: Instant) -> bool {
        let mut tracked = self.tracked.lock();
        match *tracked {
            Some((speaker, seen)) if now.saturating_duration_since(seen) >= self.window => {
                log::debug!("PTT speaker {} went quiet", speaker);
                *tracked = None;
                self.ptt.key_down(PttSource::Receive);
                true
            }
            _ => false,
        }
    }

    /// Housekeeping loop: tick every `interval` until `running` clears, then
    /// make sure the receive hold is released.
    pub fn run(&self, interval: Duration, running: &AtomicBool) -> Result<()> {
        log::info!("PTT housekeeping started, window={:?}", self.window);
        while running.load(Ordering::Relaxed) {
            self.tick(Instant::now());
            thread::sleep(interval);
        }
        if let Some(speaker) = self.tracked() {
            log::debug!("Releasing PTT held for speaker {}", speaker);
        }
        self.tracked.lock().take();
        self.ptt.key_down(PttSource::Receive);
        log::info!("PTT housekeeping stopped");
        Ok(())
    }
}
