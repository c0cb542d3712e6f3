//! Key emulator
//!
//! Replays a named key combination into whichever application has focus.
//! Modifiers go down first in the order given, each normal key is tapped,
//! then the modifiers come up in reverse. Two identical modifier names mean
//! a double tap of that modifier.
//!
//! Calls are fire-and-forget: each replay runs as its own task, unordered
//! relative to other replays and to the hook thread.

mod synth;

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::events::KeyCode;
use crate::hotkey::keys::{self, KeySpec};

pub use synth::platform_synthesizer;
#[cfg(target_os = "macos")]
pub use synth::CoreGraphicsSynthesizer;

/// Gap between the two taps of a double-tapped modifier
pub const DOUBLE_TAP_GAP: Duration = Duration::from_millis(50);

/// Errors that can occur during key emulation
#[derive(Debug, thiserror::Error)]
pub enum EmulateError {
    #[error("no keys to emulate")]
    EmptySequence,

    #[error("unknown key name: {0}")]
    UnknownKey(String),

    #[error("failed to synthesize key event: {0}")]
    Synthesis(String),

    #[error("key emulation needs a tokio runtime")]
    NoRuntime,

    #[error("key synthesis is not supported on this platform")]
    Unsupported,
}

/// Direction of a synthesized key event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDirection {
    Down,
    Up,
}

/// Injects single key events into the OS input stream
pub trait KeySynthesizer: Send + Sync {
    fn send(&self, code: KeyCode, direction: KeyDirection) -> Result<(), EmulateError>;
}

/// Resolved key sequence, ready to replay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPlan {
    /// Press and release one modifier twice
    DoubleTap(KeyCode),
    /// Hold `modifiers`, tap each of `keys`, release `modifiers`
    Combination {
        modifiers: Vec<KeyCode>,
        keys: Vec<KeyCode>,
    },
}

impl KeyPlan {
    /// Resolve key names. Any unknown name rejects the whole sequence.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, EmulateError> {
        if names.is_empty() {
            return Err(EmulateError::EmptySequence);
        }

        let specs = names
            .iter()
            .map(|name| {
                keys::lookup(name.as_ref())
                    .ok_or_else(|| EmulateError::UnknownKey(name.as_ref().to_string()))
            })
            .collect::<Result<Vec<&KeySpec>, _>>()?;

        if let [first, second] = specs.as_slice() {
            if first.is_modifier() && first.name == second.name {
                return Ok(KeyPlan::DoubleTap(first.code));
            }
        }

        let (modifiers, normal): (Vec<&KeySpec>, Vec<&KeySpec>) =
            specs.into_iter().partition(|spec| spec.is_modifier());
        Ok(KeyPlan::Combination {
            modifiers: modifiers.into_iter().map(|spec| spec.code).collect(),
            keys: normal.into_iter().map(|spec| spec.code).collect(),
        })
    }
}

/// Modifiers currently held down by a replay
///
/// Anything still held when the guard drops is released in reverse order,
/// so a failed replay does not leave modifiers stuck.
struct HeldModifiers<'a> {
    synth: &'a dyn KeySynthesizer,
    held: Vec<KeyCode>,
}

impl<'a> HeldModifiers<'a> {
    fn new(synth: &'a dyn KeySynthesizer) -> Self {
        Self {
            synth,
            held: Vec::new(),
        }
    }

    fn press(&mut self, code: KeyCode) -> Result<(), EmulateError> {
        self.synth.send(code, KeyDirection::Down)?;
        self.held.push(code);
        Ok(())
    }

    fn release_all(&mut self) -> Result<(), EmulateError> {
        while let Some(code) = self.held.pop() {
            self.synth.send(code, KeyDirection::Up)?;
        }
        Ok(())
    }
}

impl Drop for HeldModifiers<'_> {
    fn drop(&mut self) {
        while let Some(code) = self.held.pop() {
            if let Err(e) = self.synth.send(code, KeyDirection::Up) {
                warn!(%code, error = %e, "failed to release modifier");
            }
        }
    }
}

fn tap(synth: &dyn KeySynthesizer, code: KeyCode) -> Result<(), EmulateError> {
    synth.send(code, KeyDirection::Down)?;
    synth.send(code, KeyDirection::Up)
}

async fn replay(
    synth: &dyn KeySynthesizer,
    plan: &KeyPlan,
    double_tap_gap: Duration,
) -> Result<(), EmulateError> {
    match plan {
        KeyPlan::DoubleTap(code) => {
            let mut first = HeldModifiers::new(synth);
            first.press(*code)?;
            first.release_all()?;

            tokio::time::sleep(double_tap_gap).await;

            let mut second = HeldModifiers::new(synth);
            second.press(*code)?;
            second.release_all()
        }
        KeyPlan::Combination { modifiers, keys } => {
            let mut held = HeldModifiers::new(synth);
            for &code in modifiers {
                held.press(code)?;
            }
            for &code in keys {
                tap(synth, code)?;
            }
            held.release_all()
        }
    }
}

/// Replays key combinations on the tokio runtime
#[derive(Clone)]
pub struct KeyEmulator {
    synth: Arc<dyn KeySynthesizer>,
    double_tap_gap: Duration,
    runtime: Handle,
}

impl KeyEmulator {
    /// Create an emulator bound to the current tokio runtime
    pub fn new(synth: Arc<dyn KeySynthesizer>) -> Result<Self, EmulateError> {
        let runtime = Handle::try_current().map_err(|_| EmulateError::NoRuntime)?;
        Ok(Self::with_runtime(synth, runtime))
    }

    pub fn with_runtime(synth: Arc<dyn KeySynthesizer>, runtime: Handle) -> Self {
        Self {
            synth,
            double_tap_gap: DOUBLE_TAP_GAP,
            runtime,
        }
    }

    pub fn with_double_tap_gap(mut self, gap: Duration) -> Self {
        self.double_tap_gap = gap;
        self
    }

    /// Replay `key_names` after `delay_millis`, without waiting for it
    ///
    /// Safe to call from any thread. Failures are logged, never returned.
    pub fn emulate_keys_async<S: AsRef<str>>(&self, key_names: &[S], delay_millis: u64) {
        let names: Vec<String> = key_names.iter().map(|n| n.as_ref().to_string()).collect();
        let emulator = self.clone();

        self.runtime.spawn(async move {
            let delay = Duration::from_millis(delay_millis);
            if let Err(e) = emulator.emulate_keys(&names, delay).await {
                warn!(keys = ?names, error = %e, "key emulation failed");
            }
        });
    }

    /// Replay `key_names` after `delay` and wait for completion
    pub async fn emulate_keys<S: AsRef<str>>(
        &self,
        key_names: &[S],
        delay: Duration,
    ) -> Result<(), EmulateError> {
        let plan = KeyPlan::from_names(key_names)?;
        debug!(?plan, delay_ms = delay.as_millis() as u64, "key emulation scheduled");

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        replay(self.synth.as_ref(), &plan, self.double_tap_gap).await?;
        info!(?plan, "key emulation complete");
        Ok(())
    }
}
