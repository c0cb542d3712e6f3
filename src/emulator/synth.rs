//! Platform key synthesis

use std::sync::Arc;

use super::{EmulateError, KeySynthesizer};

/// Posts keyboard events through CoreGraphics at the HID level
///
/// A fresh event source is created per event; `CGEventSource` is not
/// `Send`, and replays hop between runtime threads across their sleeps.
#[cfg(target_os = "macos")]
#[derive(Debug, Default)]
pub struct CoreGraphicsSynthesizer;

#[cfg(target_os = "macos")]
impl KeySynthesizer for CoreGraphicsSynthesizer {
    fn send(
        &self,
        code: crate::events::KeyCode,
        direction: super::KeyDirection,
    ) -> Result<(), EmulateError> {
        use core_graphics::event::{CGEvent, CGEventTapLocation, CGKeyCode};
        use core_graphics::event_source::{CGEventSource, CGEventSourceStateID};

        let source = CGEventSource::new(CGEventSourceStateID::HIDSystemState)
            .map_err(|_| EmulateError::Synthesis("failed to create event source".into()))?;

        let key_down = direction == super::KeyDirection::Down;
        let event = CGEvent::new_keyboard_event(source, code.0 as CGKeyCode, key_down)
            .map_err(|_| EmulateError::Synthesis(format!("failed to create event for {code}")))?;

        event.post(CGEventTapLocation::HID);
        tracing::trace!(%code, ?direction, "key event posted");
        Ok(())
    }
}

/// The synthesizer for the current platform
#[cfg(target_os = "macos")]
pub fn platform_synthesizer() -> Result<Arc<dyn KeySynthesizer>, EmulateError> {
    Ok(Arc::new(CoreGraphicsSynthesizer))
}

#[cfg(not(target_os = "macos"))]
pub fn platform_synthesizer() -> Result<Arc<dyn KeySynthesizer>, EmulateError> {
    Err(EmulateError::Unsupported)
}

#[cfg(all(test, not(target_os = "macos")))]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_off_macos() {
        assert!(matches!(platform_synthesizer(), Err(EmulateError::Unsupported)));
    }
}
