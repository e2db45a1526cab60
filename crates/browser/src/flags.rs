use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::BrowserError;

#[derive(Debug, Default)]
struct FlagState {
    connected: AtomicBool,
    crashed: AtomicBool,
    closed: AtomicBool,
}

/// Liveness hooks shared between a backend and the session that owns it.
///
/// The backend flips these as it observes the browser; the session reads
/// them before every operation instead of probing the browser.
#[derive(Debug, Clone, Default)]
pub struct SessionFlags {
    state: Arc<FlagState>,
}

impl SessionFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh browser is up; clears crash and close markers.
    pub fn mark_connected(&self) {
        self.state.crashed.store(false, Ordering::SeqCst);
        self.state.closed.store(false, Ordering::SeqCst);
        self.state.connected.store(true, Ordering::SeqCst);
    }

    pub fn mark_disconnected(&self) {
        self.state.connected.store(false, Ordering::SeqCst);
    }

    pub fn mark_crashed(&self) {
        self.state.crashed.store(true, Ordering::SeqCst);
        self.state.connected.store(false, Ordering::SeqCst);
    }

    pub fn mark_closed(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    pub fn is_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn is_usable(&self) -> bool {
        self.is_connected() && !self.is_crashed() && !self.is_closed()
    }

    /// Updates the flags from an error returned by the driver.
    pub fn observe(&self, error: &BrowserError) {
        match error {
            BrowserError::Crashed(_) => self.mark_crashed(),
            BrowserError::SessionClosed(_) | BrowserError::NoSession => self.mark_closed(),
            BrowserError::Disconnected(_) => self.mark_disconnected(),
            BrowserError::Http(e) if e.is_connect() => self.mark_disconnected(),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_unusable() {
        let flags = SessionFlags::new();
        assert!(!flags.is_connected());
        assert!(!flags.is_usable());
    }

    #[test]
    fn test_clones_share_state() {
        let flags = SessionFlags::new();
        let hook = flags.clone();

        flags.mark_connected();
        assert!(hook.is_usable());

        hook.mark_crashed();
        assert!(flags.is_crashed());
        assert!(!flags.is_connected());
        assert!(!flags.is_usable());
    }

    #[test]
    fn test_reconnect_clears_markers() {
        let flags = SessionFlags::new();
        flags.mark_connected();
        flags.mark_closed();
        assert!(!flags.is_usable());

        flags.mark_connected();
        assert!(flags.is_usable());
    }

    #[test]
    fn test_observe_errors() {
        let flags = SessionFlags::new();
        flags.mark_connected();

        flags.observe(&BrowserError::ElementNotFound("#x".to_string()));
        assert!(flags.is_usable());

        flags.observe(&BrowserError::SessionClosed("gone".to_string()));
        assert!(flags.is_closed());
    }
}
