// ── Pairing status board ──
//
// One status record per device of a batch, shared by every concurrent
// attempt. Updates are synchronous closures applied under the channel's
// lock, so no lock is held across a network wait. Renderers take
// snapshots or subscribe for changes.

use std::fmt;

use secrecy::SecretString;
use tokio::sync::watch;

use super::DiscoveredDevice;
use crate::device::DeviceType;

/// Progress of one device through the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingPhase {
    Initializing,
    Waiting { attempt: u32 },
    Paired,
    Failed { reason: String },
}

/// Status record of one device.
#[derive(Debug, Clone)]
pub struct DeviceStatus {
    pub host: String,
    pub device_type: DeviceType,
    pub phase: PairingPhase,
    /// Last attempt number reported (0 before the first request).
    pub attempt: u32,
    pub max_attempts: u32,
    pub token: Option<SecretString>,
}

impl DeviceStatus {
    fn new(device: &DiscoveredDevice, max_attempts: u32) -> Self {
        Self {
            host: device.host.clone(),
            device_type: device.device_type,
            phase: PairingPhase::Initializing,
            attempt: 0,
            max_attempts,
            token: None,
        }
    }

    /// `true` once the device is paired or failed.
    pub fn is_finished(&self) -> bool {
        matches!(self.phase, PairingPhase::Paired | PairingPhase::Failed { .. })
    }

    /// Human status line, e.g. `waiting for button press (attempt 3/36)...`.
    pub fn status_line(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.phase {
            PairingPhase::Initializing => f.write_str("initializing..."),
            PairingPhase::Waiting { attempt } => write!(
                f,
                "waiting for button press (attempt {attempt}/{})...",
                self.max_attempts
            ),
            PairingPhase::Paired => f.write_str("paired"),
            PairingPhase::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// Shared, observable status table of a pairing batch.
#[derive(Debug)]
pub struct PairingBoard {
    entries: watch::Sender<Vec<DeviceStatus>>,
}

impl PairingBoard {
    pub fn new(devices: &[DiscoveredDevice], max_attempts: u32) -> Self {
        let entries = devices
            .iter()
            .map(|d| DeviceStatus::new(d, max_attempts))
            .collect();
        let (entries, _) = watch::channel(entries);
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Copy of every status record, in batch order.
    pub fn snapshot(&self) -> Vec<DeviceStatus> {
        self.entries.borrow().clone()
    }

    /// Receiver woken on every status change.
    pub fn subscribe(&self) -> watch::Receiver<Vec<DeviceStatus>> {
        self.entries.subscribe()
    }

    pub(crate) fn record_attempt(&self, index: usize, attempt: u32) {
        self.update(index, |s| {
            s.attempt = attempt;
            s.phase = PairingPhase::Waiting { attempt };
        });
    }

    pub(crate) fn record_paired(&self, index: usize, token: SecretString) {
        self.update(index, |s| {
            s.phase = PairingPhase::Paired;
            s.token = Some(token);
        });
    }

    pub(crate) fn record_failed(&self, index: usize, reason: String) {
        self.update(index, |s| s.phase = PairingPhase::Failed { reason });
    }

    fn update(&self, index: usize, f: impl FnOnce(&mut DeviceStatus)) {
        self.entries.send_modify(|entries| {
            if let Some(status) = entries.get_mut(index) {
                f(status);
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn device(host: &str) -> DiscoveredDevice {
        DiscoveredDevice {
            host: host.into(),
            device_type: DeviceType::KwhMeter,
            instance: format!("kwh-{host}"),
            serial: String::new(),
        }
    }

    #[test]
    fn status_lines() {
        let board = PairingBoard::new(&[device("a"), device("b"), device("c")], 36);
        assert_eq!(board.len(), 3);
        assert_eq!(board.snapshot()[0].status_line(), "initializing...");

        board.record_attempt(0, 3);
        board.record_paired(1, SecretString::from("tok".to_string()));
        board.record_failed(2, "HTTP 500".into());

        let snap = board.snapshot();
        assert_eq!(snap[0].status_line(), "waiting for button press (attempt 3/36)...");
        assert_eq!(snap[0].attempt, 3);
        assert!(!snap[0].is_finished());
        assert_eq!(snap[1].phase, PairingPhase::Paired);
        assert!(snap[1].token.is_some());
        assert_eq!(snap[2].status_line(), "failed: HTTP 500");
        assert!(snap[2].is_finished());
    }

    #[test]
    fn out_of_range_update_is_ignored() {
        let board = PairingBoard::new(&[device("a")], 36);
        board.record_attempt(5, 1);
        assert_eq!(board.snapshot()[0].phase, PairingPhase::Initializing);
    }

    #[tokio::test]
    async fn subscribers_see_updates() {
        let board = PairingBoard::new(&[device("a")], 36);
        let mut rx = board.subscribe();

        board.record_attempt(0, 1);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow()[0].phase, PairingPhase::Waiting { attempt: 1 });
    }
}
