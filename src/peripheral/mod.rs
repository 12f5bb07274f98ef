//! # Peripheral Module
//!
//! Per-peripheral state tracked by the supervisor, and the data sources
//! whose workers feed it.

pub mod gps;
pub mod temperature;

pub use gps::{spawn_gps_reader, GpsFix};
pub use temperature::{spawn_temperature_poller, TemperatureSensor};

use tracing::info;

use crate::worker::{Worker, WorkerHealth};

/// The devices whose availability the supervisor tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeripheralKind {
    CommandLink,
    Xbee,
    Gps,
    Camera,
    Temperature,
}

impl PeripheralKind {
    /// Name used in alerts and the status report
    pub fn display_name(self) -> &'static str {
        match self {
            PeripheralKind::CommandLink => "RFD",
            PeripheralKind::Xbee => "Xbee",
            PeripheralKind::Gps => "GPS",
            PeripheralKind::Camera => "Camera",
            PeripheralKind::Temperature => "Temp",
        }
    }

    /// Alert sent when the peripheral becomes available
    pub fn enabled_alert(self) -> String {
        format!("{} is now Enabled\n", self.display_name())
    }

    /// Alert sent when the peripheral is lost
    pub fn disabled_alert(self) -> String {
        format!("Alert: {} is now disabled\n", self.display_name())
    }
}

impl std::fmt::Display for PeripheralKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// One peripheral: its enabled flag, the resource it holds and its workers
///
/// A slot is only enabled through [`PeripheralSlot::enable`], which callers
/// reach after a successful acquisition probe.
#[derive(Debug)]
pub struct PeripheralSlot {
    kind: PeripheralKind,
    enabled: bool,
    resource: Option<String>,
    workers: Vec<Worker>,
    health: WorkerHealth,
}

impl PeripheralSlot {
    pub fn new(kind: PeripheralKind) -> Self {
        Self {
            kind,
            enabled: false,
            resource: None,
            workers: Vec::new(),
            health: WorkerHealth::new(),
        }
    }

    pub fn kind(&self) -> PeripheralKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Device path or sensor file currently held
    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// Health channels shared with this slot's workers
    pub fn health(&self) -> &WorkerHealth {
        &self.health
    }

    /// Fresh health channels for a new set of workers
    ///
    /// Anything the previous workers posted is discarded with the old
    /// channels.
    pub fn renew_health(&mut self) -> WorkerHealth {
        self.health = WorkerHealth::new();
        self.health.clone()
    }

    /// Mark the peripheral acquired
    pub fn enable(&mut self, resource: Option<String>, workers: Vec<Worker>) {
        info!(
            "{} enabled{}",
            self.kind,
            resource.as_deref().map(|r| format!(" on {}", r)).unwrap_or_default()
        );
        self.enabled = true;
        self.resource = resource;
        self.workers = workers;
    }

    /// Stop the workers, release the resource and mark the peripheral disabled
    ///
    /// Returns whether the slot was enabled before.
    pub async fn disable(&mut self) -> bool {
        for worker in self.workers.drain(..) {
            worker.stop().await;
        }
        self.resource = None;
        std::mem::replace(&mut self.enabled, false)
    }

    /// Whether every worker of an enabled slot has exited
    pub fn workers_finished(&self) -> bool {
        !self.workers.is_empty() && self.workers.iter().all(Worker::is_finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_alerts() {
        assert_eq!(PeripheralKind::Xbee.disabled_alert(), "Alert: Xbee is now disabled\n");
        assert_eq!(PeripheralKind::Gps.enabled_alert(), "GPS is now Enabled\n");
        assert_eq!(PeripheralKind::CommandLink.enabled_alert(), "RFD is now Enabled\n");
    }

    #[test]
    fn test_new_slot_is_disabled() {
        let slot = PeripheralSlot::new(PeripheralKind::Gps);
        assert!(!slot.is_enabled());
        assert!(slot.resource().is_none());
        assert!(!slot.workers_finished());
    }

    #[tokio::test]
    async fn test_disable_stops_workers_and_releases_resource() {
        let mut slot = PeripheralSlot::new(PeripheralKind::Xbee);
        let (near, mut far) = tokio::io::duplex(16);
        let health = slot.renew_health();
        let worker = crate::worker::spawn_line_reader("xbee-rx", near, health, |_| Ok(()));

        slot.enable(Some("/dev/ttyUSB1".to_string()), vec![worker]);
        assert!(slot.is_enabled());
        assert_eq!(slot.resource(), Some("/dev/ttyUSB1"));

        assert!(slot.disable().await);
        assert!(!slot.is_enabled());
        assert!(slot.resource().is_none());
        assert!(!slot.disable().await);

        use tokio::io::AsyncReadExt;
        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(1), far.read(&mut buf)).await.unwrap();
        assert_eq!(read.unwrap(), 0);
    }

    #[test]
    fn test_renew_health_discards_old_signals() {
        let mut slot = PeripheralSlot::new(PeripheralKind::Gps);
        slot.health().reset.request("gps dead");
        let fresh = slot.renew_health();
        assert!(!fresh.reset.is_requested());
        assert!(!slot.health().reset.is_requested());
    }
}
