//! Re-acquisition of disabled peripherals.
//!
//! Runs once per iteration. A probe that fails leaves the peripheral
//! disabled and releases whatever it opened, so the next iteration can try
//! again.

use bytes::Bytes;
use std::time::Duration;
use tokio::io::BufReader;
use tracing::{debug, info, warn};

use super::{CommandLink, LinkSupervisor};
use crate::error::Result;
use crate::peripheral::{spawn_gps_reader, spawn_temperature_poller, PeripheralKind, TemperatureSensor};
use crate::serial::discovery::probe_gps_signature;
use crate::serial::{BoxedStream, PortInfo};
use crate::worker::{spawn_line_reader, spawn_queue_writer, FramedQueue};

impl LinkSupervisor {
    /// Try to acquire every peripheral that is configured but disabled
    pub(super) async fn probe_disabled(&mut self) {
        if self.command.is_none() {
            self.acquire_command_link().await;
        }

        if self.config.camera.enabled && !self.camera_slot.is_enabled() {
            self.acquire_camera().await;
        }

        if self.config.temperature.enabled && !self.temperature.is_enabled() {
            self.acquire_temperature().await;
        }

        if self.config.xbee.enabled && !self.xbee.is_enabled() {
            self.acquire_xbee().await;
        }

        if self.config.gps.enabled && !self.gps.is_enabled() {
            self.acquire_gps().await;
        }
    }

    /// Device paths currently owned by a link or a worker
    fn paths_in_use(&self) -> Vec<&str> {
        self.command
            .as_ref()
            .map(CommandLink::path)
            .into_iter()
            .chain(self.xbee.resource())
            .chain(self.gps.resource())
            .collect()
    }

    /// Free ports reporting `usb_id`
    fn free_ports(&self, usb_id: (u16, u16)) -> Vec<String> {
        let ports = match self.backend.list_ports() {
            Ok(ports) => ports,
            Err(e) => {
                debug!("Port enumeration failed: {}", e);
                return Vec::new();
            }
        };

        let in_use = self.paths_in_use();
        ports
            .into_iter()
            .filter(|port| port.matches(usb_id))
            .map(|port: PortInfo| port.path)
            .filter(|path| !in_use.contains(&path.as_str()))
            .collect()
    }

    fn gps_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.config.gps.probe_timeout_ms)
    }

    async fn mark_enabled(&mut self, kind: PeripheralKind) {
        info!("{} acquired", kind);
        self.send_to_ground(kind.enabled_alert().as_bytes()).await;
    }

    // ---- command link ----------------------------------------------------

    async fn acquire_command_link(&mut self) {
        let config = &self.config.command_link;
        let (baud_rate, read_timeout) = (config.baud_rate, config.read_timeout());

        let candidates = match config.usb_id() {
            None => vec![config.port.clone()],
            Some(usb_id) => {
                let mut ports = self.free_ports(usb_id);
                if self.config.gps_shares_command_usb_id() {
                    ports = self.without_gps_receivers(ports, baud_rate).await;
                }
                ports
            }
        };

        for path in candidates {
            match self.backend.open_link(&path, baud_rate, read_timeout) {
                Ok(link) => {
                    self.command = Some(CommandLink::new(link, path));
                    self.mark_enabled(PeripheralKind::CommandLink).await;
                    return;
                }
                Err(e) => debug!("Command link not available on {}: {}", path, e),
            }
        }
    }

    /// Drop every port whose traffic looks like a GPS receiver
    ///
    /// Each probe stream is closed before the next port is opened.
    async fn without_gps_receivers(&self, ports: Vec<String>, baud_rate: u32) -> Vec<String> {
        let mut radios = Vec::new();
        for path in ports {
            let stream = match self.backend.open_stream(&path, baud_rate) {
                Ok(stream) => stream,
                Err(e) => {
                    debug!("Cannot probe {}: {}", path, e);
                    continue;
                }
            };

            if probe_gps_signature(&mut BufReader::new(stream), self.gps_probe_timeout()).await {
                debug!("{} is a GPS receiver", path);
            } else {
                radios.push(path);
            }
        }
        radios
    }

    // ---- camera ----------------------------------------------------------

    async fn acquire_camera(&mut self) {
        if self.camera.probe().await {
            self.camera_slot.enable(None, Vec::new());
            self.mark_enabled(PeripheralKind::Camera).await;
        }
    }

    // ---- temperature -----------------------------------------------------

    async fn acquire_temperature(&mut self) {
        let sensor = match TemperatureSensor::find(&self.config.temperature.device_dir) {
            Ok(sensor) if sensor.is_present() => sensor,
            Ok(sensor) => {
                debug!("Temperature sensor at {} not ready", sensor.path().display());
                return;
            }
            Err(e) => {
                debug!("Temperature sensor not found: {}", e);
                return;
            }
        };

        let interval = Duration::from_millis(self.config.temperature.poll_interval_ms);
        let health = self.temperature.renew_health();
        self.queues.temperatures.drain();
        let worker = spawn_temperature_poller(sensor.clone(), interval, self.queues.temperatures.clone(), health);

        let resource = sensor.path().display().to_string();
        self.temperature_sensor = Some(sensor);
        self.temperature.enable(Some(resource), vec![worker]);
        self.mark_enabled(PeripheralKind::Temperature).await;
    }

    // ---- xbee ------------------------------------------------------------

    async fn acquire_xbee(&mut self) {
        let config = &self.config.xbee;
        let candidates = match &config.port {
            Some(port) => vec![port.clone()],
            None => self.free_ports(config.usb_id()),
        };

        for path in candidates {
            match self.backend.open_stream(&path, self.config.xbee.baud_rate) {
                Ok(stream) => {
                    self.start_xbee(path, stream);
                    self.mark_enabled(PeripheralKind::Xbee).await;
                    return;
                }
                Err(e) => debug!("Xbee not available on {}: {}", path, e),
            }
        }
    }

    fn start_xbee(&mut self, path: String, stream: BoxedStream) {
        let health = self.xbee.renew_health();
        // Relay traffic queued for the previous link is stale
        self.queues.xbee_outbound.drain();

        let (reader, writer) = tokio::io::split(stream);
        let inbound = self.queues.xbee_inbound.clone();
        let rx = spawn_line_reader("xbee-rx", reader, health.clone(), move |line| {
            inbound.push(Bytes::copy_from_slice(line));
            Ok(())
        });
        let tx = spawn_queue_writer("xbee-tx", writer, self.queues.xbee_outbound.clone(), health);

        self.xbee.enable(Some(path), vec![rx, tx]);
    }

    // ---- gps -------------------------------------------------------------

    async fn acquire_gps(&mut self) {
        let shared = self.config.gps_shares_command_usb_id();
        let candidates = match &self.config.gps.port {
            Some(port) => vec![port.clone()],
            None => self.free_ports(self.config.gps.usb_id()),
        };

        for path in candidates {
            match self.open_gps(&path, shared).await {
                Ok(Some(stream)) => {
                    self.start_gps(path, stream);
                    self.mark_enabled(PeripheralKind::Gps).await;
                    return;
                }
                Ok(None) => debug!("{} is not a GPS receiver", path),
                Err(e) => debug!("GPS not available on {}: {}", path, e),
            }
        }
    }

    /// Open `path` and, when the id is ambiguous, confirm it carries NMEA
    ///
    /// A port that fails the check is closed before returning. The returned
    /// stream still holds what the check read ahead.
    async fn open_gps(&self, path: &str, ambiguous: bool) -> Result<Option<BoxedStream>> {
        let stream = self.backend.open_stream(path, self.config.gps.baud_rate)?;
        if !ambiguous {
            return Ok(Some(stream));
        }

        let mut reader = BufReader::new(stream);
        if !probe_gps_signature(&mut reader, self.gps_probe_timeout()).await {
            warn!("{} matches the GPS id but sent no NMEA", path);
            return Ok(None);
        }
        Ok(Some(Box::new(reader)))
    }

    fn start_gps(&mut self, path: String, stream: BoxedStream) {
        let health = self.gps.renew_health();
        let log = self.config.gps.log_fixes.then(|| self.storage.clone());
        let worker = spawn_gps_reader(stream, self.queues.gps_fixes.clone(), log, health);
        self.gps.enable(Some(path), vec![worker]);
    }
}
