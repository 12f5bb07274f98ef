//! # Link Supervisor
//!
//! The single control loop of the payload.
//!
//! Each iteration, in order:
//! 1. Read one command frame and dispatch or relay it
//! 2. Forward peripheral queues to the ground
//! 3. Health and reset checks
//! 4. Image capture scheduling
//! 5. Drain and log worker exceptions
//! 6. Flush the command link input
//! 7. Hot-plug probing for disabled peripherals
//!
//! Nothing a handler, worker or probe does ends the loop. Faults become a
//! disabled peripheral plus a log line.

pub mod handlers;
mod hotplug;

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::camera::capture::spawn_capture;
use crate::camera::{CameraSettings, CaptureOutcome, CaptureRequest, CaptureResult, ImageProducer};
use crate::config::Config;
use crate::link::{CommandFramer, FrameKind, FrameRead, TransferEngine};
use crate::peripheral::temperature;
use crate::peripheral::{GpsFix, PeripheralKind, PeripheralSlot, TemperatureSensor};
use crate::serial::{LinkIo, SerialBackend};
use crate::telemetry::MissionStorage;
use crate::worker::{FifoQueue, FramedQueue, LatestQueue, Worker};
use handlers::{DeviceStatus, HandlerContext, TemperatureStatus};

/// The command radio, owned by the supervisor
pub struct CommandLink {
    link: Box<dyn LinkIo>,
    path: String,
}

impl CommandLink {
    pub fn new(link: Box<dyn LinkIo>, path: impl Into<String>) -> Self {
        Self {
            link,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Capture bookkeeping
#[derive(Debug)]
struct CaptureState {
    settings: CameraSettings,
    image_number: u32,
    recent_image: Option<String>,
    next_capture: Instant,
    interval: Duration,
    in_flight: Option<Worker>,
    results: FifoQueue<CaptureResult>,
}

/// Queues shared with peripheral workers
#[derive(Debug, Default)]
struct Queues {
    xbee_outbound: FifoQueue<Bytes>,
    xbee_inbound: FifoQueue<Bytes>,
    gps_fixes: LatestQueue<GpsFix>,
    temperatures: LatestQueue<f64>,
}

/// Supervises the command link and every peripheral
pub struct LinkSupervisor {
    config: Config,
    backend: Arc<dyn SerialBackend>,
    camera: Arc<dyn ImageProducer>,
    storage: MissionStorage,
    framer: CommandFramer,
    engine: TransferEngine,

    command: Option<CommandLink>,
    xbee: PeripheralSlot,
    gps: PeripheralSlot,
    camera_slot: PeripheralSlot,
    temperature: PeripheralSlot,
    temperature_sensor: Option<TemperatureSensor>,
    last_temperature: Option<f64>,

    queues: Queues,
    capture: CaptureState,
}

impl LinkSupervisor {
    /// Build a supervisor with every peripheral disabled
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `backend` - Serial device access
    /// * `camera` - Image producer used for probes and captures
    /// * `storage` - Mission folder
    pub fn new(
        config: Config,
        backend: Arc<dyn SerialBackend>,
        camera: Arc<dyn ImageProducer>,
        storage: MissionStorage,
    ) -> Self {
        let capture = CaptureState {
            settings: CameraSettings::from(&config.camera),
            image_number: 0,
            recent_image: None,
            next_capture: Instant::now(),
            interval: Duration::from_secs(config.camera.capture_interval_s),
            in_flight: None,
            results: FifoQueue::new(),
        };

        Self {
            framer: CommandFramer::new(config.command_link.frame_timeout()),
            engine: TransferEngine::from(&config.transfer),
            backend,
            camera,
            storage,
            command: None,
            xbee: PeripheralSlot::new(PeripheralKind::Xbee),
            gps: PeripheralSlot::new(PeripheralKind::Gps),
            camera_slot: PeripheralSlot::new(PeripheralKind::Camera),
            temperature: PeripheralSlot::new(PeripheralKind::Temperature),
            temperature_sensor: None,
            last_temperature: None,
            queues: Queues::default(),
            capture,
            config,
        }
    }

    pub fn command_link_enabled(&self) -> bool {
        self.command.is_some()
    }

    /// Current availability of every peripheral
    pub fn device_status(&self) -> DeviceStatus {
        DeviceStatus {
            camera: self.camera_slot.is_enabled(),
            gps: self.gps.is_enabled(),
            xbee: self.xbee.is_enabled(),
            temperature: self.config.temperature.enabled.then(|| TemperatureStatus {
                enabled: self.temperature.is_enabled(),
                reading: self.last_temperature,
            }),
        }
    }

    /// Acquire what is attached and alert the ground about what is not
    pub async fn start(&mut self) {
        info!("Acquiring peripherals");
        self.probe_disabled().await;

        for kind in [
            PeripheralKind::Camera,
            PeripheralKind::Xbee,
            PeripheralKind::Gps,
            PeripheralKind::Temperature,
        ] {
            if self.is_configured(kind) && !self.slot(kind).is_some_and(PeripheralSlot::is_enabled) {
                warn!("{} disabled", kind);
                self.send_to_ground(kind.disabled_alert().as_bytes()).await;
            }
        }
    }

    /// Run iterations until the task is cancelled
    pub async fn run(&mut self) {
        let idle = self.config.command_link.read_timeout();
        loop {
            self.run_iteration().await;
            if self.command.is_none() {
                // Nothing paces the loop while the command link is down
                tokio::time::sleep(idle).await;
            }
        }
    }

    /// One pass of the control loop
    pub async fn run_iteration(&mut self) {
        self.service_command_link().await;
        self.forward_queues().await;
        self.check_peripherals().await;
        self.schedule_capture().await;
        self.log_exceptions();
        self.flush_command_input();
        self.probe_disabled().await;
    }

    /// Stop every worker and close every link
    pub async fn shutdown(&mut self) {
        info!("Closing links");
        for slot in [&mut self.xbee, &mut self.gps, &mut self.temperature, &mut self.camera_slot] {
            slot.disable().await;
        }
        if let Some(worker) = self.capture.in_flight.take() {
            worker.stop().await;
        }
        self.command = None;
    }

    // ---- step 1 ----------------------------------------------------------

    async fn service_command_link(&mut self) {
        let status = self.device_status();
        let Some(command) = self.command.as_mut() else {
            return;
        };

        let frame = match self.framer.next_frame(command.link.as_mut()).await {
            FrameRead::Frame(frame) => frame,
            FrameRead::LinkFailed(e) => {
                error!("Command link read failed: {}", e);
                self.disable_command_link();
                return;
            }
        };

        match frame.kind() {
            FrameKind::Empty => {}
            FrameKind::Command(code) => {
                info!("Command: {}", frame);
                let mut ctx = HandlerContext {
                    link: command.link.as_mut(),
                    engine: &self.engine,
                    storage: &self.storage,
                    settings: &mut self.capture.settings,
                    recent_image: self.capture.recent_image.as_deref(),
                    status,
                    request_timeout: Duration::from_millis(self.config.transfer.request_timeout_ms),
                    settings_timeout: Duration::from_millis(self.config.camera.settings_timeout_ms),
                };

                if let Err(e) = handlers::dispatch(&mut ctx, code).await {
                    error!("Command {} failed: {}", frame, e);
                    if e.is_command_link_failure() {
                        self.disable_command_link();
                    }
                }
            }
            FrameKind::Relay(bytes) => {
                if self.xbee.is_enabled() {
                    debug!("Relaying {} bytes to Xbee", bytes.len());
                    self.queues.xbee_outbound.push(bytes);
                } else {
                    debug!("Dropping relay frame, Xbee disabled: {}", frame);
                }
            }
        }
    }

    // ---- step 2 ----------------------------------------------------------

    async fn forward_queues(&mut self) {
        // Drained even without a command link so the queues stay bounded
        let fixes = self.queues.gps_fixes.drain();
        let temperatures = self.queues.temperatures.drain();
        let received = self.queues.xbee_inbound.drain();

        if let Some(celsius) = temperatures.last() {
            self.last_temperature = Some(*celsius);
        }

        if self.gps.is_enabled() {
            for fix in &fixes {
                self.send_to_ground(fix.wire_line().as_bytes()).await;
            }
        }
        if self.temperature.is_enabled() {
            for celsius in temperatures {
                self.send_to_ground(temperature::wire_line(celsius).as_bytes()).await;
            }
        }
        if self.xbee.is_enabled() {
            for line in received {
                self.send_to_ground(&line).await;
            }
        }
    }

    // ---- step 3 ----------------------------------------------------------

    async fn check_peripherals(&mut self) {
        for kind in [PeripheralKind::Xbee, PeripheralKind::Gps, PeripheralKind::Temperature] {
            let Some(slot) = self.slot(kind).filter(|slot| slot.is_enabled()) else {
                continue;
            };

            let reasons = slot.health().reset.take();
            let sensor_lost = kind == PeripheralKind::Temperature
                && !self.temperature_sensor.as_ref().is_some_and(TemperatureSensor::is_present);

            if let Some(reasons) = reasons {
                warn!("{} reset requested ({})", kind, reasons.join(", "));
            } else if sensor_lost {
                warn!("{} presence check failed", kind);
            } else if slot.workers_finished() {
                warn!("{} workers exited", kind);
            } else {
                continue;
            }

            self.disable_peripheral(kind).await;
        }
    }

    // ---- step 4 ----------------------------------------------------------

    async fn schedule_capture(&mut self) {
        for result in self.capture.results.drain() {
            self.apply_capture_result(result).await;
        }

        if !self.camera_slot.is_enabled()
            || self.capture.in_flight.is_some()
            || Instant::now() < self.capture.next_capture
        {
            return;
        }

        if !self.camera.probe().await {
            warn!("Camera probe failed");
            self.disable_peripheral(PeripheralKind::Camera).await;
            return;
        }

        info!("Taking picture {}", self.capture.image_number);
        let request = CaptureRequest {
            settings: self.capture.settings.clone(),
            storage: self.storage.clone(),
            image_number: self.capture.image_number,
        };
        self.capture.in_flight = Some(spawn_capture(
            Arc::clone(&self.camera),
            request,
            self.capture.results.clone(),
        ));
    }

    async fn apply_capture_result(&mut self, result: CaptureResult) {
        self.capture.in_flight = None;
        match result.outcome {
            CaptureOutcome::Done => {
                let name = format!("image{:04}_b.jpg", result.image_number);
                info!("Picture {} done", result.image_number);
                self.capture.recent_image = Some(name);
                self.capture.image_number = result.image_number + 1;
                self.capture.next_capture = Instant::now() + self.capture.interval;
            }
            CaptureOutcome::CheckpointReset => {
                self.capture.next_capture = Instant::now() + self.capture.interval;
            }
            CaptureOutcome::CameraUnavailable => {
                // vcgencmd can still report the camera, so the slot may come straight back
                self.capture.next_capture = Instant::now() + self.capture.interval;
                self.disable_peripheral(PeripheralKind::Camera).await;
            }
        }
    }

    // ---- step 5 ----------------------------------------------------------

    fn log_exceptions(&self) {
        for slot in [&self.xbee, &self.gps, &self.temperature] {
            for message in slot.health().exceptions.drain() {
                warn!("{} worker: {}", slot.kind(), message);
            }
        }
    }

    // ---- step 6 ----------------------------------------------------------

    fn flush_command_input(&mut self) {
        let Some(command) = self.command.as_mut() else {
            return;
        };
        if let Err(e) = command.link.clear_input() {
            error!("Command link flush failed: {}", e);
            self.disable_command_link();
        }
    }

    // ---- shared ----------------------------------------------------------

    /// The command link has no slot
    fn slot(&self, kind: PeripheralKind) -> Option<&PeripheralSlot> {
        match kind {
            PeripheralKind::Xbee => Some(&self.xbee),
            PeripheralKind::Gps => Some(&self.gps),
            PeripheralKind::Camera => Some(&self.camera_slot),
            PeripheralKind::Temperature => Some(&self.temperature),
            PeripheralKind::CommandLink => None,
        }
    }

    fn slot_mut(&mut self, kind: PeripheralKind) -> Option<&mut PeripheralSlot> {
        match kind {
            PeripheralKind::Xbee => Some(&mut self.xbee),
            PeripheralKind::Gps => Some(&mut self.gps),
            PeripheralKind::Camera => Some(&mut self.camera_slot),
            PeripheralKind::Temperature => Some(&mut self.temperature),
            PeripheralKind::CommandLink => None,
        }
    }

    fn is_configured(&self, kind: PeripheralKind) -> bool {
        match kind {
            PeripheralKind::CommandLink => true,
            PeripheralKind::Xbee => self.config.xbee.enabled,
            PeripheralKind::Gps => self.config.gps.enabled,
            PeripheralKind::Camera => self.config.camera.enabled,
            PeripheralKind::Temperature => self.config.temperature.enabled,
        }
    }

    /// Close a peripheral and alert the ground if it was enabled
    async fn disable_peripheral(&mut self, kind: PeripheralKind) {
        if kind == PeripheralKind::Temperature {
            self.temperature_sensor = None;
        }
        let Some(slot) = self.slot_mut(kind) else {
            self.disable_command_link();
            return;
        };
        if slot.disable().await {
            warn!("{} is now disabled", kind);
            self.send_to_ground(kind.disabled_alert().as_bytes()).await;
        }
    }

    fn disable_command_link(&mut self) {
        if self.command.take().is_some() {
            error!("Command link disabled");
        }
    }

    /// Write to the ground station if the command link is up
    ///
    /// A failed write disables the command link.
    async fn send_to_ground(&mut self, data: &[u8]) {
        let Some(command) = self.command.as_mut() else {
            return;
        };
        if let Err(e) = command.link.send(data).await {
            error!("Command link write failed: {}", e);
            self.disable_command_link();
        }
    }
}
