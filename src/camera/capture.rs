//! Image producer interface and the capture task.

use async_trait::async_trait;
use chrono::Local;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{CameraSettings, FULL_HEIGHT, FULL_WIDTH};
use crate::config::CameraConfig;
use crate::error::{PayloadLinkError, Result};
use crate::telemetry::{format_timestamp, MissionStorage};
use crate::worker::{FifoQueue, FramedQueue, Worker};

/// How a capture ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Both images were taken and indexed
    Done,
    /// A capture failed; try again at the next interval
    CheckpointReset,
    /// The camera could not be opened; disable it
    CameraUnavailable,
}

/// Result posted by the capture task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureResult {
    pub outcome: CaptureOutcome,
    pub image_number: u32,
}

/// Everything the capture task needs, copied at spawn time
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub settings: CameraSettings,
    pub storage: MissionStorage,
    pub image_number: u32,
}

impl CaptureRequest {
    /// `imageNNNN_a.png`, taken at full resolution
    pub fn full_name(&self) -> String {
        format!("image{:04}_a.png", self.image_number)
    }

    /// `imageNNNN_b.jpg`, taken at the configured resolution
    pub fn preview_name(&self) -> String {
        format!("image{:04}_b.jpg", self.image_number)
    }
}

/// Source of still images
#[async_trait]
pub trait ImageProducer: Send + Sync {
    /// Whether a camera is attached and usable
    async fn probe(&self) -> bool;

    /// Take one still at `width`x`height` into `path`
    ///
    /// # Errors
    ///
    /// [`PayloadLinkError::Unavailable`] if the camera cannot be opened,
    /// anything else for a failed capture.
    async fn capture_still(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        settings: &CameraSettings,
    ) -> Result<()>;
}

/// Raspberry Pi camera driven through the `raspistill` and `vcgencmd` tools
#[derive(Debug, Clone)]
pub struct StillCamera {
    capture_program: String,
    probe_program: String,
}

impl From<&CameraConfig> for StillCamera {
    fn from(config: &CameraConfig) -> Self {
        Self {
            capture_program: config.capture_program.clone(),
            probe_program: config.probe_program.clone(),
        }
    }
}

impl StillCamera {
    fn capture_args(path: &Path, width: u32, height: u32, settings: &CameraSettings) -> Vec<String> {
        let encoding = match path.extension().and_then(|e| e.to_str()) {
            Some("png") => "png",
            _ => "jpg",
        };

        let mut args = vec![
            "-n".to_string(),
            "-t".to_string(),
            "1000".to_string(),
            "-e".to_string(),
            encoding.to_string(),
            "-w".to_string(),
            width.to_string(),
            "-h".to_string(),
            height.to_string(),
            "-sh".to_string(),
            settings.sharpness.to_string(),
            "-br".to_string(),
            settings.brightness.to_string(),
            "-co".to_string(),
            settings.contrast.to_string(),
            "-sa".to_string(),
            settings.saturation.to_string(),
            "-ISO".to_string(),
            settings.iso.to_string(),
        ];
        if settings.hflip {
            args.push("-hf".to_string());
        }
        if settings.vflip {
            args.push("-vf".to_string());
        }
        args.push("-o".to_string());
        args.push(path.to_string_lossy().into_owned());
        args
    }
}

#[async_trait]
impl ImageProducer for StillCamera {
    async fn probe(&self) -> bool {
        let output = Command::new(&self.probe_program)
            .arg("get_camera")
            .stdin(Stdio::null())
            .output()
            .await;

        match output {
            Ok(output) => {
                let report = String::from_utf8_lossy(&output.stdout);
                debug!("Camera probe: {}", report.trim());
                report.contains("detected=1")
            }
            Err(e) => {
                debug!("Camera probe failed: {}", e);
                false
            }
        }
    }

    async fn capture_still(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        settings: &CameraSettings,
    ) -> Result<()> {
        let output = Command::new(&self.capture_program)
            .args(Self::capture_args(path, width, height, settings))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|_| PayloadLinkError::Unavailable("Camera"))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(PayloadLinkError::Protocol(format!(
                "{} exited with {}: {}",
                self.capture_program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

/// Take the full-resolution and the preview image and index both
pub async fn take_pictures(producer: &dyn ImageProducer, request: &CaptureRequest) -> CaptureOutcome {
    let settings = &request.settings;
    let shots = [
        (request.full_name(), FULL_WIDTH, FULL_HEIGHT),
        (request.preview_name(), settings.width, settings.height),
    ];

    for (name, width, height) in shots {
        let path = request.storage.file(&name);
        match producer.capture_still(&path, width, height, settings).await {
            Ok(()) => info!("Saved {} ({}x{})", name, width, height),
            Err(PayloadLinkError::Unavailable(_)) => return CaptureOutcome::CameraUnavailable,
            Err(e) => {
                warn!("Capture of {} failed: {}", name, e);
                return CaptureOutcome::CheckpointReset;
            }
        }

        let line = format!(
            "{} @ time({}) {}",
            name,
            format_timestamp(&Local::now()),
            settings.index_suffix(width, height)
        );
        if let Err(e) = request.storage.append_image_index(&line) {
            warn!("Image index update failed: {}", e);
            return CaptureOutcome::CheckpointReset;
        }
    }

    CaptureOutcome::Done
}

/// Run [`take_pictures`] in the background and post the result to `results`
pub fn spawn_capture(
    producer: Arc<dyn ImageProducer>,
    request: CaptureRequest,
    results: FifoQueue<CaptureResult>,
) -> Worker {
    Worker::spawn("capture", async move {
        let outcome = take_pictures(producer.as_ref(), &request).await;
        results.push(CaptureResult {
            outcome,
            image_number: request.image_number,
        });
    })
}

#[cfg(test)]
pub mod fakes {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Image producer that writes placeholder files
    #[derive(Debug, Default)]
    pub struct FakeCamera {
        pub attached: AtomicBool,
        pub fail_capture: AtomicBool,
        /// `probe()` reports the camera but the capture tool cannot open it
        pub capture_unavailable: AtomicBool,
        pub captures: AtomicUsize,
    }

    impl FakeCamera {
        pub fn attached() -> Self {
            let camera = Self::default();
            camera.attached.store(true, Ordering::SeqCst);
            camera
        }
    }

    #[async_trait]
    impl ImageProducer for FakeCamera {
        async fn probe(&self) -> bool {
            self.attached.load(Ordering::SeqCst)
        }

        async fn capture_still(
            &self,
            path: &Path,
            width: u32,
            height: u32,
            _settings: &CameraSettings,
        ) -> Result<()> {
            if !self.attached.load(Ordering::SeqCst) || self.capture_unavailable.load(Ordering::SeqCst) {
                return Err(PayloadLinkError::Unavailable("Camera"));
            }
            if self.fail_capture.load(Ordering::SeqCst) {
                return Err(PayloadLinkError::Protocol("sensor timeout".to_string()));
            }
            self.captures.fetch_add(1, Ordering::SeqCst);
            std::fs::write(path, format!("{}x{}", width, height))?;
            Ok(())
        }
    }
}
