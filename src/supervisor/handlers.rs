//! Dispatch table for payload commands.
//!
//! Every handler runs on the command link the supervisor owns. The
//! acknowledgment is written before the handler body; if it cannot be
//! written the command link is considered lost.

use chrono::Local;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::camera::CameraSettings;
use crate::error::{PayloadLinkError, Result};
use crate::link::protocol::{
    ACK, IMAGE_REQUEST_PREFIX, INDEX_END, PING, PING_DONE, SETTINGS_ACCEPTED, SETTINGS_REQUEST_PREFIX,
};
use crate::link::{CommandCode, TransferEngine};
use crate::serial::LinkIo;
use crate::telemetry::{format_timestamp, MissionStorage};

/// Upper bound on one ping echo session
pub const PING_WINDOW: Duration = Duration::from_secs(10);

/// Temperature part of the status report
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureStatus {
    pub enabled: bool,
    pub reading: Option<f64>,
}

/// Peripheral availability as reported by `IMAGE;-!`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceStatus {
    pub camera: bool,
    pub gps: bool,
    pub xbee: bool,
    /// Present only when a temperature sensor is configured
    pub temperature: Option<TemperatureStatus>,
}

fn flag(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

impl DeviceStatus {
    /// `Camera: <b>, GPS: <b>, Xbee: <b>[, Temp: <v>]\n`
    ///
    /// The temperature value is the latest reading while the sensor is
    /// enabled, otherwise its enabled flag.
    pub fn status_line(&self) -> String {
        let mut line = format!(
            "Camera: {}, GPS: {}, Xbee: {}",
            flag(self.camera),
            flag(self.gps),
            flag(self.xbee)
        );

        if let Some(temperature) = self.temperature {
            match (temperature.enabled, temperature.reading) {
                (true, Some(celsius)) => line.push_str(&format!(", Temp: {:.3}", celsius)),
                (enabled, _) => line.push_str(&format!(", Temp: {}", flag(enabled))),
            }
        }

        line.push('\n');
        line
    }
}

/// What a handler may touch
pub struct HandlerContext<'a> {
    pub link: &'a mut dyn LinkIo,
    pub engine: &'a TransferEngine,
    pub storage: &'a MissionStorage,
    pub settings: &'a mut CameraSettings,
    /// File name of the most recent preview image
    pub recent_image: Option<&'a str>,
    pub status: DeviceStatus,
    /// Wait for the `RQ;<name>` line of a requested image
    pub request_timeout: Duration,
    /// Wait for the `RQ/<values>` line of a settings upload
    pub settings_timeout: Duration,
}

async fn write(link: &mut dyn LinkIo, data: &[u8]) -> Result<()> {
    link.send(data).await.map_err(PayloadLinkError::CommandLink)
}

/// Acknowledge and run the handler for `code`
///
/// # Errors
///
/// [`PayloadLinkError::Acknowledge`] if the acknowledgment could not be
/// written, [`PayloadLinkError::CommandLink`] if a later write failed, or
/// the handler's own error.
pub async fn dispatch(ctx: &mut HandlerContext<'_>, code: CommandCode) -> Result<()> {
    if let Some(ack) = code.acknowledgment() {
        ctx.link.send(ack).await.map_err(PayloadLinkError::Acknowledge)?;
    }

    match code {
        CommandCode::SendRecentImage => send_recent_image(ctx).await,
        CommandCode::SendImageIndex => send_file(ctx.link, &ctx.storage.image_index_path(), Some(INDEX_END)).await,
        CommandCode::SendRequestedImage => send_requested_image(ctx).await,
        CommandCode::SendCameraSettings => {
            let line = format!("{}\n", ctx.settings.settings_string());
            write(ctx.link, line.as_bytes()).await
        }
        CommandCode::ReceiveCameraSettings => receive_camera_settings(ctx).await,
        CommandCode::PingTest | CommandCode::Ping => ping_echo(ctx.link).await,
        CommandCode::SendRuntimeLog => send_file(ctx.link, &ctx.storage.runtime_log_path(), None).await,
        CommandCode::TimeSync => {
            let line = format!("{}\n", format_timestamp(&Local::now()));
            write(ctx.link, line.as_bytes()).await
        }
        CommandCode::HorizontalFlip => {
            let state = ctx.settings.toggle_hflip();
            info!("Horizontal flip {}", if state { "on" } else { "off" });
            ctx.link.clear_input().map_err(PayloadLinkError::CommandLink)
        }
        CommandCode::VerticalFlip => {
            let state = ctx.settings.toggle_vflip();
            info!("Vertical flip {}", if state { "on" } else { "off" });
            ctx.link.clear_input().map_err(PayloadLinkError::CommandLink)
        }
        CommandCode::StatusReport => {
            let line = ctx.status.status_line();
            write(ctx.link, line.as_bytes()).await?;
            info!("Status sent: {}", line.trim_end());
            Ok(())
        }
    }
}

async fn send_recent_image(ctx: &mut HandlerContext<'_>) -> Result<()> {
    let name = ctx.recent_image.unwrap_or_default();
    info!("Sending most recent image: {:?}", name);

    write(ctx.link, format!("{}\n", name).as_bytes()).await?;
    if name.is_empty() {
        return Err(PayloadLinkError::Unavailable("Recent image"));
    }
    ctx.engine.send(ctx.link, &ctx.storage.file(name)).await?;
    Ok(())
}

async fn send_requested_image(ctx: &mut HandlerContext<'_>) -> Result<()> {
    let deadline = Instant::now() + ctx.request_timeout;

    let name = loop {
        if Instant::now() >= deadline {
            return Err(PayloadLinkError::Protocol("no image request received".to_string()));
        }

        let line = ctx.link.read_line().await.map_err(PayloadLinkError::CommandLink)?;
        if let Some(name) = line.trim().strip_prefix(IMAGE_REQUEST_PREFIX) {
            break name.to_string();
        }
        if !line.is_empty() {
            debug!("Ignoring while waiting for image request: {:?}", line);
        }
    };

    if name.is_empty() || name.contains('/') || name.contains("..") {
        return Err(PayloadLinkError::Protocol(format!("bad image name: {:?}", name)));
    }

    info!("Sending requested image {}", name);
    ctx.engine.send(ctx.link, &ctx.storage.file(&name)).await?;
    Ok(())
}

async fn receive_camera_settings(ctx: &mut HandlerContext<'_>) -> Result<()> {
    let deadline = Instant::now() + ctx.settings_timeout;

    while Instant::now() < deadline {
        let line = ctx.link.read_line().await.map_err(PayloadLinkError::CommandLink)?;
        if line.is_empty() {
            continue;
        }

        match line.trim().strip_prefix(SETTINGS_REQUEST_PREFIX) {
            Some(payload) => {
                ctx.settings.apply_upload(payload)?;
                write(ctx.link, SETTINGS_ACCEPTED).await?;
                info!("New camera settings: {}", ctx.settings.settings_string());
                return Ok(());
            }
            // The ground station repeats the command until it sees an ack
            None => write(ctx.link, ACK).await?,
        }
    }

    Err(PayloadLinkError::Protocol("camera settings upload timed out".to_string()))
}

/// Echo `~` back, answer anything else with `A`, until `D`, silence or the
/// session window closes
async fn ping_echo(link: &mut dyn LinkIo) -> Result<()> {
    let deadline = Instant::now() + PING_WINDOW;
    let mut pings = 0;

    while Instant::now() < deadline {
        let byte = match link.read_byte().await.map_err(PayloadLinkError::CommandLink)? {
            None | Some(PING_DONE) => break,
            Some(byte) => byte,
        };

        link.clear_input().map_err(PayloadLinkError::CommandLink)?;
        if byte == PING {
            pings += 1;
            write(link, &[PING]).await?;
        } else {
            debug!("Ping test got {:?}", byte as char);
            write(link, ACK).await?;
        }
    }

    info!("Ping session ended after {} pings", pings);
    Ok(())
}

async fn send_file(link: &mut dyn LinkIo, path: &Path, trailer: Option<&[u8]>) -> Result<()> {
    let contents = tokio::fs::read(path).await.map_err(|e| {
        warn!("Cannot read {}: {}", path.display(), e);
        PayloadLinkError::Io(e)
    })?;

    write(link, &contents).await?;
    if let Some(trailer) = trailer {
        write(link, trailer).await?;
    }
    info!("Sent {} ({} bytes)", path.display(), contents.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::protocol::CHUNK_ACCEPTED;
    use crate::serial::port_trait::mocks::MockLink;
    use std::io;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        storage: MissionStorage,
        engine: TransferEngine,
        settings: CameraSettings,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let storage = MissionStorage::at(dir.path());
            let config = crate::config::Config::for_tests();
            Self {
                dir,
                storage,
                engine: TransferEngine::from(&config.transfer),
                settings: CameraSettings::from(&config.camera),
            }
        }

        async fn run(&mut self, link: &mut MockLink, code: CommandCode, recent: Option<&str>) -> Result<()> {
            let mut ctx = HandlerContext {
                link,
                engine: &self.engine,
                storage: &self.storage,
                settings: &mut self.settings,
                recent_image: recent,
                status: DeviceStatus {
                    camera: true,
                    gps: false,
                    xbee: true,
                    temperature: None,
                },
                request_timeout: Duration::from_secs(5),
                settings_timeout: Duration::from_secs(10),
            };
            dispatch(&mut ctx, code).await
        }
    }

    #[test]
    fn test_status_line() {
        let mut status = DeviceStatus {
            camera: true,
            gps: false,
            xbee: true,
            temperature: None,
        };
        assert_eq!(status.status_line(), "Camera: True, GPS: False, Xbee: True\n");

        status.temperature = Some(TemperatureStatus {
            enabled: true,
            reading: Some(21.5),
        });
        assert_eq!(status.status_line(), "Camera: True, GPS: False, Xbee: True, Temp: 21.500\n");

        status.temperature = Some(TemperatureStatus {
            enabled: false,
            reading: Some(21.5),
        });
        assert_eq!(status.status_line(), "Camera: True, GPS: False, Xbee: True, Temp: False\n");
    }

    #[tokio::test]
    async fn test_status_report_has_no_ack() {
        let mut fixture = Fixture::new();
        let mut link = MockLink::new();

        fixture.run(&mut link, CommandCode::StatusReport, None).await.unwrap();
        assert_eq!(link.written_string(), "Camera: True, GPS: False, Xbee: True\n");
    }

    #[tokio::test]
    async fn test_ack_failure_is_acknowledge_error() {
        let mut fixture = Fixture::new();
        let mut link = MockLink::new();
        link.set_write_error(io::ErrorKind::BrokenPipe);

        let err = fixture.run(&mut link, CommandCode::TimeSync, None).await.unwrap_err();
        assert!(matches!(err, PayloadLinkError::Acknowledge(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recent_image_without_capture_logs_error() {
        let mut fixture = Fixture::new();
        let mut link = MockLink::new();

        let err = fixture
            .run(&mut link, CommandCode::SendRecentImage, None)
            .await
            .unwrap_err();

        assert!(matches!(err, PayloadLinkError::Unavailable(_)));
        assert!(!err.is_command_link_failure());
        assert_eq!(link.get_written_data(), vec![b"A".to_vec(), b"\n".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recent_image_is_transferred() {
        let mut fixture = Fixture::new();
        std::fs::write(fixture.dir.path().join("image0002_b.jpg"), b"jpeg bytes").unwrap();
        let mut link = MockLink::new();
        link.set_fallback(Some(CHUNK_ACCEPTED));

        fixture
            .run(&mut link, CommandCode::SendRecentImage, Some("image0002_b.jpg"))
            .await
            .unwrap();

        let writes = link.get_written_data();
        assert_eq!(writes[0], b"A");
        assert_eq!(writes[1], b"image0002_b.jpg\n");
        // base64 of 10 bytes is 16 characters
        assert_eq!(writes[2], b"16\n");
    }

    #[tokio::test]
    async fn test_image_index_ends_with_marker() {
        let mut fixture = Fixture::new();
        fixture.storage.append_image_index("image0000_a.png @ time(t)").unwrap();
        let mut link = MockLink::new();

        fixture.run(&mut link, CommandCode::SendImageIndex, None).await.unwrap();
        assert_eq!(link.written_string(), "Aimage0000_a.png @ time(t)\nX\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_requested_image() {
        let mut fixture = Fixture::new();
        std::fs::write(fixture.dir.path().join("image0001_a.png"), b"png").unwrap();
        let mut link = MockLink::with_input(b"noise\nRQ;image0001_a.png\n");
        link.set_fallback(Some(CHUNK_ACCEPTED));

        fixture.run(&mut link, CommandCode::SendRequestedImage, None).await.unwrap();

        let writes = link.get_written_data();
        assert_eq!(writes[0], b"A");
        assert_eq!(writes[1], b"4\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_requested_image_rejects_paths() {
        let mut fixture = Fixture::new();
        let mut link = MockLink::with_input(b"RQ;../../etc/passwd\n");

        let err = fixture
            .run(&mut link, CommandCode::SendRequestedImage, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PayloadLinkError::Protocol(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_requested_image_times_out() {
        let mut fixture = Fixture::new();
        let mut link = MockLink::new();

        let err = fixture
            .run(&mut link, CommandCode::SendRequestedImage, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PayloadLinkError::Protocol(_)));
        assert_eq!(link.written_string(), "A");
    }

    #[tokio::test]
    async fn test_send_camera_settings() {
        let mut fixture = Fixture::new();
        let mut link = MockLink::new();

        fixture.run(&mut link, CommandCode::SendCameraSettings, None).await.unwrap();
        assert_eq!(link.written_string(), "A650,450,0,50,0,0,100\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_camera_settings() {
        let mut fixture = Fixture::new();
        let mut link = MockLink::with_input(b"IMAGE;5!\nRQ/800,600,5,55,1,2,200\n");

        fixture.run(&mut link, CommandCode::ReceiveCameraSettings, None).await.unwrap();

        assert_eq!(fixture.settings.settings_string(), "800,600,5,55,1,2,200");
        // Ack, re-ack for the repeated command, then acceptance
        assert_eq!(link.written_string(), "AAB");
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_camera_settings_keep_previous() {
        let mut fixture = Fixture::new();
        let mut link = MockLink::with_input(b"RQ/800,600,5\n");

        let err = fixture
            .run(&mut link, CommandCode::ReceiveCameraSettings, None)
            .await
            .unwrap_err();

        assert!(matches!(err, PayloadLinkError::CameraSettings(_)));
        assert_eq!(fixture.settings.settings_string(), "650,450,0,50,0,0,100");
        assert_eq!(link.written_string(), "A");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_test_echo() {
        let mut fixture = Fixture::new();
        let mut link = MockLink::with_input(b"~~x~D");

        fixture.run(&mut link, CommandCode::PingTest, None).await.unwrap();

        assert_eq!(link.written_string(), "A~~A~");
        assert_eq!(link.clears(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bare_ping_ends_on_silence() {
        let mut fixture = Fixture::new();
        let mut link = MockLink::with_input(b"~");

        fixture.run(&mut link, CommandCode::Ping, None).await.unwrap();
        assert_eq!(link.written_string(), "~");
    }

    #[tokio::test]
    async fn test_runtime_log_sent_verbatim() {
        let mut fixture = Fixture::new();
        std::fs::write(fixture.storage.runtime_log_path(), "line one\nline two\n").unwrap();
        let mut link = MockLink::new();

        fixture.run(&mut link, CommandCode::SendRuntimeLog, None).await.unwrap();
        assert_eq!(link.written_string(), "Aline one\nline two\n");
    }

    #[tokio::test]
    async fn test_time_sync_format() {
        let mut fixture = Fixture::new();
        let mut link = MockLink::new();

        fixture.run(&mut link, CommandCode::TimeSync, None).await.unwrap();

        let written = link.written_string();
        let time = written.strip_prefix('A').unwrap().trim_end();
        assert!(chrono::NaiveDateTime::parse_from_str(time, "%m/%d/%Y %H:%M:%S").is_ok());
    }

    #[tokio::test]
    async fn test_flips_toggle_and_clear_input() {
        let mut fixture = Fixture::new();
        let mut link = MockLink::new();

        fixture.run(&mut link, CommandCode::HorizontalFlip, None).await.unwrap();
        fixture.run(&mut link, CommandCode::VerticalFlip, None).await.unwrap();

        assert!(fixture.settings.hflip);
        assert!(fixture.settings.vflip);
        assert_eq!(link.clears(), 2);
        assert_eq!(link.written_string(), "AA");
    }
}
