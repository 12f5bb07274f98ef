//! GPS source: extracts fixes from GGA sentences and publishes the latest one.

use serde::Serialize;
use tracing::debug;

use crate::error::{PayloadLinkError, Result};
use crate::serial::BoxedStream;
use crate::telemetry::MissionStorage;
use crate::worker::{spawn_line_reader, FramedQueue, LatestQueue, Worker, WorkerHealth};

/// Sentence type carrying the fields forwarded to the ground
const GGA_SENTENCE: &str = "GGA";

/// One position fix
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpsFix {
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    /// Decimal degrees, negative in the southern hemisphere
    pub latitude: f64,
    /// Decimal degrees, negative in the western hemisphere
    pub longitude: f64,
    /// Meters above mean sea level
    pub altitude: f64,
    pub satellites: u32,
}

impl GpsFix {
    /// Parse a `$xxGGA` sentence
    ///
    /// Empty position or altitude fields (no fix yet) read as zero.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadLinkError::Gps`] if the sentence is not GGA or a
    /// required field is malformed.
    pub fn parse_gga(sentence: &str) -> Result<Self> {
        let fields: Vec<&str> = sentence.trim().split(',').collect();
        let talker = fields.first().copied().unwrap_or_default();
        if !talker.ends_with(GGA_SENTENCE) || fields.len() < 10 {
            return Err(PayloadLinkError::Gps(format!("not a GGA sentence: {}", sentence.trim())));
        }

        let time = fields[1];
        if time.len() < 6 || !time.is_ascii() {
            return Err(PayloadLinkError::Gps(format!("bad time field: {:?}", time)));
        }
        let hour = parse_number(&time[0..2], "hour")?;
        let minute = parse_number(&time[2..4], "minute")?;
        let second = parse_number(time[4..].split('.').next().unwrap_or_default(), "second")?;

        let latitude = parse_coordinate(fields[2], 2, fields[3], 'S')?;
        let longitude = parse_coordinate(fields[4], 3, fields[5], 'W')?;
        let satellites = parse_number(fields[7], "satellites")?;
        let altitude = if fields[9].is_empty() {
            0.0
        } else {
            parse_number(fields[9], "altitude")?
        };

        Ok(Self {
            hour,
            minute,
            second,
            latitude,
            longitude,
            altitude,
            satellites,
        })
    }

    /// Relay line sent to the ground station
    pub fn wire_line(&self) -> String {
        format!(
            "GPS:{},{},{},{},{},{},{}!\n",
            self.hour,
            self.minute,
            self.second,
            self.latitude,
            self.longitude,
            self.altitude,
            self.satellites
        )
    }
}

fn parse_number<T: std::str::FromStr>(field: &str, name: &str) -> Result<T> {
    field
        .parse()
        .map_err(|_| PayloadLinkError::Gps(format!("bad {} field: {:?}", name, field)))
}

/// `ddmm.mmmm` / `dddmm.mmmm` to signed decimal degrees
fn parse_coordinate(field: &str, degree_digits: usize, hemisphere: &str, negative: char) -> Result<f64> {
    if field.is_empty() {
        return Ok(0.0);
    }
    if field.len() <= degree_digits || !field.is_ascii() {
        return Err(PayloadLinkError::Gps(format!("bad coordinate: {:?}", field)));
    }

    let degrees: f64 = parse_number(&field[..degree_digits], "degrees")?;
    let minutes: f64 = parse_number(&field[degree_digits..], "minutes")?;
    let value = degrees + minutes / 60.0;

    if hemisphere.starts_with(negative) {
        Ok(-value)
    } else {
        Ok(value)
    }
}

/// Start the GPS reader on an opened receiver
///
/// Non-GGA sentences are skipped. Each fix replaces the previous one in
/// `fixes` and, with `log` set, is appended to the mission GPS log.
pub fn spawn_gps_reader(
    stream: BoxedStream,
    fixes: LatestQueue<GpsFix>,
    log: Option<MissionStorage>,
    health: WorkerHealth,
) -> Worker {
    spawn_line_reader("gps", stream, health, move |raw| {
        let line = String::from_utf8_lossy(raw);
        if !line.contains(GGA_SENTENCE) {
            return Ok(());
        }

        let fix = GpsFix::parse_gga(&line)?;
        debug!("GPS fix: {:?}", fix);
        fixes.push(fix.clone());

        if let Some(storage) = &log {
            storage.append_gps(&fix)?;
        }
        Ok(())
    })
}
