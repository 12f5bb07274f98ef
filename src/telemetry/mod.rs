//! # Telemetry Module
//!
//! Mission folder and the on-disk logs kept in it.
//!
//! This module handles:
//! - Creating one timestamped folder per mission
//! - The image index log (one line per captured file)
//! - The runtime log path (written by the tracing file layer)
//! - GPS fixes as JSONL (one JSON object per line)

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Result;

/// Image index log, read back by the image index handler
pub const IMAGE_INDEX_FILE: &str = "imagedata.txt";

/// Runtime log, read back by the runtime log handler
pub const RUNTIME_LOG_FILE: &str = "piruntimedata.txt";

/// GPS fix log
pub const GPS_LOG_FILE: &str = "gpslog.jsonl";

/// Folder name format, e.g. `07042026_134501`
const FOLDER_FORMAT: &str = "%m%d%Y_%H%M%S";

/// Timestamp format used in the image index and by time sync
pub const TIMESTAMP_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

/// Format a local time the way the ground station expects it
pub fn format_timestamp(time: &DateTime<Local>) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

/// The folder everything produced during one mission lands in
#[derive(Debug, Clone)]
pub struct MissionStorage {
    folder: PathBuf,
}

impl MissionStorage {
    /// Create `<base_dir>/<timestamp>/` and start an empty image index
    ///
    /// # Errors
    ///
    /// Returns error if the folder or the index file cannot be created
    pub fn create(base_dir: &Path) -> Result<Self> {
        let name = Local::now().format(FOLDER_FORMAT).to_string();
        let storage = Self::at(base_dir.join(name));

        fs::create_dir_all(&storage.folder)?;
        File::create(storage.image_index_path())?;

        info!("Mission folder: {}", storage.folder.display());
        Ok(storage)
    }

    /// Use an existing folder as is
    pub fn at(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Path of a file in the mission folder
    pub fn file(&self, name: &str) -> PathBuf {
        self.folder.join(name)
    }

    pub fn image_index_path(&self) -> PathBuf {
        self.file(IMAGE_INDEX_FILE)
    }

    pub fn runtime_log_path(&self) -> PathBuf {
        self.file(RUNTIME_LOG_FILE)
    }

    pub fn gps_log_path(&self) -> PathBuf {
        self.file(GPS_LOG_FILE)
    }

    /// Append one line to the image index
    pub fn append_image_index(&self, line: &str) -> Result<()> {
        append_line(&self.image_index_path(), line)
    }

    /// Append one record to the GPS log as a JSON line
    pub fn append_gps<T: Serialize>(&self, record: &T) -> Result<()> {
        let json = serde_json::to_string(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        append_line(&self.gps_log_path(), &json)
    }
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_makes_timestamped_folder_with_empty_index() {
        let base = TempDir::new().unwrap();
        let storage = MissionStorage::create(base.path()).unwrap();

        assert!(storage.folder().starts_with(base.path()));
        let name = storage.folder().file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(name.len(), "07042026_134501".len());
        assert_eq!(&name[8..9], "_");

        let index = fs::read_to_string(storage.image_index_path()).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_image_index_appends_lines() {
        let dir = TempDir::new().unwrap();
        let storage = MissionStorage::at(dir.path());

        storage.append_image_index("image0000_a.png @ time(x)").unwrap();
        storage.append_image_index("image0000_b.jpg @ time(y)").unwrap();

        let index = fs::read_to_string(storage.image_index_path()).unwrap();
        assert_eq!(index, "image0000_a.png @ time(x)\nimage0000_b.jpg @ time(y)\n");
    }

    #[test]
    fn test_gps_log_is_json_lines() {
        #[derive(Serialize)]
        struct Fix {
            lat: f64,
            sat: u32,
        }

        let dir = TempDir::new().unwrap();
        let storage = MissionStorage::at(dir.path());
        storage.append_gps(&Fix { lat: 48.1, sat: 8 }).unwrap();
        storage.append_gps(&Fix { lat: 48.2, sat: 9 }).unwrap();

        let log = fs::read_to_string(storage.gps_log_path()).unwrap();
        let lines: Vec<serde_json::Value> = log
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["sat"], 9);
    }

    #[test]
    fn test_append_to_missing_folder_is_error() {
        let storage = MissionStorage::at("/nonexistent/mission");
        assert!(storage.append_image_index("x").is_err());
    }

    #[test]
    fn test_timestamp_format() {
        use chrono::TimeZone;
        let time = Local.with_ymd_and_hms(2026, 7, 4, 13, 45, 1).unwrap();
        assert_eq!(format_timestamp(&time), "07/04/2026 13:45:01");
    }
}
