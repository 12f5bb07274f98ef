//! # Camera Module
//!
//! Camera settings store and periodic still capture.
//!
//! This module handles:
//! - The seven-field settings tuple the ground station reads and uploads
//! - Horizontal/vertical flip toggles
//! - The image producer interface and its `raspistill` implementation
//! - The capture task that takes one image pair and indexes it

pub mod capture;

pub use capture::{CaptureOutcome, CaptureRequest, CaptureResult, ImageProducer, StillCamera};

use crate::config::CameraConfig;
use crate::error::{PayloadLinkError, Result};

/// Maximum sensor resolution
pub const FULL_WIDTH: u32 = 2592;
pub const FULL_HEIGHT: u32 = 1944;

/// Number of values in a settings tuple
pub const SETTINGS_FIELDS: usize = 7;

/// Current capture settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSettings {
    pub width: u32,
    pub height: u32,
    pub sharpness: i32,
    pub brightness: i32,
    pub contrast: i32,
    pub saturation: i32,
    pub iso: i32,
    pub hflip: bool,
    pub vflip: bool,
}

impl From<&CameraConfig> for CameraSettings {
    fn from(config: &CameraConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            sharpness: config.sharpness,
            brightness: config.brightness,
            contrast: config.contrast,
            saturation: config.saturation,
            iso: config.iso,
            hflip: false,
            vflip: false,
        }
    }
}

impl CameraSettings {
    /// `w,h,sh,b,c,sa,iso` as sent to the ground station
    pub fn settings_string(&self) -> String {
        format!(
            "{},{},{},{},{},{},{}",
            self.width,
            self.height,
            self.sharpness,
            self.brightness,
            self.contrast,
            self.saturation,
            self.iso
        )
    }

    /// Replace the tuple with an uploaded `w,h,sh,b,c,sa,iso` payload
    ///
    /// Flip state is kept.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadLinkError::CameraSettings`] if the payload does not
    /// hold exactly seven integers in range. The current settings are left
    /// untouched in that case.
    pub fn apply_upload(&mut self, payload: &str) -> Result<()> {
        let values = payload
            .trim()
            .split(',')
            .map(|v| v.trim().parse::<i32>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| PayloadLinkError::CameraSettings(format!("{:?}: {}", payload.trim(), e)))?;

        if values.len() != SETTINGS_FIELDS {
            return Err(PayloadLinkError::CameraSettings(format!(
                "expected {} values, got {}",
                SETTINGS_FIELDS,
                values.len()
            )));
        }

        let (width, height) = (values[0], values[1]);
        if !(1..=FULL_WIDTH as i32).contains(&width) || !(1..=FULL_HEIGHT as i32).contains(&height) {
            return Err(PayloadLinkError::CameraSettings(format!(
                "resolution {}x{} out of range",
                width, height
            )));
        }
        if !(0..=100).contains(&values[3]) {
            return Err(PayloadLinkError::CameraSettings("brightness must be 0..=100".to_string()));
        }
        if [values[2], values[4], values[5]].iter().any(|v| !(-100..=100).contains(v)) {
            return Err(PayloadLinkError::CameraSettings(
                "sharpness, contrast and saturation must be -100..=100".to_string(),
            ));
        }
        if !(0..=1600).contains(&values[6]) {
            return Err(PayloadLinkError::CameraSettings("iso must be 0..=1600".to_string()));
        }

        self.width = width as u32;
        self.height = height as u32;
        self.sharpness = values[2];
        self.brightness = values[3];
        self.contrast = values[4];
        self.saturation = values[5];
        self.iso = values[6];
        Ok(())
    }

    /// Returns the new state
    pub fn toggle_hflip(&mut self) -> bool {
        self.hflip = !self.hflip;
        self.hflip
    }

    /// Returns the new state
    pub fn toggle_vflip(&mut self) -> bool {
        self.vflip = !self.vflip;
        self.vflip
    }

    /// `settings(w=..,h=..,...)` suffix of an image index line for a capture
    /// at the given resolution
    pub fn index_suffix(&self, width: u32, height: u32) -> String {
        format!(
            "settings(w={},h={},sh={},b={},c={},sa={},i={})",
            width, height, self.sharpness, self.brightness, self.contrast, self.saturation, self.iso
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> CameraSettings {
        CameraSettings {
            width: 650,
            height: 450,
            sharpness: 0,
            brightness: 50,
            contrast: 0,
            saturation: 0,
            iso: 100,
            hflip: false,
            vflip: false,
        }
    }

    #[test]
    fn test_settings_string() {
        assert_eq!(defaults().settings_string(), "650,450,0,50,0,0,100");
    }

    #[test]
    fn test_apply_valid_upload() {
        let mut settings = defaults();
        settings.toggle_hflip();
        settings.apply_upload("1024,768,10,60,-5,20,400\n").unwrap();

        assert_eq!(settings.settings_string(), "1024,768,10,60,-5,20,400");
        assert!(settings.hflip);
    }

    #[test]
    fn test_invalid_uploads_keep_previous_settings() {
        for payload in [
            "1024,768,10,60,-5,20",
            "1024,768,10,60,-5,20,400,1",
            "1024,768,ten,60,-5,20,400",
            "5000,768,10,60,-5,20,400",
            "1024,0,10,60,-5,20,400",
            "1024,768,10,150,-5,20,400",
            "1024,768,-200,60,-5,20,400",
            "1024,768,10,60,-5,20,9000",
            "",
        ] {
            let mut settings = defaults();
            let result = settings.apply_upload(payload);
            assert!(
                matches!(result, Err(PayloadLinkError::CameraSettings(_))),
                "payload {:?} should be rejected",
                payload
            );
            assert_eq!(settings, defaults());
        }
    }

    #[test]
    fn test_flip_toggles() {
        let mut settings = defaults();
        assert!(settings.toggle_hflip());
        assert!(!settings.toggle_hflip());
        assert!(settings.toggle_vflip());
        assert!(!settings.hflip);
    }

    #[test]
    fn test_index_suffix() {
        assert_eq!(
            defaults().index_suffix(FULL_WIDTH, FULL_HEIGHT),
            "settings(w=2592,h=1944,sh=0,b=50,c=0,sa=0,i=100)"
        );
    }
}
