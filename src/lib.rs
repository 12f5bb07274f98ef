//! # Payload Link Library
//!
//! Onboard link controller for balloon payloads.
//!
//! This library provides the reliable link layer spoken with the ground
//! station over the command radio, and the supervisor that keeps the
//! payload's peripherals (secondary radio, GPS, camera, temperature sensor)
//! running across failures and hot-plug events.

pub mod camera;
pub mod config;
pub mod error;
pub mod link;
pub mod peripheral;
pub mod serial;
pub mod supervisor;
pub mod telemetry;
pub mod worker;
