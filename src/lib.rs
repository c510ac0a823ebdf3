//! Beacon positioning library
//!
//! Trilateration, area classification and dwell segmentation for radio
//! beacons. Exposes modules for integration testing and binary reuse.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
