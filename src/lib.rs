// src/lib.rs
//! Flow-meter calibration: orifice and Pitot readings in, calibration
//! figures, chart and PDF report out.
pub mod calibration;
