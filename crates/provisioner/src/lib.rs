//! Provisioner daemon
//!
//! Runs the job worker against the simulated cloud and serves the HTTP
//! API used by `kp`.

pub mod api;
pub mod config;
