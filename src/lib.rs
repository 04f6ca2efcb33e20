//! Inspect, extract, diff and ship artifacts from OCI/Docker images without a
//! container engine.

pub mod artifact;
pub mod cmd;
pub mod config;
pub mod format;
pub mod progress;
pub mod source;
