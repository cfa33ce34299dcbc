#![forbid(unsafe_code)]

//! Core utilities for constructing neuroimaging pipeline graphs.
//!
//! A pipeline run wires external image-processing tools into a directed
//! workflow. Optional stages fork the graph (filtered next to unfiltered
//! motion estimates, several nuisance-regression strategies side by side)
//! and every branch produces its own copy of the same logical derivative.
//! This crate provides the pure, synchronous pieces consulted while that
//! graph is wired:
//!
//! * [`provenance`]: the recursive lineage recorded for every resource and
//!   its flattening/query operations.
//! * [`fork`]: fork naming, stamping branch-specific entities into resource
//!   identifiers and output filenames so forked derivatives never collide.
//! * [`entity`]: the underscore-delimited `key-value` grammar those names
//!   follow.
//! * [`config`]: the read-only configuration with forkable on/off switches.
//! * [`orient`]: orientation checks for input images via the AFNI tools.
//! * [`qc`]: assembly of the per-scan quality-control table.

pub mod config;
pub mod entity;
mod error;
pub mod fork;
pub mod orient;
pub mod provenance;
pub mod qc;

pub use crate::config::Configuration;
pub use crate::error::FornixError;
pub use crate::fork::{OutputSpec, Sidecar, VariantMap, name_fork, present_outputs};
pub use crate::provenance::{MotionTool, Provenance, motion_tool};

/// Install a process-wide `tracing` subscriber reading `RUST_LOG`.
///
/// Convenience for binaries embedding the crate; libraries should leave
/// subscriber choice to the host application.
#[cfg(feature = "logging")]
pub fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}
