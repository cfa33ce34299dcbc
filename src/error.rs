use thiserror::Error;

use crate::config::ConfigError;
use crate::orient::OrientError;
use crate::provenance::MalformedSource;
use crate::qc::QcError;

/// Any error surfaced while wiring or reporting on a pipeline.
#[derive(Debug, Error)]
pub enum FornixError {
    #[error("invalid lineage attached to a resource.\n{0}")]
    Provenance(#[from] MalformedSource),

    #[error("configuration error.\n{0}")]
    Config(#[from] ConfigError),

    #[error("error while reorienting an image.\n{0}")]
    Orient(#[from] OrientError),

    #[error("error while generating quality-control output.\n{0}")]
    Qc(#[from] QcError),
}
