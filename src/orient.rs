//! Orientation checks for input images, shelling out to the AFNI tools.
//!
//! Requires `3dinfo`, `3drefit` and `3dresample` on the `PATH`.

use std::fs;
use std::process::{Command, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

/// Errors that can occur while querying or rewriting image orientation.
#[derive(Debug, Error)]
pub enum OrientError {
    /// An I/O error occurred while staging files or spawning a tool.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An AFNI tool returned a non-zero exit code.
    #[error("{tool} failed: {stderr}")]
    Tool { tool: &'static str, stderr: String },

    /// The input path has no file name component.
    #[error("input path has no file name: {0}")]
    NoFileName(Utf8PathBuf),
}

fn run_tool(tool: &'static str, args: &[&str]) -> Result<Vec<u8>, OrientError> {
    let output = Command::new(tool)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()?;

    if !output.status.success() {
        return Err(OrientError::Tool {
            tool,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output.stdout)
}

/// Reorient an image to the desired orientation code (e.g. `RPI`).
///
/// Works on a scratch copy so the original file is never modified; the
/// reoriented image lands in `workdir` as `reoriented_{basename}`, replacing
/// any stale output from an earlier run.
pub fn reorient_image(
    input: &Utf8Path,
    orientation: &str,
    workdir: &Utf8Path,
) -> Result<Utf8PathBuf, OrientError> {
    let basename = input
        .file_name()
        .ok_or_else(|| OrientError::NoFileName(input.to_owned()))?;
    let output = workdir.join(format!("reoriented_{basename}"));
    let scratch = workdir.join(format!("temp_{basename}"));

    if output.exists() {
        fs::remove_file(&output)?;
    }
    fs::copy(input, &scratch)?;

    let result = run_tool("3drefit", &["-deoblique", scratch.as_str()]).and_then(|_| {
        run_tool(
            "3dresample",
            &[
                "-orient",
                orientation,
                "-prefix",
                output.as_str(),
                "-inset",
                scratch.as_str(),
            ],
        )
    });

    fs::remove_file(&scratch)?;
    result?;

    Ok(output)
}

/// Report an image's orientation and rewrite it when it differs from the
/// desired code.
///
/// Reorientation failures never take the pipeline down: the original file is
/// returned and the failure logged. Only the orientation query itself can
/// error.
pub fn check_orientation(
    input: &Utf8Path,
    desired: &str,
    reorient: bool,
    workdir: &Utf8Path,
) -> Result<Utf8PathBuf, OrientError> {
    let stdout = run_tool("3dinfo", &["-orient", input.as_str()])?;
    let orientation = String::from_utf8_lossy(&stdout).trim().to_uppercase();

    if orientation != desired && reorient {
        tracing::info!("reorienting {input} from {orientation} to {desired}");
        match reorient_image(input, desired, workdir) {
            Ok(output) => Ok(output),
            Err(err) => {
                tracing::error!("couldn't reorient {input} to {desired}: {err}");
                Ok(input.to_owned())
            }
        }
    } else {
        tracing::info!("orientation of {input} is {orientation}, keeping as-is");
        Ok(input.to_owned())
    }
}
