//! Assembly of the per-scan quality-control table.
//!
//! One row per preprocessed functional scan, written as a TSV with a fixed
//! column schema so rows from different runs concatenate cleanly. Image
//! decoding stays out of this crate; callers hand in flattened voxel vectors
//! and volume counts.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::entity::parse_entities;
use crate::provenance::{MotionTool, Provenance, motion_tool};

/// Column schema of the QC table, in emission order.
pub const QC_COLUMNS: [&str; 23] = [
    "sub",
    "ses",
    "task",
    "run",
    "desc",
    "space",
    "meanFD",
    "relMeansRMSMotion",
    "relMaxRMSMotion",
    "meanDVInit",
    "meanDVFinal",
    "nVolCensored",
    "nVolsRemoved",
    "motionDVCorrInit",
    "motionDVCorrFinal",
    "coregDice",
    "coregJaccard",
    "coregCrossCorr",
    "coregCoverage",
    "normDice",
    "normJaccard",
    "normCrossCorr",
    "normCoverage",
];

#[derive(Debug, Error)]
pub enum QcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DVARS should be one sample shorter than FD-J, got lengths {dvars} and {fdj}")]
    SeriesLength { dvars: usize, fdj: usize },

    #[error("overlap inputs differ in length: {0} vs {1}")]
    OverlapLength(usize, usize),

    #[error("movement parameters need at least 6 columns, row {row} has {cols}")]
    RaggedTable { row: usize, cols: usize },

    #[error("empty movement-parameters table")]
    EmptyTable,

    #[error("couldn't parse number '{token}' in {path}")]
    BadNumber { token: String, path: Utf8PathBuf },
}

/// Pearson correlation of two equal-length samples.
fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    cov / (var_a.sqrt() * var_b.sqrt())
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Correlation of DVARS against framewise displacement.
///
/// DVARS is defined on frame pairs, so the series must be exactly one sample
/// shorter than the displacement series; the first displacement sample is
/// dropped before correlating.
pub fn dvars_fd_correlation(dvars: &[f64], fdj: &[f64]) -> Result<f64, QcError> {
    if dvars.len() + 1 != fdj.len() {
        return Err(QcError::SeriesLength {
            dvars: dvars.len(),
            fdj: fdj.len(),
        });
    }
    Ok(pearson(dvars, &fdj[1..]))
}

/// Mean and maximum relative RMS translation over a movement-parameters
/// table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RmsMotion {
    pub mean: f64,
    pub max: f64,
}

/// Summarize the translation columns (3..6) of a 6-column movement table.
pub fn relative_rms_motion(rows: &[Vec<f64>]) -> Result<RmsMotion, QcError> {
    if rows.is_empty() {
        return Err(QcError::EmptyTable);
    }

    let mut sum = 0.0;
    let mut max = f64::NEG_INFINITY;
    for (row, params) in rows.iter().enumerate() {
        if params.len() < 6 {
            return Err(QcError::RaggedTable {
                row,
                cols: params.len(),
            });
        }
        let rms =
            (params[3] * params[3] + params[4] * params[4] + params[5] * params[5]).sqrt();
        sum += rms;
        max = max.max(rms);
    }

    Ok(RmsMotion {
        mean: sum / rows.len() as f64,
        max,
    })
}

/// Volume-overlap measures between two flattened images.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Overlap {
    pub dice: f64,
    pub jaccard: f64,
    pub cross_corr: f64,
    pub coverage: f64,
}

/// Compare two equal-length flattened voxel vectors.
pub fn overlap(a: &[f64], b: &[f64]) -> Result<Overlap, QcError> {
    if a.len() != b.len() {
        return Err(QcError::OverlapLength(a.len(), b.len()));
    }

    let intersect: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let vol_a: f64 = a.iter().sum();
    let vol_b: f64 = b.iter().sum();
    let vol_sum = vol_a + vol_b;

    Ok(Overlap {
        dice: 2.0 * intersect / vol_sum,
        jaccard: intersect / (vol_sum - intersect),
        cross_corr: pearson(a, b),
        coverage: intersect / vol_a.min(vol_b),
    })
}

/// Load a whitespace-separated 1D series, skipping `#` comment lines.
pub fn load_series(path: &Utf8Path) -> Result<Vec<f64>, QcError> {
    Ok(load_table(path)?.into_iter().flatten().collect())
}

/// Load a whitespace-separated numeric table, skipping `#` comment lines.
pub fn load_table(path: &Utf8Path) -> Result<Vec<Vec<f64>>, QcError> {
    let text = fs::read_to_string(path)?;
    let mut rows = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let row = line
            .split_whitespace()
            .map(|token| {
                token.parse::<f64>().map_err(|_| QcError::BadNumber {
                    token: token.to_string(),
                    path: path.to_owned(),
                })
            })
            .collect::<Result<Vec<f64>, QcError>>()?;
        rows.push(row);
    }

    Ok(rows)
}

/// One row of the quality-control table.
///
/// Optional cells render as empty, a missing censor count as `unknown`, and
/// absent normalization measures as `N/A: native space`.
#[derive(Debug, Clone, Default)]
pub struct QcRow {
    pub sub: String,
    pub ses: String,
    pub task: String,
    pub run: String,
    pub desc: String,
    pub space: String,
    pub mean_fd: Option<f64>,
    pub rel_means_rms_motion: Option<f64>,
    pub rel_max_rms_motion: Option<f64>,
    pub mean_dv_init: Option<f64>,
    pub mean_dv_final: Option<f64>,
    pub n_vol_censored: Option<u64>,
    pub n_vols_removed: Option<i64>,
    pub motion_dv_corr_init: Option<f64>,
    pub motion_dv_corr_final: Option<f64>,
    pub coreg: Option<Overlap>,
    pub norm: Option<Overlap>,
}

impl QcRow {
    /// Start a row from the BIDS entities of a derivative filename.
    pub fn from_bids_name(name: &str) -> Self {
        let entities = parse_entities(name);
        let entity = |key: &str| entities.get(key).cloned().unwrap_or_default();

        QcRow {
            sub: entity("sub"),
            ses: entity("ses"),
            task: entity("task"),
            run: entity("run"),
            desc: entity("desc"),
            space: entity("space"),
            ..QcRow::default()
        }
    }

    fn cells(&self) -> Vec<String> {
        let float = |value: Option<f64>| value.map(|v| v.to_string()).unwrap_or_default();
        let overlap_cells = |measures: Option<Overlap>| match measures {
            Some(o) => [o.dice, o.jaccard, o.cross_corr, o.coverage]
                .map(|v| v.to_string())
                .to_vec(),
            None => vec!["N/A: native space".to_string(); 4],
        };

        let mut cells = vec![
            self.sub.clone(),
            self.ses.clone(),
            self.task.clone(),
            self.run.clone(),
            self.desc.clone(),
            self.space.clone(),
            float(self.mean_fd),
            float(self.rel_means_rms_motion),
            float(self.rel_max_rms_motion),
            float(self.mean_dv_init),
            float(self.mean_dv_final),
            self.n_vol_censored
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            self.n_vols_removed.map(|n| n.to_string()).unwrap_or_default(),
            float(self.motion_dv_corr_init),
            float(self.motion_dv_corr_final),
        ];
        cells.extend(overlap_cells(self.coreg));
        cells.extend(overlap_cells(self.norm));
        cells
    }

    /// Write the header line and this row to `path`, tab-separated.
    pub fn write_tsv(&self, path: &Utf8Path) -> Result<(), QcError> {
        let mut text = QC_COLUMNS.join("\t");
        text.push('\n');
        text.push_str(&self.cells().join("\t"));
        text.push('\n');
        fs::write(path, text)?;
        Ok(())
    }
}

/// Resource key of the displacement input the motion-statistics stage needs,
/// chosen by the tool that produced the movement parameters.
///
/// `None` when the lineage names no recognized motion-correction tool; the
/// caller skips the tool-specific connection in that case.
pub fn displacement_key(movement_lineage: &Provenance) -> Option<&'static str> {
    match motion_tool(movement_lineage)? {
        MotionTool::Volreg => Some("coordinate-transformation"),
        MotionTool::Mcflirt => Some("rels-displacement"),
    }
}

/// Everything needed to assemble one QC row.
///
/// Voxel vectors are flattened images; `coreg_func` is the mean functional
/// resampled into anatomical space, compared against the original anatomical
/// in `coreg_anat`.
pub struct QcInputs<'a> {
    pub final_func_name: &'a str,
    pub n_vols_original: u64,
    pub n_vols_final: u64,
    pub n_vols_censored: Option<u64>,
    pub movement: &'a [Vec<f64>],
    pub dvars: &'a [f64],
    pub fdj: &'a [f64],
    pub dvars_after: Option<&'a [f64]>,
    pub fdj_after: Option<&'a [f64]>,
    pub coreg_anat: &'a [f64],
    pub coreg_func: &'a [f64],
}

/// Assemble a QC row from precomputed motion series and voxel vectors.
///
/// Correlation failures (mismatched series lengths from a truncated scan)
/// leave their cells empty rather than dropping the whole row.
pub fn generate_qc_row(inputs: &QcInputs) -> Result<QcRow, QcError> {
    let mut row = QcRow::from_bids_name(inputs.final_func_name);

    row.mean_fd = Some(mean(inputs.fdj));
    row.mean_dv_init = Some(mean(inputs.dvars));
    row.n_vol_censored = inputs.n_vols_censored;
    row.n_vols_removed = Some(inputs.n_vols_final as i64 - inputs.n_vols_original as i64);

    let rms = relative_rms_motion(inputs.movement)?;
    row.rel_means_rms_motion = Some(rms.mean);
    row.rel_max_rms_motion = Some(rms.max);

    row.motion_dv_corr_init = match dvars_fd_correlation(inputs.dvars, inputs.fdj) {
        Ok(corr) => Some(corr),
        Err(err) => {
            tracing::warn!("skipping motionDVCorrInit: {err}");
            None
        }
    };

    if let Some(dvars_after) = inputs.dvars_after {
        row.mean_dv_final = Some(mean(dvars_after));
        let fdj_after = inputs.fdj_after.unwrap_or(inputs.fdj);
        row.motion_dv_corr_final = match dvars_fd_correlation(dvars_after, fdj_after) {
            Ok(corr) => Some(corr),
            Err(err) => {
                tracing::warn!("skipping motionDVCorrFinal: {err}");
                None
            }
        };
    }

    row.coreg = Some(overlap(inputs.coreg_func, inputs.coreg_anat)?);

    Ok(row)
}
