//! Fork naming: collision-free identifiers for resources that exist in more
//! than one variant under different configuration choices.
//!
//! When a forking stage (say, motion-estimate filtering) runs, every branch
//! produces its own copy of the same logical derivative. Before those copies
//! reach the output directory their identifiers and filenames are stamped
//! with disambiguating entities derived from the branch that produced them.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::Configuration;
use crate::entity::insert_entity;
use crate::provenance::Provenance;

/// Ordered map from a forking configuration axis to the producers that
/// manipulated that axis for one resource.
///
/// Insertion order is load-bearing: candidate scans take the first match.
pub type VariantMap = IndexMap<String, Vec<String>>;

/// Descriptive metadata attached to a produced resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sidecar {
    /// Full derivation lineage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    /// Forking axes touched for this resource.
    #[serde(default)]
    pub variants: VariantMap,
}

/// Where a derivative will be written and under what name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    /// On-disk name candidate for the resource.
    pub filename: String,
    /// Output subdirectory relative to the derivatives root.
    pub subdir: camino::Utf8PathBuf,
}

/// Output names of the motion-estimate filter stage; the variant-map keys
/// relevant to the motion-filter axis, scanned in this order.
pub const MOVEMENT_FILTER_KEYS: [&str; 4] = [
    "movement-parameters",
    "max-displacement",
    "rels-displacement",
    "coordinate-transformation",
];

/// Switch path enabling motion-estimate filtering.
pub const MOTION_FILTER_SWITCH: [&str; 4] = [
    "functional_preproc",
    "motion_estimates_and_correction",
    "motion_estimate_filter",
    "run",
];

/// Switch path enabling nuisance regression.
pub const NUISANCE_SWITCH: [&str; 3] =
    ["nuisance_corrections", "2-nuisance_regression", "run"];

/// Marker carried by identifiers of the explicitly unfiltered branch.
const UNFILTERED_MARKER: &str = "unfiltered-";

/// Producer-name prefix of motion-filter stages.
const MOTION_FILTER_PREFIX: &str = "motion_estimate_filter_";

/// Producer-name prefix of nuisance-regressor generation stages.
const NUISANCE_GENERATION_PREFIX: &str = "nuisance_regressors_generation";

/// Resolve fork-disambiguating entities for one resource.
///
/// Takes the identifier and output descriptor by value and returns the
/// rewritten pair; zero, one, or two entities are inserted depending on
/// which forking axes the configuration has active. The axes are
/// independent, so both may stamp the same resource.
pub fn name_fork(
    resource_idx: String,
    cfg: &Configuration,
    sidecar: &Sidecar,
    out: OutputSpec,
) -> (String, OutputSpec) {
    let (resource_idx, out) = resolve_motion_filter(resource_idx, cfg, &sidecar.variants, out);
    resolve_nuisance_regression(resource_idx, cfg, &sidecar.variants, out)
}

/// Motion-filter axis: entity `filt`.
fn resolve_motion_filter(
    mut resource_idx: String,
    cfg: &Configuration,
    variants: &VariantMap,
    out: OutputSpec,
) -> (String, OutputSpec) {
    if !cfg.switch_is_on(&MOTION_FILTER_SWITCH) {
        return (resource_idx, out);
    }

    let filt_value = if resource_idx.contains(UNFILTERED_MARKER) {
        // The explicitly unfiltered branch: drop the marker, pin the entity.
        resource_idx = resource_idx.replace(UNFILTERED_MARKER, "");
        "none".to_string()
    } else {
        first_filter_variant(variants).unwrap_or_else(|| "none".to_string())
    };

    tracing::debug!("{resource_idx}: filt-{filt_value}");
    apply_entity(resource_idx, out, "filt", Some(&filt_value))
}

/// First motion-filter producer among the relevant variant entries, minus
/// the stage prefix. `None` when no relevant entry has any producers.
fn first_filter_variant(variants: &VariantMap) -> Option<String> {
    MOVEMENT_FILTER_KEYS
        .iter()
        .filter_map(|key| variants.get(*key))
        .find_map(|producers| producers.first())
        .map(|producer| producer.replace(MOTION_FILTER_PREFIX, ""))
}

/// Nuisance-regression axis: entity `reg`.
///
/// Entered whenever the configuration has an entry at the switch path at
/// all; the on/off state only decides whether the literal `Off` joins the
/// candidate list, so a pure-off run still gets an explicit disambiguator.
fn resolve_nuisance_regression(
    resource_idx: String,
    cfg: &Configuration,
    variants: &VariantMap,
    out: OutputSpec,
) -> (String, OutputSpec) {
    if !cfg.has_switch(&NUISANCE_SWITCH) {
        return (resource_idx, out);
    }

    let mut candidates: Vec<String> = variants
        .values()
        .flatten()
        .filter(|producer| producer.starts_with(NUISANCE_GENERATION_PREFIX))
        .map(|producer| {
            producer
                .rsplit('_')
                .next()
                .unwrap_or(producer)
                .to_string()
        })
        .collect();

    if cfg.switch_is_off(&NUISANCE_SWITCH) {
        candidates.push("Off".to_string());
    }

    let reg_value = candidates.first().cloned();
    if let Some(value) = &reg_value {
        tracing::debug!("{resource_idx}: reg-{value}");
    }
    apply_entity(resource_idx, out, "reg", reg_value.as_deref())
}

/// Insert one fork entity into a resource identifier and its output
/// filename.
///
/// A `None` value leaves both untouched. Callers always use the returned
/// pair; the inputs are consumed, never mutated behind the caller's back.
pub fn apply_entity(
    resource_idx: String,
    mut out: OutputSpec,
    key: &str,
    value: Option<&str>,
) -> (String, OutputSpec) {
    match value {
        Some(value) => {
            let resource_idx = insert_entity(&resource_idx, key, value);
            out.filename = insert_entity(&out.filename, key, value);
            (resource_idx, out)
        }
        None => (resource_idx, out),
    }
}

/// Filter a produced-output map down to the requested keys.
///
/// Stages whose output set varies with configuration declare a superset of
/// keys; anything not actually produced is silently dropped, so one stage
/// definition covers every configuration. Duplicate and unknown keys are
/// allowed.
pub fn present_outputs<V: Clone>(
    outputs: &IndexMap<String, V>,
    keys: &[&str],
) -> IndexMap<String, V> {
    keys.iter()
        .filter_map(|key| outputs.get_key_value(*key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
