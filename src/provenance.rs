//! Lineage values recorded for every resource flowing through the graph.
//!
//! Each produced resource carries a [`Provenance`] describing which chain of
//! stages computed it. Forked stages produce one lineage per branch, which is
//! what lets the naming layer tell otherwise identical derivatives apart.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A lineage token that does not follow the `{resource}:{producer}` grammar.
///
/// Indicates an upstream construction bug; graph construction halts with the
/// offending token rather than guessing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("malformed lineage token '{0}', expected '{{resource}}:{{producer}}'")]
pub struct MalformedSource(pub String);

/// Recorded lineage of a pipeline resource.
///
/// Producers wrap the lineages of everything they consumed in a [`Derived`]
/// sequence and append their own [`Single`] token as the final element, so
/// nesting depth grows with the pipeline and mixes all shapes freely.
/// [`Pooled`] only shows up while lineages are aggregated across branches;
/// producers never construct it directly.
///
/// [`Single`]: Provenance::Single
/// [`Derived`]: Provenance::Derived
/// [`Pooled`]: Provenance::Pooled
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Provenance {
    /// A single `{resource}:{producer}` token.
    Single(String),
    /// Derived from all of these upstream lineages, the last element being
    /// the producing stage's own token.
    Derived(Vec<Provenance>),
    /// Unordered union of lineages.
    Pooled(BTreeSet<Provenance>),
}

impl Provenance {
    /// Token for `resource` as produced by `producer`.
    pub fn single(resource: &str, producer: &str) -> Self {
        Provenance::Single(format!("{resource}:{producer}"))
    }

    /// Flatten to the set of `{resource}:{producer}` tokens reachable
    /// anywhere within this value.
    ///
    /// The result is a set, so sequence order at any nesting level never
    /// affects it. Used to answer "did stage X contribute to this value".
    pub fn source_set(&self) -> BTreeSet<&str> {
        let mut set = BTreeSet::new();
        self.collect_sources(&mut set);
        set
    }

    fn collect_sources<'a>(&'a self, set: &mut BTreeSet<&'a str>) {
        match self {
            Provenance::Single(token) => {
                set.insert(token.as_str());
            }
            Provenance::Derived(items) => {
                for item in items {
                    item.collect_sources(set);
                }
            }
            Provenance::Pooled(items) => {
                for item in items {
                    item.collect_sources(set);
                }
            }
        }
    }

    /// Check every token against the `{resource}:{producer}` grammar.
    ///
    /// Run this at deserialization boundaries, before a lineage enters the
    /// graph.
    pub fn validate(&self) -> Result<(), MalformedSource> {
        match self {
            Provenance::Single(token) => match token.split_once(':') {
                Some((resource, producer))
                    if !resource.is_empty() && !producer.is_empty() && !producer.contains(':') =>
                {
                    Ok(())
                }
                _ => Err(MalformedSource(token.clone())),
            },
            Provenance::Derived(items) => items.iter().try_for_each(Self::validate),
            Provenance::Pooled(items) => items.iter().try_for_each(Self::validate),
        }
    }

    /// The most recent token: the rightmost leaf of the lineage.
    ///
    /// By convention this is the producing stage itself. `None` for an empty
    /// sequence or pool.
    pub fn last_source(&self) -> Option<&str> {
        match self {
            Provenance::Single(token) => Some(token.as_str()),
            Provenance::Derived(items) => items.last()?.last_source(),
            Provenance::Pooled(items) => items.iter().next_back()?.last_source(),
        }
    }
}

/// Motion-correction tools recognized in lineage tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionTool {
    Mcflirt,
    Volreg,
}

impl MotionTool {
    pub fn as_str(self) -> &'static str {
        match self {
            MotionTool::Mcflirt => "mcflirt",
            MotionTool::Volreg => "3dvolreg",
        }
    }
}

/// Report which motion-correction tool shows up in a lineage, if any.
///
/// Scans the producers of the flattened lineage; the QC stage uses this to
/// pick tool-specific displacement inputs.
pub fn motion_tool(prov: &Provenance) -> Option<MotionTool> {
    for token in prov.source_set() {
        let producer = token.split_once(':').map_or(token, |(_, producer)| producer);
        if producer.contains("mcflirt") {
            return Some(MotionTool::Mcflirt);
        }
        if producer.contains("3dvolreg") {
            return Some(MotionTool::Volreg);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn single(token: &str) -> Provenance {
        Provenance::Single(token.to_string())
    }

    fn derived(items: Vec<Provenance>) -> Provenance {
        Provenance::Derived(items)
    }

    /// The ingress/reorient/truncate chain shared by the motion examples.
    fn preproc_chain() -> Provenance {
        derived(vec![
            single("bold:func_ingress"),
            single("desc-preproc_bold:func_reorient"),
            single("desc-preproc_bold:func_truncate"),
        ])
    }

    fn motion_branch() -> Provenance {
        derived(vec![
            preproc_chain(),
            derived(vec![
                single("bold:func_ingress"),
                single("desc-reorient_bold:func_reorient"),
            ]),
            single("motion-basefile:get_motion_ref_fmriprep_reference"),
        ])
    }

    #[test]
    fn test_source_set_leaf() {
        let leaf = single("bold:func_ingress");
        assert_eq!(
            leaf.source_set(),
            BTreeSet::from(["bold:func_ingress"])
        );
    }

    #[test]
    fn test_source_set_deeply_nested() {
        let slice_time = derived(vec![
            preproc_chain(),
            derived(vec![single("TR:func_metadata_ingress")]),
            derived(vec![single("tpattern:func_metadata_ingress")]),
            single("desc-preproc_bold:func_slice_time"),
        ]);
        let motion_correct = derived(vec![
            slice_time,
            motion_branch(),
            single("desc-preproc_bold:motion_correction_only_mcflirt"),
        ]);
        let masked = derived(vec![
            motion_correct,
            derived(vec![single("FSL-AFNI-bold-ref:template_resample")]),
            derived(vec![single("FSL-AFNI-brain-mask:template_resample")]),
            single("space-bold_desc-brain_mask:bold_mask_fsl_afni"),
            single("desc-preproc_bold:bold_masking"),
        ]);

        let expected: BTreeSet<&str> = BTreeSet::from([
            "FSL-AFNI-bold-ref:template_resample",
            "FSL-AFNI-brain-mask:template_resample",
            "TR:func_metadata_ingress",
            "bold:func_ingress",
            "desc-preproc_bold:bold_masking",
            "desc-preproc_bold:func_reorient",
            "desc-preproc_bold:func_slice_time",
            "desc-preproc_bold:func_truncate",
            "desc-preproc_bold:motion_correction_only_mcflirt",
            "desc-reorient_bold:func_reorient",
            "motion-basefile:get_motion_ref_fmriprep_reference",
            "space-bold_desc-brain_mask:bold_mask_fsl_afni",
            "tpattern:func_metadata_ingress",
        ]);
        assert_eq!(masked.source_set(), expected);
    }

    #[test]
    fn test_source_set_order_independent() {
        let forward = derived(vec![
            single("a:one"),
            derived(vec![single("b:two"), single("c:three")]),
        ]);
        let backward = derived(vec![
            derived(vec![single("c:three"), single("b:two")]),
            single("a:one"),
        ]);
        assert_eq!(forward.source_set(), backward.source_set());
    }

    #[test]
    fn test_source_set_through_pool() {
        let pool = Provenance::Pooled(BTreeSet::from([
            motion_branch(),
            single("bold:func_ingress"),
        ]));
        assert!(pool.source_set().contains("bold:func_ingress"));
        assert!(
            pool.source_set()
                .contains("motion-basefile:get_motion_ref_fmriprep_reference")
        );
    }

    #[test]
    fn test_source_set_size_bounded_by_leaves() {
        // Two copies of the same chain collapse into one set of tokens.
        let doubled = derived(vec![preproc_chain(), preproc_chain()]);
        assert_eq!(doubled.source_set().len(), 3);
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        assert_eq!(motion_branch().validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_missing_producer() {
        let bad = derived(vec![single("bold:func_ingress"), single("orphan")]);
        assert_eq!(
            bad.validate(),
            Err(MalformedSource("orphan".to_string()))
        );
    }

    #[test]
    fn test_validate_rejects_extra_colon() {
        assert!(single("a:b:c").validate().is_err());
        assert!(single(":producer").validate().is_err());
        assert!(single("resource:").validate().is_err());
    }

    #[test]
    fn test_last_source_is_rightmost_leaf() {
        assert_eq!(
            motion_branch().last_source(),
            Some("motion-basefile:get_motion_ref_fmriprep_reference")
        );
        assert_eq!(Provenance::Derived(vec![]).last_source(), None);
    }

    #[test]
    fn test_motion_tool_found_in_nested_lineage() {
        let lineage = derived(vec![
            motion_branch(),
            single("desc-preproc_bold:motion_correction_only_mcflirt"),
        ]);
        assert_eq!(motion_tool(&lineage), Some(MotionTool::Mcflirt));
        assert_eq!(motion_tool(&motion_branch()), None);
    }

    #[test]
    fn test_deserialize_nested_json() {
        let lineage: Provenance = serde_json::from_str(
            r#"[["bold:func_ingress", "desc-preproc_bold:func_reorient"],
                "desc-preproc_bold:func_truncate"]"#,
        )
        .expect("nested lineage should deserialize");
        assert_eq!(lineage.validate(), Ok(()));
        assert_eq!(lineage.source_set().len(), 3);
        assert!(serde_json::from_str::<Provenance>("42").is_err());
    }
}
