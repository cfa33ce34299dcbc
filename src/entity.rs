//! The underscore-delimited `key-value` entity grammar used by derivative
//! names and filenames.

use indexmap::IndexMap;

/// Insert a `{key}-{value}` entity into a resource name.
///
/// An existing entity with the same key is replaced in place; otherwise the
/// new entity lands immediately before the `desc` entity when there is one
/// (`desc` conventionally sits last, right before the suffix), else before
/// the final segment.
///
/// ```
/// use fornix::entity::insert_entity;
///
/// assert_eq!(
///     insert_entity("run-1_desc-preproc_bold", "reg", "default"),
///     "run-1_reg-default_desc-preproc_bold",
/// );
/// ```
pub fn insert_entity(resource: &str, key: &str, value: &str) -> String {
    let token = format!("{key}-{value}");
    let prefix = format!("{key}-");
    let mut segments: Vec<&str> = resource.split('_').collect();

    if let Some(existing) = segments.iter_mut().find(|s| s.starts_with(&prefix)) {
        *existing = token.as_str();
        return segments.join("_");
    }

    let slot = segments
        .iter()
        .position(|s| s.starts_with("desc-"))
        .unwrap_or_else(|| segments.len().saturating_sub(1));
    segments.insert(slot, token.as_str());
    segments.join("_")
}

/// Parse a resource or file name into its ordered `key -> value` entities.
///
/// Only the final path component is considered. Dashless segments are
/// recorded under the `suffix` key. A missing `space` entity defaults to
/// `native`, which is what downstream QC columns expect for underivatized
/// functional data.
pub fn parse_entities(name: &str) -> IndexMap<String, String> {
    let stem = name.rsplit('/').next().unwrap_or(name);
    let mut entities = IndexMap::new();

    for segment in stem.split('_') {
        match segment.split_once('-') {
            Some((key, value)) => entities.insert(key.to_string(), value.to_string()),
            None => entities.insert("suffix".to_string(), segment.to_string()),
        };
    }

    entities
        .entry("space".to_string())
        .or_insert_with(|| "native".to_string());
    entities
}
