//! Resource tags.
use std::collections::BTreeMap;

/// Key-value tags attached to a resource.
pub type Tags = BTreeMap<String, String>;

/// Prefix of tags managed by AWS itself, which can be neither set nor removed.
const SYSTEM_TAG_PREFIX: &str = "aws:";

/// Layers the resource's own tags over the provider defaults.
pub fn merge(defaults: &Tags, tags: &Tags) -> Tags {
    let mut merged = defaults.clone();
    merged.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Drops tags that AWS manages on its own.
pub fn without_system_tags(tags: impl IntoIterator<Item = (String, String)>) -> Tags {
    tags.into_iter()
        .filter(|(key, _)| !key.starts_with(SYSTEM_TAG_PREFIX))
        .collect()
}

/// The calls needed to move a resource from one set of tags to another.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TagChanges {
    /// Keys to untag.
    pub removed: Vec<String>,
    /// Tags to add or overwrite.
    pub upserted: Tags,
}

impl TagChanges {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.upserted.is_empty()
    }
}

pub fn diff(old: &Tags, new: &Tags) -> TagChanges {
    let removed = old
        .keys()
        .filter(|key| !new.contains_key(*key) && !key.starts_with(SYSTEM_TAG_PREFIX))
        .cloned()
        .collect();
    let upserted = new
        .iter()
        .filter(|(key, value)| old.get(*key) != Some(*value))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    TagChanges { removed, upserted }
}
