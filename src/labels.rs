use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const JUJU_APPLICATION: &str = "juju_application";
pub const JUJU_MODEL: &str = "juju_model";
pub const JUJU_MODEL_UUID: &str = "juju_model_uuid";
pub const JUJU_UNIT: &str = "juju_unit";

/// Labels every stream must carry for alert correlation and per-model filtering.
pub const TOPOLOGY_LABELS: [&str; 3] = [JUJU_APPLICATION, JUJU_MODEL, JUJU_MODEL_UUID];

/// A set of label name/value pairs identifying the origin of a stream.
///
/// Names are kept sorted so that equal sets always serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet(BTreeMap<String, String>);

impl LabelSet {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Value used when matching selectors: an absent label reads as "".
    pub fn value_or_empty(&self, name: &str) -> &str {
        self.get(name).unwrap_or("")
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Copy every pair of `other` into this set, overwriting existing names.
    pub fn merge(&mut self, other: &LabelSet) {
        for (name, value) in &other.0 {
            self.0.insert(name.clone(), value.clone());
        }
    }

    /// Copy the pairs of `other` whose names this set does not carry yet.
    pub fn merge_missing(&mut self, other: &LabelSet) {
        for (name, value) in &other.0 {
            self.0.entry(name.clone()).or_insert_with(|| value.clone());
        }
    }

    /// Names from `required` that are absent or empty in this set.
    pub fn missing<'a, I>(&self, required: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        required
            .into_iter()
            .filter(|name| self.get(name).map_or(true, str::is_empty))
            .cloned()
            .collect()
    }

    /// First label name that is not a valid identifier, if any.
    pub fn first_invalid_name(&self) -> Option<&str> {
        self.names().find(|name| !is_valid_label_name(name))
    }

    /// Canonical serialization used as the stream key.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint(self.to_string())
    }
}

impl<K, V> FromIterator<(K, V)> for LabelSet
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}=\"{}\"", name, escape_value(value))?;
        }
        f.write_str("}")
    }
}

/// Canonical string form of a [`LabelSet`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn escape_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            other => escaped.push(other),
        }
    }
    escaped
}
