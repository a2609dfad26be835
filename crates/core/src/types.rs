use std::fmt;

use serde::{Deserialize, Serialize};

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Prefix carried by every generated run identifier.
const RUN_ID_PREFIX: &str = "r_";

/// Opaque, immutable identifier of a single valuation run.
///
/// Generated ids look like `r_` followed by 32 lowercase hex characters.
/// Ids parsed from requests or disk are accepted as-is so that lookups of
/// unknown ids simply miss instead of failing to parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Generate a fresh random run id.
    pub fn generate() -> Self {
        Self(format!("{RUN_ID_PREFIX}{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id is safe to use as a single path component.
    pub fn is_path_safe(&self) -> bool {
        !self.0.is_empty()
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }
}

impl From<String> for RunId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_prefixed_and_unique() {
        let a = RunId::generate();
        let b = RunId::generate();
        assert!(a.as_str().starts_with("r_"));
        assert_eq!(a.as_str().len(), 34);
        assert_ne!(a, b);
    }

    #[test]
    fn path_safety() {
        assert!(RunId::generate().is_path_safe());
        assert!(!RunId::from("../etc").is_path_safe());
        assert!(!RunId::from("a/b").is_path_safe());
        assert!(!RunId::from("").is_path_safe());
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = RunId::from("r_abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"r_abc\"");
    }
}
