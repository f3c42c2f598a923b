//! Declared schema version of an imported snapshot

use std::fmt;

use serde_json::Value;

/// Version a legacy snapshot claims to be in
///
/// Strings and JSON numbers are both accepted. A missing, null or empty
/// version counts as absent, which is how the earliest shape looked.
#[derive(Debug, Clone, PartialEq)]
pub enum DeclaredVersion {
    /// No version field
    Absent,
    /// Numeric version
    Number(f64),
    /// A version that is neither absent nor numeric
    Unrecognized(String),
}

impl DeclaredVersion {
    /// Read the `version` field of a snapshot
    pub fn from_field(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => DeclaredVersion::Absent,
            Some(Value::String(s)) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    DeclaredVersion::Absent
                } else {
                    match trimmed.parse::<f64>() {
                        Ok(n) if n.is_finite() => DeclaredVersion::Number(n),
                        _ => DeclaredVersion::Unrecognized(s.clone()),
                    }
                }
            }
            Some(Value::Number(n)) => match n.as_f64() {
                Some(n) => DeclaredVersion::Number(n),
                None => DeclaredVersion::Unrecognized(n.to_string()),
            },
            Some(other) => DeclaredVersion::Unrecognized(other.to_string()),
        }
    }

    /// Absent, or numerically at most `cutoff`
    pub fn is_at_most(&self, cutoff: f64) -> bool {
        match self {
            DeclaredVersion::Absent => true,
            DeclaredVersion::Number(n) => *n <= cutoff,
            DeclaredVersion::Unrecognized(_) => false,
        }
    }

    /// Absent, or numerically below `cutoff`
    pub fn is_below(&self, cutoff: f64) -> bool {
        match self {
            DeclaredVersion::Absent => true,
            DeclaredVersion::Number(n) => *n < cutoff,
            DeclaredVersion::Unrecognized(_) => false,
        }
    }
}

impl fmt::Display for DeclaredVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclaredVersion::Absent => write!(f, "absent"),
            DeclaredVersion::Number(n) => write!(f, "{}", n),
            DeclaredVersion::Unrecognized(s) => write!(f, "unrecognized ({})", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_declared_versions() {
        assert_eq!(DeclaredVersion::from_field(None), DeclaredVersion::Absent);
        assert_eq!(
            DeclaredVersion::from_field(Some(&json!(null))),
            DeclaredVersion::Absent
        );
        assert_eq!(
            DeclaredVersion::from_field(Some(&json!(""))),
            DeclaredVersion::Absent
        );
        assert_eq!(
            DeclaredVersion::from_field(Some(&json!("2"))),
            DeclaredVersion::Number(2.0)
        );
        assert_eq!(
            DeclaredVersion::from_field(Some(&json!(3))),
            DeclaredVersion::Number(3.0)
        );
        assert_eq!(
            DeclaredVersion::from_field(Some(&json!("beta"))),
            DeclaredVersion::Unrecognized("beta".to_string())
        );
    }

    #[test]
    fn test_cutoffs() {
        let absent = DeclaredVersion::Absent;
        assert!(absent.is_at_most(1.0));
        assert!(absent.is_below(3.0));

        let v1 = DeclaredVersion::Number(1.0);
        assert!(v1.is_at_most(1.0));
        assert!(v1.is_below(3.0));

        let v2 = DeclaredVersion::Number(2.0);
        assert!(!v2.is_at_most(1.0));
        assert!(v2.is_below(3.0));

        let v3 = DeclaredVersion::Number(3.0);
        assert!(!v3.is_at_most(1.0));
        assert!(!v3.is_below(3.0));

        let odd = DeclaredVersion::Unrecognized("beta".to_string());
        assert!(!odd.is_at_most(1.0));
        assert!(!odd.is_below(3.0));
    }
}
