//! Combine operators for strategy building.

use serde::{Deserialize, Serialize};

/// Set operation for combining two step results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CombineOp {
    /// IDs in common (AND) - intersection.
    Intersect,
    /// Combined (OR) - union.
    Union,
    /// Left minus right - IDs in left but not in right.
    MinusLeft,
    /// Right minus left - IDs in right but not in left.
    MinusRight,
    /// Genomic colocation - genes near each other.
    Colocate,
}

impl CombineOp {
    /// Human-readable label for display in a strategy graph.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Intersect => "IDs in common (AND)",
            Self::Union => "Combined (OR)",
            Self::MinusLeft => "In left, not in right",
            Self::MinusRight => "In right, not in left",
            Self::Colocate => "Genomic colocation",
        }
    }

    /// WDK boolean operator name for this op, if it has one.
    ///
    /// `Colocate` has no boolean-operator equivalent in WDK; it is applied
    /// through a separate colocation mechanism instead.
    pub fn wdk_operator(&self) -> Option<&'static str> {
        match self {
            Self::Intersect => Some("INTERSECT"),
            Self::Union => Some("UNION"),
            Self::MinusLeft => Some("MINUS"),
            Self::MinusRight => Some("RMINUS"),
            Self::Colocate => None,
        }
    }

    /// Parse an operator from a user- or planner-supplied string.
    ///
    /// Accepts the canonical enum names plus a set of common aliases
    /// (`AND`, `OR`, `NOT`, `LMINUS`, `LONLY`, ...), normalized by
    /// upper-casing and collapsing `-`/` ` to `_`.
    pub fn parse(value: &str) -> Result<Self, String> {
        let raw = value.trim();
        if raw.is_empty() {
            return Err("Unknown operator: <empty>".to_string());
        }

        let norm = raw.to_uppercase().replace(['-', ' '], "_");
        let op = match norm.as_str() {
            "AND" | "INTERSECTION" | "INTERSECT" => Self::Intersect,
            "OR" | "PLUS" | "UNION" => Self::Union,
            "MINUS" | "NOT" | "MINUS_LEFT" | "LEFT_MINUS" | "LMINUS" | "LONLY" => Self::MinusLeft,
            "MINUS_RIGHT" | "RIGHT_MINUS" | "RMINUS" | "RONLY" => Self::MinusRight,
            "COLOCATE" => Self::Colocate,
            _ => return Err(format!("Unknown operator: {value}")),
        };
        Ok(op)
    }
}

/// Parameters for the colocation operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColocationParams {
    pub upstream: i64,
    pub downstream: i64,
    pub strand: Strand,
}

impl Default for ColocationParams {
    fn default() -> Self {
        Self {
            upstream: 0,
            downstream: 0,
            strand: Strand::Both,
        }
    }
}

/// Strand constraint for a colocation combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strand {
    Same,
    Opposite,
    Both,
}

impl ColocationParams {
    /// Validate the parameters, returning a list of human-readable problems.
    ///
    /// An empty list means the parameters are valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.upstream < 0 {
            errors.push("Upstream distance must be non-negative".to_string());
        }
        if self.downstream < 0 {
            errors.push("Downstream distance must be non-negative".to_string());
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_names() {
        assert_eq!(CombineOp::parse("INTERSECT").unwrap(), CombineOp::Intersect);
        assert_eq!(CombineOp::parse("union").unwrap(), CombineOp::Union);
        assert_eq!(CombineOp::parse("COLOCATE").unwrap(), CombineOp::Colocate);
    }

    #[test]
    fn parses_aliases() {
        assert_eq!(CombineOp::parse("AND").unwrap(), CombineOp::Intersect);
        assert_eq!(CombineOp::parse("or").unwrap(), CombineOp::Union);
        assert_eq!(CombineOp::parse("left-minus").unwrap(), CombineOp::MinusLeft);
        assert_eq!(CombineOp::parse("RONLY").unwrap(), CombineOp::MinusRight);
        assert_eq!(CombineOp::parse("not").unwrap(), CombineOp::MinusLeft);
    }

    #[test]
    fn rejects_unknown_and_empty() {
        assert!(CombineOp::parse("").is_err());
        assert!(CombineOp::parse("   ").is_err());
        assert!(CombineOp::parse("XOR").is_err());
    }

    #[test]
    fn colocate_has_no_wdk_operator() {
        assert_eq!(CombineOp::Colocate.wdk_operator(), None);
        assert_eq!(CombineOp::Intersect.wdk_operator(), Some("INTERSECT"));
        assert_eq!(CombineOp::MinusLeft.wdk_operator(), Some("MINUS"));
        assert_eq!(CombineOp::MinusRight.wdk_operator(), Some("RMINUS"));
    }

    #[test]
    fn colocation_validate_flags_negative_distances() {
        let bad = ColocationParams {
            upstream: -1,
            downstream: -5,
            strand: Strand::Both,
        };
        let errors = bad.validate();
        assert_eq!(errors.len(), 2);

        let ok = ColocationParams::default();
        assert!(ok.validate().is_empty());
    }
}
