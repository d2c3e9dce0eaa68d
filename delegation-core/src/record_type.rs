//! Record-type inference: when a strategy spans multiple searches, the set
//! of record types they could all run against must intersect down to
//! exactly one. The catalog lookup that produces each search's candidate
//! record types lives outside this crate; this module only does the
//! intersection and reports what went wrong when it doesn't converge.

use std::collections::BTreeSet;

use crate::error::DelegationError;

/// Resolve the single record type a strategy's searches all share.
///
/// `candidates_by_search` maps each search name to the record types it is
/// valid against. Returns the one record type common to every search.
///
/// Errors with `VALIDATION_ERROR` if the intersection is empty (no shared
/// record type) or contains more than one candidate (ambiguous).
pub fn resolve_record_type(
    candidates_by_search: &[(&str, &[&str])],
) -> Result<String, DelegationError> {
    let mut searches = candidates_by_search.iter();
    let Some((_, first)) = searches.next() else {
        return Err(DelegationError::ValidationError(
            "strategy has no searches to resolve a record type from".to_string(),
        ));
    };

    let mut intersection: BTreeSet<&str> = first.iter().copied().collect();
    for (_, candidates) in searches {
        let this: BTreeSet<&str> = candidates.iter().copied().collect();
        intersection = intersection.intersection(&this).copied().collect();
        if intersection.is_empty() {
            break;
        }
    }

    match intersection.len() {
        0 => Err(DelegationError::ValidationError(
            "no record type is common to every search in this strategy".to_string(),
        )),
        1 => Ok(intersection.into_iter().next().unwrap().to_string()),
        _ => {
            let options = intersection.into_iter().collect::<Vec<_>>().join(", ");
            Err(DelegationError::ValidationError(format!(
                "strategy's searches share more than one record type: {options}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_the_common_record_type() {
        let candidates = [
            ("search genes", ["gene", "transcript"].as_slice()),
            ("search variants", ["gene", "snp"].as_slice()),
        ];
        assert_eq!(resolve_record_type(&candidates).unwrap(), "gene");
    }

    #[test]
    fn single_search_resolves_to_its_only_candidate() {
        let candidates = [("search genes", ["gene"].as_slice())];
        assert_eq!(resolve_record_type(&candidates).unwrap(), "gene");
    }

    #[test]
    fn empty_intersection_is_a_validation_error() {
        let candidates = [
            ("search genes", ["gene"].as_slice()),
            ("search variants", ["snp"].as_slice()),
        ];
        let err = resolve_record_type(&candidates).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn ambiguous_intersection_is_a_validation_error() {
        let candidates = [
            ("search a", ["gene", "transcript"].as_slice()),
            ("search b", ["gene", "transcript"].as_slice()),
        ];
        let err = resolve_record_type(&candidates).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn no_searches_is_a_validation_error() {
        let err = resolve_record_type(&[]).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
