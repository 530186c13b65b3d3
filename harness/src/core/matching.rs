//! Unit-name normalization and matching.
//!
//! Until-test stops and run-history lookups both need to match
//! operator-supplied names against unit identities that vary in casing and
//! separators. One normalizer is applied consistently at both write and
//! read time instead of ad hoc per-call variants.

use super::model::Test;

/// Canonical form for name comparison: lowercase with spaces, underscores
/// and hyphens stripped.
pub fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Match an operator-supplied until-test target against a test.
///
/// Tried in order: exact name, id, dotted qualified id, then — permissively
/// — substring against all forms. The substring fallback can match
/// unintended units when names are substrings of each other (e.g. "Edit"
/// matching both "Edit Service" and "Edit Note"); callers stop at the
/// first planned match.
pub fn matches_until_target(target: &str, test: &Test) -> bool {
    let target = normalize(target);
    if target.is_empty() {
        return false;
    }
    let forms = [
        normalize(&test.name),
        normalize(&test.id),
        normalize(&test.full_id()),
    ];
    if forms.iter().any(|form| *form == target) {
        return true;
    }
    forms.iter().any(|form| form.contains(&target))
}

/// Match a query against a recorded result name.
///
/// Tolerates exact, case-insensitive, space/underscore-normalized and
/// subcategory-prefixed variants (`"events/Schedule Event"` matches a query
/// of `"schedule_event"`).
pub fn result_name_matches(query: &str, result_name: &str) -> bool {
    if query == result_name {
        return true;
    }
    let query = normalize(query);
    if query.is_empty() {
        return false;
    }
    if normalize(result_name) == query {
        return true;
    }
    match result_name.rsplit('/').next() {
        Some(suffix) => normalize(suffix) == query,
        None => false,
    }
}

/// Flatten a possibly subcategory-prefixed unit name into a filesystem-safe
/// name with no path separators.
pub fn flatten_unit_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ' ' => '_',
            other => other,
        })
        .collect()
}
