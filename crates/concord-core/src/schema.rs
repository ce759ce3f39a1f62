//! Output shape conflict detection
//!
//! Providers share a prompt cache only across requests with an identical
//! shape prefix. Branches of one fork that declare different output shapes
//! silently lose all cache reuse; [`detect_schema_conflicts`] turns that into
//! a visible report.

use concord_owned::ShapeSignature;
use serde::{Deserialize, Serialize};

/// Result of shape conflict detection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaConflictReport {
    /// More than one distinct signature was found
    pub has_conflict: bool,

    /// Human-readable summary
    pub message: String,

    /// Branch indices grouped by signature, in first-seen order
    pub conflicting_branch_groups: Vec<Vec<usize>>,

    /// Remediation hints
    pub suggestions: Vec<String>,
}

/// Group branches by declared output signature
///
/// Branches without a signature take no part in detection.
#[must_use]
pub fn detect_schema_conflicts<'a>(
    signatures: impl IntoIterator<Item = Option<&'a ShapeSignature>>,
) -> SchemaConflictReport {
    let mut groups: Vec<(&ShapeSignature, Vec<usize>)> = Vec::new();
    for (index, signature) in signatures.into_iter().enumerate() {
        let Some(signature) = signature else { continue };
        match groups.iter_mut().find(|(s, _)| *s == signature) {
            Some((_, members)) => members.push(index),
            None => groups.push((signature, vec![index])),
        }
    }

    if groups.len() <= 1 {
        return SchemaConflictReport::default();
    }

    let described = groups
        .iter()
        .map(|(s, members)| format!("{s} for branches {members:?}"))
        .collect::<Vec<_>>()
        .join(", ");
    let message = format!(
        "branches declare {} different output shapes ({described}); \
         prompt cache will not be shared across these groups",
        groups.len()
    );

    SchemaConflictReport {
        has_conflict: true,
        message,
        suggestions: vec![
            "use one output shape for every branch and post-process per branch".to_string(),
            "split branches with different shapes into separate forks".to_string(),
            "use the fast-parallel strategy if cache sharing is not needed".to_string(),
        ],
        conflicting_branch_groups: groups.into_iter().map(|(_, members)| members).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn identical_signatures_do_not_conflict() {
        let s = ShapeSignature::from_descriptor("{label: string}");
        let report = detect_schema_conflicts([Some(&s), Some(&s), Some(&s)]);
        assert!(!report.has_conflict);
        assert!(report.conflicting_branch_groups.is_empty());
    }

    #[test]
    fn mismatched_signatures_are_grouped() {
        let a = ShapeSignature::from_descriptor("{label: string}").with_label("Label");
        let b = ShapeSignature::from_descriptor("{score: number}").with_label("Score");
        let report = detect_schema_conflicts([Some(&a), Some(&b), Some(&a), Some(&b)]);

        assert!(report.has_conflict);
        assert_eq!(report.conflicting_branch_groups, vec![vec![0, 2], vec![1, 3]]);
        assert!(report.message.contains("2 different output shapes"));
        assert!(report.message.contains("Label"));
        assert_eq!(report.suggestions.len(), 3);
    }

    #[test]
    fn unsigned_branches_are_ignored() {
        let a = ShapeSignature::from_descriptor("a");
        let report = detect_schema_conflicts([Some(&a), None, Some(&a)]);
        assert!(!report.has_conflict);

        let report = detect_schema_conflicts([None, None]);
        assert!(!report.has_conflict);
    }

    #[test]
    fn label_does_not_affect_equality() {
        let a = ShapeSignature::from_descriptor("x").with_label("one");
        let b = ShapeSignature::from_descriptor("x").with_label("two");
        assert!(!detect_schema_conflicts([Some(&a), Some(&b)]).has_conflict);
    }
}
