//! PFAS status resolution.
//!
//! Two pure rules decide what a node in the material/chemical graph reports:
//!
//! - **Aggregation**: a material's status is derived from all of its chemical
//!   children. YES dominates PENDING, which dominates NO. The reported source is
//!   the most preferred source among the children that share the winning
//!   status.
//! - **Assertion merge**: when new evidence about a chemical arrives, a fixed
//!   table keyed by `(existing source, new source)` decides which source wins,
//!   or rejects the pair outright.
//!
//! Both are recomputed from scratch on every change, so the result never
//! depends on the order in which evidence arrived.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PfasStatus {
    Yes,
    No,
    Pending,
}

impl PfasStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "YES",
            Self::No => "NO",
            Self::Pending => "PENDING",
        }
    }
}

impl fmt::Display for PfasStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PfasStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "YES" => Ok(Self::Yes),
            "NO" => Ok(Self::No),
            "PENDING" => Ok(Self::Pending),
            other => Err(format!("Unknown PFAS status: {}", other)),
        }
    }
}

/// Provenance of a status assertion.
///
/// `Oecd` is the authoritative registry, `Vai` is automated extraction from
/// documents, `Manual` is an operator entry. `Echa` can be stored and read
/// back but has no merge rules of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InformationSource {
    #[serde(alias = "OPENAI")]
    Vai,
    Oecd,
    Echa,
    Manual,
    None,
}

impl InformationSource {
    pub const ALL: [InformationSource; 5] = [
        InformationSource::Vai,
        InformationSource::Oecd,
        InformationSource::Echa,
        InformationSource::Manual,
        InformationSource::None,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vai => "VAI",
            Self::Oecd => "OECD",
            Self::Echa => "ECHA",
            Self::Manual => "MANUAL",
            Self::None => "NONE",
        }
    }
}

impl fmt::Display for InformationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InformationSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "VAI" | "OPENAI" => Ok(Self::Vai),
            "OECD" => Ok(Self::Oecd),
            "ECHA" => Ok(Self::Echa),
            "MANUAL" => Ok(Self::Manual),
            "NONE" => Ok(Self::None),
            other => Err(format!("Unknown information source: {}", other)),
        }
    }
}

/// A status together with the source that vouches for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusAssessment {
    pub status: PfasStatus,
    pub source: InformationSource,
}

impl StatusAssessment {
    pub const fn new(status: PfasStatus, source: InformationSource) -> Self {
        Self { status, source }
    }

    /// What a freshly observed node starts with.
    pub const fn unknown() -> Self {
        Self::new(PfasStatus::Pending, InformationSource::None)
    }
}

impl fmt::Display for StatusAssessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.status, self.source)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Status transition from {from} to {to} is not possible")]
    IllegalStatusTransition {
        from: InformationSource,
        to: InformationSource,
    },
}

const PENDING_PREFERENCE: [InformationSource; 3] = [
    InformationSource::Oecd,
    InformationSource::Vai,
    InformationSource::Manual,
];

const CONFIRMED_PREFERENCE: [InformationSource; 3] = [
    InformationSource::Vai,
    InformationSource::Oecd,
    InformationSource::Manual,
];

/// Derives a parent's status from its full child set.
pub fn resolve_parent<'a, I>(children: I) -> StatusAssessment
where
    I: IntoIterator<Item = &'a StatusAssessment>,
{
    let children: Vec<&StatusAssessment> = children.into_iter().collect();
    if children.is_empty() {
        return StatusAssessment::unknown();
    }

    let has = |status: PfasStatus| children.iter().any(|child| child.status == status);
    let status = if has(PfasStatus::Yes) {
        PfasStatus::Yes
    } else if has(PfasStatus::Pending) {
        PfasStatus::Pending
    } else {
        PfasStatus::No
    };

    let preference = match status {
        PfasStatus::Pending => &PENDING_PREFERENCE,
        PfasStatus::Yes | PfasStatus::No => &CONFIRMED_PREFERENCE,
    };

    let source = preference
        .iter()
        .copied()
        .find(|candidate| {
            children
                .iter()
                .any(|child| child.status == status && child.source == *candidate)
        })
        .unwrap_or(InformationSource::None);

    StatusAssessment::new(status, source)
}

/// Which source survives when `new` evidence lands on a node sourced from
/// `existing`. `None` marks a pair that must never be merged.
pub fn transition(
    existing: InformationSource,
    new: InformationSource,
) -> Option<InformationSource> {
    use InformationSource::*;

    match (existing, new) {
        // No evidence leaves things as they are.
        (current, None) => Some(current),
        (None, incoming) => Some(incoming),

        // ECHA has no rows beyond the no-evidence ones above.
        (Echa, _) | (_, Echa) => Option::None,

        // Manual entries and the registry never override each other.
        (Manual, Oecd) | (Oecd, Manual) => Option::None,

        (Vai, incoming) => Some(incoming),
        (Manual, Vai | Manual) => Some(Manual),
        (Oecd, Vai | Oecd) => Some(Oecd),
    }
}

/// Applies new evidence to a node's current assessment.
///
/// The new status is taken only when the new source wins and either replaces
/// a different source or is `Vai`. Repeating a `Manual` or `Oecd` assertion
/// keeps the status already recorded; fresh extraction output replaces an
/// older extraction.
pub fn merge_assertion(
    existing: StatusAssessment,
    new: StatusAssessment,
) -> Result<StatusAssessment, ResolutionError> {
    let source = transition(existing.source, new.source).ok_or(
        ResolutionError::IllegalStatusTransition {
            from: existing.source,
            to: new.source,
        },
    )?;

    let adopts = source == new.source
        && (existing.source != new.source || new.source == InformationSource::Vai);
    let status = if adopts { new.status } else { existing.status };

    Ok(StatusAssessment::new(status, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use InformationSource::*;
    use PfasStatus::*;

    fn a(status: PfasStatus, source: InformationSource) -> StatusAssessment {
        StatusAssessment::new(status, source)
    }

    #[test]
    fn test_aggregation_status_lattice() {
        assert_eq!(resolve_parent(&[a(Yes, Vai), a(Pending, Vai)]).status, Yes);
        assert_eq!(resolve_parent(&[a(Pending, Vai), a(No, Vai)]).status, Pending);
        assert_eq!(resolve_parent(&[a(No, Vai), a(No, Oecd)]).status, No);
    }

    #[test]
    fn test_aggregation_source_preference_depends_on_status() {
        let children = [a(Pending, Vai), a(Pending, Oecd), a(No, Manual)];
        assert_eq!(resolve_parent(&children), a(Pending, Oecd));

        let children = [a(Yes, Oecd), a(Yes, Vai), a(Pending, Manual)];
        assert_eq!(resolve_parent(&children), a(Yes, Vai));

        let children = [a(No, Manual), a(No, Oecd)];
        assert_eq!(resolve_parent(&children), a(No, Oecd));
    }

    #[test]
    fn test_aggregation_only_counts_children_with_winning_status() {
        // The VAI child is NO, so it cannot lend its source to a YES parent.
        let children = [a(No, Vai), a(Yes, Manual)];
        assert_eq!(resolve_parent(&children), a(Yes, Manual));
    }

    #[test]
    fn test_aggregation_unlisted_sources_fall_back_to_none() {
        assert_eq!(resolve_parent(&[a(Pending, None)]), a(Pending, None));
        assert_eq!(resolve_parent(&[a(Yes, Echa)]), a(Yes, None));
    }

    #[test]
    fn test_empty_children_are_unknown() {
        let empty: [StatusAssessment; 0] = [];
        assert_eq!(resolve_parent(&empty), StatusAssessment::unknown());
    }

    #[test]
    fn test_transition_table() {
        assert_eq!(transition(Vai, Vai), Some(Vai));
        assert_eq!(transition(Vai, Manual), Some(Manual));
        assert_eq!(transition(Vai, Oecd), Some(Oecd));
        assert_eq!(transition(Vai, None), Some(Vai));

        assert_eq!(transition(Manual, Vai), Some(Manual));
        assert_eq!(transition(Manual, Manual), Some(Manual));
        assert_eq!(transition(Manual, Oecd), Option::None);
        assert_eq!(transition(Manual, None), Some(Manual));

        assert_eq!(transition(Oecd, Vai), Some(Oecd));
        assert_eq!(transition(Oecd, Manual), Option::None);
        assert_eq!(transition(Oecd, Oecd), Some(Oecd));
        assert_eq!(transition(Oecd, None), Some(Oecd));

        assert_eq!(transition(None, Vai), Some(Vai));
        assert_eq!(transition(None, Manual), Some(Manual));
        assert_eq!(transition(None, Oecd), Some(Oecd));
        assert_eq!(transition(None, None), Some(None));
    }

    #[test]
    fn test_echa_only_merges_with_no_evidence() {
        assert_eq!(transition(Echa, None), Some(Echa));
        assert_eq!(transition(None, Echa), Some(Echa));
        for other in [Vai, Oecd, Manual, Echa] {
            assert_eq!(transition(Echa, other), Option::None);
            assert_eq!(transition(other, Echa), Option::None);
        }

        let result = merge_assertion(a(No, Oecd), a(Yes, Echa));
        assert_eq!(
            result,
            Err(ResolutionError::IllegalStatusTransition { from: Oecd, to: Echa })
        );
    }

    #[test]
    fn test_manual_onto_registry_is_illegal() {
        let result = merge_assertion(a(No, Oecd), a(Yes, Manual));
        assert_eq!(
            result,
            Err(ResolutionError::IllegalStatusTransition { from: Oecd, to: Manual })
        );
    }

    #[test]
    fn test_registry_onto_none_adopts_registry_status() {
        let merged = merge_assertion(a(Pending, None), a(Yes, Oecd)).unwrap();
        assert_eq!(merged, a(Yes, Oecd));
    }

    #[test]
    fn test_losing_evidence_keeps_existing_status() {
        let merged = merge_assertion(a(No, Oecd), a(Yes, Vai)).unwrap();
        assert_eq!(merged, a(No, Oecd));

        let merged = merge_assertion(a(Yes, Manual), a(No, Vai)).unwrap();
        assert_eq!(merged, a(Yes, Manual));
    }

    #[test]
    fn test_repeated_extraction_updates_status() {
        let merged = merge_assertion(a(No, Vai), a(Pending, Vai)).unwrap();
        assert_eq!(merged, a(Pending, Vai));
    }

    #[test]
    fn test_repeated_manual_or_registry_keeps_status() {
        let merged = merge_assertion(a(No, Manual), a(Yes, Manual)).unwrap();
        assert_eq!(merged, a(No, Manual));

        let merged = merge_assertion(a(Yes, Oecd), a(No, Oecd)).unwrap();
        assert_eq!(merged, a(Yes, Oecd));
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("openai".parse::<InformationSource>().unwrap(), Vai);
        assert_eq!("PENDING".parse::<PfasStatus>().unwrap(), Pending);
        assert!("maybe".parse::<PfasStatus>().is_err());
        assert_eq!(a(Yes, Oecd).to_string(), "YES/OECD");
    }
}
