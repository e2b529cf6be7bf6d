//! Rebind Report
//!
//! Per-object problems found while rebinding. A report with issues still
//! comes with a usable graph; the caller must acknowledge or escalate it.

use std::collections::BTreeMap;

use super::graph::LiveGraph;
use crate::error::{Error, Result};
use crate::persistence::ObjectKind;

/// Phase an issue was found in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IssueKind {
    /// Record could not be read or decoded
    Load,
    /// No strategy for the type, or the strategy rejected the memento
    Create,
    /// A reference names an unknown id or the wrong kind
    Reference,
    /// Parent/child relationship could not be wired
    Tree,
    /// Activation hook failed
    Activation,
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IssueKind::Load => write!(f, "load"),
            IssueKind::Create => write!(f, "create"),
            IssueKind::Reference => write!(f, "reference"),
            IssueKind::Tree => write!(f, "tree"),
            IssueKind::Activation => write!(f, "activation"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebindIssue {
    pub object_id: String,
    pub kind: IssueKind,
    /// Other id involved, e.g. the missing reference target
    pub related_id: Option<String>,
    pub message: String,
}

impl RebindIssue {
    pub fn new(kind: IssueKind, object_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            kind,
            related_id: None,
            message: message.into(),
        }
    }

    pub fn with_related(mut self, related_id: impl Into<String>) -> Self {
        self.related_id = Some(related_id.into());
        self
    }

    /// The error this issue corresponds to
    pub fn to_error(&self) -> Error {
        match self.kind {
            IssueKind::Reference => Error::ReferenceResolution {
                object_id: self.object_id.clone(),
                missing_id: self.related_id.clone().unwrap_or_default(),
            },
            IssueKind::Activation => Error::Activation {
                object_id: self.object_id.clone(),
                reason: self.message.clone(),
            },
            _ => Error::InvalidState(format!(
                "{} issue on {}: {}",
                self.kind, self.object_id, self.message
            )),
        }
    }
}

impl std::fmt::Display for RebindIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.object_id, self.message)
    }
}

/// Outcome summary of a rebind
#[derive(Debug, Clone, Default)]
pub struct RebindReport {
    /// Objects in the manifest, by kind
    pub counts: BTreeMap<ObjectKind, usize>,
    /// Ids activated successfully
    pub active: Vec<String>,
    /// Ids skipped because a dependency is not active
    pub inactive: Vec<String>,
    /// Ids that failed in some phase
    pub failed: Vec<String>,
    pub issues: Vec<RebindIssue>,
    acknowledged: bool,
}

impl RebindReport {
    pub(crate) fn push(&mut self, issue: RebindIssue) {
        tracing::warn!("Rebind {}", issue);
        self.issues.push(issue);
    }

    pub(crate) fn finish(&mut self, graph: &LiveGraph) {
        use super::graph::ActivationState;
        self.active = graph.ids_in_state(ActivationState::Active);
        self.inactive = graph.ids_in_state(ActivationState::Inactive);
        self.failed = graph.ids_in_state(ActivationState::Failed);
    }

    /// No issues and nothing left inactive
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty() && self.inactive.is_empty() && self.failed.is_empty()
    }

    pub fn issues_of(&self, kind: IssueKind) -> Vec<&RebindIssue> {
        self.issues.iter().filter(|i| i.kind == kind).collect()
    }

    /// Accept a partial result and proceed
    pub fn acknowledge(&mut self) {
        if !self.is_clean() {
            tracing::info!(
                "Proceeding with partial rebind: {} issues, {} inactive",
                self.issues.len(),
                self.inactive.len()
            );
        }
        self.acknowledged = true;
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged
    }

    /// Turn the first issue into an error, if any
    pub fn escalate(&self) -> Result<()> {
        match self.issues.first() {
            Some(issue) => Err(issue.to_error()),
            None => Ok(()),
        }
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        let counts: Vec<String> = self
            .counts
            .iter()
            .map(|(kind, n)| format!("{} {}", n, kind))
            .collect();
        format!(
            "{} ({} active, {} inactive, {} failed, {} issues)",
            if counts.is_empty() {
                "nothing".to_string()
            } else {
                counts.join(", ")
            },
            self.active.len(),
            self.inactive.len(),
            self.failed.len(),
            self.issues.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalate_maps_reference_issue() {
        let mut report = RebindReport::default();
        assert!(report.is_clean());
        assert!(report.escalate().is_ok());

        report.push(
            RebindIssue::new(IssueKind::Reference, "e1", "unknown id e11").with_related("e11"),
        );
        assert!(!report.is_clean());
        assert!(matches!(
            report.escalate(),
            Err(Error::ReferenceResolution { ref missing_id, .. }) if missing_id == "e11"
        ));

        report.acknowledge();
        assert!(report.is_acknowledged());
        assert_eq!(report.issues_of(IssueKind::Reference).len(), 1);
    }
}
