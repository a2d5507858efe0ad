//! Permission policy: decides whether a validated invocation may run
//! unattended, needs a human, or is refused outright.

use crate::{ActionInvocation, ActionKind, ActionRegistry, PermissionConfig, RiskClass};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{self, Display};
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyOutcome {
    AutoApprove,
    AskHuman,
    AutoDeny,
}

/// A `kind` or `kind:glob` entry from the permission lists.
#[derive(Clone, Debug)]
pub struct PermissionRule {
    kind: ActionKind,
    pattern: Option<Pattern>,
}

impl PermissionRule {
    pub fn parse(entry: &str) -> Result<Self, String> {
        let (name, pattern) = match entry.split_once(':') {
            Some((name, pattern)) => (name.trim(), Some(pattern.trim())),
            None => (entry.trim(), None),
        };
        let kind = ActionKind::parse(name).ok_or_else(|| format!("unknown action '{name}'"))?;
        let pattern = match pattern {
            Some(pattern) if !pattern.is_empty() => Some(
                Pattern::new(pattern)
                    .map_err(|error| format!("invalid pattern '{pattern}': {error}"))?,
            ),
            _ => None,
        };
        Ok(Self { kind, pattern })
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn matches(&self, invocation: &ActionInvocation) -> bool {
        if invocation.kind() != self.kind {
            return false;
        }
        match &self.pattern {
            None => true,
            Some(pattern) => invocation
                .subject()
                .is_some_and(|subject| pattern.matches(subject)),
        }
    }
}

impl Display for PermissionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pattern {
            Some(pattern) => write!(f, "{}:{}", self.kind, pattern.as_str()),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Action kinds the human has approved for the rest of the session.
///
/// Lives as long as the session, is owned by it and is never persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionPermissionMemory {
    always_approved: BTreeSet<ActionKind>,
}

impl SessionPermissionMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&mut self, kind: ActionKind) {
        self.always_approved.insert(kind);
    }

    pub fn contains(&self, kind: ActionKind) -> bool {
        self.always_approved.contains(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = ActionKind> + '_ {
        self.always_approved.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.always_approved.is_empty()
    }

    pub fn clear(&mut self) {
        self.always_approved.clear();
    }
}

/// Entries that did not parse when building a policy.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PermissionConfigReport {
    pub rejected: Vec<String>,
}

impl PermissionConfigReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Static permission rules plus the process-wide approve-all switch.
#[derive(Clone, Debug)]
pub struct PermissionPolicy {
    auto_approve: Vec<PermissionRule>,
    always_ask: Vec<PermissionRule>,
    auto_approve_read_only: bool,
    approve_all: bool,
    registry: ActionRegistry,
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self::from_config(&PermissionConfig::default(), false).0
    }
}

impl PermissionPolicy {
    /// Builds the policy, warning about and reporting every entry that does
    /// not name a known action.
    pub fn from_config(
        config: &PermissionConfig,
        approve_all: bool,
    ) -> (Self, PermissionConfigReport) {
        let mut report = PermissionConfigReport::default();
        let auto_approve = parse_rules("auto_approve", &config.auto_approve, &mut report);
        let always_ask = parse_rules("always_ask", &config.always_ask, &mut report);
        let policy = Self {
            auto_approve,
            always_ask,
            auto_approve_read_only: config.auto_approve_read_only,
            approve_all,
            registry: ActionRegistry::builtin(),
        };
        (policy, report)
    }

    pub fn approve_all(&self) -> bool {
        self.approve_all
    }

    pub fn risk(&self, invocation: &ActionInvocation) -> RiskClass {
        self.registry.classify(invocation)
    }

    pub fn evaluate(
        &self,
        invocation: &ActionInvocation,
        memory: &SessionPermissionMemory,
    ) -> PolicyOutcome {
        let risk = self.risk(invocation);
        let (outcome, reason) = if memory.contains(invocation.kind()) {
            (PolicyOutcome::AutoApprove, "session memory")
        } else if self.auto_approve.iter().any(|rule| rule.matches(invocation)) {
            (PolicyOutcome::AutoApprove, "auto_approve rule")
        } else if self.approve_all {
            (PolicyOutcome::AutoApprove, "approve-all mode")
        } else if self.always_ask.iter().any(|rule| rule.matches(invocation)) {
            (PolicyOutcome::AskHuman, "always_ask rule")
        } else if risk.requires_confirmation() {
            (PolicyOutcome::AskHuman, "risk requires confirmation")
        } else if risk == RiskClass::ReadOnly && self.auto_approve_read_only {
            (PolicyOutcome::AutoApprove, "read-only")
        } else {
            (PolicyOutcome::AskHuman, "default")
        };

        debug!(
            action = %invocation.kind(),
            risk = %risk,
            outcome = ?outcome,
            reason,
            "permission policy evaluated"
        );
        outcome
    }
}

fn parse_rules(
    list: &str,
    entries: &[String],
    report: &mut PermissionConfigReport,
) -> Vec<PermissionRule> {
    entries
        .iter()
        .filter_map(|entry| match PermissionRule::parse(entry) {
            Ok(rule) => Some(rule),
            Err(reason) => {
                warn!(list, entry = %entry, reason = %reason, "ignoring permission entry");
                report.rejected.push(entry.clone());
                None
            }
        })
        .collect()
}
