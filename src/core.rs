//! Core traits and data types for the acceptance rig.
//!
//! This module defines the foundational abstractions for the test session
//! orchestrator: the static test plan (categories of items), the runtime
//! verdict model, the collaborator traits the orchestrator is wired to, and
//! the event type broadcast to presentation layers.
//!
//! # Architecture Overview
//!
//! The orchestrator consumes three external collaborators through traits:
//!
//! - [`CommandGateway`]: executes a test action on the unit under test
//! - [`ConditionOracle`]: answers once whether the unit's observable state
//!   matches the expected condition
//! - [`ReportCompiler`]: turns the final verdict snapshot into report data
//!
//! A fourth seam, [`LinkFactory`] / [`CategoryLink`], models the scoped
//! connection some categories hold for their whole duration (opened on entry,
//! closed on exit).
//!
//! # Data Flow
//!
//! ```text
//! Orchestrator --[SessionEvent]--> broadcast::channel ---> UI / logging
//! ```
//!
//! # Thread Safety
//!
//! All traits require `Send + Sync` so collaborator calls can be awaited from
//! spawned tasks. Event fan-out uses Tokio's `broadcast` channel for
//! multi-consumer patterns.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppResult, RigError};

/// Reserved id of the report category. It is never part of the orchestration
/// order and can hold no verdicts of its own.
pub const REPORT_CATEGORY_ID: &str = "report";

// =============================================================================
// Verdicts and item model
// =============================================================================

/// The outcome recorded for one test item.
///
/// A single enum rather than two independent flags: at most one of
/// Normal/Abnormal can hold for an item at any time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// No outcome recorded yet.
    #[default]
    Unset,
    /// The unit's observable state matched the expected condition.
    Normal,
    /// The condition did not match, the confirmation timed out, or the
    /// automated check failed (fail-closed).
    Abnormal,
}

impl Verdict {
    /// True when a Normal or Abnormal outcome has been recorded.
    pub fn is_resolved(self) -> bool {
        !matches!(self, Verdict::Unset)
    }
}

/// How an item's verdict gets decided after its command is dispatched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confirmation {
    /// Dispatch, then race a [`ConditionOracle`] answer against the
    /// confirmation timeout. First signal wins; timeout records Abnormal.
    Automatic,
    /// Dispatch, then the operator supplies the verdict.
    Operator,
    /// No dispatch at all; the operator may record a verdict at any time
    /// during the run.
    OperatorOnly,
}

/// Static description of one test item, supplied by the test plan.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ItemSpec {
    /// Item identifier, unique within its category.
    pub id: String,
    /// Operator-facing name (e.g. "front headlight").
    pub name: String,
    /// How the verdict for this item is decided.
    pub confirmation: Confirmation,
    /// Opaque parameters forwarded to the gateway (e.g. lift height,
    /// rotation angle). `None` for parameterless actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl ItemSpec {
    /// An item resolved by the oracle/timeout race.
    pub fn automatic(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            confirmation: Confirmation::Automatic,
            params: None,
        }
    }

    /// An item dispatched to the unit and judged by the operator.
    pub fn operator(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            confirmation: Confirmation::Operator,
            params: None,
        }
    }

    /// An item with no command at all, judged by the operator.
    pub fn operator_only(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            confirmation: Confirmation::OperatorOnly,
            params: None,
        }
    }

    /// Attach dispatch parameters to the item.
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = Some(params);
        self
    }

    /// True when `begin_test` should invoke the command gateway.
    pub fn dispatches(&self) -> bool {
        !matches!(self.confirmation, Confirmation::OperatorOnly)
    }
}

/// Lifecycle state of one category within a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryState {
    /// Not yet entered, or exited with unresolved items.
    #[default]
    NotStarted,
    /// The category currently presented to the operator.
    Active,
    /// Every contained item carries a resolved verdict.
    Completed,
}

/// A named group of related test items, tested as a contiguous block.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CategorySpec {
    /// Category identifier, unique within the plan.
    pub id: String,
    /// Operator-facing name (e.g. "lighting").
    pub name: String,
    /// Ordered test items.
    pub items: Vec<ItemSpec>,
    /// Identifier of a shared connection every item in this category needs
    /// (e.g. a long-lived shell session). Opened on entry, released when
    /// leaving for a category that does not also declare it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl CategorySpec {
    /// A category without a shared connection.
    pub fn new(id: impl Into<String>, name: impl Into<String>, items: Vec<ItemSpec>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            items,
            link: None,
        }
    }

    /// Declare the shared connection this category holds while active.
    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    /// Look up an item by id.
    pub fn item(&self, item_id: &str) -> Option<&ItemSpec> {
        self.items.iter().find(|i| i.id == item_id)
    }
}

/// The fixed, externally-supplied total order of test categories.
///
/// The reserved report category is excluded from the plan; it is a read-only
/// projection of the session, reachable only after all categories complete or
/// on demand when no run is active.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TestPlan {
    /// Categories in execution order.
    pub categories: Vec<CategorySpec>,
}

impl TestPlan {
    /// Build a plan, validating id uniqueness and the report-id reservation.
    pub fn new(categories: Vec<CategorySpec>) -> AppResult<Self> {
        let mut seen = std::collections::HashSet::new();
        for cat in &categories {
            if cat.id == REPORT_CATEGORY_ID {
                return Err(RigError::InvalidPlan(format!(
                    "category id '{REPORT_CATEGORY_ID}' is reserved"
                )));
            }
            if !seen.insert(cat.id.as_str()) {
                return Err(RigError::InvalidPlan(format!(
                    "duplicate category id '{}'",
                    cat.id
                )));
            }
            let mut items = std::collections::HashSet::new();
            for item in &cat.items {
                if !items.insert(item.id.as_str()) {
                    return Err(RigError::InvalidPlan(format!(
                        "duplicate item id '{}' in category '{}'",
                        item.id, cat.id
                    )));
                }
            }
        }
        Ok(Self { categories })
    }

    /// Look up a category by id.
    pub fn category(&self, category_id: &str) -> Option<&CategorySpec> {
        self.categories.iter().find(|c| c.id == category_id)
    }

    /// Look up an item within a category.
    pub fn item(&self, category_id: &str, item_id: &str) -> Option<&ItemSpec> {
        self.category(category_id).and_then(|c| c.item(item_id))
    }

    /// First category in the order, if any.
    pub fn first_category(&self) -> Option<&CategorySpec> {
        self.categories.first()
    }

    /// Next category after `category_id` in the fixed order.
    pub fn next_after(&self, category_id: &str) -> Option<&CategorySpec> {
        let idx = self.categories.iter().position(|c| c.id == category_id)?;
        self.categories.get(idx + 1)
    }
}

// =============================================================================
// Session identity and snapshots
// =============================================================================

/// Address of the unit under test on the remote command channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionTarget {
    /// Host the unit is reachable at.
    pub host: String,
    /// Login user, when the channel needs one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl ConnectionTarget {
    /// Target reachable at `host` with no explicit user.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
        }
    }
}

/// Operator-entered identity of one test session, carried into the report.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Identifier of the unit under test (e.g. its hostname).
    pub unit_id: String,
    /// Model/variant of the unit, selects the applicable test plan.
    pub unit_model: String,
    /// Name of the operator running the acceptance test.
    pub operator: String,
}

/// Metadata handed to the report compiler alongside the verdict snapshot.
#[derive(Clone, Debug, Serialize)]
pub struct SessionMetadata {
    /// Unique id of this run.
    pub session_id: Uuid,
    /// Identifier of the unit under test.
    pub unit_id: String,
    /// Model/variant of the unit.
    pub unit_model: String,
    /// Operator name.
    pub operator: String,
    /// When `start_test` was called; `None` when the test never started.
    pub started_at: Option<DateTime<Utc>>,
}

/// Read-only projection of one item's runtime state.
#[derive(Clone, Debug, Serialize)]
pub struct ItemSnapshot {
    /// Item id.
    pub id: String,
    /// Operator-facing name.
    pub name: String,
    /// Current verdict.
    pub verdict: Verdict,
    /// Whether a test attempt is in flight for the item.
    pub awaiting: bool,
}

/// Read-only projection of one category.
#[derive(Clone, Debug, Serialize)]
pub struct CategorySnapshot {
    /// Category id.
    pub id: String,
    /// Operator-facing name.
    pub name: String,
    /// Lifecycle state.
    pub state: CategoryState,
    /// Items in plan order.
    pub items: Vec<ItemSnapshot>,
}

/// Full read-only projection of the session, in plan order.
#[derive(Clone, Debug, Serialize)]
pub struct SessionSnapshot {
    /// Categories in plan order.
    pub categories: Vec<CategorySnapshot>,
    /// Id of the active category, or of the report category in report phase.
    pub active_category: Option<String>,
    /// Whether a run is in progress.
    pub running: bool,
    /// When the current/most recent run started.
    pub started_at: Option<DateTime<Utc>>,
}

/// Structured report produced by the [`ReportCompiler`].
#[derive(Clone, Debug, Serialize)]
pub struct ReportData {
    /// Session identity.
    pub metadata: SessionMetadata,
    /// When the report was compiled.
    pub generated_at: DateTime<Utc>,
    /// Per-category verdict listing.
    pub categories: Vec<CategorySnapshot>,
    /// Count of Normal verdicts.
    pub normal_count: usize,
    /// Count of Abnormal verdicts.
    pub abnormal_count: usize,
    /// Count of items never resolved.
    pub unresolved_count: usize,
}

// =============================================================================
// Collaborator traits
// =============================================================================

/// The oracle's one-shot answer about the unit's observable condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConditionReport {
    /// True when the observed state matches the expected condition.
    pub matches: bool,
}

/// Executes a test action on the unit under test over its own transport.
///
/// Dispatch is fire-and-forget from the orchestrator's perspective: a failure
/// here never aborts the confirmation wait, so the operator can still
/// complete the test manually.
#[async_trait]
pub trait CommandGateway: Send + Sync {
    /// Dispatch the action for `item_id` in `category_id` to the unit.
    async fn dispatch(
        &self,
        category_id: &str,
        item_id: &str,
        params: Option<&serde_json::Value>,
        target: &ConnectionTarget,
    ) -> Result<()>;
}

/// Answers once whether the unit's observable state matches the expected
/// condition. Possibly slow, possibly failing; the orchestrator races it
/// against its own timer and ignores late answers.
#[async_trait]
pub trait ConditionOracle: Send + Sync {
    /// Query the unit's condition for `item_id` in `category_id`.
    async fn query(
        &self,
        category_id: &str,
        item_id: &str,
        target: &ConnectionTarget,
    ) -> Result<ConditionReport>;
}

/// Produces a structured report from the full verdict snapshot.
pub trait ReportCompiler: Send + Sync {
    /// Compile the report for the given snapshot and session metadata.
    fn compile(&self, snapshot: &SessionSnapshot, metadata: &SessionMetadata) -> ReportData;
}

/// A scoped connection held for the duration of one category.
#[async_trait]
pub trait CategoryLink: Send + Sync {
    /// Identifier this link was opened under.
    fn link_id(&self) -> &str;

    /// Release the connection. Called at most once; the link is dropped
    /// afterwards regardless of the outcome.
    async fn close(&mut self) -> Result<()>;
}

/// Opens the scoped connections categories declare via [`CategorySpec::link`].
#[async_trait]
pub trait LinkFactory: Send + Sync {
    /// Open the connection named `link_id` to the target.
    async fn open(&self, link_id: &str, target: &ConnectionTarget) -> Result<Box<dyn CategoryLink>>;
}

// =============================================================================
// Session events
// =============================================================================

/// Events broadcast to presentation layers.
///
/// These are sufficient for a UI to render the whole session without ever
/// querying internal timers.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// A run started; all prior verdicts were discarded.
    SessionStarted {
        /// Timestamp recorded as the session start.
        started_at: DateTime<Utc>,
    },
    /// The session was explicitly reset; all verdicts cleared.
    SessionReset,
    /// An item's awaiting flag changed.
    AwaitingChanged {
        /// Category the item belongs to.
        category_id: String,
        /// The item.
        item_id: String,
        /// New awaiting state.
        awaiting: bool,
    },
    /// An item's verdict changed.
    VerdictChanged {
        /// Category the item belongs to.
        category_id: String,
        /// The item.
        item_id: String,
        /// New verdict.
        verdict: Verdict,
    },
    /// A category became the active one.
    CategoryEntered {
        /// The newly active category (possibly the report category).
        category_id: String,
    },
    /// A category had all items resolved and was marked completed.
    CategoryCompleted {
        /// The completed category.
        category_id: String,
    },
    /// Cosmetic remaining-time tick for an in-flight automatic item.
    CountdownTick {
        /// The item being confirmed.
        item_id: String,
        /// Whole seconds left until the confirmation timeout.
        remaining_secs: u64,
    },
    /// The report phase was entered and report data compiled.
    ReportReady(ReportData),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_default_is_unset() {
        assert_eq!(Verdict::default(), Verdict::Unset);
        assert!(!Verdict::Unset.is_resolved());
        assert!(Verdict::Normal.is_resolved());
        assert!(Verdict::Abnormal.is_resolved());
    }

    #[test]
    fn test_plan_rejects_reserved_report_id() {
        let result = TestPlan::new(vec![CategorySpec::new(REPORT_CATEGORY_ID, "Report", vec![])]);
        assert!(matches!(result, Err(RigError::InvalidPlan(_))));
    }

    #[test]
    fn test_plan_rejects_duplicate_category_ids() {
        let result = TestPlan::new(vec![
            CategorySpec::new("light", "Lighting", vec![]),
            CategorySpec::new("light", "Lighting again", vec![]),
        ]);
        assert!(matches!(result, Err(RigError::InvalidPlan(_))));
    }

    #[test]
    fn test_plan_rejects_duplicate_item_ids() {
        let result = TestPlan::new(vec![CategorySpec::new(
            "light",
            "Lighting",
            vec![
                ItemSpec::operator("front", "Front light"),
                ItemSpec::operator("front", "Front light again"),
            ],
        )]);
        assert!(matches!(result, Err(RigError::InvalidPlan(_))));
    }

    #[test]
    fn test_plan_ordering_helpers() {
        let plan = TestPlan::new(vec![
            CategorySpec::new("light", "Lighting", vec![]),
            CategorySpec::new("button", "Buttons", vec![]),
            CategorySpec::new("motor", "Motors", vec![]),
        ])
        .unwrap();

        assert_eq!(plan.first_category().map(|c| c.id.as_str()), Some("light"));
        assert_eq!(plan.next_after("light").map(|c| c.id.as_str()), Some("button"));
        assert_eq!(plan.next_after("motor").map(|c| c.id.as_str()), None);
        assert!(plan.next_after("missing").is_none());
    }

    #[test]
    fn test_item_spec_dispatch_rule() {
        assert!(ItemSpec::automatic("a", "A").dispatches());
        assert!(ItemSpec::operator("b", "B").dispatches());
        assert!(!ItemSpec::operator_only("c", "C").dispatches());
    }

    #[test]
    fn test_item_params_roundtrip() {
        let item = ItemSpec::operator("lift_up", "Lift up")
            .with_params(serde_json::json!({ "height_mm": 60 }));
        let json = serde_json::to_string(&item).unwrap();
        let back: ItemSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back.params, item.params);
    }
}
