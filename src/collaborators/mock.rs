//! Scripted collaborator mocks.
//!
//! These are deliberately simple: every call is recorded for later
//! inspection, and behavior (answers, failures, delays) is set up front by
//! the test. They are regular library code rather than test-gated so bench
//! setups without hardware can run the orchestrator against them too.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::{
    CategoryLink, CategorySnapshot, CommandGateway, ConditionOracle, ConditionReport,
    ConnectionTarget, LinkFactory, ReportCompiler, ReportData, SessionMetadata, SessionSnapshot,
    Verdict,
};

/// One recorded gateway dispatch.
#[derive(Clone, Debug)]
pub struct DispatchRecord {
    /// Category the item belongs to.
    pub category_id: String,
    /// The dispatched item.
    pub item_id: String,
    /// Parameters forwarded with the dispatch.
    pub params: Option<serde_json::Value>,
}

/// Command gateway that records every dispatch and optionally fails.
#[derive(Default)]
pub struct MockGateway {
    records: Mutex<Vec<DispatchRecord>>,
    fail_next: Mutex<bool>,
}

impl MockGateway {
    /// Gateway that accepts every dispatch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent dispatch fail (until cleared).
    pub fn set_failing(&self, failing: bool) {
        *self.fail_next.lock() = failing;
    }

    /// All dispatches seen so far, in call order.
    pub fn dispatches(&self) -> Vec<DispatchRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl CommandGateway for MockGateway {
    async fn dispatch(
        &self,
        category_id: &str,
        item_id: &str,
        params: Option<&serde_json::Value>,
        _target: &ConnectionTarget,
    ) -> Result<()> {
        self.records.lock().push(DispatchRecord {
            category_id: category_id.to_string(),
            item_id: item_id.to_string(),
            params: params.cloned(),
        });
        if *self.fail_next.lock() {
            return Err(anyhow!("mock gateway refused '{item_id}'"));
        }
        Ok(())
    }
}

/// Scripted behavior of the mock oracle for one item.
#[derive(Clone, Debug)]
pub enum OracleScript {
    /// Answer immediately with the given match result.
    Matches(bool),
    /// Answer after `delay` with the given match result.
    Delayed(Duration, bool),
    /// Fail the query.
    Fails,
    /// Never answer at all; the caller's timeout decides.
    NeverAnswers,
}

/// Condition oracle driven by per-item scripts.
///
/// Items with no script behave as [`OracleScript::NeverAnswers`], which is
/// the safe default for exercising timeout paths.
#[derive(Default)]
pub struct MockOracle {
    scripts: Mutex<HashMap<String, OracleScript>>,
    queries: Mutex<Vec<String>>,
}

impl MockOracle {
    /// Oracle with no scripts (never answers).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the script for `item_id`.
    pub fn script(&self, item_id: &str, script: OracleScript) {
        self.scripts.lock().insert(item_id.to_string(), script);
    }

    /// Item ids queried so far, in call order.
    pub fn queried(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl ConditionOracle for MockOracle {
    async fn query(
        &self,
        _category_id: &str,
        item_id: &str,
        _target: &ConnectionTarget,
    ) -> Result<ConditionReport> {
        self.queries.lock().push(item_id.to_string());
        let script = self
            .scripts
            .lock()
            .get(item_id)
            .cloned()
            .unwrap_or(OracleScript::NeverAnswers);
        match script {
            OracleScript::Matches(matches) => Ok(ConditionReport { matches }),
            OracleScript::Delayed(delay, matches) => {
                tokio::time::sleep(delay).await;
                Ok(ConditionReport { matches })
            }
            OracleScript::Fails => Err(anyhow!("mock oracle failed for '{item_id}'")),
            OracleScript::NeverAnswers => std::future::pending().await,
        }
    }
}

/// Report compiler that counts verdicts straight off the snapshot.
#[derive(Default)]
pub struct MockCompiler;

impl MockCompiler {
    /// Compiler with no extra behavior.
    pub fn new() -> Self {
        Self
    }
}

impl ReportCompiler for MockCompiler {
    fn compile(&self, snapshot: &SessionSnapshot, metadata: &SessionMetadata) -> ReportData {
        let categories: Vec<CategorySnapshot> = snapshot.categories.clone();
        let verdicts = categories
            .iter()
            .flat_map(|c| c.items.iter().map(|i| i.verdict));
        let mut normal = 0;
        let mut abnormal = 0;
        let mut unresolved = 0;
        for v in verdicts {
            match v {
                Verdict::Normal => normal += 1,
                Verdict::Abnormal => abnormal += 1,
                Verdict::Unset => unresolved += 1,
            }
        }
        ReportData {
            metadata: metadata.clone(),
            generated_at: chrono::Utc::now(),
            categories,
            normal_count: normal,
            abnormal_count: abnormal,
            unresolved_count: unresolved,
        }
    }
}

/// Shared log of link open/close calls, in call order.
#[derive(Clone, Default)]
pub struct LinkLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl LinkLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, event: String) {
        self.events.lock().push(event);
    }

    /// Entries recorded so far, each `"open:<id>"` or `"close:<id>"`.
    pub fn entries(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

/// Link handed out by [`MockLinkFactory`].
pub struct MockLink {
    link_id: String,
    log: LinkLog,
}

#[async_trait]
impl CategoryLink for MockLink {
    fn link_id(&self) -> &str {
        &self.link_id
    }

    async fn close(&mut self) -> Result<()> {
        self.log.record(format!("close:{}", self.link_id));
        Ok(())
    }
}

/// Link factory that records opens/closes in a shared [`LinkLog`].
pub struct MockLinkFactory {
    log: LinkLog,
    fail_open: Mutex<bool>,
}

impl MockLinkFactory {
    /// Factory writing into `log`.
    pub fn new(log: LinkLog) -> Self {
        Self {
            log,
            fail_open: Mutex::new(false),
        }
    }

    /// Make subsequent opens fail (until cleared).
    pub fn set_failing(&self, failing: bool) {
        *self.fail_open.lock() = failing;
    }
}

#[async_trait]
impl LinkFactory for MockLinkFactory {
    async fn open(&self, link_id: &str, _target: &ConnectionTarget) -> Result<Box<dyn CategoryLink>> {
        if *self.fail_open.lock() {
            return Err(anyhow!("mock link '{link_id}' refused to open"));
        }
        self.log.record(format!("open:{link_id}"));
        Ok(Box::new(MockLink {
            link_id: link_id.to_string(),
            log: self.log.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> ConnectionTarget {
        ConnectionTarget::new("bench-unit")
    }

    #[tokio::test]
    async fn test_gateway_records_and_fails_on_demand() {
        let gateway = MockGateway::new();
        gateway
            .dispatch("light", "front", None, &target())
            .await
            .unwrap();

        gateway.set_failing(true);
        assert!(gateway
            .dispatch("light", "rear", None, &target())
            .await
            .is_err());

        let records = gateway.dispatches();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].item_id, "front");
        assert_eq!(records[1].item_id, "rear");
    }

    #[tokio::test]
    async fn test_oracle_scripts() {
        let oracle = MockOracle::new();
        oracle.script("front", OracleScript::Matches(true));
        oracle.script("rear", OracleScript::Fails);

        let report = oracle.query("light", "front", &target()).await.unwrap();
        assert!(report.matches);
        assert!(oracle.query("light", "rear", &target()).await.is_err());
        assert_eq!(oracle.queried(), vec!["front", "rear"]);
    }

    #[tokio::test]
    async fn test_link_lifecycle_is_logged() {
        let log = LinkLog::new();
        let factory = MockLinkFactory::new(log.clone());
        let mut link = factory.open("shell", &target()).await.unwrap();
        assert_eq!(link.link_id(), "shell");
        link.close().await.unwrap();
        assert_eq!(log.entries(), vec!["open:shell", "close:shell"]);
    }
}
