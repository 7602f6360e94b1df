//! The test session orchestrator.
//!
//! One [`Orchestrator`] drives one unit under test through the plan's
//! categories: it owns the verdict store, the timer registry, the active
//! category link and the collaborator handles, and broadcasts
//! [`SessionEvent`]s for presentation layers.
//!
//! # Locking
//!
//! All session state sits behind a single `parking_lot::Mutex`. The lock is
//! never held across an `.await`; collaborator calls and link management run
//! in spawned tasks against an `Arc` of the shared context. The timer
//! registry has its own internal lock, which may be taken while the state
//! lock is held, never the other way round.

mod completion;
mod navigator;
mod runner;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::core::{
    CategoryLink, CategorySnapshot, CategoryState, CommandGateway, ConditionOracle,
    ConnectionTarget, LinkFactory, ReportCompiler, ReportData, SessionEvent, SessionInfo,
    SessionMetadata, SessionSnapshot, TestPlan,
};
use crate::error::{AppResult, RigError};
use crate::timers::TimerRegistry;
use crate::verdicts::VerdictStore;

/// Capacity of the event broadcast channel. Slow subscribers lag rather
/// than block the orchestrator.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// The external services one orchestrator is wired to.
pub struct Collaborators {
    /// Executes test actions on the unit.
    pub gateway: Arc<dyn CommandGateway>,
    /// Answers automated confirmation queries.
    pub oracle: Arc<dyn ConditionOracle>,
    /// Compiles the final report.
    pub compiler: Arc<dyn ReportCompiler>,
    /// Opens category-scoped connections.
    pub links: Arc<dyn LinkFactory>,
}

/// An automated confirmation currently in flight. Presence in the pending
/// map is the single-resolution guard: whoever removes the entry owns the
/// verdict, and every later signal for the same attempt finds nothing and
/// backs off.
pub(crate) struct PendingConfirmation {
    pub(crate) category_id: String,
    pub(crate) item_id: String,
    /// Identifies this attempt. An oracle answer from an earlier, cancelled
    /// attempt for the same item carries a stale id and must not resolve a
    /// re-armed entry under the same key.
    pub(crate) attempt: u64,
}

/// Everything behind the state lock.
pub(crate) struct SharedState {
    pub(crate) plan: TestPlan,
    pub(crate) store: VerdictStore,
    pub(crate) category_states: HashMap<String, CategoryState>,
    pub(crate) active_category: Option<String>,
    pub(crate) running: bool,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) session_id: Uuid,
    /// Keyed by [`race_key`].
    pub(crate) pending: HashMap<String, PendingConfirmation>,
    /// Monotonic attempt-id source. Never reset, so signals from before a
    /// session reset can never match an attempt of the next run.
    pub(crate) attempt_counter: u64,
}

impl SharedState {
    fn snapshot(&self) -> SessionSnapshot {
        let categories = self
            .plan
            .categories
            .iter()
            .map(|cat| CategorySnapshot {
                id: cat.id.clone(),
                name: cat.name.clone(),
                state: self
                    .category_states
                    .get(&cat.id)
                    .copied()
                    .unwrap_or_default(),
                items: self.store.snapshot_items(cat),
            })
            .collect();
        SessionSnapshot {
            categories,
            active_category: self.active_category.clone(),
            running: self.running,
            started_at: self.started_at,
        }
    }

    fn metadata(&self, info: &SessionInfo) -> SessionMetadata {
        SessionMetadata {
            session_id: self.session_id,
            unit_id: info.unit_id.clone(),
            unit_model: info.unit_model.clone(),
            operator: info.operator.clone(),
            started_at: self.started_at,
        }
    }
}

/// Shared context spawned tasks hold an `Arc` of.
pub(crate) struct Ctx {
    pub(crate) state: Mutex<SharedState>,
    pub(crate) timers: TimerRegistry,
    pub(crate) collaborators: Collaborators,
    /// The connection held for the active category, if it declares one.
    /// Tokio mutex: close/open are awaited while holding it.
    pub(crate) active_link: tokio::sync::Mutex<Option<Box<dyn CategoryLink>>>,
    pub(crate) events: broadcast::Sender<SessionEvent>,
    pub(crate) config: OrchestratorConfig,
    pub(crate) target: ConnectionTarget,
    pub(crate) info: SessionInfo,
}

impl Ctx {
    /// Fan an event out to whoever listens. No subscribers is fine.
    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

/// Timer key of an item's confirmation deadline.
pub(crate) fn race_key(category_id: &str, item_id: &str) -> String {
    format!("{category_id}:{item_id}")
}

/// Timer key of an item's cosmetic countdown tick.
pub(crate) fn tick_key(category_id: &str, item_id: &str) -> String {
    format!("{category_id}:{item_id}:tick")
}

/// Orchestrates one acceptance test session.
///
/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) ctx: Arc<Ctx>,
}

impl Orchestrator {
    /// Build an orchestrator for `plan` against the given unit.
    pub fn new(
        plan: TestPlan,
        config: OrchestratorConfig,
        target: ConnectionTarget,
        info: SessionInfo,
        collaborators: Collaborators,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let mut store = VerdictStore::new();
        store.init_plan(&plan);
        let category_states = plan
            .categories
            .iter()
            .map(|c| (c.id.clone(), CategoryState::NotStarted))
            .collect();
        Self {
            ctx: Arc::new(Ctx {
                state: Mutex::new(SharedState {
                    plan,
                    store,
                    category_states,
                    active_category: None,
                    running: false,
                    started_at: None,
                    session_id: Uuid::new_v4(),
                    pending: HashMap::new(),
                    attempt_counter: 0,
                }),
                timers: TimerRegistry::new(),
                collaborators,
                active_link: tokio::sync::Mutex::new(None),
                events,
                config,
                target,
                info,
            }),
        }
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.ctx.events.subscribe()
    }

    /// Whether a run is in progress.
    pub fn is_running(&self) -> bool {
        self.ctx.state.lock().running
    }

    /// Read-only projection of the whole session.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.ctx.state.lock().snapshot()
    }

    /// Start a run: discard all prior verdicts, activate the first category
    /// and open its link if it declares one.
    ///
    /// # Errors
    ///
    /// `SessionLocked` when a run is already in progress; `InvalidPlan` when
    /// the plan has no categories.
    pub async fn start_test(&self) -> AppResult<()> {
        let (first_id, link_id, started_at) = {
            let mut state = self.ctx.state.lock();
            if state.running {
                return Err(RigError::SessionLocked);
            }
            let first = state
                .plan
                .first_category()
                .ok_or_else(|| RigError::InvalidPlan("plan has no categories".into()))?;
            let first_id = first.id.clone();
            let link_id = first.link.clone();

            let plan = state.plan.clone();
            state.store.init_plan(&plan);
            for st in state.category_states.values_mut() {
                *st = CategoryState::NotStarted;
            }
            state.pending.clear();
            self.ctx.timers.cancel_all();

            state.running = true;
            let now = Utc::now();
            state.started_at = Some(now);
            state.session_id = Uuid::new_v4();
            state.active_category = Some(first_id.clone());
            state
                .category_states
                .insert(first_id.clone(), CategoryState::Active);
            (first_id, link_id, now)
        };

        debug!(category = %first_id, "test session started");
        self.ctx.emit(SessionEvent::SessionStarted { started_at });
        self.ctx.emit(SessionEvent::CategoryEntered {
            category_id: first_id,
        });
        swap_link(&self.ctx, link_id).await;
        Ok(())
    }

    /// Abandon the run (if any) and clear every verdict, pending
    /// confirmation and timer. Always succeeds.
    pub async fn reset(&self) {
        {
            let mut state = self.ctx.state.lock();
            state.running = false;
            state.started_at = None;
            state.active_category = None;
            state.pending.clear();
            let plan = state.plan.clone();
            state.store.init_plan(&plan);
            for st in state.category_states.values_mut() {
                *st = CategoryState::NotStarted;
            }
            self.ctx.timers.cancel_all();
        }
        debug!("session reset");
        swap_link(&self.ctx, None).await;
        self.ctx.emit(SessionEvent::SessionReset);
    }

    /// Compile the report for the current verdict state.
    ///
    /// # Errors
    ///
    /// `SessionLocked` while a run is in progress; the report is only
    /// readable between runs or after completion.
    pub fn report(&self) -> AppResult<ReportData> {
        let (snapshot, metadata) = {
            let state = self.ctx.state.lock();
            if state.running {
                return Err(RigError::SessionLocked);
            }
            (state.snapshot(), state.metadata(&self.ctx.info))
        };
        Ok(self.ctx.collaborators.compiler.compile(&snapshot, &metadata))
    }
}

/// Reconcile the held category link with `desired`.
///
/// Keeps the current link when the id already matches; otherwise closes it
/// (a close failure is logged, the link is dropped regardless) and opens the
/// desired one. An open failure leaves no link and the session continues;
/// items in that category can still be judged manually.
pub(crate) async fn swap_link(ctx: &Arc<Ctx>, desired: Option<String>) {
    let mut slot = ctx.active_link.lock().await;
    if let (Some(link), Some(want)) = (slot.as_ref(), desired.as_deref()) {
        if link.link_id() == want {
            return;
        }
    }
    if let Some(mut link) = slot.take() {
        let id = link.link_id().to_string();
        if let Err(err) = link.close().await {
            warn!(link = %id, error = %err, "category link close failed");
        }
    }
    if let Some(want) = desired {
        match ctx.collaborators.links.open(&want, &ctx.target).await {
            Ok(link) => *slot = Some(link),
            Err(err) => warn!(link = %want, error = %err, "category link open failed"),
        }
    }
}

pub(crate) use completion::{check_after_resolution, Advance};
