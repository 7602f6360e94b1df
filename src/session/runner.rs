//! Item-level test execution: command dispatch, the confirmation race and
//! manual verdicts.
//!
//! An automatic item runs as a race between the condition oracle and the
//! confirmation timeout. Exactly one of the three possible signals (oracle
//! answer, timeout firing, operator override) resolves the attempt; the
//! pending-map entry is the arbitration token. Dispatch failures never abort
//! the attempt, since the operator can always judge the item manually.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::{Confirmation, SessionEvent, Verdict};
use crate::error::{AppResult, RigError};

use super::{
    check_after_resolution, race_key, swap_link, tick_key, Advance, Ctx, Orchestrator,
    PendingConfirmation,
};

impl Orchestrator {
    /// Start the test for one item of the active category.
    ///
    /// Dispatches the item's command (unless it takes none), marks the item
    /// awaiting and, for automatic items, arms the confirmation race.
    /// `params` overrides the item's plan-declared parameters for this
    /// attempt.
    ///
    /// Returns as soon as the attempt is armed; dispatch and confirmation
    /// run in the background and surface through events.
    ///
    /// # Errors
    ///
    /// `SessionNotRunning` outside a run, `SessionLocked` for a
    /// non-active category, `AlreadyPending` while the item's previous
    /// attempt is still awaiting, and lookup errors for unknown ids.
    pub fn begin_test(
        &self,
        category_id: &str,
        item_id: &str,
        params: Option<serde_json::Value>,
    ) -> AppResult<()> {
        let key = race_key(category_id, item_id);
        let (confirmation, effective_params, attempt) = {
            let mut state = self.ctx.state.lock();
            if !state.running {
                return Err(RigError::SessionNotRunning);
            }
            let item = state
                .plan
                .category(category_id)
                .ok_or_else(|| RigError::UnknownCategory(category_id.to_string()))?
                .item(item_id)
                .ok_or_else(|| RigError::UnknownItem {
                    category: category_id.to_string(),
                    item: item_id.to_string(),
                })?;
            if state.active_category.as_deref() != Some(category_id) {
                return Err(RigError::SessionLocked);
            }
            if matches!(item.confirmation, Confirmation::OperatorOnly) {
                return Err(RigError::InvalidPlan(format!(
                    "item '{item_id}' dispatches no command"
                )));
            }
            if state.store.get(category_id, item_id).awaiting {
                return Err(RigError::AlreadyPending(item_id.to_string()));
            }
            let confirmation = item.confirmation;
            let effective_params = params.or_else(|| item.params.clone());

            state.store.mark_tested(category_id, item_id);
            state.store.set_awaiting(category_id, item_id, true);
            let mut attempt = 0;
            if matches!(confirmation, Confirmation::Automatic) {
                state.attempt_counter += 1;
                attempt = state.attempt_counter;
                state.pending.insert(
                    key.clone(),
                    PendingConfirmation {
                        category_id: category_id.to_string(),
                        item_id: item_id.to_string(),
                        attempt,
                    },
                );
            }
            (confirmation, effective_params, attempt)
        };

        self.ctx.emit(SessionEvent::AwaitingChanged {
            category_id: category_id.to_string(),
            item_id: item_id.to_string(),
            awaiting: true,
        });

        let automatic = matches!(confirmation, Confirmation::Automatic);

        // Arm the timers before anything can resolve, so the resolution path
        // always finds them to cancel.
        if automatic {
            let timeout = self.ctx.config.confirmation_timeout();

            {
                let ctx = self.ctx.clone();
                let category = category_id.to_string();
                let item = item_id.to_string();
                self.ctx.timers.schedule_once(&key, timeout, move || {
                    async move {
                        warn!(item = %item, "confirmation timed out, recording abnormal");
                        resolve_automatic(&ctx, &category, &item, attempt, Verdict::Abnormal);
                    }
                });
            }

            {
                let ctx = self.ctx.clone();
                let item = item_id.to_string();
                let deadline = tokio::time::Instant::now() + timeout;
                self.ctx.timers.schedule_periodic(
                    &tick_key(category_id, item_id),
                    self.ctx.config.display_tick(),
                    move || {
                        let remaining = deadline
                            .saturating_duration_since(tokio::time::Instant::now())
                            .as_secs();
                        ctx.emit(SessionEvent::CountdownTick {
                            item_id: item.clone(),
                            remaining_secs: remaining,
                        });
                        std::future::ready(())
                    },
                );
            }
        }

        // Dispatch (and for automatic items, the settle + oracle query) runs
        // off the caller's stack.
        {
            let ctx = self.ctx.clone();
            let category = category_id.to_string();
            let item = item_id.to_string();
            let settle = self.ctx.config.settle_delay();
            tokio::spawn(async move {
                if let Err(err) = ctx
                    .collaborators
                    .gateway
                    .dispatch(&category, &item, effective_params.as_ref(), &ctx.target)
                    .await
                {
                    // The attempt stays open; the operator can still judge
                    // the item by eye.
                    warn!(item = %item, error = %err, "command dispatch failed");
                }
                if automatic {
                    tokio::time::sleep(settle).await;
                    let verdict = match ctx
                        .collaborators
                        .oracle
                        .query(&category, &item, &ctx.target)
                        .await
                    {
                        Ok(report) if report.matches => Verdict::Normal,
                        Ok(_) => Verdict::Abnormal,
                        Err(err) => {
                            warn!(item = %item, error = %err, "condition query failed, recording abnormal");
                            Verdict::Abnormal
                        }
                    };
                    resolve_automatic(&ctx, &category, &item, attempt, verdict);
                }
            });
        }

        Ok(())
    }

    /// Record an operator-supplied verdict for an item of the active
    /// category. Overwrites any earlier verdict, and wins over an in-flight
    /// automatic confirmation (the race is torn down).
    ///
    /// # Errors
    ///
    /// `InvalidVerdict` for `Unset`, `SessionNotRunning` outside a run,
    /// `SessionLocked` for a non-active category, `NotAwaiting` when a
    /// dispatching item was never started this run, and lookup errors for
    /// unknown ids.
    pub fn set_manual_verdict(
        &self,
        category_id: &str,
        item_id: &str,
        verdict: Verdict,
    ) -> AppResult<()> {
        if !verdict.is_resolved() {
            return Err(RigError::InvalidVerdict);
        }
        let key = race_key(category_id, item_id);
        let (was_awaiting, advance) = {
            let mut state = self.ctx.state.lock();
            if !state.running {
                return Err(RigError::SessionNotRunning);
            }
            let item = state
                .plan
                .category(category_id)
                .ok_or_else(|| RigError::UnknownCategory(category_id.to_string()))?
                .item(item_id)
                .ok_or_else(|| RigError::UnknownItem {
                    category: category_id.to_string(),
                    item: item_id.to_string(),
                })?;
            if state.active_category.as_deref() != Some(category_id) {
                return Err(RigError::SessionLocked);
            }
            // Dispatching items must have been started this run; free-form
            // items can be judged at any point.
            if !matches!(item.confirmation, Confirmation::OperatorOnly)
                && !state.store.was_tested(category_id, item_id)
            {
                return Err(RigError::NotAwaiting(item_id.to_string()));
            }

            // Operator wins over an open automatic race.
            if state.pending.remove(&key).is_some() {
                self.ctx.timers.cancel(&key);
                self.ctx.timers.cancel(&tick_key(category_id, item_id));
            }
            let was_awaiting = state.store.get(category_id, item_id).awaiting;
            state.store.set_awaiting(category_id, item_id, false);
            state.store.set_verdict(category_id, item_id, verdict);
            let advance = check_after_resolution(&mut state, category_id);
            (was_awaiting, advance)
        };

        if was_awaiting {
            self.ctx.emit(SessionEvent::AwaitingChanged {
                category_id: category_id.to_string(),
                item_id: item_id.to_string(),
                awaiting: false,
            });
        }
        self.ctx.emit(SessionEvent::VerdictChanged {
            category_id: category_id.to_string(),
            item_id: item_id.to_string(),
            verdict,
        });
        handle_advance(&self.ctx, category_id, advance);
        Ok(())
    }
}

/// Resolve an automatic confirmation, if it is still open.
///
/// The pending-map entry is the arbitration token: whichever signal removes
/// it owns the verdict, and any later signal for the same attempt finds the
/// map empty and backs off without touching state. The attempt id closes the
/// re-arm hole: when an attempt was cancelled and the item started again
/// under the same key, a stale signal from the old attempt no longer matches
/// the new entry and is ignored too.
pub(crate) fn resolve_automatic(
    ctx: &Arc<Ctx>,
    category_id: &str,
    item_id: &str,
    attempt: u64,
    verdict: Verdict,
) {
    let key = race_key(category_id, item_id);
    let advance = {
        let mut state = ctx.state.lock();
        match state.pending.get(&key) {
            Some(open) if open.attempt == attempt => {
                state.pending.remove(&key);
            }
            _ => {
                debug!(item = item_id, attempt, "late confirmation signal ignored");
                return;
            }
        }
        ctx.timers.cancel(&key);
        ctx.timers.cancel(&tick_key(category_id, item_id));
        state.store.set_awaiting(category_id, item_id, false);
        state.store.set_verdict(category_id, item_id, verdict);
        check_after_resolution(&mut state, category_id)
    };

    ctx.emit(SessionEvent::AwaitingChanged {
        category_id: category_id.to_string(),
        item_id: item_id.to_string(),
        awaiting: false,
    });
    ctx.emit(SessionEvent::VerdictChanged {
        category_id: category_id.to_string(),
        item_id: item_id.to_string(),
        verdict,
    });
    handle_advance(ctx, category_id, advance);
}

/// Turn a completion decision into events and link management.
pub(crate) fn handle_advance(ctx: &Arc<Ctx>, completed_id: &str, advance: Advance) {
    match advance {
        Advance::None => {}
        Advance::Next { category_id, link } => {
            ctx.emit(SessionEvent::CategoryCompleted {
                category_id: completed_id.to_string(),
            });
            ctx.emit(SessionEvent::CategoryEntered {
                category_id: category_id.clone(),
            });
            let ctx = ctx.clone();
            tokio::spawn(async move {
                swap_link(&ctx, link).await;
            });
        }
        Advance::Report => {
            ctx.emit(SessionEvent::CategoryCompleted {
                category_id: completed_id.to_string(),
            });
            let (snapshot, metadata) = {
                let state = ctx.state.lock();
                (state.snapshot(), state.metadata(&ctx.info))
            };
            let report = ctx.collaborators.compiler.compile(&snapshot, &metadata);
            ctx.emit(SessionEvent::CategoryEntered {
                category_id: crate::core::REPORT_CATEGORY_ID.to_string(),
            });
            ctx.emit(SessionEvent::ReportReady(report));
            let ctx = ctx.clone();
            tokio::spawn(async move {
                swap_link(&ctx, None).await;
            });
        }
    }
}
