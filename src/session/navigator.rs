//! Manual category navigation.
//!
//! While a run is in progress the operator is pinned to the active category;
//! the session itself moves the focus forward as categories complete.
//! Between runs navigation is free, and entering the report category
//! compiles and publishes the report.

use tracing::debug;

use crate::core::{CategoryState, SessionEvent, REPORT_CATEGORY_ID};
use crate::error::{AppResult, RigError};

use super::{race_key, tick_key, Orchestrator};

impl Orchestrator {
    /// Make `category_id` the presented category.
    ///
    /// Entering the already-active category is a no-op. While a run is in
    /// progress every other destination, the report included, is rejected
    /// with `SessionLocked`. Between runs navigation is free; entering the
    /// report category compiles the report and publishes it as a
    /// [`SessionEvent::ReportReady`].
    ///
    /// Leaving a category tears down any confirmation still in flight there
    /// (the items drop back to not-awaiting, verdicts keep whatever they
    /// hold) and restates it: `Completed` when every item resolved,
    /// `NotStarted` otherwise.
    ///
    /// # Errors
    ///
    /// `SessionLocked` mid-run, `UnknownCategory` for ids not in the plan.
    pub fn enter(&self, category_id: &str) -> AppResult<()> {
        if category_id == REPORT_CATEGORY_ID {
            return self.enter_report();
        }

        let (cleared, exited) = {
            let mut state = self.ctx.state.lock();
            if state.plan.category(category_id).is_none() {
                return Err(RigError::UnknownCategory(category_id.to_string()));
            }
            if state.active_category.as_deref() == Some(category_id) {
                return Ok(());
            }
            if state.running {
                return Err(RigError::SessionLocked);
            }

            let exited = state.active_category.take();
            let mut cleared = Vec::new();
            if let Some(prev) = exited.as_deref().filter(|p| *p != REPORT_CATEGORY_ID) {
                // Tear down anything still in flight in the category we
                // leave behind.
                let keys: Vec<String> = state
                    .pending
                    .iter()
                    .filter(|(_, p)| p.category_id == prev)
                    .map(|(k, _)| k.clone())
                    .collect();
                for key in keys {
                    if let Some(p) = state.pending.remove(&key) {
                        self.ctx.timers.cancel(&key);
                        self.ctx.timers.cancel(&tick_key(&p.category_id, &p.item_id));
                        state.store.set_awaiting(&p.category_id, &p.item_id, false);
                        cleared.push((p.category_id, p.item_id));
                    }
                }
                let restated = state
                    .plan
                    .category(prev)
                    .map(|cat| {
                        if !cat.items.is_empty() && state.store.all_resolved(cat) {
                            CategoryState::Completed
                        } else {
                            CategoryState::NotStarted
                        }
                    })
                    .unwrap_or_default();
                state.category_states.insert(prev.to_string(), restated);
            }

            state.active_category = Some(category_id.to_string());
            state
                .category_states
                .insert(category_id.to_string(), CategoryState::Active);
            (cleared, exited)
        };

        debug!(from = ?exited, to = category_id, "category entered");
        for (cat, item) in cleared {
            // The race was torn down, not resolved; a late oracle answer for
            // it will find no pending entry.
            debug_assert!(!self.ctx.timers.is_pending(&race_key(&cat, &item)));
            self.ctx.emit(SessionEvent::AwaitingChanged {
                category_id: cat,
                item_id: item,
                awaiting: false,
            });
        }
        self.ctx.emit(SessionEvent::CategoryEntered {
            category_id: category_id.to_string(),
        });
        Ok(())
    }

    /// Enter the report view and publish the compiled report.
    fn enter_report(&self) -> AppResult<()> {
        let (snapshot, metadata) = {
            let mut state = self.ctx.state.lock();
            if state.running {
                return Err(RigError::SessionLocked);
            }
            if let Some(prev) = state
                .active_category
                .take()
                .filter(|p| p != REPORT_CATEGORY_ID)
            {
                let restated = state
                    .plan
                    .category(&prev)
                    .map(|cat| {
                        if !cat.items.is_empty() && state.store.all_resolved(cat) {
                            CategoryState::Completed
                        } else {
                            CategoryState::NotStarted
                        }
                    })
                    .unwrap_or_default();
                state.category_states.insert(prev, restated);
            }
            state.active_category = Some(REPORT_CATEGORY_ID.to_string());
            (state.snapshot(), state.metadata(&self.ctx.info))
        };

        let report = self.ctx.collaborators.compiler.compile(&snapshot, &metadata);
        self.ctx.emit(SessionEvent::CategoryEntered {
            category_id: REPORT_CATEGORY_ID.to_string(),
        });
        self.ctx.emit(SessionEvent::ReportReady(report));
        Ok(())
    }
}
