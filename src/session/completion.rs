//! Completion detection: deciding, after a verdict lands, whether the
//! active category is finished and where the session goes next.
//!
//! The decision runs under the state lock and mutates the state exactly
//! once per completed category; callers only translate the returned
//! [`Advance`] into events and link management after the lock is dropped.

use tracing::debug;

use crate::core::{CategoryState, REPORT_CATEGORY_ID};

use super::SharedState;

/// Where the session moves after a resolution.
pub(crate) enum Advance {
    /// The active category is not finished (or the verdict landed outside
    /// the active category); nothing moves.
    None,
    /// The active category completed and the next one became active.
    Next {
        /// The newly active category.
        category_id: String,
        /// Its declared link, if any.
        link: Option<String>,
    },
    /// The last category completed; the run ended and the report phase was
    /// entered.
    Report,
}

/// Check whether `category_id` just completed, and advance if so.
///
/// Only the active category of a running session can complete, only when it
/// has at least one item, and only once: a category already marked
/// `Completed` never advances again, so an operator overwrite after
/// completion cannot re-trigger the move.
pub(crate) fn check_after_resolution(state: &mut SharedState, category_id: &str) -> Advance {
    if !state.running || state.active_category.as_deref() != Some(category_id) {
        return Advance::None;
    }
    let Some(category) = state.plan.category(category_id) else {
        return Advance::None;
    };
    // A category with no items is only ever left by explicit navigation.
    if category.items.is_empty() {
        return Advance::None;
    }
    if state.category_states.get(category_id) == Some(&CategoryState::Completed) {
        return Advance::None;
    }
    if !state.store.all_resolved(category) {
        return Advance::None;
    }

    state
        .category_states
        .insert(category_id.to_string(), CategoryState::Completed);

    match state.plan.next_after(category_id) {
        Some(next) => {
            let next_id = next.id.clone();
            let link = next.link.clone();
            debug!(from = category_id, to = %next_id, "category completed, advancing");
            state.active_category = Some(next_id.clone());
            state
                .category_states
                .insert(next_id.clone(), CategoryState::Active);
            Advance::Next {
                category_id: next_id,
                link,
            }
        }
        None => {
            debug!(from = category_id, "final category completed, entering report phase");
            state.running = false;
            state.active_category = Some(REPORT_CATEGORY_ID.to_string());
            Advance::Report
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CategorySpec, ItemSpec, TestPlan, Verdict};
    use crate::verdicts::VerdictStore;
    use chrono::Utc;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn state_with(categories: Vec<CategorySpec>) -> SharedState {
        let plan = TestPlan::new(categories).unwrap();
        let mut store = VerdictStore::new();
        store.init_plan(&plan);
        let category_states = plan
            .categories
            .iter()
            .map(|c| (c.id.clone(), CategoryState::NotStarted))
            .collect::<HashMap<_, _>>();
        SharedState {
            plan,
            store,
            category_states,
            active_category: None,
            running: false,
            started_at: Some(Utc::now()),
            session_id: Uuid::new_v4(),
            pending: HashMap::new(),
            attempt_counter: 0,
        }
    }

    fn two_category_state() -> SharedState {
        let mut state = state_with(vec![
            CategorySpec::new("light", "Lighting", vec![ItemSpec::automatic("front", "Front")]),
            CategorySpec::new("button", "Buttons", vec![ItemSpec::operator("power", "Power")]),
        ]);
        state.running = true;
        state.active_category = Some("light".into());
        state.category_states.insert("light".into(), CategoryState::Active);
        state
    }

    #[test]
    fn test_unresolved_category_does_not_advance() {
        let mut state = two_category_state();
        assert!(matches!(
            check_after_resolution(&mut state, "light"),
            Advance::None
        ));
        assert_eq!(state.active_category.as_deref(), Some("light"));
    }

    #[test]
    fn test_resolved_category_advances_once() {
        let mut state = two_category_state();
        state.store.set_verdict("light", "front", Verdict::Normal);

        assert!(matches!(
            check_after_resolution(&mut state, "light"),
            Advance::Next { ref category_id, .. } if category_id == "button"
        ));
        assert_eq!(state.active_category.as_deref(), Some("button"));
        assert_eq!(
            state.category_states.get("light"),
            Some(&CategoryState::Completed)
        );

        // A second check for the completed category is inert.
        assert!(matches!(
            check_after_resolution(&mut state, "light"),
            Advance::None
        ));
        assert_eq!(state.active_category.as_deref(), Some("button"));
    }

    #[test]
    fn test_last_category_enters_report_phase() {
        let mut state = two_category_state();
        state.store.set_verdict("light", "front", Verdict::Normal);
        let _ = check_after_resolution(&mut state, "light");
        state.store.set_verdict("button", "power", Verdict::Abnormal);

        assert!(matches!(
            check_after_resolution(&mut state, "button"),
            Advance::Report
        ));
        assert!(!state.running);
        assert_eq!(state.active_category.as_deref(), Some(REPORT_CATEGORY_ID));
    }

    #[test]
    fn test_empty_category_never_auto_advances() {
        let mut state = state_with(vec![
            CategorySpec::new("camera", "Cameras", vec![]),
            CategorySpec::new("button", "Buttons", vec![ItemSpec::operator("power", "Power")]),
        ]);
        state.running = true;
        state.active_category = Some("camera".into());
        state.category_states.insert("camera".into(), CategoryState::Active);

        assert!(matches!(
            check_after_resolution(&mut state, "camera"),
            Advance::None
        ));
        assert_eq!(state.active_category.as_deref(), Some("camera"));
    }

    #[test]
    fn test_inactive_category_resolution_does_not_advance() {
        let mut state = two_category_state();
        state.store.set_verdict("button", "power", Verdict::Normal);
        assert!(matches!(
            check_after_resolution(&mut state, "button"),
            Advance::None
        ));
    }
}
