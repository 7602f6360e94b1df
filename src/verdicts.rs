//! The verdict store: runtime outcome state for every item in the plan.
//!
//! This is a plain synchronous collection with no timers, no events and no
//! collaborator calls. The session layer owns one of these behind its state
//! lock and is responsible for emitting change events; the store itself only
//! records.

use std::collections::HashMap;

use crate::core::{CategorySpec, ItemSnapshot, TestPlan, Verdict};

/// Runtime state of one item.
#[derive(Clone, Copy, Debug, Default)]
pub struct ItemState {
    /// Current verdict. Last write wins.
    pub verdict: Verdict,
    /// True while a test attempt is in flight for the item.
    pub awaiting: bool,
    /// True once `begin_test` ran for the item this session. Gates manual
    /// verdicts for dispatching items.
    pub tested: bool,
}

/// Per-category, per-item verdict state for one session.
///
/// Keys follow the plan; items missing from the map read as their default
/// (Unset, not awaiting, not tested).
#[derive(Debug, Default)]
pub struct VerdictStore {
    categories: HashMap<String, HashMap<String, ItemState>>,
}

impl VerdictStore {
    /// Empty store with no plan keys.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an Unset entry for every item in the plan,
    /// discarding all prior state.
    pub fn init_plan(&mut self, plan: &TestPlan) {
        self.categories.clear();
        for cat in &plan.categories {
            let items = cat
                .items
                .iter()
                .map(|item| (item.id.clone(), ItemState::default()))
                .collect();
            self.categories.insert(cat.id.clone(), items);
        }
    }

    /// Current state of an item. Unknown keys read as the default state.
    pub fn get(&self, category_id: &str, item_id: &str) -> ItemState {
        self.categories
            .get(category_id)
            .and_then(|items| items.get(item_id))
            .copied()
            .unwrap_or_default()
    }

    fn entry(&mut self, category_id: &str, item_id: &str) -> &mut ItemState {
        self.categories
            .entry(category_id.to_string())
            .or_default()
            .entry(item_id.to_string())
            .or_default()
    }

    /// Record a verdict. Overwrites whatever was there; the caller decides
    /// whether an overwrite is legitimate.
    pub fn set_verdict(&mut self, category_id: &str, item_id: &str, verdict: Verdict) {
        self.entry(category_id, item_id).verdict = verdict;
    }

    /// Flip the awaiting flag for an item.
    pub fn set_awaiting(&mut self, category_id: &str, item_id: &str, awaiting: bool) {
        self.entry(category_id, item_id).awaiting = awaiting;
    }

    /// Mark that `begin_test` ran for the item this session.
    pub fn mark_tested(&mut self, category_id: &str, item_id: &str) {
        self.entry(category_id, item_id).tested = true;
    }

    /// Whether `begin_test` ran for the item this session.
    pub fn was_tested(&self, category_id: &str, item_id: &str) -> bool {
        self.get(category_id, item_id).tested
    }

    /// Reset every item in one category to the default state.
    pub fn clear_category(&mut self, category_id: &str) {
        if let Some(items) = self.categories.get_mut(category_id) {
            for state in items.values_mut() {
                *state = ItemState::default();
            }
        }
    }

    /// Drop all state for all categories.
    pub fn clear_all(&mut self) {
        self.categories.clear();
    }

    /// True when every item of the category carries a resolved verdict.
    /// An empty category is vacuously resolved; the completion logic decides
    /// separately whether that may trigger an advance.
    pub fn all_resolved(&self, category: &CategorySpec) -> bool {
        category
            .items
            .iter()
            .all(|item| self.get(&category.id, &item.id).verdict.is_resolved())
    }

    /// Snapshot one category's items in plan order.
    pub fn snapshot_items(&self, category: &CategorySpec) -> Vec<ItemSnapshot> {
        category
            .items
            .iter()
            .map(|item| {
                let state = self.get(&category.id, &item.id);
                ItemSnapshot {
                    id: item.id.clone(),
                    name: item.name.clone(),
                    verdict: state.verdict,
                    awaiting: state.awaiting,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ItemSpec;

    fn sample_plan() -> TestPlan {
        TestPlan::new(vec![
            CategorySpec::new(
                "light",
                "Lighting",
                vec![
                    ItemSpec::automatic("front", "Front light"),
                    ItemSpec::automatic("rear", "Rear light"),
                ],
            ),
            CategorySpec::new("camera", "Cameras", vec![]),
        ])
        .unwrap()
    }

    #[test]
    fn test_unknown_keys_read_default() {
        let store = VerdictStore::new();
        let state = store.get("nope", "nothing");
        assert_eq!(state.verdict, Verdict::Unset);
        assert!(!state.awaiting);
        assert!(!state.tested);
    }

    #[test]
    fn test_last_write_wins() {
        let mut store = VerdictStore::new();
        store.set_verdict("light", "front", Verdict::Abnormal);
        store.set_verdict("light", "front", Verdict::Normal);
        assert_eq!(store.get("light", "front").verdict, Verdict::Normal);
    }

    #[test]
    fn test_init_plan_discards_prior_state() {
        let plan = sample_plan();
        let mut store = VerdictStore::new();
        store.set_verdict("light", "front", Verdict::Normal);
        store.init_plan(&plan);
        assert_eq!(store.get("light", "front").verdict, Verdict::Unset);
    }

    #[test]
    fn test_all_resolved() {
        let plan = sample_plan();
        let light = plan.category("light").unwrap();
        let mut store = VerdictStore::new();
        store.init_plan(&plan);

        assert!(!store.all_resolved(light));
        store.set_verdict("light", "front", Verdict::Normal);
        assert!(!store.all_resolved(light));
        store.set_verdict("light", "rear", Verdict::Abnormal);
        assert!(store.all_resolved(light));
    }

    #[test]
    fn test_empty_category_vacuously_resolved() {
        let plan = sample_plan();
        let camera = plan.category("camera").unwrap();
        let store = VerdictStore::new();
        assert!(store.all_resolved(camera));
    }

    #[test]
    fn test_clear_category_keeps_others() {
        let plan = sample_plan();
        let mut store = VerdictStore::new();
        store.init_plan(&plan);
        store.set_verdict("light", "front", Verdict::Normal);
        store.mark_tested("light", "front");
        store.set_awaiting("light", "rear", true);

        store.clear_category("light");
        assert_eq!(store.get("light", "front").verdict, Verdict::Unset);
        assert!(!store.was_tested("light", "front"));
        assert!(!store.get("light", "rear").awaiting);
    }

    #[test]
    fn test_snapshot_preserves_plan_order() {
        let plan = sample_plan();
        let light = plan.category("light").unwrap();
        let mut store = VerdictStore::new();
        store.init_plan(&plan);
        store.set_verdict("light", "rear", Verdict::Abnormal);

        let snap = store.snapshot_items(light);
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].id, "front");
        assert_eq!(snap[1].id, "rear");
        assert_eq!(snap[1].verdict, Verdict::Abnormal);
    }
}
