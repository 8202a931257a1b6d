//! Position store: the single source of truth for position state.
//!
//! All lifecycle transitions go through [`PositionStore::transition`], a
//! compare-and-swap under one write lock. A lost race surfaces as
//! `StoreError::Conflict` and means another task owns the position; callers
//! drop out instead of retrying. Every successful mutation is journaled
//! before it becomes visible to readers.

mod journal;

pub use journal::{JsonJournal, NullJournal, PositionJournal};

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::domain::{
    InstrumentKey, Position, PositionId, PositionStatus, StreamKind, StrategyKind,
};
use crate::error::{Result, StoreError};

/// Read filter for [`PositionStore::list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    All,
    /// Open, Monitoring, Reevaluating or Closing.
    Active,
    Status(PositionStatus),
}

impl StatusFilter {
    fn matches(&self, status: PositionStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Active => status.is_active(),
            StatusFilter::Status(s) => *s == status,
        }
    }
}

pub struct PositionStore {
    positions: RwLock<HashMap<PositionId, Position>>,
    journal: Box<dyn PositionJournal>,
}

impl PositionStore {
    /// Open the store, loading any positions the journal persisted.
    pub fn open(journal: Box<dyn PositionJournal>) -> Result<Self> {
        let loaded = journal.load()?;
        let positions = loaded.into_iter().map(|p| (p.id.clone(), p)).collect();
        Ok(Self {
            positions: RwLock::new(positions),
            journal,
        })
    }

    /// Ephemeral store with no persistence.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            positions: RwLock::new(HashMap::new()),
            journal: Box::new(NullJournal),
        }
    }

    /// Register a new position. Rejects a second active position for the
    /// same `(strategy, primary instrument)` pair.
    pub fn create(&self, position: Position) -> Result<PositionId> {
        let mut guard = self.positions.write();

        let key = position.primary_leg().instrument.clone();
        let duplicate = guard.values().any(|p| {
            p.status.is_active()
                && p.strategy == position.strategy
                && p.primary_leg().instrument == key
        });
        if duplicate {
            return Err(StoreError::DuplicateExposure {
                strategy: position.strategy,
                instrument: key.to_string(),
            }
            .into());
        }

        let id = position.id.clone();
        self.commit(&mut guard, position)?;
        Ok(id)
    }

    pub fn get(&self, id: &PositionId) -> Result<Position> {
        self.positions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() }.into())
    }

    #[must_use]
    pub fn list(&self, filter: StatusFilter) -> Vec<Position> {
        self.positions
            .read()
            .values()
            .filter(|p| filter.matches(p.status))
            .cloned()
            .collect()
    }

    /// Mutate a non-terminal position in place. Status changes must go
    /// through [`transition`](Self::transition) instead.
    pub fn update<F>(&self, id: &PositionId, f: F) -> Result<Position>
    where
        F: FnOnce(&mut Position),
    {
        let mut guard = self.positions.write();
        let current = guard
            .get(id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        if current.status.is_terminal() {
            return Err(StoreError::Terminal {
                id: id.to_string(),
                status: current.status,
            }
            .into());
        }

        let mut updated = current.clone();
        let status_before = updated.status;
        f(&mut updated);
        updated.status = status_before;
        self.commit(&mut guard, updated)
    }

    /// Atomic compare-and-swap on status. Fails with `Conflict` when the
    /// current status is not `expected`; this is the at-most-one-owner
    /// guarantee every concurrent path leans on.
    pub fn transition(
        &self,
        id: &PositionId,
        expected: PositionStatus,
        new: PositionStatus,
    ) -> Result<Position> {
        self.transition_with(id, expected, new, |_| {})
    }

    /// Compare-and-swap plus an extra mutation applied under the same lock
    /// (e.g. recording pnl while moving to `Closed`).
    pub fn transition_with<F>(
        &self,
        id: &PositionId,
        expected: PositionStatus,
        new: PositionStatus,
        f: F,
    ) -> Result<Position>
    where
        F: FnOnce(&mut Position),
    {
        let mut guard = self.positions.write();
        let current = guard
            .get(id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;

        if current.status.is_terminal() {
            return Err(StoreError::Terminal {
                id: id.to_string(),
                status: current.status,
            }
            .into());
        }
        if current.status != expected {
            return Err(StoreError::Conflict {
                id: id.to_string(),
                expected,
                actual: current.status,
            }
            .into());
        }

        let mut updated = current.clone();
        updated.status = new;
        f(&mut updated);
        updated.status = new;
        self.commit(&mut guard, updated)
    }

    /// Revert positions a crash left mid-flight. An estimation or close
    /// that was in progress when the process died holds no lease after a
    /// restart; both go back to `Monitoring` so the normal evaluation path
    /// re-takes the decision. Returns the positions that were interrupted
    /// mid-close so the caller can surface them.
    pub fn recover_interrupted(&self) -> Result<Vec<Position>> {
        let mut guard = self.positions.write();
        let stranded: Vec<(PositionId, PositionStatus)> = guard
            .values()
            .filter(|p| {
                matches!(
                    p.status,
                    PositionStatus::Reevaluating | PositionStatus::Closing
                )
            })
            .map(|p| (p.id.clone(), p.status))
            .collect();

        let mut interrupted_closes = Vec::new();
        for (id, was) in stranded {
            let Some(current) = guard.get(&id) else {
                continue;
            };
            let mut updated = current.clone();
            updated.status = PositionStatus::Monitoring;
            let updated = self.commit(&mut guard, updated)?;
            if was == PositionStatus::Closing {
                interrupted_closes.push(updated);
            }
        }
        Ok(interrupted_closes)
    }

    /// Sum of entry notional across active positions in a strategy
    /// category. Always a fresh read, never cached.
    #[must_use]
    pub fn category_exposure(&self, strategy: StrategyKind) -> Decimal {
        self.positions
            .read()
            .values()
            .filter(|p| p.status.is_active() && p.strategy == strategy)
            .map(Position::notional)
            .sum()
    }

    /// Instrument keys active positions need subscribed, grouped by feed.
    #[must_use]
    pub fn active_keys(&self) -> HashMap<StreamKind, HashSet<InstrumentKey>> {
        let mut keys: HashMap<StreamKind, HashSet<InstrumentKey>> = HashMap::new();
        for position in self.positions.read().values() {
            if !position.status.is_active() {
                continue;
            }
            for (kind, key) in position.subscriptions() {
                keys.entry(kind).or_default().insert(key);
            }
        }
        keys
    }

    /// Active positions that care about a tick on the given feed and key.
    #[must_use]
    pub fn positions_for_key(&self, kind: StreamKind, key: &InstrumentKey) -> Vec<Position> {
        self.positions
            .read()
            .values()
            .filter(|p| {
                p.status.is_active()
                    && p.subscriptions()
                        .iter()
                        .any(|(k, i)| k == &kind && i == key)
            })
            .cloned()
            .collect()
    }

    // Persist the full set including `updated` before making it visible.
    fn commit(
        &self,
        guard: &mut HashMap<PositionId, Position>,
        updated: Position,
    ) -> Result<Position> {
        let mut snapshot: Vec<Position> = guard
            .values()
            .filter(|p| p.id != updated.id)
            .cloned()
            .collect();
        snapshot.push(updated.clone());
        self.journal.persist(&snapshot)?;
        guard.insert(updated.id.clone(), updated.clone());
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExitPolicy, PositionLeg, Side, ThesisSnapshot, Venue};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn open_position(strategy: StrategyKind, instrument: &str) -> Position {
        Position::open(
            strategy,
            vec![PositionLeg {
                venue: Venue::Polymarket,
                instrument: instrument.into(),
                side: Side::Long,
                entry_price: dec!(0.40),
                size: dec!(25),
            }],
            ThesisSnapshot {
                probability: Some(dec!(0.50)),
                edge: dec!(0.10),
                rationale: "test".to_string(),
                reference_price: dec!(0.40),
                taken_at: Utc::now(),
            },
            ExitPolicy::default(),
        )
    }

    #[test]
    fn transition_cas_succeeds_on_expected() {
        let store = PositionStore::in_memory();
        let id = store.create(open_position(StrategyKind::Prediction, "tok")).unwrap();

        let pos = store
            .transition(&id, PositionStatus::Open, PositionStatus::Monitoring)
            .unwrap();
        assert_eq!(pos.status, PositionStatus::Monitoring);
    }

    #[test]
    fn transition_cas_conflict_on_mismatch() {
        let store = PositionStore::in_memory();
        let id = store.create(open_position(StrategyKind::Prediction, "tok")).unwrap();

        let err = store
            .transition(&id, PositionStatus::Monitoring, PositionStatus::Reevaluating)
            .unwrap_err();
        assert!(err.is_transition_conflict());

        // State unchanged after the failed CAS
        assert_eq!(store.get(&id).unwrap().status, PositionStatus::Open);
    }

    #[test]
    fn second_cas_loses_the_race() {
        let store = PositionStore::in_memory();
        let id = store.create(open_position(StrategyKind::Prediction, "tok")).unwrap();
        store
            .transition(&id, PositionStatus::Open, PositionStatus::Monitoring)
            .unwrap();

        assert!(store
            .transition(&id, PositionStatus::Monitoring, PositionStatus::Reevaluating)
            .is_ok());
        assert!(store
            .transition(&id, PositionStatus::Monitoring, PositionStatus::Reevaluating)
            .unwrap_err()
            .is_transition_conflict());
    }

    #[test]
    fn terminal_positions_reject_mutation() {
        let store = PositionStore::in_memory();
        let id = store.create(open_position(StrategyKind::Prediction, "tok")).unwrap();
        store
            .transition(&id, PositionStatus::Open, PositionStatus::Closing)
            .unwrap();
        store
            .transition_with(&id, PositionStatus::Closing, PositionStatus::Closed, |p| {
                p.realized_pnl = Some(dec!(1.25));
                p.closed_at = Some(Utc::now());
            })
            .unwrap();

        assert!(matches!(
            store.transition(&id, PositionStatus::Closed, PositionStatus::Open),
            Err(crate::error::Error::Store(StoreError::Terminal { .. }))
        ));
        assert!(store.update(&id, |p| p.last_check_price = Some(dec!(1))).is_err());

        // Still readable for reporting
        let closed = store.get(&id).unwrap();
        assert_eq!(closed.realized_pnl, Some(dec!(1.25)));
    }

    #[test]
    fn update_cannot_smuggle_a_status_change() {
        let store = PositionStore::in_memory();
        let id = store.create(open_position(StrategyKind::Prediction, "tok")).unwrap();

        store
            .update(&id, |p| p.status = PositionStatus::Closed)
            .unwrap();
        assert_eq!(store.get(&id).unwrap().status, PositionStatus::Open);
    }

    #[test]
    fn duplicate_active_exposure_rejected() {
        let store = PositionStore::in_memory();
        store.create(open_position(StrategyKind::Prediction, "tok")).unwrap();

        let err = store
            .create(open_position(StrategyKind::Prediction, "tok"))
            .unwrap_err();
        assert!(err.to_string().contains("duplicate active exposure"));

        // Same instrument, different strategy is fine
        assert!(store.create(open_position(StrategyKind::MicroArb, "tok")).is_ok());
    }

    #[test]
    fn closed_position_frees_the_exposure_slot() {
        let store = PositionStore::in_memory();
        let id = store.create(open_position(StrategyKind::Prediction, "tok")).unwrap();
        store
            .transition(&id, PositionStatus::Open, PositionStatus::Closing)
            .unwrap();
        store
            .transition(&id, PositionStatus::Closing, PositionStatus::Closed)
            .unwrap();

        assert!(store.create(open_position(StrategyKind::Prediction, "tok")).is_ok());
    }

    #[test]
    fn category_exposure_counts_active_only() {
        let store = PositionStore::in_memory();
        let a = store.create(open_position(StrategyKind::Prediction, "a")).unwrap();
        store.create(open_position(StrategyKind::Prediction, "b")).unwrap();
        store.create(open_position(StrategyKind::Spread, "c")).unwrap();

        // 25 * 0.40 = 10 per position
        assert_eq!(store.category_exposure(StrategyKind::Prediction), dec!(20.00));

        store.transition(&a, PositionStatus::Open, PositionStatus::Closing).unwrap();
        store.transition(&a, PositionStatus::Closing, PositionStatus::Closed).unwrap();
        assert_eq!(store.category_exposure(StrategyKind::Prediction), dec!(10.00));
    }

    #[test]
    fn active_keys_grouped_by_stream() {
        let store = PositionStore::in_memory();
        store.create(open_position(StrategyKind::Prediction, "tok-a")).unwrap();
        store.create(open_position(StrategyKind::Prediction, "tok-b")).unwrap();

        let keys = store.active_keys();
        let clob = keys.get(&StreamKind::ClobBook).unwrap();
        assert_eq!(clob.len(), 2);
        assert!(clob.contains(&InstrumentKey::new("tok-a")));
    }

    #[test]
    fn positions_for_key_matches_feed_and_instrument() {
        let store = PositionStore::in_memory();
        let id = store.create(open_position(StrategyKind::Prediction, "tok")).unwrap();

        let hits = store.positions_for_key(StreamKind::ClobBook, &"tok".into());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, id);

        assert!(store.positions_for_key(StreamKind::Ticker, &"tok".into()).is_empty());
        assert!(store.positions_for_key(StreamKind::ClobBook, &"other".into()).is_empty());
    }

    #[test]
    fn recover_interrupted_reverts_mid_flight_statuses() {
        let store = PositionStore::in_memory();
        let estimating = store
            .create(open_position(StrategyKind::Prediction, "a"))
            .unwrap();
        let closing = store
            .create(open_position(StrategyKind::Prediction, "b"))
            .unwrap();
        let settled = store
            .create(open_position(StrategyKind::Prediction, "c"))
            .unwrap();

        store.transition(&estimating, PositionStatus::Open, PositionStatus::Monitoring).unwrap();
        store
            .transition(&estimating, PositionStatus::Monitoring, PositionStatus::Reevaluating)
            .unwrap();
        store.transition(&closing, PositionStatus::Open, PositionStatus::Closing).unwrap();
        store.transition(&settled, PositionStatus::Open, PositionStatus::Closing).unwrap();
        store.transition(&settled, PositionStatus::Closing, PositionStatus::Closed).unwrap();

        let interrupted = store.recover_interrupted().unwrap();

        assert_eq!(interrupted.len(), 1);
        assert_eq!(interrupted[0].id, closing);
        assert_eq!(store.get(&estimating).unwrap().status, PositionStatus::Monitoring);
        assert_eq!(store.get(&closing).unwrap().status, PositionStatus::Monitoring);
        // Terminal positions stay put
        assert_eq!(store.get(&settled).unwrap().status, PositionStatus::Closed);
    }

    #[test]
    fn journal_reload_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.json");

        let store = PositionStore::open(Box::new(JsonJournal::new(&path))).unwrap();
        let id = store.create(open_position(StrategyKind::Prediction, "tok")).unwrap();
        store.transition(&id, PositionStatus::Open, PositionStatus::Monitoring).unwrap();
        drop(store);

        let reopened = PositionStore::open(Box::new(JsonJournal::new(&path))).unwrap();
        let pos = reopened.get(&id).unwrap();
        assert_eq!(pos.status, PositionStatus::Monitoring);
    }
}
