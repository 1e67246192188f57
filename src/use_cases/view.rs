// Cross-thread read access to the authoritative world.
//
// Only the world task writes; HTTP handlers and sockets read copies. Public
// methods take the lock once and hand the guard to `*_locked` helpers, so no
// path ever re-enters the (non-reentrant) mutex.

use crate::domain::{EntityId, EntityState, Snapshot};
use crate::use_cases::ServerState;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct ViewState {
    latest: Option<Arc<Snapshot>>,
    players: BTreeMap<u64, EntityId>,
    server_state: ServerState,
}

/// Summary handed to the lobby state route.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewSummary {
    pub tick: u64,
    pub timestamp: f64,
    pub entity_count: usize,
    pub alive_count: usize,
    pub players: BTreeMap<u64, EntityState>,
}

#[derive(Debug)]
pub struct WorldView {
    inner: Mutex<ViewState>,
}

impl Default for WorldView {
    fn default() -> Self {
        Self {
            inner: Mutex::new(ViewState {
                latest: None,
                players: BTreeMap::new(),
                server_state: ServerState::Lobby,
            }),
        }
    }
}

impl WorldView {
    fn lock(&self) -> MutexGuard<'_, ViewState> {
        // A panicked writer leaves a complete previous snapshot behind.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the published snapshot and player bindings in one step.
    pub fn publish(&self, snapshot: Arc<Snapshot>, players: BTreeMap<u64, EntityId>) {
        let mut state = self.lock();
        state.latest = Some(snapshot);
        state.players = players;
    }

    pub fn set_server_state(&self, server_state: ServerState) {
        self.lock().server_state = server_state;
    }

    pub fn server_state(&self) -> ServerState {
        self.lock().server_state.clone()
    }

    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        Self::latest_locked(&self.lock())
    }

    pub fn player_entity(&self, player_id: u64) -> Option<EntityId> {
        Self::player_entity_locked(&self.lock(), player_id)
    }

    /// Latest state of one player's entity.
    pub fn player_state(&self, player_id: u64) -> Option<EntityState> {
        let state = self.lock();
        let id = Self::player_entity_locked(&state, player_id)?;
        Self::entity_locked(&state, id)
    }

    pub fn summary(&self) -> Option<ViewSummary> {
        let state = self.lock();
        let snapshot = Self::latest_locked(&state)?;
        let players = state
            .players
            .iter()
            .filter_map(|(&player, &id)| Some((player, Self::entity_locked(&state, id)?)))
            .collect();

        Some(ViewSummary {
            tick: snapshot.tick,
            timestamp: snapshot.timestamp,
            entity_count: snapshot.entities.len(),
            alive_count: snapshot.entities.iter().filter(|e| !e.dead).count(),
            players,
        })
    }

    fn latest_locked(state: &ViewState) -> Option<Arc<Snapshot>> {
        state.latest.clone()
    }

    fn player_entity_locked(state: &ViewState, player_id: u64) -> Option<EntityId> {
        state.players.get(&player_id).copied()
    }

    fn entity_locked(state: &ViewState, id: EntityId) -> Option<EntityState> {
        state.latest.as_ref()?.entity(id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec2;

    fn snapshot() -> Arc<Snapshot> {
        Arc::new(Snapshot {
            tick: 4,
            timestamp: 0.2,
            entities: vec![
                EntityState {
                    id: EntityId(1),
                    position: DVec2::new(1.0, 2.0),
                    velocity: DVec2::ZERO,
                    health: Some(100),
                    dead: false,
                },
                EntityState {
                    id: EntityId(2),
                    position: DVec2::ZERO,
                    velocity: DVec2::ZERO,
                    health: Some(0),
                    dead: true,
                },
            ],
        })
    }

    #[test]
    fn summary_reads_players_under_a_single_lock() {
        let view = WorldView::default();
        assert!(view.summary().is_none());

        view.publish(snapshot(), BTreeMap::from([(77, EntityId(1))]));
        let summary = view.summary().expect("published");

        assert_eq!(summary.tick, 4);
        assert_eq!(summary.entity_count, 2);
        assert_eq!(summary.alive_count, 1);
        assert_eq!(
            summary.players.get(&77).map(|s| s.position),
            Some(DVec2::new(1.0, 2.0))
        );
        assert_eq!(view.player_state(77).map(|s| s.id), Some(EntityId(1)));
        assert_eq!(view.player_entity(78), None);
    }

    #[test]
    fn view_is_readable_from_other_threads_while_published() {
        let view = Arc::new(WorldView::default());
        let writer = {
            let view = view.clone();
            std::thread::spawn(move || {
                for _ in 0..100 {
                    view.publish(snapshot(), BTreeMap::new());
                }
            })
        };
        for _ in 0..100 {
            let _ = view.summary();
        }
        writer.join().expect("writer thread");
        assert_eq!(view.latest().map(|s| s.tick), Some(4));
    }
}
