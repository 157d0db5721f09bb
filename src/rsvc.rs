//! Replicated service leadership state.
//!
//! A [`ReplicatedService`] pairs a metadata store replica with the knowledge
//! of who leads it. Services built on top (the container service) open
//! transactions through it and stamp every reply with its [`LeaderHint`].

use crate::error::{CofferError, Result};
use crate::observability;
use crate::rdb::{Rdb, RdbTx};
use crate::types::{LeaderHint, NodeId, Term};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Default)]
struct RsvcState {
    leader: Option<NodeId>,
    term: Term,
}

/// One replica of a replicated service.
pub struct ReplicatedService {
    db: Arc<Rdb>,
    rank: NodeId,
    state: RwLock<RsvcState>,
}

impl ReplicatedService {
    pub fn new(db: Arc<Rdb>, rank: NodeId) -> Arc<Self> {
        Arc::new(Self {
            db,
            rank,
            state: RwLock::new(RsvcState::default()),
        })
    }

    pub fn db(&self) -> &Arc<Rdb> {
        &self.db
    }

    pub fn rank(&self) -> NodeId {
        self.rank
    }

    pub fn term(&self) -> Term {
        self.state.read().term
    }

    pub fn is_leader(&self) -> bool {
        self.state.read().leader == Some(self.rank) && self.db.is_leader()
    }

    /// Become leader in a new term.
    pub fn step_up(&self) -> Result<Term> {
        let term = self.db.step_up()?;
        let mut state = self.state.write();
        state.leader = Some(self.rank);
        state.term = term;
        observability::update_leadership(term, true);
        info!(rank = self.rank, term, "Replicated service stepped up");
        Ok(term)
    }

    /// Stop leading, remembering who leads next if known.
    pub fn step_down(&self, new_leader: Option<NodeId>) {
        self.db.step_down();
        let mut state = self.state.write();
        state.leader = new_leader.filter(|&leader| leader != self.rank);
        observability::update_leadership(state.term, false);
        info!(rank = self.rank, term = state.term, "Replicated service stepped down");
    }

    /// Fail with `NotLeader` unless this replica currently leads.
    pub fn check_leader(&self) -> Result<Term> {
        if !self.is_leader() {
            return Err(CofferError::NotLeader { hint: self.hint() });
        }
        Ok(self.term())
    }

    /// Begin a transaction in the current term.
    pub fn begin(&self) -> Result<RdbTx> {
        let term = self.check_leader()?;
        self.db.begin(term)
    }

    pub fn hint(&self) -> LeaderHint {
        let state = self.state.read();
        LeaderHint::new(state.leader, state.term)
    }

    /// Fill in a reply's leadership hint.
    pub fn set_hint(&self, hint: &mut LeaderHint) {
        *hint = self.hint();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leadership_transitions() {
        let rsvc = ReplicatedService::new(Rdb::open_memory(), 3);
        assert!(matches!(rsvc.begin(), Err(CofferError::NotLeader { .. })));

        let term = rsvc.step_up().unwrap();
        assert!(rsvc.is_leader());
        assert_eq!(rsvc.hint(), LeaderHint::new(Some(3), term));
        assert!(rsvc.begin().is_ok());

        rsvc.step_down(Some(5));
        match rsvc.begin() {
            Err(CofferError::NotLeader { hint }) => {
                assert_eq!(hint.leader, Some(5));
                assert_eq!(hint.term, term);
            }
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_step_down_forgets_self_as_leader() {
        let rsvc = ReplicatedService::new(Rdb::open_memory(), 1);
        rsvc.step_up().unwrap();
        rsvc.step_down(Some(1));
        assert_eq!(rsvc.hint().leader, None);
    }
}
