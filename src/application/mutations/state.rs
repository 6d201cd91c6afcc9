use std::fmt;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Like,
    Save,
    Unsave,
    CreatePost,
    UpdatePost,
    DeletePost,
}

impl MutationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MutationKind::Like => "like",
            MutationKind::Save => "save",
            MutationKind::Unsave => "unsave",
            MutationKind::CreatePost => "create_post",
            MutationKind::UpdatePost => "update_post",
            MutationKind::DeletePost => "delete_post",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    Idle,
    Optimistic,
    Committing,
    Committed,
    RolledBack,
}

impl MutationPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, MutationPhase::Committed | MutationPhase::RolledBack)
    }

    fn allows(self, next: MutationPhase) -> bool {
        use MutationPhase::*;
        matches!(
            (self, next),
            (Idle, Optimistic)
                | (Idle, Committing)
                | (Optimistic, Committing)
                | (Optimistic, RolledBack)
                | (Committing, Committed)
                | (Committing, RolledBack)
        )
    }
}

impl fmt::Display for MutationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MutationPhase::Idle => "idle",
            MutationPhase::Optimistic => "optimistic",
            MutationPhase::Committing => "committing",
            MutationPhase::Committed => "committed",
            MutationPhase::RolledBack => "rolled_back",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal {kind} mutation transition {from} -> {to}")]
pub struct TransitionError {
    pub kind: &'static str,
    pub from: MutationPhase,
    pub to: MutationPhase,
}

/// Lifecycle of a single mutation.
#[derive(Debug, Clone)]
pub struct MutationTracker {
    id: u64,
    kind: MutationKind,
    target: String,
    phase: MutationPhase,
    history: Vec<MutationPhase>,
}

impl MutationTracker {
    pub fn new(id: u64, kind: MutationKind, target: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            target: target.into(),
            phase: MutationPhase::Idle,
            history: vec![MutationPhase::Idle],
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> MutationKind {
        self.kind
    }

    pub fn phase(&self) -> MutationPhase {
        self.phase
    }

    pub fn history(&self) -> &[MutationPhase] {
        &self.history
    }

    pub fn advance(&mut self, next: MutationPhase) -> Result<(), TransitionError> {
        if !self.phase.allows(next) {
            return Err(TransitionError {
                kind: self.kind.as_str(),
                from: self.phase,
                to: next,
            });
        }
        debug!(
            mutation_id = self.id,
            kind = self.kind.as_str(),
            target = %self.target,
            from = %self.phase,
            to = %next,
            "Mutation transition"
        );
        self.phase = next;
        self.history.push(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimistic_mutation_commits() {
        let mut tracker = MutationTracker::new(1, MutationKind::Like, "p1");
        tracker.advance(MutationPhase::Optimistic).expect("optimistic");
        tracker.advance(MutationPhase::Committing).expect("committing");
        tracker.advance(MutationPhase::Committed).expect("committed");

        assert!(tracker.phase().is_terminal());
        assert_eq!(
            tracker.history(),
            &[
                MutationPhase::Idle,
                MutationPhase::Optimistic,
                MutationPhase::Committing,
                MutationPhase::Committed,
            ]
        );
    }

    #[test]
    fn create_skips_optimistic_phase() {
        let mut tracker = MutationTracker::new(2, MutationKind::CreatePost, "new");
        tracker.advance(MutationPhase::Committing).expect("committing");
        tracker.advance(MutationPhase::RolledBack).expect("rolled back");
        assert_eq!(tracker.phase(), MutationPhase::RolledBack);
    }

    #[test]
    fn terminal_phases_reject_transitions() {
        let mut tracker = MutationTracker::new(3, MutationKind::Save, "p1");
        tracker.advance(MutationPhase::Committing).expect("committing");
        tracker.advance(MutationPhase::Committed).expect("committed");

        let err = tracker
            .advance(MutationPhase::RolledBack)
            .expect_err("committed is terminal");
        assert_eq!(err.from, MutationPhase::Committed);
        assert_eq!(err.to, MutationPhase::RolledBack);
        assert_eq!(tracker.phase(), MutationPhase::Committed);
    }

    #[test]
    fn idle_cannot_commit_directly() {
        let mut tracker = MutationTracker::new(4, MutationKind::DeletePost, "p1");
        assert!(tracker.advance(MutationPhase::Committed).is_err());
        assert_eq!(
            tracker
                .advance(MutationPhase::Committed)
                .map_err(|err| err.to_string()),
            Err("illegal delete_post mutation transition idle -> committed".to_string())
        );
    }
}
