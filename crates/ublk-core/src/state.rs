//! The per-tag state machine.
//!
//! Represented as an exhaustive sum type rather than bitflags or a string
//! tag, so that an invalid transition is a compile error at the match site,
//! not a runtime flag combination nobody checked for.

/// The lifecycle state of one tag within a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagState {
    /// A fetch SQE for this tag is outstanding; the kernel may write a
    /// descriptor and complete it at any time.
    InFlightFetch,
    /// The kernel has handed this tag's request to userspace; the backend
    /// I/O for it may be running.
    Owned,
    /// A commit (or commit-and-fetch) SQE for this tag is outstanding.
    InFlightCommit,
    /// The tag suffered an unrecoverable error (bad opcode, backend I/O
    /// error the kernel can't be told about safely, SQE push failure) and
    /// will not be resubmitted for the lifetime of the queue.
    Dead,
}

/// What a transition attempt produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied(TagState),
    /// The requested transition does not exist from the current state;
    /// the tag is left untouched.
    Rejected,
}

/// Owns the per-tag state for one queue and enforces the transition
/// table above. Index `i` is tag `i`; there is no separate tag->index map.
pub struct TagTable {
    states: Vec<TagState>,
}

impl TagTable {
    /// All tags start `InFlightFetch`: priming submits one fetch per tag
    /// before the main loop runs.
    pub fn new(queue_depth: usize) -> Self {
        TagTable { states: vec![TagState::InFlightFetch; queue_depth] }
    }

    pub fn get(&self, tag: u16) -> TagState {
        self.states[tag as usize]
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// A fetch CQE landed for `tag`: InFlightFetch -> Owned.
    pub fn on_fetch_completed(&mut self, tag: u16) -> Transition {
        self.apply(tag, TagState::InFlightFetch, TagState::Owned)
    }

    /// The backend finished the request and a commit SQE was prepared:
    /// Owned -> InFlightCommit.
    pub fn on_commit_submitted(&mut self, tag: u16) -> Transition {
        self.apply(tag, TagState::Owned, TagState::InFlightCommit)
    }

    /// A commit-and-fetch CQE landed for `tag` carrying a piggybacked
    /// request (`result == 0`), re-arming it and handing over fresh work
    /// in one step: InFlightCommit -> Owned.
    pub fn on_commit_completed(&mut self, tag: u16) -> Transition {
        self.apply(tag, TagState::InFlightCommit, TagState::Owned)
    }

    /// A commit-and-fetch CQE landed for `tag` with no request yet
    /// (`result > 0`, rearm-idle): the commit was accepted but there is
    /// nothing to service, so the tag goes back to waiting on a fetch
    /// rather than through `Owned`: InFlightCommit -> InFlightFetch.
    pub fn on_commit_rearmed_idle(&mut self, tag: u16) -> Transition {
        self.apply(tag, TagState::InFlightCommit, TagState::InFlightFetch)
    }

    /// Mark `tag` permanently Dead from any state. Unlike the other
    /// transitions this one is unconditional: an unrecoverable error can
    /// surface while the tag is in any state.
    pub fn kill(&mut self, tag: u16) {
        self.states[tag as usize] = TagState::Dead;
    }

    pub fn all_dead(&self) -> bool {
        self.states.iter().all(|s| *s == TagState::Dead)
    }

    fn apply(&mut self, tag: u16, from: TagState, to: TagState) -> Transition {
        let idx = tag as usize;
        if self.states[idx] == from {
            self.states[idx] = to;
            Transition::Applied(to)
        } else {
            Transition::Rejected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_in_flight_fetch() {
        let t = TagTable::new(4);
        for tag in 0..4 {
            assert_eq!(t.get(tag), TagState::InFlightFetch);
        }
    }

    #[test]
    fn full_cycle_round_trips_to_owned() {
        let mut t = TagTable::new(1);
        assert_eq!(t.on_fetch_completed(0), Transition::Applied(TagState::Owned));
        assert_eq!(t.on_commit_submitted(0), Transition::Applied(TagState::InFlightCommit));
        assert_eq!(t.on_commit_completed(0), Transition::Applied(TagState::Owned));
    }

    #[test]
    fn out_of_order_transition_is_rejected() {
        let mut t = TagTable::new(1);
        // Still InFlightFetch: a commit-submitted transition must fail.
        assert_eq!(t.on_commit_submitted(0), Transition::Rejected);
        assert_eq!(t.get(0), TagState::InFlightFetch);
    }

    #[test]
    fn rearm_idle_returns_to_in_flight_fetch() {
        let mut t = TagTable::new(1);
        assert_eq!(t.on_fetch_completed(0), Transition::Applied(TagState::Owned));
        assert_eq!(t.on_commit_submitted(0), Transition::Applied(TagState::InFlightCommit));
        assert_eq!(
            t.on_commit_rearmed_idle(0),
            Transition::Applied(TagState::InFlightFetch)
        );
        // From InFlightFetch the tag can complete a normal fetch again.
        assert_eq!(t.on_fetch_completed(0), Transition::Applied(TagState::Owned));
    }

    #[test]
    fn kill_is_terminal() {
        let mut t = TagTable::new(1);
        t.kill(0);
        assert_eq!(t.get(0), TagState::Dead);
        assert_eq!(t.on_fetch_completed(0), Transition::Rejected);
        assert!(t.all_dead());
    }
}
