//! Turn-based control scheduler.
//!
//! Participants wait in arrival order. The head of the queue is the current
//! holder; there is no separate cursor, so removing any entry can never leave
//! a stale reference to a participant that has gone.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Opaque identity of one connected participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    pub fn new_random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// What a queue mutation did to the control holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueChange {
    pub changed: bool,
    pub previous_holder: Option<ParticipantId>,
    pub holder: Option<ParticipantId>,
}

impl QueueChange {
    pub fn holder_changed(&self) -> bool {
        self.previous_holder != self.holder
    }
}

#[derive(Debug, Default)]
pub struct ControlScheduler {
    queue: VecDeque<ParticipantId>,
}

impl ControlScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn change(&mut self, f: impl FnOnce(&mut VecDeque<ParticipantId>) -> bool) -> QueueChange {
        let previous_holder = self.current_holder().cloned();
        let changed = f(&mut self.queue);
        QueueChange {
            changed,
            previous_holder,
            holder: self.current_holder().cloned(),
        }
    }

    /// Append `participant` unless it is already queued.
    pub fn join(&mut self, participant: ParticipantId) -> QueueChange {
        self.change(|queue| {
            if queue.contains(&participant) {
                return false;
            }
            debug!("Participant {} joined at position {}", participant, queue.len());
            queue.push_back(participant);
            true
        })
    }

    /// Remove `participant`. Removing the head promotes the next entry.
    pub fn leave(&mut self, participant: &ParticipantId) -> QueueChange {
        self.change(|queue| match queue.iter().position(|p| p == participant) {
            Some(index) => {
                queue.remove(index);
                debug!("Participant {} left from position {}", participant, index);
                true
            }
            None => false,
        })
    }

    /// Voluntary release: the holder moves to the back of the queue.
    pub fn advance(&mut self) -> QueueChange {
        self.change(|queue| {
            if queue.len() < 2 {
                return false;
            }
            queue.rotate_left(1);
            true
        })
    }

    pub fn current_holder(&self) -> Option<&ParticipantId> {
        self.queue.front()
    }

    /// Authorization filter for every control-affecting request.
    pub fn is_holder(&self, participant: &ParticipantId) -> bool {
        self.current_holder() == Some(participant)
    }

    pub fn ordered(&self) -> Vec<ParticipantId> {
        self.queue.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> ParticipantId {
        ParticipantId::from(name)
    }

    #[test]
    fn test_first_joiner_holds_control() {
        let mut scheduler = ControlScheduler::new();
        let change = scheduler.join(id("a"));
        assert!(change.changed);
        assert!(change.holder_changed());
        scheduler.join(id("b"));

        assert_eq!(scheduler.current_holder(), Some(&id("a")));
        assert_eq!(scheduler.ordered(), vec![id("a"), id("b")]);
    }

    #[test]
    fn test_join_is_idempotent() {
        let mut scheduler = ControlScheduler::new();
        scheduler.join(id("a"));
        let change = scheduler.join(id("a"));

        assert!(!change.changed);
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn test_removing_head_promotes_next() {
        let mut scheduler = ControlScheduler::new();
        scheduler.join(id("a"));
        scheduler.join(id("b"));
        scheduler.join(id("c"));

        let change = scheduler.leave(&id("a"));
        assert!(change.holder_changed());
        assert_eq!(change.holder, Some(id("b")));
        assert!(scheduler.is_holder(&id("b")));
        assert!(!scheduler.is_holder(&id("a")));
    }

    #[test]
    fn test_removing_non_head_keeps_holder() {
        let mut scheduler = ControlScheduler::new();
        scheduler.join(id("a"));
        scheduler.join(id("b"));
        scheduler.join(id("c"));

        let change = scheduler.leave(&id("b"));
        assert!(change.changed);
        assert!(!change.holder_changed());
        assert_eq!(scheduler.current_holder(), Some(&id("a")));
        assert_eq!(scheduler.ordered()[1], id("c"));
    }

    #[test]
    fn test_last_leave_empties_holder() {
        let mut scheduler = ControlScheduler::new();
        scheduler.join(id("a"));
        scheduler.leave(&id("a"));

        assert_eq!(scheduler.len(), 0);
        assert_eq!(scheduler.current_holder(), None);
        assert!(!scheduler.leave(&id("a")).changed);
    }

    #[test]
    fn test_advance_rotates_round_robin() {
        let mut scheduler = ControlScheduler::new();
        scheduler.join(id("a"));
        scheduler.join(id("b"));
        scheduler.join(id("c"));

        scheduler.advance();
        assert_eq!(scheduler.ordered(), vec![id("b"), id("c"), id("a")]);
        scheduler.advance();
        scheduler.advance();
        assert_eq!(scheduler.current_holder(), Some(&id("a")));
    }

    #[test]
    fn test_advance_on_small_queue_is_noop() {
        let mut scheduler = ControlScheduler::new();
        assert!(!scheduler.advance().changed);
        scheduler.join(id("a"));
        assert!(!scheduler.advance().changed);
        assert!(scheduler.is_holder(&id("a")));
    }

    #[test]
    fn test_holder_is_always_head_over_mixed_sequences() {
        let mut scheduler = ControlScheduler::new();
        let names = ["a", "b", "c", "d", "e"];
        for (step, name) in names.iter().cycle().take(40).enumerate() {
            match step % 3 {
                0 | 1 => {
                    scheduler.join(id(name));
                }
                _ => {
                    scheduler.leave(&id(name));
                }
            }
            if step % 7 == 0 {
                scheduler.advance();
            }
            let ordered = scheduler.ordered();
            assert_eq!(scheduler.current_holder(), ordered.first());
            let mut unique = ordered.clone();
            unique.sort_by(|x, y| x.0.cmp(&y.0));
            unique.dedup();
            assert_eq!(unique.len(), ordered.len());
        }
    }
}
