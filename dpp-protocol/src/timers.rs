//! Cancellable timers: a slab of generation-tagged slots plus a deadline
//! index.
//!
//! A [`TimerId`] stays valid only while its slot holds the same
//! generation, so cancelling or firing a timer invalidates every copy of
//! its id. A session that stores the id of its retry timer can never be
//! woken by a timer scheduled for a later session in the same slot.

use std::collections::BTreeSet;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    entry: Option<(Instant, T)>,
}

#[derive(Debug)]
pub struct Timers<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    queue: BTreeSet<(Instant, TimerId)>,
}

impl<T> Default for Timers<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            queue: BTreeSet::new(),
        }
    }
}

impl<T> Timers<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, at: Instant, payload: T) -> TimerId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        slot.entry = Some((at, payload));
        let id = TimerId {
            index,
            generation: slot.generation,
        };
        self.queue.insert((at, id));
        id
    }

    fn slot_mut(&mut self, id: TimerId) -> Option<&mut Slot<T>> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation && s.entry.is_some())
    }

    /// Cancel a timer. Stale ids are ignored.
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        let (at, payload) = self.slot_mut(id)?.entry.take()?;
        self.queue.remove(&(at, id));
        self.free.push(id.index);
        Some(payload)
    }

    pub fn is_active(&self, id: TimerId) -> bool {
        self.slots
            .get(id.index as usize)
            .is_some_and(|s| s.generation == id.generation && s.entry.is_some())
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.first().map(|(at, _)| *at)
    }

    /// Remove and return the earliest timer due at `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Option<(TimerId, T)> {
        let &(at, id) = self.queue.first()?;
        if at > now {
            return None;
        }
        self.cancel(id).map(|payload| (id, payload))
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fires_in_deadline_order() {
        let t0 = Instant::now();
        let mut timers = Timers::new();
        timers.schedule(t0 + Duration::from_secs(3), "c");
        timers.schedule(t0 + Duration::from_secs(1), "a");
        timers.schedule(t0 + Duration::from_secs(2), "b");
        assert_eq!(timers.next_deadline(), Some(t0 + Duration::from_secs(1)));
        assert!(timers.pop_expired(t0).is_none());

        let now = t0 + Duration::from_secs(5);
        let fired: Vec<_> = std::iter::from_fn(|| timers.pop_expired(now))
            .map(|(_, p)| p)
            .collect();
        assert_eq!(fired, vec!["a", "b", "c"]);
        assert!(timers.is_empty());
    }

    #[test]
    fn stale_id_cannot_cancel_reused_slot() {
        let t0 = Instant::now();
        let mut timers = Timers::new();
        let old = timers.schedule(t0, 1);
        assert_eq!(timers.cancel(old), Some(1));
        let new = timers.schedule(t0, 2);
        assert_ne!(old, new);
        assert!(!timers.is_active(old));
        assert_eq!(timers.cancel(old), None);
        assert!(timers.is_active(new));
        assert_eq!(timers.pop_expired(t0), Some((new, 2)));
        assert!(!timers.is_active(new));
    }
}
