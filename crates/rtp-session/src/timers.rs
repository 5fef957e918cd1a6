//! A cancelable timer wheel built on a binary heap of `(deadline,
//! generation)` entries, rather than callback-bearing timer objects: a
//! timer is "canceled" by bumping its slot's generation counter, so a
//! stale heap entry is recognized and dropped the next time it is popped
//! instead of needing to be found and removed from the heap directly.

use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    time::Instant,
};

use ahash::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

struct Slot {
    generation: u64,
    deadline: Instant,
}

#[derive(Default)]
pub struct TimerWheel {
    next_id: u64,
    slots: HashMap<u64, Slot>,
    heap: BinaryHeap<Reverse<(Instant, u64, u64)>>,
}

impl TimerWheel {
    /// Schedules a new timer to fire at `deadline`, returning a handle that
    /// can be passed to [`cancel`](Self::cancel).
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_session::timers::TimerWheel;
    /// use std::time::{Duration, Instant};
    ///
    /// let mut wheel = TimerWheel::default();
    /// let now = Instant::now();
    /// let id = wheel.schedule(now + Duration::from_millis(10));
    ///
    /// assert!(wheel.pop_expired(now).is_empty());
    /// assert_eq!(wheel.pop_expired(now + Duration::from_millis(20)), vec![id]);
    /// ```
    pub fn schedule(&mut self, deadline: Instant) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;

        self.slots.insert(id, Slot { generation: 0, deadline });
        self.heap.push(Reverse((deadline, 0, id)));

        TimerId(id)
    }

    /// Cancels a previously scheduled timer. Cheap: it only bumps a
    /// generation counter, leaving the heap entry in place to be discarded
    /// lazily when it would otherwise fire.
    pub fn cancel(&mut self, id: TimerId) {
        if let Some(slot) = self.slots.get_mut(&id.0) {
            slot.generation += 1;
        }
    }

    /// Reschedules a timer to a new deadline, equivalent to canceling and
    /// scheduling again but keeping the same id.
    pub fn reschedule(&mut self, id: TimerId, deadline: Instant) {
        if let Some(slot) = self.slots.get_mut(&id.0) {
            slot.generation += 1;
            let generation = slot.generation;
            slot.deadline = deadline;
            self.heap.push(Reverse((deadline, generation, id.0)));
        }
    }

    /// Pops every timer whose deadline is at or before `now`, discarding
    /// stale (canceled or superseded) heap entries along the way.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<TimerId> {
        let mut fired = Vec::new();

        while let Some(&Reverse((deadline, generation, id))) = self.heap.peek() {
            if deadline > now {
                break;
            }

            self.heap.pop();

            if let Some(slot) = self.slots.get(&id) {
                if slot.generation == generation {
                    fired.push(TimerId(id));
                    self.slots.remove(&id);
                }
            }
        }

        fired
    }

    /// The deadline of the next still-live timer, if any, so the event
    /// loop knows how long it may safely block.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(&Reverse((deadline, generation, id))) = self.heap.peek() {
            match self.slots.get(&id) {
                Some(slot) if slot.generation == generation => return Some(deadline),
                _ => {
                    self.heap.pop();
                }
            }
        }
        None
    }
}
