use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::channel::{Channel, Target};

/// What happens when a scheduled event fires.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    Press(Target),
    Release(Channel),
}

impl Action {
    pub fn channel(&self) -> Channel {
        match self {
            Action::Press(target) => target.channel(),
            Action::Release(channel) => *channel,
        }
    }
}

/// Index of a pending event in the timeline's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(usize);

#[derive(Debug)]
struct ScheduledEvent {
    at: f64,
    action: Action,
    next: Option<EventId>,
    cancelled: bool,
}

/// An event taken off the timeline.
#[derive(Debug, Clone, Copy)]
pub struct Fired {
    pub id: EventId,
    pub at: f64,
    pub action: Action,
    pub next: Option<EventId>,
}

// Heap entry; ordered so the earliest time pops first, insertion order breaking ties
#[derive(Debug)]
struct Due {
    at: f64,
    seq: u64,
    id: EventId,
}

impl PartialEq for Due {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Due {}

impl PartialOrd for Due {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Due {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .total_cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Pending events ordered by due time.
///
/// Events live in an arena and link forward to the next event of their chain,
/// so cancelling a chain head invalidates everything after it without
/// touching the heap. Cancelled entries are dropped when they reach the top.
#[derive(Debug, Default)]
pub struct Timeline {
    slots: Vec<Option<ScheduledEvent>>,
    free: Vec<usize>,
    queue: BinaryHeap<Due>,
    seq: u64,
}

impl Timeline {
    pub fn schedule(&mut self, at: f64, action: Action) -> EventId {
        let event = ScheduledEvent {
            at,
            action,
            next: None,
            cancelled: false,
        };
        let id = match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(event);
                EventId(index)
            }
            None => {
                self.slots.push(Some(event));
                EventId(self.slots.len() - 1)
            }
        };
        self.seq += 1;
        self.queue.push(Due {
            at,
            seq: self.seq,
            id,
        });
        id
    }

    /// Schedule a sequence of events linked head to tail. Times that would run
    /// backwards are pulled up to the previous event's time.
    ///
    /// Returns the head, or `None` for an empty sequence.
    pub fn chain<I>(&mut self, events: I) -> Option<EventId>
    where
        I: IntoIterator<Item = (f64, Action)>,
    {
        let mut head = None;
        let mut prev: Option<(EventId, f64)> = None;
        for (at, action) in events {
            let at = match prev {
                Some((_, prev_at)) if at < prev_at => prev_at,
                _ => at,
            };
            let id = self.schedule(at, action);
            match prev {
                Some((prev_id, _)) => {
                    if let Some(event) = self.slot_mut(prev_id) {
                        event.next = Some(id);
                    }
                }
                None => head = Some(id),
            }
            prev = Some((id, at));
        }
        head
    }

    /// Cancel an event and everything chained after it.
    pub fn cancel(&mut self, head: EventId) {
        let mut cursor = Some(head);
        let mut budget = self.slots.len();
        while let Some(id) = cursor {
            if budget == 0 {
                break;
            }
            budget -= 1;
            cursor = match self.slot_mut(id) {
                Some(event) if !event.cancelled => {
                    event.cancelled = true;
                    event.next
                }
                _ => None,
            };
        }
    }

    #[cfg(test)]
    pub fn is_pending(&self, id: EventId) -> bool {
        matches!(self.slots.get(id.0), Some(Some(event)) if !event.cancelled)
    }

    /// Due time of the earliest queued entry, cancelled or not.
    pub fn next_due(&self) -> Option<f64> {
        self.queue.peek().map(|due| due.at)
    }

    /// Number of live (not cancelled) events.
    pub fn pending(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Some(event) if !event.cancelled))
            .count()
    }

    /// Remove every entry due at or before `now`, returning the live ones in order.
    pub fn pop_due(&mut self, now: f64) -> Vec<Fired> {
        let mut fired = Vec::new();
        while let Some(due) = self.queue.peek() {
            if due.at > now {
                break;
            }
            let id = due.id;
            self.queue.pop();
            if let Some(event) = self.slots.get_mut(id.0).and_then(Option::take) {
                self.free.push(id.0);
                if !event.cancelled {
                    fired.push(Fired {
                        id,
                        at: event.at,
                        action: event.action,
                        next: event.next,
                    });
                }
            }
        }
        fired
    }

    fn slot_mut(&mut self, id: EventId) -> Option<&mut ScheduledEvent> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Button;

    fn release(button: Button) -> Action {
        Action::Release(Channel::Button(button))
    }

    #[test]
    fn pops_in_time_order() {
        let mut timeline = Timeline::default();
        timeline.schedule(3.0, release(Button::Circle));
        timeline.schedule(1.0, release(Button::Cross));
        timeline.schedule(2.0, release(Button::Square));

        let fired = timeline.pop_due(2.5);
        let channels: Vec<_> = fired.iter().map(|f| f.action.channel()).collect();
        assert_eq!(
            channels,
            vec![Channel::Button(Button::Cross), Channel::Button(Button::Square)]
        );
        assert_eq!(timeline.next_due(), Some(3.0));
        assert_eq!(timeline.pending(), 1);
    }

    #[test]
    fn equal_times_keep_insertion_order() {
        let mut timeline = Timeline::default();
        let buttons = [Button::Triangle, Button::Circle, Button::Cross, Button::Square];
        for button in buttons {
            timeline.schedule(1.0, release(button));
        }
        let order: Vec<_> = timeline
            .pop_due(1.0)
            .iter()
            .map(|f| f.action.channel())
            .collect();
        let expected: Vec<_> = buttons.iter().map(|b| Channel::Button(*b)).collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn cancel_walks_the_chain() {
        let mut timeline = Timeline::default();
        let head = timeline
            .chain([
                (1.0, Action::Press(Target::Button(Button::L1))),
                (2.0, release(Button::L1)),
                (3.0, Action::Press(Target::Button(Button::L1))),
            ])
            .unwrap();
        let other = timeline.schedule(1.5, release(Button::R1));

        timeline.cancel(head);
        assert!(!timeline.is_pending(head));
        assert!(timeline.is_pending(other));
        assert_eq!(timeline.pending(), 1);

        let fired = timeline.pop_due(10.0);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].id, other);
        assert_eq!(timeline.next_due(), None);
    }

    #[test]
    fn chain_times_never_run_backwards() {
        let mut timeline = Timeline::default();
        let head = timeline
            .chain([
                (2.0, Action::Press(Target::Button(Button::Share))),
                (1.0, release(Button::Share)),
            ])
            .unwrap();

        let fired = timeline.pop_due(2.0);
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[0].id, head);
        assert_eq!(fired[0].next, Some(fired[1].id));
        assert_eq!(fired[1].at, 2.0);
        assert_eq!(fired[1].next, None);
    }

    #[test]
    fn slots_are_reused() {
        let mut timeline = Timeline::default();
        let first = timeline.schedule(1.0, release(Button::Options));
        timeline.pop_due(1.0);
        let second = timeline.schedule(2.0, release(Button::Options));
        assert_eq!(first, second);
        assert!(timeline.is_pending(second));
    }

    #[test]
    fn empty_chain_has_no_head() {
        let mut timeline = Timeline::default();
        assert_eq!(timeline.chain(std::iter::empty()), None);
    }
}
