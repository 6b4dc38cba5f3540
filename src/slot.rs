//! Wheel slots: intrusive doubly-linked list heads.
//!
//! A slot is nothing but the head pointer of the list of events due within
//! its granularity window. Insertion is LIFO: events are pushed and popped
//! at the head, which keeps every link operation O(1) and drain order
//! reproducible.

use std::cell::Cell;
use std::ptr::NonNull;

use crate::event::TimerEvent;
use crate::Tick;

/// Head of a slot's intrusive event list.
pub(crate) struct TimerSlot {
    head: Cell<Option<NonNull<dyn TimerEvent>>>,
}

impl TimerSlot {
    pub(crate) const fn new() -> Self {
        Self {
            head: Cell::new(None),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.get().is_none()
    }

    pub(crate) fn set_head(&self, head: Option<NonNull<dyn TimerEvent>>) {
        self.head.set(head);
    }

    /// Detaches and returns the head event, or `None` when empty.
    ///
    /// # Safety
    ///
    /// Every event linked in this slot must still be valid.
    pub(crate) unsafe fn pop_front(&self) -> Option<NonNull<dyn TimerEvent>> {
        let event = self.head.get()?;
        // SAFETY: linked nodes are valid per the caller contract.
        let node = unsafe { event.as_ref() }.node();
        let next = node.next.get();
        self.head.set(next);
        if let Some(next) = next {
            // SAFETY: as above.
            unsafe { next.as_ref() }.node().prev.set(None);
        }
        node.next.set(None);
        node.slot.set(None);
        Some(event)
    }

    /// Prepends `event`, recording this slot as its owner.
    ///
    /// # Safety
    ///
    /// `event` must be valid, pinned and not linked anywhere.
    pub(crate) unsafe fn push_front(&self, event: NonNull<dyn TimerEvent>) {
        // SAFETY: the caller guarantees `event` is valid.
        let node = unsafe { event.as_ref() }.node();
        let old = self.head.get();
        node.next.set(old);
        node.prev.set(None);
        if let Some(old) = old {
            // SAFETY: linked nodes are valid.
            unsafe { old.as_ref() }.node().prev.set(Some(event));
        }
        self.head.set(Some(event));
        node.slot.set(Some(NonNull::from(self)));
    }

    /// Moves `event` into this slot, detaching it from wherever it currently
    /// is. Re-scheduling into the slot an event already occupies keeps its
    /// list position.
    ///
    /// # Safety
    ///
    /// `event` must be valid and pinned, and any slot it currently occupies
    /// must contain only valid events.
    pub(crate) unsafe fn relink(&self, event: NonNull<dyn TimerEvent>) {
        // SAFETY: the caller guarantees `event` is valid.
        let node = unsafe { event.as_ref() }.node();
        if node.slot.get() == Some(NonNull::from(self)) {
            return;
        }
        node.cancel();
        // SAFETY: the event is now unlinked; forwarding the caller contract.
        unsafe { self.push_front(event) };
    }

    /// Iterates the fire ticks of the events in this slot, head first.
    pub(crate) fn iter_scheduled(&self) -> impl Iterator<Item = Tick> + '_ {
        SlotIter {
            current: self.head.get(),
        }
    }
}

struct SlotIter {
    current: Option<NonNull<dyn TimerEvent>>,
}

impl Iterator for SlotIter {
    type Item = Tick;

    fn next(&mut self) -> Option<Tick> {
        let event = self.current?;
        // SAFETY: linked nodes are valid while linked; we only read cells.
        let node = unsafe { event.as_ref() }.node();
        self.current = node.next.get();
        Some(node.scheduled_at.get())
    }
}
