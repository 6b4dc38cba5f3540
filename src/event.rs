//! Timer events and their intrusive linkage state.
//!
//! An event is owned by the caller and carries its own list links, so the
//! wheel never allocates per timer. While scheduled, the event sits in
//! exactly one slot's doubly-linked list; the [`EventNode`] inside it records
//! the owning slot, the neighbouring events and the absolute fire tick.
//!
//! # Cancel Safety
//!
//! Cancellation is O(1): the node unlinks itself from its list and fixes up
//! its neighbours (or the slot head) directly. It is idempotent and safe to
//! call from inside another event's callback, including on the event that is
//! currently executing (a no-op, because the wheel detaches an event before
//! running it).
//!
//! # Pinning
//!
//! A linked node must not move; the slot and its neighbours hold raw
//! pointers into it. Scheduling therefore takes `Pin<&mut _>`, and the node
//! is `!Unpin`. Dropping an event cancels it first, so the linkage never
//! outlives the memory it points into.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::marker::PhantomPinned;
use std::ptr::NonNull;
use std::rc::{Rc, Weak};

use crate::slot::TimerSlot;
use crate::wheel::TimerWheel;
use crate::Tick;

/// A schedulable timer event.
///
/// Implementors embed an [`EventNode`] and expose it through [`node`], and
/// define [`execute`] to run when the deadline is reached. The wheel detaches
/// the event before calling `execute`, so the callback may freely schedule or
/// cancel events, including the one executing.
///
/// Returning `Some(delta)` from `execute` re-arms the event `delta` ticks
/// after its fire tick; returning `None` leaves it inactive.
///
/// [`node`]: TimerEvent::node
/// [`execute`]: TimerEvent::execute
pub trait TimerEvent {
    /// Returns the intrusive linkage state embedded in this event.
    fn node(&self) -> &EventNode;

    /// Runs the event's callback. Invoked by the wheel with the event
    /// already detached from its slot.
    fn execute(&mut self, wheel: &TimerWheel) -> Option<Tick>;

    /// Detaches the event from its slot, if scheduled. Idempotent.
    fn cancel(&self) {
        self.node().cancel();
    }

    /// Returns whether the event currently occupies a slot.
    fn active(&self) -> bool {
        self.node().active()
    }

    /// Returns the absolute tick the event is due to fire at. Meaningful
    /// only while the event is active or immediately after it fired.
    fn scheduled_at(&self) -> Tick {
        self.node().scheduled_at()
    }
}

/// Intrusive linkage state of a timer event.
///
/// The node does double duty as the event's membership record (which slot,
/// which fire tick) and as its doubly-linked list element. All state lives
/// in `Cell`s so that the wheel can re-link events during `advance` while
/// callbacks hold shared references to it.
pub struct EventNode {
    /// Absolute fire tick; written only by the wheel facade.
    pub(crate) scheduled_at: Cell<Tick>,
    /// The slot currently holding this event; `None` when inactive.
    pub(crate) slot: Cell<Option<NonNull<TimerSlot>>>,
    /// Previous event in the slot's list; `None` at the head.
    pub(crate) prev: Cell<Option<NonNull<dyn TimerEvent>>>,
    /// Next event in the slot's list; `None` at the tail.
    pub(crate) next: Cell<Option<NonNull<dyn TimerEvent>>>,
    _pinned: PhantomPinned,
}

impl EventNode {
    /// Creates a new unlinked node.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            scheduled_at: Cell::new(0),
            slot: Cell::new(None),
            prev: Cell::new(None),
            next: Cell::new(None),
            _pinned: PhantomPinned,
        }
    }

    /// Returns whether this node is linked into a slot.
    #[must_use]
    pub fn active(&self) -> bool {
        self.slot.get().is_some()
    }

    /// Returns the recorded absolute fire tick.
    #[must_use]
    pub fn scheduled_at(&self) -> Tick {
        self.scheduled_at.get()
    }

    /// Unlinks this node from its slot. A no-op when inactive; safe to call
    /// repeatedly.
    pub fn cancel(&self) {
        let Some(slot) = self.slot.get() else {
            return;
        };
        let prev = self.prev.get();
        let next = self.next.get();
        // SAFETY: while this node is linked, its owning slot and neighbours
        // are valid (upheld by the schedule contract); we only rewire their
        // link cells.
        unsafe {
            match prev {
                Some(prev) => prev.as_ref().node().next.set(next),
                None => slot.as_ref().set_head(next),
            }
            if let Some(next) = next {
                next.as_ref().node().prev.set(prev);
            }
        }
        self.prev.set(None);
        self.next.set(None);
        self.slot.set(None);
    }
}

impl Default for EventNode {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventNode {
    fn drop(&mut self) {
        // A scheduled event that goes away must leave its slot; the list
        // would otherwise traverse freed memory.
        self.cancel();
    }
}

impl fmt::Debug for EventNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventNode")
            .field("scheduled_at", &self.scheduled_at.get())
            .field("active", &self.active())
            .field("prev", &self.prev.get().map(NonNull::as_ptr))
            .field("next", &self.next.get().map(NonNull::as_ptr))
            .finish()
    }
}

/// A timer event dispatching to a stored closure.
pub struct ClosureEvent<F: FnMut()> {
    node: EventNode,
    callback: F,
}

impl<F: FnMut()> ClosureEvent<F> {
    /// Creates a new inactive event around `callback`.
    pub fn new(callback: F) -> Self {
        Self {
            node: EventNode::new(),
            callback,
        }
    }
}

impl<F: FnMut()> TimerEvent for ClosureEvent<F> {
    fn node(&self) -> &EventNode {
        &self.node
    }

    fn execute(&mut self, _wheel: &TimerWheel) -> Option<Tick> {
        (self.callback)();
        None
    }
}

/// A timer event bound to a method on a shared target.
///
/// The event holds only a [`Weak`] reference; firing against a target that
/// has been dropped is a no-op. The target must not own the event itself:
/// keep the event next to the `Rc`, not inside the `RefCell`, or the
/// callback would alias the borrow the wheel already holds.
pub struct MemberEvent<T> {
    node: EventNode,
    target: Weak<RefCell<T>>,
    method: fn(&mut T),
}

impl<T> MemberEvent<T> {
    /// Creates a new inactive event calling `method` on `target` when fired.
    pub fn new(target: &Rc<RefCell<T>>, method: fn(&mut T)) -> Self {
        Self {
            node: EventNode::new(),
            target: Rc::downgrade(target),
            method,
        }
    }
}

impl<T> TimerEvent for MemberEvent<T> {
    fn node(&self) -> &EventNode {
        &self.node
    }

    fn execute(&mut self, _wheel: &TimerWheel) -> Option<Tick> {
        if let Some(target) = self.target.upgrade() {
            (self.method)(&mut target.borrow_mut());
        }
        None
    }
}
