//! Hierarchical timer wheel for tick-based event scheduling.
//!
//! The wheel is a chain of levels at increasing granularity. Each level has
//! 256 slots; a slot at level `L` spans `256^L` core ticks, so up to eight
//! levels cover the full 64-bit tick space. An event is inserted into the
//! finest level whose rotation can represent its delay, and migrates toward
//! the core as its fire tick approaches: whenever the core completes a
//! rotation, the next outer level advances one slot and hands its events
//! down at their residual delay.
//!
//! Only the core records absolute fire ticks; outer levels are pure
//! bucketing structures on top of the core's time.
//!
//! # Re-entrancy
//!
//! [`advance`] detaches an event from its slot before executing it, so a
//! callback may schedule or cancel any event, including the one running.
//! Calling `advance` itself from inside a callback is not supported and
//! trips a debug assertion.
//!
//! # Performance Characteristics
//!
//! - Schedule: O(1) — slot arithmetic plus a list splice
//! - Cancel: O(1) — the event unlinks itself
//! - Re-schedule: O(1) — detach and re-link, no allocation
//! - Advance: O(ticks walked + events fired); use
//!   [`ticks_to_next_event`] to skip idle spans in one jump
//!
//! [`advance`]: TimerWheel::advance
//! [`ticks_to_next_event`]: TimerWheel::ticks_to_next_event

use std::cell::{Cell, OnceCell};
use std::fmt;
use std::pin::Pin;
use std::ptr::NonNull;

use crate::event::TimerEvent;
use crate::slot::TimerSlot;
use crate::Tick;

const WIDTH_BITS: u32 = 8;
/// Slots per level.
const NUM_SLOTS: usize = 1 << WIDTH_BITS;
const MASK: Tick = (NUM_SLOTS as Tick) - 1;
/// Levels needed to cover a 64-bit tick space at 8 bits per level.
const MAX_LEVELS: usize = 8;

/// One level of the hierarchy: 256 slots and a local rotation counter.
///
/// The local counter advances once per rotation of the next finer level, so
/// at level `L` it always equals `core_now >> (8 * L)`.
struct WheelLevel {
    now: Cell<Tick>,
    slots: [TimerSlot; NUM_SLOTS],
}

impl WheelLevel {
    fn new(now: Tick) -> Self {
        Self {
            now: Cell::new(now),
            slots: std::array::from_fn(|_| TimerSlot::new()),
        }
    }
}

/// Hierarchical timer wheel.
///
/// All operations take `&self`; the wheel uses interior mutability so that
/// event callbacks can re-enter it while `advance` is draining slots. It is
/// consequently neither `Send` nor `Sync`: embed it behind external
/// serialisation if the host is multi-threaded.
///
/// Levels are heap-allocated (their slots are pointed into by linked
/// events) and outer levels are created on demand, so an idle wheel costs
/// one level.
pub struct TimerWheel {
    core: Box<WheelLevel>,
    outer: [OnceCell<Box<WheelLevel>>; MAX_LEVELS - 1],
    advancing: Cell<bool>,
}

struct AdvanceGuard<'a>(&'a Cell<bool>);

impl Drop for AdvanceGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl TimerWheel {
    /// Creates a wheel starting at tick 0.
    #[must_use]
    pub fn new() -> Self {
        Self::new_at(0)
    }

    /// Creates a wheel whose clock starts at `now`.
    #[must_use]
    pub fn new_at(now: Tick) -> Self {
        Self {
            core: Box::new(WheelLevel::new(now)),
            outer: std::array::from_fn(|_| OnceCell::new()),
            advancing: Cell::new(false),
        }
    }

    /// Returns the current core tick.
    ///
    /// While an event executes during a multi-tick [`advance`], `now`
    /// reports the tick that event was scheduled for, not the tick the
    /// advance will eventually reach.
    ///
    /// [`advance`]: TimerWheel::advance
    #[must_use]
    pub fn now(&self) -> Tick {
        self.core.now.get()
    }

    /// Schedules `event` to fire `delta` ticks from now (`delta >= 1`).
    ///
    /// Re-scheduling an active event moves it: the earlier registration has
    /// no effect on firing. The event's fire tick becomes `now() + delta`.
    ///
    /// # Safety
    ///
    /// The event must remain valid and pinned for as long as it stays
    /// linked. The [`EventNode`] drop guard and the wheel's own drop both
    /// unlink, so under normal ownership (`Pin<Box<_>>` or a pinned local
    /// dropped in scope) this holds by construction. Callbacks must not
    /// create references aliasing the event that is currently executing.
    ///
    /// [`EventNode`]: crate::event::EventNode
    pub unsafe fn schedule(&self, event: Pin<&mut (dyn TimerEvent + 'static)>, delta: Tick) {
        // SAFETY: the event is never moved out of; only its link cells and
        // fire tick change, which Pin permits.
        let ptr = NonNull::from(unsafe { event.get_unchecked_mut() });
        // SAFETY: forwarded caller contract.
        unsafe { self.schedule_ptr(ptr, delta) };
    }

    /// Schedules `event` to fire somewhere in `[start, end]` ticks from now
    /// (`1 <= start < end`), picking the tick that lands the event in the
    /// coarsest possible slot so later advances migrate it as little as
    /// possible.
    ///
    /// If the event is already scheduled inside the range this is a no-op —
    /// the fast path when an idle deadline is pushed forward on every bit of
    /// traffic.
    ///
    /// # Safety
    ///
    /// Same contract as [`schedule`].
    ///
    /// [`schedule`]: TimerWheel::schedule
    pub unsafe fn schedule_in_range(
        &self,
        event: Pin<&mut (dyn TimerEvent + 'static)>,
        start: Tick,
        end: Tick,
    ) {
        debug_assert!(start >= 1, "range start must be at least 1");
        debug_assert!(start < end, "range start must precede range end");

        if event.active() {
            let current = event.scheduled_at() - self.now();
            if (start..=end).contains(&current) {
                return;
            }
        }

        // Zero out as many low 8-bit chunks of `end` as possible without
        // dropping below `start`: the widest slot boundary inside the range.
        let mut mask: Tick = !0;
        while (start & mask) != (end & mask) {
            mask <<= WIDTH_BITS;
        }
        let delta = end & (mask >> WIDTH_BITS);

        // SAFETY: forwarded caller contract.
        unsafe { self.schedule(event, delta) };
    }

    /// Advances logical time by `delta` ticks (`delta >= 1`), executing
    /// every event whose fire tick falls in `(now, now + delta]` in strict
    /// tick order.
    ///
    /// Events at the same tick fire in LIFO order of insertion into their
    /// slot; callers must not rely on that beyond reproducibility.
    ///
    /// # Safety
    ///
    /// Every event linked in the wheel must still be valid (see
    /// [`schedule`]). Callbacks must not drop the wheel or re-enter
    /// `advance`.
    ///
    /// [`schedule`]: TimerWheel::schedule
    pub unsafe fn advance(&self, delta: Tick) {
        debug_assert!(delta >= 1, "advance requires delta >= 1");
        debug_assert!(
            !self.advancing.get(),
            "advance re-entered from a timer callback"
        );
        self.advancing.set(true);
        let _guard = AdvanceGuard(&self.advancing);
        for _ in 0..delta {
            // SAFETY: forwarded caller contract.
            unsafe { self.step() };
        }
    }

    /// Returns the number of ticks until the earliest scheduled event, or
    /// `Tick::MAX` when the wheel is empty.
    #[must_use]
    pub fn ticks_to_next_event(&self) -> Tick {
        self.ticks_to_next_event_capped(Tick::MAX)
    }

    /// Returns the number of ticks until the earliest scheduled event,
    /// capped at `max`. With no event nearer than `max`, returns `max`.
    ///
    /// The cap bounds the scan: a driver that wants to advance in chunks of
    /// at most `max` ticks can feed the result straight back into
    /// [`advance`].
    ///
    /// [`advance`]: TimerWheel::advance
    #[must_use]
    pub fn ticks_to_next_event_capped(&self, max: Tick) -> Tick {
        let now = self.now();
        let mut nearest: Option<Tick> = None;

        for level in 0..MAX_LEVELS {
            let Some(wheel) = self.level(level) else {
                break;
            };
            let wheel_now = wheel.now.get();

            for i in 0..NUM_SLOTS as Tick {
                let slot_index = ((wheel_now + 1 + i) & MASK) as usize;

                if slot_index == 0 {
                    // Crossing slot 0 means the next outer level would
                    // advance here, handing down its next slot; its events
                    // may precede anything later on this level. Peek it —
                    // unless the core's own slot 0 has events, which cannot
                    // fire later than any promotion of that wrap.
                    let skip_peek = level == 0 && !wheel.slots[0].is_empty();
                    if !skip_peek {
                        if let Some(up) = self.level(level + 1) {
                            let up_slot = &up.slots[((up.now.get() + 1) & MASK) as usize];
                            for scheduled_at in up_slot.iter_scheduled() {
                                nearest = Some(
                                    nearest.map_or(scheduled_at, |tick| tick.min(scheduled_at)),
                                );
                            }
                        }
                    }
                }

                let mut found = false;
                for scheduled_at in wheel.slots[slot_index].iter_scheduled() {
                    // Outer slots mix residuals, so the whole slot is
                    // scanned before concluding.
                    nearest =
                        Some(nearest.map_or(scheduled_at, |tick| tick.min(scheduled_at)));
                    found = true;
                }
                if found {
                    return nearest.map_or(max, |tick| (tick - now).min(max));
                }
            }
        }

        // Nothing scheduled anywhere (peek hits included above): the cap
        // itself is the answer.
        nearest.map_or(max, |tick| (tick - now).min(max))
    }

    /// Advances the core by one tick: promote on wrap, then drain.
    ///
    /// # Safety
    ///
    /// All linked events must be valid.
    unsafe fn step(&self) {
        let now = self.core.now.get() + 1;
        self.core.now.set(now);
        let slot_index = (now & MASK) as usize;

        if slot_index == 0 {
            // The core finished a rotation: hand down the next outer slot
            // before draining our own, so promoted events due this tick
            // fire this tick.
            // SAFETY: forwarded caller contract.
            unsafe { self.advance_outer(1) };
        }

        let slot = &self.core.slots[slot_index];
        // SAFETY: linked events are valid; popping before execution keeps
        // the head read valid across re-entrant callbacks.
        while let Some(mut event) = unsafe { slot.pop_front() } {
            // SAFETY: the event is valid and detached; no other reference
            // to it exists while the callback runs.
            let event = unsafe { event.as_mut() };
            debug_assert_eq!(
                event.node().scheduled_at(),
                now,
                "core slots hold only events due at the current tick"
            );
            if let Some(delta) = event.execute(self) {
                // SAFETY: the event stayed valid through its own callback.
                unsafe { self.schedule_ptr(NonNull::from(event), delta) };
            }
        }
    }

    /// Advances level `level` by one slot, firing events whose residual
    /// delay is zero and re-inserting the rest nearer the core.
    ///
    /// # Safety
    ///
    /// All linked events must be valid.
    unsafe fn advance_outer(&self, level: usize) {
        if level >= MAX_LEVELS {
            return;
        }
        let Some(wheel) = self.level(level) else {
            // Never-created levels hold no events, and levels are created
            // inner-first, so nothing above holds events either.
            return;
        };

        let now = wheel.now.get() + 1;
        wheel.now.set(now);
        let slot_index = (now & MASK) as usize;

        if slot_index == 0 {
            // SAFETY: forwarded caller contract.
            unsafe { self.advance_outer(level + 1) };
        }

        let core_now = self.now();
        debug_assert_eq!(
            core_now & ((1 << (WIDTH_BITS * level as u32)) - 1),
            0,
            "outer levels advance only on core rotation boundaries"
        );

        let slot = &wheel.slots[slot_index];
        // SAFETY: linked events are valid per the caller contract.
        while let Some(mut event) = unsafe { slot.pop_front() } {
            // SAFETY: the event is valid and now detached.
            let residual = unsafe { event.as_ref() }.node().scheduled_at() - core_now;
            if residual == 0 {
                // SAFETY: detached and valid, as above.
                let event = unsafe { event.as_mut() };
                if let Some(delta) = event.execute(self) {
                    // SAFETY: the event stayed valid through its callback.
                    unsafe { self.schedule_ptr(NonNull::from(event), delta) };
                }
            } else {
                // SAFETY: forwarded caller contract.
                unsafe { self.schedule_ptr(event, residual) };
            }
        }
    }

    /// Records the fire tick and links the event into the right level.
    ///
    /// # Safety
    ///
    /// `event` must be valid and pinned.
    unsafe fn schedule_ptr(&self, event: NonNull<dyn TimerEvent>, delta: Tick) {
        debug_assert!(delta >= 1, "schedule requires delta >= 1");
        // SAFETY: the event is valid per the caller contract.
        let node = unsafe { event.as_ref() }.node();
        // Only the facade writes fire ticks; outer levels never touch them.
        node.scheduled_at.set(self.now() + delta);
        // SAFETY: forwarded caller contract.
        unsafe { self.insert(event, delta) };
    }

    /// Links `event` into the finest level whose rotation covers `delta`.
    ///
    /// # Safety
    ///
    /// `event` must be valid and pinned.
    unsafe fn insert(&self, event: NonNull<dyn TimerEvent>, mut delta: Tick) {
        let mut level = 0;
        loop {
            let wheel = self.level_or_init(level);
            let now = wheel.now.get();
            if delta < NUM_SLOTS as Tick || level == MAX_LEVELS - 1 {
                let slot_index = ((now + delta) & MASK) as usize;
                // SAFETY: forwarded caller contract.
                unsafe { wheel.slots[slot_index].relink(event) };
                return;
            }
            // Shift into the outer level's frame: its rotation counter only
            // advances when this level wraps, so the ticks already consumed
            // of the current rotation count against the delay.
            delta = (delta + (now & MASK)) >> WIDTH_BITS;
            level += 1;
        }
    }

    fn level(&self, level: usize) -> Option<&WheelLevel> {
        match level {
            0 => Some(&self.core),
            l if l < MAX_LEVELS => self.outer[l - 1].get().map(|boxed| &**boxed),
            _ => None,
        }
    }

    fn level_or_init(&self, level: usize) -> &WheelLevel {
        if level == 0 {
            return &self.core;
        }
        let shift = WIDTH_BITS * level as u32;
        self.outer[level - 1]
            .get_or_init(|| Box::new(WheelLevel::new(self.core.now.get() >> shift)))
    }
}

impl Default for TimerWheel {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimerWheel {
    fn drop(&mut self) {
        // Unlink everything so surviving events are left inactive rather
        // than pointing into freed slots.
        for level in 0..MAX_LEVELS {
            let Some(wheel) = self.level(level) else {
                break;
            };
            for slot in &wheel.slots {
                // SAFETY: events linked at this point are still alive (an
                // event that died unlinked itself), and popping only resets
                // their linkage state.
                while unsafe { slot.pop_front() }.is_some() {}
            }
        }
    }
}

impl fmt::Debug for TimerWheel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let levels = 1 + self.outer.iter().filter(|cell| cell.get().is_some()).count();
        f.debug_struct("TimerWheel")
            .field("now", &self.now())
            .field("levels", &levels)
            .finish_non_exhaustive()
    }
}
