//! Tickwheel: a hierarchical timer wheel on a logical tick axis.
//!
//! # Overview
//!
//! Tickwheel schedules deferred events along a discrete monotonic tick axis
//! and executes them as logical time advances. It is built for workloads in
//! which most timers are created and then cancelled or pushed forward before
//! they ever fire (per-connection idle and deadline timers, retransmission
//! timers, lease expiry), so the operations that matter are insertion,
//! cancellation and re-scheduling rather than firing.
//!
//! # Core Guarantees
//!
//! - **O(1) schedule and cancel** regardless of how far out the deadline is
//! - **Cheap re-scheduling**: moving an active event re-links it, it never
//!   re-sorts or re-allocates
//! - **No per-event allocation**: events are intrusive nodes owned by the
//!   caller; the wheel holds only linkage
//! - **Strict tick order**: every event due at tick `T` fires before any
//!   event due at tick `T + 1`
//! - **Re-entrant callbacks**: an executing event may schedule or cancel any
//!   event, including itself
//!
//! # Module Structure
//!
//! - [`event`]: the dispatch trait, intrusive node state and ready-made
//!   closure/method event types
//! - [`wheel`]: the wheel hierarchy and the public scheduling operations
//! - [`util`]: deterministic RNG for reproducible stress scenarios
//! - [`test_utils`]: tracing-based logging helpers shared by the test suite
//!
//! # Example
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use tickwheel::{ClosureEvent, TimerEvent, TimerWheel};
//!
//! let wheel = TimerWheel::new();
//! let fired = Rc::new(Cell::new(0u32));
//! let counter = fired.clone();
//! let mut event = Box::pin(ClosureEvent::new(move || counter.set(counter.get() + 1)));
//!
//! // SAFETY: the event is pinned and outlives its registration.
//! unsafe {
//!     wheel.schedule(event.as_mut(), 5);
//!     wheel.advance(4);
//!     assert_eq!(fired.get(), 0);
//!     wheel.advance(1);
//! }
//! assert_eq!(fired.get(), 1);
//! assert!(!event.active());
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod event;
mod slot;
pub mod test_utils;
pub mod util;
pub mod wheel;

/// Unit-less unsigned logical time. The wheel is agnostic to what a tick
/// means in wall-clock terms.
pub type Tick = u64;

pub use event::{ClosureEvent, EventNode, MemberEvent, TimerEvent};
pub use wheel::TimerWheel;
