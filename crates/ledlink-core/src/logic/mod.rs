//! Controller Logic Module
//!
//! The controller task is split into focused components:
//! - `state`: messages, per-attempt state and the verdict latch
//! - `deadline`: the verdict backup timer
//! - `handlers`: transport operations spawned on behalf of an attempt
//! - `task`: the `ControllerTask` event loop and its state transitions
//!
//! ## Single Owner
//!
//! All connection state is owned by one `ControllerTask`. Handle calls arrive
//! on a command channel; operation completions and transport events share a
//! single inbound queue, so an indication queued before a read completion is
//! applied before it. Everything is processed one at a time, so a transition
//! always observes the effects of every transition before it. Transport I/O runs in spawned
//! tasks that report back as `Completion`s tagged with the generation of the
//! attempt that started them; a completion whose generation is no longer
//! current is discarded.
//!
//! Link teardown also runs in a spawned task. The next link attempt waits for
//! it to finish before connecting.

pub(crate) mod deadline;
pub(crate) mod handlers;
pub(crate) mod state;
pub(crate) mod task;

pub use state::ControllerStats;
pub(crate) use state::Command;
pub(crate) use task::ControllerTask;
