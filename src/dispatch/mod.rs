//! Idle-worker dispatch
//!
//! Frames go to the lowest-numbered idle slot; when none is idle the
//! dispatcher waits for a release. Results are parked in the reassembly
//! buffer, which restores capture order.

pub mod dispatcher;
pub mod slots;

pub use dispatcher::Dispatcher;
pub use slots::{SlotState, SlotTable};
