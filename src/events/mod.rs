//! Runtime events published by the controller, monitor, and manager.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
