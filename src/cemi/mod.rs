//! CEMI frame codec (C4) and send/confirm state machine (C6).

mod constants;
mod flags;
mod frame;
mod handler;

pub use constants::{CemiMessageCode, Priority};
pub use flags::CemiFlags;
pub use frame::CemiFrame;
pub use handler::{CemiHandler, SendOutcome};
