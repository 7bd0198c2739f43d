//! TELNET protocol
//!
//! - **protocol**: wire constants, option codes and reply builders
//! - **negotiation**: receive-side byte dispatch and option negotiation

pub mod negotiation;
pub mod protocol;

pub use negotiation::{NegotiationFlags, Negotiator};
pub use protocol::TelnetOption;
