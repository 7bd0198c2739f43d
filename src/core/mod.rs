//! Core telnet client components.
//!
//! This module contains the protocol and emulation logic:
//!
//! - **transport**: TCP socket wrapper and error type
//! - **telnet**: IAC option negotiation (ECHO, NAWS, TERMTYPE, LOGOUT)
//! - **term**: Virtual screen and VT100/VT52 escape sequence parser
//! - **connection**: Session combining socket, reader thread and screen
//! - **wait**: Foreground polling of the screen
//!
//! # Architecture
//!
//! ```text
//! TelnetConnection
//! ├── Transport (socket I/O with the host)
//! ├── reader thread
//! │   └── Negotiator (IAC commands, escape dispatch)
//! └── VirtualScreen (shared, one mutex)
//!     ├── byte grid + cursor
//!     └── hardcopy cache
//! ```

pub mod connection;
pub mod telnet;
pub mod term;
pub mod transport;
pub mod wait;

pub use connection::{ConnectionSettings, TelnetConnection};
pub use transport::{TelnetError, Transport};
