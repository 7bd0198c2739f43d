//! vtelnet - a scriptable TELNET client with a VT100/VT52 virtual screen
//!
//! The library connects to a TELNET host, answers option negotiation,
//! renders the incoming byte stream into an in-memory screen and lets
//! callers wait for text or patterns to appear before answering.
//!
//! ```no_run
//! use std::time::Duration;
//! use vtelnet::core::{ConnectionSettings, TelnetConnection};
//!
//! let mut connection = TelnetConnection::new(ConnectionSettings::new("bbs.example.org", 23));
//! if connection.connect() {
//!     if connection.wait_for_string("login:", false, Duration::from_secs(5)).is_some() {
//!         connection.send_response("guest", true);
//!     }
//!     println!("{}", connection.hardcopy());
//! }
//! ```

pub mod config;
pub mod core;
pub mod ui;
