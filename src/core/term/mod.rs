//! Terminal emulation
//!
//! - **screen**: the virtual screen grid, cursor and scroll window
//! - **escape**: VT100/VT52 escape sequence recognition

pub mod escape;
pub mod screen;

use std::sync::{Arc, Mutex, MutexGuard};

pub use escape::{function_key_sequence, EscapeAction, EscapeMatch, EscapeSequenceParser, Response};
pub use screen::VirtualScreen;

/// Screen shared between the reader thread and foreground callers
pub type SharedScreen = Arc<Mutex<VirtualScreen>>;

/// Lock the screen, recovering it if a holder panicked
pub fn lock_screen(screen: &Mutex<VirtualScreen>) -> MutexGuard<'_, VirtualScreen> {
    screen.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
