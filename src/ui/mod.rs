//! User interface rendering and input handling.
//!
//! - **renderer**: Draws the virtual screen and a status bar with crossterm
//! - **keymapper**: Keyboard input to VT100 byte sequence mapping

pub mod keymapper;
pub mod renderer;

pub use keymapper::*;
pub use renderer::*;
