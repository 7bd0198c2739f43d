//! Terminal renderer using crossterm
//!
//! Draws the virtual screen onto the local console, one line at a time,
//! with a status bar underneath.

use std::io::{self, Write};

use crossterm::{
    cursor::{Hide, MoveTo, Show},
    execute, queue,
    style::{Attribute, Print, ResetColor, SetAttribute},
    terminal::{
        self, Clear, ClearType, DisableLineWrap, EnableLineWrap, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
};

use crate::core::term::VirtualScreen;

/// Shown in place of control characters left in the grid
const CONTROL_PLACEHOLDER: char = '?';

/// Copy of what is visible, taken so the screen lock is not held while drawing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    lines: Vec<String>,
    /// Zero-based (col, row) on the console
    cursor: (u16, u16),
}

impl Frame {
    pub fn capture(screen: &VirtualScreen) -> Self {
        Self {
            lines: visible_lines(screen),
            cursor: screen_cursor(screen),
        }
    }
}

/// Terminal renderer
pub struct Renderer {
    /// Whether the terminal has been initialized
    initialized: bool,
    /// Lines as last drawn, for diff rendering
    prev_lines: Vec<String>,
    prev_status: String,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    pub fn new() -> Self {
        Self {
            initialized: false,
            prev_lines: Vec::new(),
            prev_status: String::new(),
        }
    }

    /// Current console size as (cols, rows)
    pub fn size() -> io::Result<(u16, u16)> {
        terminal::size()
    }

    /// Initialize the terminal for rendering
    pub fn init(&mut self) -> io::Result<()> {
        terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(
            stdout,
            EnterAlternateScreen,
            DisableLineWrap,
            Clear(ClearType::All),
            MoveTo(0, 0)
        )?;
        self.initialized = true;
        self.clear_buffer();
        Ok(())
    }

    /// Cleanup the terminal
    pub fn cleanup(&mut self) -> io::Result<()> {
        if !self.initialized {
            return Ok(());
        }
        self.initialized = false;

        let mut stdout = io::stdout();
        let _ = execute!(
            stdout,
            ResetColor,
            SetAttribute(Attribute::Reset),
            Show,
            EnableLineWrap,
            LeaveAlternateScreen
        );
        let _ = stdout.flush();

        // Disable raw mode - this is the most important part
        terminal::disable_raw_mode()
    }

    /// Forget what was drawn so the next render repaints everything
    pub fn clear_buffer(&mut self) {
        self.prev_lines.clear();
        self.prev_status.clear();
    }

    /// Render a captured frame, redrawing only lines that changed
    pub fn render(&mut self, frame: &Frame, status: &str) -> io::Result<()> {
        let stdout = io::stdout();
        let mut stdout = io::BufWriter::with_capacity(65536, stdout.lock());
        queue!(stdout, Hide)?;

        self.prev_lines.resize(frame.lines.len(), String::new());
        for (row, line) in frame.lines.iter().enumerate() {
            if &self.prev_lines[row] != line {
                queue!(stdout, MoveTo(0, row as u16), Print(line))?;
                self.prev_lines[row].clone_from(line);
            }
        }

        let status_row = frame.lines.len() as u16;
        if status != self.prev_status {
            queue!(
                stdout,
                MoveTo(0, status_row),
                Clear(ClearType::CurrentLine),
                SetAttribute(Attribute::Reverse),
                Print(status),
                SetAttribute(Attribute::Reset)
            )?;
            self.prev_status = status.to_string();
        }

        let (col, row) = frame.cursor;
        queue!(stdout, MoveTo(col, row), Show)?;
        stdout.flush()
    }
}

/// Rows of the screen as printable text
fn visible_lines(screen: &VirtualScreen) -> Vec<String> {
    (0..screen.height() as usize)
        .filter_map(|row| screen.get_line(row + screen.y_offset()))
        .map(|line| printable(&line))
        .collect()
}

/// C0, DEL and C1 bytes would drive the local console; never print them
fn printable(line: &str) -> String {
    line.chars()
        .map(|c| if c.is_control() { CONTROL_PLACEHOLDER } else { c })
        .collect()
}

/// Zero-based cursor cell on the console
fn screen_cursor(screen: &VirtualScreen) -> (u16, u16) {
    let col = screen.cursor_x().saturating_sub(screen.x_offset());
    let row = screen.cursor_y().saturating_sub(screen.y_offset());
    (col as u16, row as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visible_lines() {
        let mut screen = VirtualScreen::with_offsets(6, 3, 1, 1);
        screen.write_bytes(b"ab\r\ncd");
        assert_eq!(visible_lines(&screen), vec!["ab    ", "cd    ", "      "]);
    }

    #[test]
    fn test_control_bytes_are_masked() {
        let mut screen = VirtualScreen::with_offsets(6, 2, 0, 0);
        screen.write_bytes(b"a\x0b\x85\x7fb");
        assert_eq!(visible_lines(&screen)[0], "a???b ");
        assert_eq!(printable("caf\u{e9}\u{9b}"), "caf\u{e9}?");
    }

    #[test]
    fn test_frame_is_detached_from_screen() {
        let mut screen = VirtualScreen::with_offsets(4, 2, 0, 0);
        screen.write_bytes(b"hi");
        let frame = Frame::capture(&screen);
        screen.write_bytes(b"\r\nyo");

        assert_eq!(frame.lines, vec!["hi  ", "    "]);
        assert_eq!(frame.cursor, (2, 0));
        assert_ne!(Frame::capture(&screen), frame);
    }

    #[test]
    fn test_cursor_is_zero_based() {
        let mut screen = VirtualScreen::with_offsets(10, 4, 1, 1);
        screen.write_bytes(b"\r\nabc");
        assert_eq!(screen.cursor_position(), (4, 2));
        assert_eq!(screen_cursor(&screen), (3, 1));
    }
}
