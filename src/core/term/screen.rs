//! Virtual screen
//!
//! An addressable byte grid with a cursor and a one-dimensional vertical
//! scroll window. The screen knows nothing about sockets or protocol state;
//! the telnet dispatcher and the escape parser drive it through the mutation
//! API below.
//!
//! Coordinates crossing the public API are shifted by the screen's offsets
//! (0 for zero-based addressing, 1 for one-based). Internally everything is
//! zero-based and relative to the visible window.
//!
//! Out-of-range coordinates are clamped or dropped, never reported: a bad
//! sequence from the host must not take the read loop down with it.

use regex::{Regex, RegexBuilder};

/// Fill byte for erased cells
pub const BLANK: u8 = b' ';

const TAB_STOP: usize = 8;

const NUL: u8 = 0x00;
const BEL: u8 = 0x07;
const BS: u8 = 0x08;
const HT: u8 = 0x09;
const LF: u8 = 0x0A;
const CR: u8 = 0x0D;

/// Fixed-size character grid emulating a terminal display
#[derive(Debug, Clone)]
pub struct VirtualScreen {
    width: usize,
    height: usize,
    x_offset: usize,
    y_offset: usize,
    rows: Vec<Vec<u8>>,
    cursor_x0: usize,
    cursor_y0: usize,
    /// First line of the scroll window, counted in lines scrolled since the last clean
    visible_top: usize,
    /// Last line of the scroll window; always `visible_top + height - 1`
    visible_bottom: usize,
    saved_cursor: Option<(usize, usize)>,
    changed_screen: bool,
    hardcopy: String,
    hardcopy_lower: String,
}

impl VirtualScreen {
    /// Create a zero-based screen
    pub fn new(width: u16, height: u16) -> Self {
        Self::with_offsets(width, height, 0, 0)
    }

    /// Create a screen whose public coordinates start at the given offsets
    pub fn with_offsets(width: u16, height: u16, x_offset: usize, y_offset: usize) -> Self {
        let width = usize::from(width.max(1));
        let height = usize::from(height.max(1));
        Self {
            width,
            height,
            x_offset,
            y_offset,
            rows: vec![vec![BLANK; width]; height],
            cursor_x0: 0,
            cursor_y0: 0,
            visible_top: 0,
            visible_bottom: height - 1,
            saved_cursor: None,
            // Forces the first hardcopy to build its cache
            changed_screen: true,
            hardcopy: String::new(),
            hardcopy_lower: String::new(),
        }
    }

    pub fn width(&self) -> u16 {
        u16::try_from(self.width).unwrap_or(u16::MAX)
    }

    pub fn height(&self) -> u16 {
        u16::try_from(self.height).unwrap_or(u16::MAX)
    }

    pub fn x_offset(&self) -> usize {
        self.x_offset
    }

    pub fn y_offset(&self) -> usize {
        self.y_offset
    }

    pub fn visible_top(&self) -> usize {
        self.visible_top
    }

    pub fn visible_bottom(&self) -> usize {
        self.visible_bottom
    }

    /// Whether content changed since the last hardcopy was taken
    pub fn is_changed(&self) -> bool {
        self.changed_screen
    }

    /// Cursor column in public coordinates
    pub fn cursor_x(&self) -> usize {
        self.cursor_x0 + self.x_offset
    }

    /// Cursor row in public coordinates
    pub fn cursor_y(&self) -> usize {
        self.cursor_y0 + self.y_offset
    }

    /// Cursor as `(x, y)` in public coordinates
    pub fn cursor_position(&self) -> (usize, usize) {
        (self.cursor_x(), self.cursor_y())
    }

    /// Set the cursor column, clamping silently to the grid
    pub fn set_cursor_x(&mut self, x: usize) {
        self.cursor_x0 = x.saturating_sub(self.x_offset).min(self.width - 1);
    }

    /// Set the cursor row, clamping silently to the visible window.
    ///
    /// Unlike [`Self::move_cursor_to`] this never scrolls.
    pub fn set_cursor_y(&mut self, y: usize) {
        self.cursor_y0 = y.saturating_sub(self.y_offset).min(self.height - 1);
    }

    /// Write one byte at the cursor and advance.
    ///
    /// CR returns to column 0 and LF advances one row; both leave the grid
    /// content alone. BS steps left, HT jumps to the next tab stop, NUL and
    /// BEL are dropped. Anything else is stored verbatim.
    pub fn write_byte(&mut self, byte: u8) {
        match byte {
            NUL | BEL => return,
            CR => self.cursor_x0 = 0,
            LF => self.move_cursor_vertical(1),
            BS => self.cursor_x0 = self.cursor_x0.saturating_sub(1),
            HT => {
                let next = (self.cursor_x0 / TAB_STOP + 1) * TAB_STOP;
                self.cursor_x0 = next.min(self.width - 1);
            }
            _ => {
                if let Some(cell) = self
                    .rows
                    .get_mut(self.cursor_y0)
                    .and_then(|row| row.get_mut(self.cursor_x0))
                {
                    *cell = byte;
                }
                self.move_cursor(1);
            }
        }
        self.changed_screen = true;
    }

    /// Write a run of bytes through [`Self::write_byte`]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.write_byte(b);
        }
    }

    /// Move the cursor to the top-left corner
    pub fn cursor_reset(&mut self) {
        self.cursor_x0 = 0;
        self.cursor_y0 = 0;
    }

    /// Carriage return plus line feed
    pub fn cursor_next_line(&mut self) {
        self.cursor_x0 = 0;
        self.move_cursor_vertical(1);
    }

    /// Absolute positioning in public coordinates.
    ///
    /// A row below the visible window scrolls the screen up until the row
    /// becomes the last visible line. Columns are clamped.
    pub fn move_cursor_to(&mut self, x: usize, y: usize) {
        self.cursor_x0 = x.saturating_sub(self.x_offset).min(self.width - 1);
        let y0 = y.saturating_sub(self.y_offset);
        if y0 >= self.height {
            self.scroll_up(y0 - (self.height - 1));
            self.cursor_y0 = self.height - 1;
        } else {
            self.cursor_y0 = y0;
        }
    }

    /// Move `n` cells forward (or backward when negative) in reading order,
    /// wrapping across rows and scrolling past the bottom line.
    pub fn move_cursor(&mut self, n: isize) {
        let width = self.width as isize;
        let mut dy = n / width;
        let mut x = self.cursor_x0 as isize + n % width;
        if x >= width {
            x -= width;
            dy += 1;
        } else if x < 0 {
            x += width;
            dy -= 1;
        }
        self.cursor_x0 = x as usize;
        self.move_cursor_vertical(dy);
    }

    /// Move `n` rows down (or up when negative), keeping the column.
    /// Stops at the top line, scrolls past the bottom line.
    pub fn move_cursor_vertical(&mut self, n: isize) {
        let y = (self.cursor_y0 as isize).saturating_add(n);
        if y < 0 {
            self.cursor_y0 = 0;
        } else if y as usize >= self.height {
            self.scroll_up(y as usize - (self.height - 1));
            self.cursor_y0 = self.height - 1;
        } else {
            self.cursor_y0 = y as usize;
        }
    }

    /// Move within the current row only, clamping at both edges
    pub fn move_cursor_in_line(&mut self, n: isize) {
        let x = (self.cursor_x0 as isize)
            .saturating_add(n)
            .clamp(0, self.width as isize - 1);
        self.cursor_x0 = x as usize;
    }

    /// DECSC
    pub fn save_cursor(&mut self) {
        self.saved_cursor = Some((self.cursor_x0, self.cursor_y0));
    }

    /// DECRC; goes home when nothing was saved
    pub fn restore_cursor(&mut self) {
        let (x, y) = self.saved_cursor.unwrap_or((0, 0));
        self.cursor_x0 = x.min(self.width - 1);
        self.cursor_y0 = y.min(self.height - 1);
    }

    /// Blank the whole grid, home the cursor and reset the scroll window
    pub fn clean_screen(&mut self) {
        for row in &mut self.rows {
            row.fill(BLANK);
        }
        self.cursor_reset();
        self.visible_top = 0;
        self.visible_bottom = self.height - 1;
        self.changed_screen = true;
    }

    /// Blank every cell from `(x0, y0)` through `(x1, y1)` in reading order.
    ///
    /// Both corners are in public coordinates and clipped to the visible
    /// window; an end before the start blanks nothing.
    pub fn clean_screen_region(&mut self, x0: usize, y0: usize, x1: usize, y1: usize) {
        let start = self.clip(x0, y0);
        let end = self.clip(x1, y1);
        self.clear_span(start, end);
    }

    /// Blank one row (public coordinates)
    pub fn clean_line(&mut self, y: usize) {
        let Some(y0) = y.checked_sub(self.y_offset) else {
            return;
        };
        if y0 < self.height {
            self.clear_span(y0 * self.width, y0 * self.width + self.width - 1);
        }
    }

    /// Blank from the top-left corner through the cursor
    pub fn clean_to_cursor(&mut self) {
        self.clear_span(0, self.cursor_linear());
    }

    /// Blank from the cursor through the bottom-right corner
    pub fn clean_from_cursor(&mut self) {
        self.clear_span(self.cursor_linear(), self.width * self.height - 1);
    }

    /// Blank from the cursor to the end of its row
    pub fn clean_to_end_of_line(&mut self) {
        let row_start = self.cursor_y0 * self.width;
        self.clear_span(self.cursor_linear(), row_start + self.width - 1);
    }

    /// Blank from the start of the cursor's row through the cursor
    pub fn clean_to_start_of_line(&mut self) {
        let row_start = self.cursor_y0 * self.width;
        self.clear_span(row_start, self.cursor_linear());
    }

    /// Blank the cursor's row
    pub fn clean_current_line(&mut self) {
        self.clean_line(self.cursor_y());
    }

    /// Shift rows up by `n`, blanking the revealed rows at the bottom.
    ///
    /// The scroll window advances by `n` lines. Scrolling a full screen or
    /// more blanks the grid like [`Self::clean_screen`] but keeps the
    /// advanced window and leaves the cursor to the caller.
    pub fn scroll_up(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        if n >= self.height {
            for row in &mut self.rows {
                row.fill(BLANK);
            }
        } else {
            self.rows.drain(..n);
            let width = self.width;
            self.rows.extend((0..n).map(|_| vec![BLANK; width]));
        }
        self.visible_top = self.visible_top.saturating_add(n);
        self.visible_bottom = self.visible_top.saturating_add(self.height - 1);
        self.changed_screen = true;
    }

    /// Text of one row (public coordinates)
    pub fn get_line(&self, y: usize) -> Option<String> {
        let y0 = y.checked_sub(self.y_offset)?;
        self.rows.get(y0).map(|row| bytes_to_string(row))
    }

    /// Flattened screen text, rows joined with `\n`.
    ///
    /// The snapshot is cached and rebuilt only after a change; taking it
    /// clears the changed flag.
    pub fn hardcopy(&mut self, lowercase: bool) -> String {
        self.refresh_hardcopy();
        if lowercase {
            self.hardcopy_lower.clone()
        } else {
            self.hardcopy.clone()
        }
    }

    /// Plain substring search over the hardcopy.
    ///
    /// A case-insensitive hit returns the text as it appears on screen, not
    /// the search string. An empty search only refreshes the snapshot.
    pub fn find_on_screen(&mut self, text: &str, case_sensitive: bool) -> Option<String> {
        self.refresh_hardcopy();
        let index = if case_sensitive {
            self.hardcopy.find(text)
        } else {
            self.hardcopy_lower.find(&text.to_ascii_lowercase())
        }?;
        self.hardcopy
            .get(index..index + text.len())
            .map(str::to_string)
    }

    /// Regex search over the hardcopy; an invalid pattern finds nothing
    pub fn find_regex_on_screen(&mut self, pattern: &str, case_sensitive: bool) -> Option<String> {
        match RegexBuilder::new(pattern)
            .case_insensitive(!case_sensitive)
            .build()
        {
            Ok(re) => self.find_regex(&re),
            Err(e) => {
                tracing::warn!("Invalid screen search pattern {:?}: {}", pattern, e);
                None
            }
        }
    }

    /// Search the hardcopy with a compiled regex
    pub fn find_regex(&mut self, re: &Regex) -> Option<String> {
        self.refresh_hardcopy();
        re.find(&self.hardcopy).map(|m| m.as_str().to_string())
    }

    fn refresh_hardcopy(&mut self) {
        if !self.changed_screen {
            return;
        }
        self.hardcopy = self
            .rows
            .iter()
            .map(|row| bytes_to_string(row))
            .collect::<Vec<_>>()
            .join("\n");
        // ASCII-only folding keeps byte indices aligned between both copies
        self.hardcopy_lower = self.hardcopy.to_ascii_lowercase();
        self.changed_screen = false;
    }

    fn cursor_linear(&self) -> usize {
        self.cursor_y0 * self.width + self.cursor_x0
    }

    /// Public coordinates to a clipped linear index
    fn clip(&self, x: usize, y: usize) -> usize {
        let x0 = x.saturating_sub(self.x_offset).min(self.width - 1);
        let y0 = y.saturating_sub(self.y_offset).min(self.height - 1);
        y0 * self.width + x0
    }

    /// Blank linear cells `start..=end`
    fn clear_span(&mut self, start: usize, end: usize) {
        if start > end {
            return;
        }
        let last = self.width * self.height - 1;
        for pos in start..=end.min(last) {
            self.rows[pos / self.width][pos % self.width] = BLANK;
        }
        self.changed_screen = true;
    }
}

/// Grid bytes are Latin-1; each maps to the char with the same code point
fn bytes_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_hardcopy(width: usize, height: usize) -> String {
        vec![" ".repeat(width); height].join("\n")
    }

    #[test]
    fn test_write_then_crlf() {
        let mut screen = VirtualScreen::new(80, 24);
        screen.write_bytes(b"Hello\r\n");

        assert_eq!(screen.get_line(0).unwrap(), format!("Hello{}", " ".repeat(75)));
        assert_eq!(screen.cursor_position(), (0, 1));
    }

    #[test]
    fn test_clean_screen_idempotent() {
        let mut screen = VirtualScreen::new(10, 3);
        screen.write_bytes(b"abc\r\ndef");

        for _ in 0..2 {
            screen.clean_screen();
            assert_eq!(screen.hardcopy(false), blank_hardcopy(10, 3));
            assert_eq!(screen.cursor_position(), (0, 0));
        }
    }

    #[test]
    fn test_scroll_past_height_blanks_and_keeps_window() {
        let mut scrolled = VirtualScreen::new(10, 3);
        scrolled.write_bytes(b"one\r\ntwo\r\nthree");
        let mut cleaned = scrolled.clone();

        scrolled.scroll_up(5);
        cleaned.clean_screen();

        assert_eq!(scrolled.hardcopy(false), cleaned.hardcopy(false));
        assert_eq!(scrolled.visible_top(), 5);
        assert_eq!(scrolled.visible_bottom() - scrolled.visible_top() + 1, 3);
    }

    #[test]
    fn test_scroll_up_shifts_rows() {
        let mut screen = VirtualScreen::new(5, 3);
        screen.write_bytes(b"aa\r\nbb\r\ncc");
        screen.scroll_up(1);

        assert_eq!(screen.get_line(0).unwrap(), "bb   ");
        assert_eq!(screen.get_line(1).unwrap(), "cc   ");
        assert_eq!(screen.get_line(2).unwrap(), "     ");
        assert_eq!(screen.visible_top(), 1);
        assert_eq!(screen.visible_bottom(), 3);
    }

    #[test]
    fn test_linefeed_on_last_row_scrolls() {
        let mut screen = VirtualScreen::new(5, 2);
        screen.write_bytes(b"top\r\nbot\r\nnew");

        assert_eq!(screen.get_line(0).unwrap(), "bot  ");
        assert_eq!(screen.get_line(1).unwrap(), "new  ");
        assert_eq!(screen.cursor_position(), (3, 1));
    }

    #[test]
    fn test_write_wraps_at_line_end() {
        let mut screen = VirtualScreen::new(4, 2);
        screen.write_bytes(b"abcde");

        assert_eq!(screen.get_line(0).unwrap(), "abcd");
        assert_eq!(screen.get_line(1).unwrap(), "e   ");
        assert_eq!(screen.cursor_position(), (1, 1));
    }

    #[test]
    fn test_find_case_insensitive_keeps_screen_case() {
        let mut screen = VirtualScreen::new(40, 3);
        screen.write_bytes(b"\r\n  ERROR occurred");

        assert_eq!(screen.find_on_screen("error", false).as_deref(), Some("ERROR"));
        assert_eq!(screen.find_on_screen("error", true), None);
        assert_eq!(screen.find_on_screen("xyz", true), None);
    }

    #[test]
    fn test_find_regex() {
        let mut screen = VirtualScreen::new(40, 2);
        screen.write_bytes(b"Login: admin  Port 2323");

        assert_eq!(screen.find_regex_on_screen(r"Port \d+", true).as_deref(), Some("Port 2323"));
        assert_eq!(screen.find_regex_on_screen(r"login:", false).as_deref(), Some("Login:"));
        assert_eq!(screen.find_regex_on_screen(r"login:", true), None);
        assert_eq!(screen.find_regex_on_screen(r"(unclosed", true), None);
    }

    #[test]
    fn test_hardcopy_clears_changed_flag() {
        let mut screen = VirtualScreen::new(10, 2);
        assert!(screen.is_changed());
        screen.hardcopy(false);
        assert!(!screen.is_changed());

        screen.write_byte(b'x');
        assert!(screen.is_changed());
        assert!(screen.hardcopy(true).starts_with('x'));
        assert!(!screen.is_changed());
    }

    #[test]
    fn test_move_cursor_sweep_across_rows() {
        let (width, height) = (10usize, 5usize);
        for start_y in 1..4 {
            for start_x in 0..width {
                for n in -15isize..=15 {
                    let mut screen = VirtualScreen::new(width as u16, height as u16);
                    screen.move_cursor_to(start_x, start_y);
                    screen.move_cursor(n);

                    let target = (start_y * width + start_x) as isize + n;
                    if target < 0 || target >= (width * height) as isize {
                        continue;
                    }
                    let target = target as usize;
                    assert_eq!(
                        screen.cursor_position(),
                        (target % width, target / width),
                        "start ({}, {}) moved by {}",
                        start_x,
                        start_y,
                        n
                    );
                }
            }
        }
    }

    #[test]
    fn test_move_cursor_to_scrolls_but_setters_clamp() {
        let mut screen = VirtualScreen::new(10, 3);
        screen.write_bytes(b"first");

        screen.set_cursor_y(7);
        assert_eq!(screen.cursor_y(), 2);
        assert_eq!(screen.visible_top(), 0);

        screen.move_cursor_to(2, 4);
        assert_eq!(screen.cursor_position(), (2, 2));
        assert_eq!(screen.visible_top(), 2);
        assert_eq!(screen.get_line(0).unwrap(), " ".repeat(10));
    }

    #[test]
    fn test_one_based_offsets() {
        let mut screen = VirtualScreen::with_offsets(10, 3, 1, 1);
        assert_eq!(screen.cursor_position(), (1, 1));

        screen.move_cursor_to(3, 2);
        screen.write_byte(b'z');
        assert_eq!(screen.get_line(2).unwrap(), "  z       ");
        assert_eq!(screen.get_line(0), None);
    }

    #[test]
    fn test_clean_region_clips_out_of_range() {
        let mut screen = VirtualScreen::new(4, 2);
        screen.write_bytes(b"abcdefg");
        screen.clean_screen_region(2, 0, 100, 100);

        assert_eq!(screen.hardcopy(false), "ab  \n    ");
    }

    #[test]
    fn test_line_erase_variants() {
        let mut screen = VirtualScreen::new(6, 2);
        screen.write_bytes(b"abcdef12345");
        screen.move_cursor_to(2, 0);

        screen.clean_to_end_of_line();
        assert_eq!(screen.get_line(0).unwrap(), "ab    ");

        screen.move_cursor_to(3, 1);
        screen.clean_to_start_of_line();
        assert_eq!(screen.get_line(1).unwrap(), "    5 ");

        screen.clean_current_line();
        assert_eq!(screen.get_line(1).unwrap(), "      ");
    }

    #[test]
    fn test_clean_to_and_from_cursor() {
        let mut screen = VirtualScreen::new(3, 3);
        screen.write_bytes(b"abcdefgh");
        screen.move_cursor_to(1, 1);

        let mut from = screen.clone();
        from.clean_from_cursor();
        assert_eq!(from.hardcopy(false), "abc\nd  \n   ");

        screen.clean_to_cursor();
        assert_eq!(screen.hardcopy(false), "   \n  f\ngh ");
    }

    #[test]
    fn test_controls() {
        let mut screen = VirtualScreen::new(20, 2);
        screen.write_bytes(b"ab\x08c\tX\x07\x00");

        assert_eq!(screen.get_line(0).unwrap(), format!("ac      X{}", " ".repeat(11)));
        assert_eq!(screen.cursor_x(), 9);
    }

    #[test]
    fn test_save_restore_cursor() {
        let mut screen = VirtualScreen::new(10, 3);
        screen.move_cursor_to(4, 1);
        screen.save_cursor();
        screen.cursor_reset();
        screen.restore_cursor();

        assert_eq!(screen.cursor_position(), (4, 1));
    }
}
