//! Escape sequence parser
//!
//! Recognizes the VT100/VT52 sequences that may follow an ESC byte and
//! translates each into a [`VirtualScreen`] operation.
//!
//! Recognition runs over an ordered table of rules; the first rule that
//! matches the bytes after ESC wins. Rules are exact byte strings, literal
//! prefixes followed by wildcard bytes, or anchored byte regexes for the
//! parameterized sequences. A few sequences are consumed without effect so
//! that their bytes never reach the screen as text.

use std::sync::OnceLock;

use regex::bytes::{Captures, Regex, RegexBuilder};

use super::screen::VirtualScreen;

/// Longest sequence we are willing to wait for across reads
pub const MAX_SEQUENCE_LEN: usize = 32;

/// Numeric parameters saturate here
const MAX_PARAMETER: usize = u16::MAX as usize;

/// Report the terminal owes the host after certain sequences
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Cursor position report: ESC [ row ; col R (1-based)
    CursorPosition(usize, usize),
    /// Device status report: terminal OK
    StatusOk,
    /// VT100 primary device attributes
    DeviceAttributes,
    /// VT52 identify
    Vt52Identify,
}

impl Response {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Response::CursorPosition(row, col) => format!("\x1b[{};{}R", row, col).into_bytes(),
            Response::StatusOk => b"\x1b[0n".to_vec(),
            // VT100 with no options
            Response::DeviceAttributes => b"\x1b[?1;0c".to_vec(),
            Response::Vt52Identify => b"\x1b/Z".to_vec(),
        }
    }
}

/// Screen operation selected by a matched sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeAction {
    Index,
    NextLine,
    ReverseIndex,
    SaveCursor,
    RestoreCursor,
    CursorUp(usize),
    CursorDown(usize),
    CursorRight(usize),
    CursorLeft(usize),
    /// Absolute position; row and column as sent by the host
    Position { row: usize, col: usize },
    /// DECSTBM; recognized but scrolling regions are not emulated
    ScrollRegion,
    EraseToEndOfLine,
    EraseToStartOfLine,
    EraseLine,
    EraseToEndOfScreen,
    EraseToStartOfScreen,
    EraseScreen,
    Reset,
    ReportCursorPosition,
    ReportStatus,
    ReportAttributes,
    Vt52Identify,
    /// Consumed, no effect
    Ignore,
}

/// A recognized sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscapeMatch {
    /// Bytes consumed after the ESC
    pub len: usize,
    pub action: EscapeAction,
}

enum Rule {
    Exact(&'static [u8], EscapeAction),
    /// Literal prefix followed by `n` bytes of any value
    Wildcard(&'static [u8], usize, EscapeAction),
    Pattern(Regex, fn(&Captures) -> EscapeAction),
}

impl Rule {
    fn pattern(re: &str, build: fn(&Captures) -> EscapeAction) -> Self {
        // Byte-oriented like the partial matcher: `\d` is ASCII only
        let re = RegexBuilder::new(re)
            .unicode(false)
            .build()
            .expect("valid escape pattern");
        Rule::Pattern(re, build)
    }

    fn try_match(&self, bytes: &[u8]) -> Option<EscapeMatch> {
        match self {
            Rule::Exact(seq, action) => bytes.starts_with(seq).then(|| EscapeMatch {
                len: seq.len(),
                action: *action,
            }),
            Rule::Wildcard(prefix, n, action) => {
                (bytes.starts_with(prefix) && bytes.len() >= prefix.len() + n).then(|| EscapeMatch {
                    len: prefix.len() + n,
                    action: *action,
                })
            }
            Rule::Pattern(re, build) => {
                let caps = re.captures(bytes)?;
                let whole = caps.get(0)?;
                Some(EscapeMatch {
                    len: whole.end(),
                    action: build(&caps),
                })
            }
        }
    }
}

/// Table-driven matcher for the bytes following ESC
pub struct EscapeSequenceParser {
    rules: Vec<Rule>,
    partial: Regex,
}

impl EscapeSequenceParser {
    /// Process-wide parser; the table is immutable once built
    pub fn shared() -> &'static EscapeSequenceParser {
        static PARSER: OnceLock<EscapeSequenceParser> = OnceLock::new();
        PARSER.get_or_init(EscapeSequenceParser::new)
    }

    pub fn new() -> Self {
        use EscapeAction::*;

        let rules = vec![
            // Cursor relative motion
            Rule::Exact(b"D", Index),
            Rule::Exact(b"E", NextLine),
            Rule::Exact(b"M", ReverseIndex),
            Rule::Exact(b"7", SaveCursor),
            Rule::Exact(b"8", RestoreCursor),
            // Parameterized cursor motion
            Rule::pattern(r"^\[(\d*)C", |c| CursorRight(count(c, 1))),
            Rule::pattern(r"^\[(\d*)D", |c| CursorLeft(count(c, 1))),
            Rule::pattern(r"^\[(\d*)A", |c| CursorUp(count(c, 1))),
            Rule::pattern(r"^\[(\d*)B", |c| CursorDown(count(c, 1))),
            Rule::pattern(r"^\[(\d*);(\d*)[Hf]", |c| Position {
                row: number(c, 1),
                col: number(c, 2),
            }),
            Rule::pattern(r"^\[(\d*)[Hf]", |c| Position {
                row: number(c, 1),
                col: 0,
            }),
            // Scrolling region
            Rule::pattern(r"^\[\d*;\d*r", |_| ScrollRegion),
            Rule::Exact(b"[r", ScrollRegion),
            // Erase
            Rule::Exact(b"[K", EraseToEndOfLine),
            Rule::Exact(b"[0K", EraseToEndOfLine),
            Rule::Exact(b"[1K", EraseToStartOfLine),
            Rule::Exact(b"[2K", EraseLine),
            Rule::Exact(b"[J", EraseToEndOfScreen),
            Rule::Exact(b"[0J", EraseToEndOfScreen),
            Rule::Exact(b"[1J", EraseToStartOfScreen),
            Rule::Exact(b"[2J", EraseScreen),
            // Reports
            Rule::Exact(b"[6n", ReportCursorPosition),
            Rule::Exact(b"[5n", ReportStatus),
            Rule::Exact(b"[c", ReportAttributes),
            Rule::Exact(b"[0c", ReportAttributes),
            // Tab stops
            Rule::Exact(b"[g", Ignore),
            Rule::Exact(b"[0g", Ignore),
            Rule::Exact(b"[3g", Ignore),
            // Line size, modes, attributes, character sets
            Rule::Wildcard(b"#", 1, Ignore),
            Rule::pattern(r"^\[\??[\d;]*[hl]", |_| Ignore),
            Rule::pattern(r"^\[[\d;]*m", |_| Ignore),
            Rule::Wildcard(b"(", 1, Ignore),
            Rule::Wildcard(b")", 1, Ignore),
            Rule::Exact(b"c", Reset),
            // VT52 compatibility
            Rule::Exact(b"A", CursorUp(1)),
            Rule::Exact(b"B", CursorDown(1)),
            Rule::Exact(b"C", CursorRight(1)),
            Rule::Exact(b"D", CursorLeft(1)),
            Rule::Exact(b"H", Position { row: 0, col: 0 }),
            Rule::Exact(b"K", EraseToEndOfLine),
            Rule::Exact(b"J", EraseToEndOfScreen),
            Rule::Exact(b"I", ReverseIndex),
            Rule::pattern(r"(?s-u)^Y(.)(.)", |c| Position {
                row: vt52_coordinate(c, 1),
                col: vt52_coordinate(c, 2),
            }),
            Rule::Exact(b"F", Ignore),
            Rule::Exact(b"G", Ignore),
            Rule::Exact(b"Z", Vt52Identify),
            Rule::Exact(b"=", Ignore),
            Rule::Exact(b"<", Ignore),
            Rule::Exact(b">", Ignore),
        ];

        Self {
            rules,
            // Every byte run that can still grow into one of the rules above
            partial: Regex::new(r"(?s-u)^(\[[\d;?]*|[#()]|Y.?)?$").expect("valid partial pattern"),
        }
    }

    /// Match the bytes following an ESC against the table, first match wins
    pub fn match_sequence(&self, bytes: &[u8]) -> Option<EscapeMatch> {
        let window = &bytes[..bytes.len().min(MAX_SEQUENCE_LEN)];
        self.rules.iter().find_map(|rule| rule.try_match(window))
    }

    /// Whether `bytes` is an unfinished prefix of some sequence, meaning the
    /// rest may still arrive with the next read
    pub fn is_incomplete(&self, bytes: &[u8]) -> bool {
        bytes.len() < MAX_SEQUENCE_LEN && self.partial.is_match(bytes)
    }

    /// Recognize the sequence starting at `offset` (just past the ESC) and
    /// apply it. Returns the bytes consumed, zero when nothing matched.
    pub fn parse(
        &self,
        buffer: &[u8],
        offset: usize,
        screen: &mut VirtualScreen,
    ) -> (usize, Option<Response>) {
        let Some(rest) = buffer.get(offset..) else {
            return (0, None);
        };
        match self.match_sequence(rest) {
            Some(m) => (m.len, apply(m.action, screen)),
            None => {
                tracing::debug!(
                    "Unrecognized escape sequence: {:?}",
                    String::from_utf8_lossy(&rest[..rest.len().min(8)])
                );
                (0, None)
            }
        }
    }
}

impl Default for EscapeSequenceParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply a recognized action to the screen
pub fn apply(action: EscapeAction, screen: &mut VirtualScreen) -> Option<Response> {
    use EscapeAction::*;

    match action {
        Index => screen.move_cursor_vertical(1),
        NextLine => screen.cursor_next_line(),
        ReverseIndex => screen.move_cursor_vertical(-1),
        SaveCursor => screen.save_cursor(),
        RestoreCursor => screen.restore_cursor(),
        CursorUp(n) => screen.move_cursor_vertical(-signed(n)),
        CursorDown(n) => {
            let y = screen.cursor_y().saturating_add(n);
            screen.set_cursor_y(y);
        }
        CursorRight(n) => screen.move_cursor_in_line(signed(n)),
        CursorLeft(n) => screen.move_cursor_in_line(-signed(n)),
        Position { row, col } => screen.move_cursor_to(
            col.saturating_add(screen.x_offset()),
            row.saturating_add(screen.y_offset()),
        ),
        EraseToEndOfLine => screen.clean_to_end_of_line(),
        EraseToStartOfLine => screen.clean_to_start_of_line(),
        EraseLine => screen.clean_current_line(),
        EraseToEndOfScreen => screen.clean_from_cursor(),
        EraseToStartOfScreen => screen.clean_to_cursor(),
        EraseScreen | Reset => screen.clean_screen(),
        ReportCursorPosition => {
            let row = screen.cursor_y() - screen.y_offset() + 1;
            let col = screen.cursor_x() - screen.x_offset() + 1;
            return Some(Response::CursorPosition(row, col));
        }
        ReportStatus => return Some(Response::StatusOk),
        ReportAttributes => return Some(Response::DeviceAttributes),
        Vt52Identify => return Some(Response::Vt52Identify),
        ScrollRegion | Ignore => {}
    }
    None
}

/// VT100/xterm sequence sent for function key `F<n>`, 1 through 12
pub fn function_key_sequence(n: u8) -> Option<&'static [u8]> {
    let seq: &'static [u8] = match n {
        1 => b"\x1bOP",
        2 => b"\x1bOQ",
        3 => b"\x1bOR",
        4 => b"\x1bOS",
        5 => b"\x1b[15~",
        6 => b"\x1b[17~",
        7 => b"\x1b[18~",
        8 => b"\x1b[19~",
        9 => b"\x1b[20~",
        10 => b"\x1b[21~",
        11 => b"\x1b[23~",
        12 => b"\x1b[24~",
        _ => return None,
    };
    Some(seq)
}

/// Decimal parameter; absent means zero, oversized values saturate
fn number(caps: &Captures, group: usize) -> usize {
    let digits = caps.get(group).map_or(&b""[..], |m| m.as_bytes());
    if digits.is_empty() {
        return 0;
    }
    digits.iter().fold(0usize, |acc, &d| {
        acc.saturating_mul(10)
            .saturating_add(usize::from(d.wrapping_sub(b'0')))
            .min(MAX_PARAMETER)
    })
}

fn signed(n: usize) -> isize {
    isize::try_from(n).unwrap_or(isize::MAX)
}

/// Repeat count; absent or zero means one
fn count(caps: &Captures, group: usize) -> usize {
    number(caps, group).max(1)
}

/// VT52 addresses are sent as the coordinate plus 32
fn vt52_coordinate(caps: &Captures, group: usize) -> usize {
    caps.get(group)
        .and_then(|m| m.as_bytes().first())
        .map_or(0, |&b| usize::from(b.saturating_sub(0x20)))
}
