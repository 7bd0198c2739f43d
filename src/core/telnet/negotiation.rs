//! Byte dispatch and option negotiation
//!
//! [`Negotiator`] walks each received chunk byte by byte. IAC commands are
//! answered into a response buffer, ESC hands over to the escape parser,
//! and every other byte is written to the virtual screen. The screen lock is
//! taken per dispatched item, never for a whole chunk, so foreground waiters
//! are not starved while a large read is being rendered.
//!
//! A command or escape sequence cut off at the end of a chunk is kept and
//! completed with the next one; feeding a stream in pieces renders exactly
//! like feeding it whole.

use std::sync::Mutex;

use bitflags::bitflags;

use super::protocol::{
    command, command_name, naws_subnegotiation, terminal_type_subnegotiation, TelnetOption, DO,
    DONT, IAC, SB, SE, TERMINAL_TYPE, TERMTYPE_SEND, WILL, WONT,
};
use crate::core::term::{lock_screen, EscapeSequenceParser, VirtualScreen};

const ESC: u8 = 0x1B;

/// Upper bound on bytes carried over between reads
const MAX_PENDING: usize = 4096;

bitflags! {
    /// Negotiation state shared with the connection
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct NegotiationFlags: u8 {
        /// Host echoes what we send
        const SERVER_ECHO         = 0b0000_0001;
        /// We announced WILL NAWS before the host asked
        const CLIENT_INIT_NAWS    = 0b0000_0010;
        /// At least one reply cycle has gone out
        const FIRST_RESPONSE_SENT = 0b0000_0100;
        const NAWS_NEGOTIATED     = 0b0000_1000;
        /// Logout exchange completed; the connection closes after this read
        const FORCE_LOGOUT        = 0b0001_0000;
    }
}

enum Step {
    Advance(usize),
    Incomplete,
}

/// TELNET receive-side state machine
#[derive(Debug)]
pub struct Negotiator {
    flags: NegotiationFlags,
    width: u16,
    height: u16,
    pending: Vec<u8>,
}

impl Negotiator {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            flags: NegotiationFlags::empty(),
            width,
            height,
            pending: Vec::new(),
        }
    }

    pub fn flags(&self) -> NegotiationFlags {
        self.flags
    }

    pub fn server_echo(&self) -> bool {
        self.flags.contains(NegotiationFlags::SERVER_ECHO)
    }

    pub fn force_logout(&self) -> bool {
        self.flags.contains(NegotiationFlags::FORCE_LOGOUT)
    }

    /// Forget all negotiated state and any carried-over bytes
    pub fn reset(&mut self) {
        self.flags = NegotiationFlags::empty();
        self.pending.clear();
    }

    /// Dispatch one received chunk and return the replies owed to the host.
    pub fn process(&mut self, chunk: &[u8], screen: &Mutex<VirtualScreen>) -> Vec<u8> {
        let mut buffer = std::mem::take(&mut self.pending);
        buffer.extend_from_slice(chunk);

        let mut responses = Vec::new();
        let mut i = 0;
        while i < buffer.len() {
            match self.dispatch(&buffer, i, screen, &mut responses) {
                Step::Advance(n) => i += n.max(1),
                Step::Incomplete => {
                    self.carry(&buffer[i..]);
                    break;
                }
            }
        }

        if !responses.is_empty() && !self.flags.contains(NegotiationFlags::FIRST_RESPONSE_SENT) {
            if !self
                .flags
                .intersects(NegotiationFlags::NAWS_NEGOTIATED | NegotiationFlags::CLIENT_INIT_NAWS)
            {
                tracing::debug!("Announcing window size support");
                responses.extend_from_slice(&command(WILL, TelnetOption::Naws.code()));
                self.flags.insert(NegotiationFlags::CLIENT_INIT_NAWS);
            }
            self.flags.insert(NegotiationFlags::FIRST_RESPONSE_SENT);
        }
        responses
    }

    fn carry(&mut self, tail: &[u8]) {
        if tail.len() > MAX_PENDING {
            tracing::warn!("Dropping {} bytes of unterminated telnet data", tail.len());
            return;
        }
        self.pending = tail.to_vec();
    }

    fn dispatch(
        &mut self,
        buffer: &[u8],
        i: usize,
        screen: &Mutex<VirtualScreen>,
        responses: &mut Vec<u8>,
    ) -> Step {
        match buffer[i] {
            IAC => self.dispatch_command(buffer, i, screen, responses),
            ESC => {
                let parser = EscapeSequenceParser::shared();
                let (consumed, report) = {
                    let mut screen = lock_screen(screen);
                    parser.parse(buffer, i + 1, &mut screen)
                };
                if consumed == 0 {
                    if parser.is_incomplete(&buffer[i + 1..]) {
                        return Step::Incomplete;
                    }
                    // Unknown sequence: drop the ESC, the rest is text
                    return Step::Advance(1);
                }
                if let Some(report) = report {
                    responses.extend(report.to_bytes());
                }
                Step::Advance(1 + consumed)
            }
            byte => {
                lock_screen(screen).write_byte(byte);
                Step::Advance(1)
            }
        }
    }

    fn dispatch_command(
        &mut self,
        buffer: &[u8],
        i: usize,
        screen: &Mutex<VirtualScreen>,
        responses: &mut Vec<u8>,
    ) -> Step {
        let Some(&verb) = buffer.get(i + 1) else {
            return Step::Incomplete;
        };
        match verb {
            DO | DONT | WILL | WONT => {
                let Some(&option) = buffer.get(i + 2) else {
                    return Step::Incomplete;
                };
                self.negotiate(verb, option, responses);
                Step::Advance(3)
            }
            SB => self.subnegotiate(buffer, i, responses),
            IAC => {
                lock_screen(screen).write_byte(IAC);
                Step::Advance(2)
            }
            other => {
                tracing::trace!("Ignoring IAC command {}", other);
                Step::Advance(2)
            }
        }
    }

    fn negotiate(&mut self, verb: u8, code: u8, responses: &mut Vec<u8>) {
        tracing::debug!("Received IAC {} {}", command_name(verb), code);
        let option = TelnetOption::from_u8(code);

        match verb {
            DO => match option {
                Some(TelnetOption::Naws) => {
                    if !self
                        .flags
                        .intersects(NegotiationFlags::CLIENT_INIT_NAWS | NegotiationFlags::NAWS_NEGOTIATED)
                    {
                        self.reply(responses, WILL, code);
                    }
                    responses.extend(naws_subnegotiation(self.width, self.height));
                    self.flags.insert(NegotiationFlags::NAWS_NEGOTIATED);
                }
                Some(TelnetOption::TerminalType) => self.reply(responses, WILL, code),
                Some(TelnetOption::Logout) => {
                    self.reply(responses, WILL, code);
                    self.flags.insert(NegotiationFlags::FORCE_LOGOUT);
                }
                _ => self.reply(responses, WONT, code),
            },
            DONT => {}
            WILL => match option {
                Some(TelnetOption::Echo) => {
                    self.flags.insert(NegotiationFlags::SERVER_ECHO);
                    self.reply(responses, DO, code);
                }
                // The host accepting a logout we asked for
                Some(TelnetOption::Logout) => self.flags.insert(NegotiationFlags::FORCE_LOGOUT),
                _ => self.reply(responses, DO, code),
            },
            WONT => {
                if option == Some(TelnetOption::Echo) {
                    self.flags.remove(NegotiationFlags::SERVER_ECHO);
                }
            }
            _ => {}
        }
    }

    fn reply(&self, responses: &mut Vec<u8>, verb: u8, code: u8) {
        tracing::debug!("Sending IAC {} {}", command_name(verb), code);
        responses.extend_from_slice(&command(verb, code));
    }

    /// `IAC SB <option> ... IAC SE` starting at `i`
    fn subnegotiate(&mut self, buffer: &[u8], i: usize, responses: &mut Vec<u8>) -> Step {
        let Some(&code) = buffer.get(i + 2) else {
            return Step::Incomplete;
        };
        let Some(end) = find_subnegotiation_end(buffer, i + 3) else {
            return Step::Incomplete;
        };
        let payload = &buffer[i + 3..end];

        match TelnetOption::from_u8(code) {
            Some(TelnetOption::TerminalType) if payload.first() == Some(&TERMTYPE_SEND) => {
                tracing::debug!("Reporting terminal type {}", TERMINAL_TYPE);
                responses.extend(terminal_type_subnegotiation(TERMINAL_TYPE));
            }
            Some(TelnetOption::Naws) => {
                responses.extend(naws_subnegotiation(self.width, self.height));
            }
            _ => tracing::debug!("Skipping subnegotiation for option {}", code),
        }
        // Past the trailing IAC SE
        Step::Advance(end + 2 - i)
    }
}

/// Index of the IAC in the closing `IAC SE`, skipping escaped `IAC IAC`
fn find_subnegotiation_end(buffer: &[u8], from: usize) -> Option<usize> {
    let mut j = from;
    while j + 1 < buffer.len() {
        if buffer[j] == IAC {
            match buffer[j + 1] {
                SE => return Some(j),
                IAC => j += 2,
                _ => j += 1,
            }
        } else {
            j += 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn screen(width: u16, height: u16) -> Mutex<VirtualScreen> {
        Mutex::new(VirtualScreen::new(width, height))
    }

    /// A negotiator that has already been through its first reply cycle
    fn settled(width: u16, height: u16) -> Negotiator {
        let mut negotiator = Negotiator::new(width, height);
        negotiator.flags.insert(NegotiationFlags::FIRST_RESPONSE_SENT);
        negotiator
    }

    #[test]
    fn test_do_naws_reports_window_size() {
        let screen = screen(80, 24);
        let mut negotiator = Negotiator::new(80, 24);

        let out = negotiator.process(&[IAC, DO, 31], &screen);

        assert_eq!(
            out,
            vec![IAC, WILL, 31, IAC, SB, 31, 0x00, 0x50, 0x00, 0x18, IAC, SE]
        );
        assert!(negotiator.flags().contains(NegotiationFlags::NAWS_NEGOTIATED));
        assert!(!negotiator.flags().contains(NegotiationFlags::CLIENT_INIT_NAWS));
    }

    #[test]
    fn test_will_echo() {
        let screen = screen(80, 24);
        let mut negotiator = settled(80, 24);

        assert_eq!(negotiator.process(&[IAC, WILL, 1], &screen), vec![IAC, DO, 1]);
        assert!(negotiator.server_echo());

        assert!(negotiator.process(&[IAC, WONT, 1], &screen).is_empty());
        assert!(!negotiator.server_echo());
    }

    #[test]
    fn test_first_cycle_announces_naws_once() {
        let screen = screen(80, 24);
        let mut negotiator = Negotiator::new(80, 24);

        let out = negotiator.process(&[IAC, WILL, 1], &screen);
        assert_eq!(out, vec![IAC, DO, 1, IAC, WILL, 31]);
        assert!(negotiator.flags().contains(NegotiationFlags::CLIENT_INIT_NAWS));

        // The host's DO answers our WILL; no second WILL
        let out = negotiator.process(&[IAC, DO, 31], &screen);
        assert_eq!(out, naws_subnegotiation(80, 24));

        let out = negotiator.process(&[IAC, WILL, 3], &screen);
        assert_eq!(out, vec![IAC, DO, 3]);
    }

    #[test]
    fn test_no_announcement_without_replies() {
        let screen = screen(80, 24);
        let mut negotiator = Negotiator::new(80, 24);

        assert!(negotiator.process(b"login: ", &screen).is_empty());
        assert!(negotiator.process(&[IAC, DONT, 1], &screen).is_empty());
        assert_eq!(negotiator.flags(), NegotiationFlags::empty());
    }

    #[test]
    fn test_refused_options() {
        let screen = screen(80, 24);
        let mut negotiator = settled(80, 24);

        for code in [32, 35, 39, 1, 33, 99] {
            assert_eq!(
                negotiator.process(&[IAC, DO, code], &screen),
                vec![IAC, WONT, code],
                "option {}",
                code
            );
        }
    }

    #[test]
    fn test_terminal_type_exchange() {
        let screen = screen(80, 24);
        let mut negotiator = settled(80, 24);

        assert_eq!(negotiator.process(&[IAC, DO, 24], &screen), vec![IAC, WILL, 24]);
        assert_eq!(
            negotiator.process(&[IAC, SB, 24, 1, IAC, SE], &screen),
            terminal_type_subnegotiation("ANSI")
        );
    }

    #[test]
    fn test_logout() {
        let screen = screen(80, 24);

        let mut negotiator = settled(80, 24);
        assert_eq!(negotiator.process(&[IAC, DO, 18], &screen), vec![IAC, WILL, 18]);
        assert!(negotiator.force_logout());

        let mut negotiator = settled(80, 24);
        assert!(negotiator.process(&[IAC, WILL, 18], &screen).is_empty());
        assert!(negotiator.force_logout());
    }

    #[test]
    fn test_unknown_subnegotiation_is_skipped() {
        let screen = screen(20, 2);
        let mut negotiator = settled(20, 2);

        let mut input = b"a".to_vec();
        input.extend_from_slice(&[IAC, SB, 39, 1, 2, IAC, IAC, 3, IAC, SE]);
        input.extend_from_slice(b"b");

        assert!(negotiator.process(&input, &screen).is_empty());
        assert_eq!(lock_screen(&screen).get_line(0).unwrap(), format!("ab{}", " ".repeat(18)));
    }

    #[test]
    fn test_escaped_iac_is_data() {
        let screen = screen(4, 1);
        let mut negotiator = settled(4, 1);

        negotiator.process(&[b'x', IAC, IAC, b'y'], &screen);
        assert_eq!(lock_screen(&screen).get_line(0).unwrap(), "x\u{ff}y ");
    }

    #[test]
    fn test_chunking_independence() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&[IAC, WILL, 1, IAC, DO, 31]);
        stream.extend_from_slice(b"\x1b[2J\x1b[1;2HWelcome\r\n");
        stream.extend_from_slice(&[IAC, SB, 24, 1, IAC, SE]);
        stream.extend_from_slice(b"\x1b[0;1mlogin:\x1b[K \x1bY\"#!\x1b(Bdone\x1b[3;4r");
        stream.extend_from_slice(&[IAC, IAC, b'\r', b'\n', IAC, 241]);
        stream.extend_from_slice(b"ab \x1b[\xd9\xa1Cz\x1b[99999999999999999999A\x1b[5Cq");

        let whole = screen(30, 4);
        Negotiator::new(30, 4).process(&stream, &whole);

        for size in 1..stream.len() {
            let pieces = screen(30, 4);
            let mut negotiator = Negotiator::new(30, 4);
            for chunk in stream.chunks(size) {
                negotiator.process(chunk, &pieces);
            }

            let mut expected = lock_screen(&whole).clone();
            let mut actual = lock_screen(&pieces).clone();
            assert_eq!(actual.hardcopy(false), expected.hardcopy(false), "chunk size {}", size);
            assert_eq!(actual.cursor_position(), expected.cursor_position(), "chunk size {}", size);
        }
    }

    #[test]
    fn test_huge_counts_keep_dispatching() {
        let screen = screen(20, 3);
        let mut negotiator = settled(20, 3);

        negotiator.process(b"\r\n\r\n\x1b[9223372036854775808Aafter", &screen);
        assert!(lock_screen(&screen).get_line(0).unwrap().starts_with("after"));

        // Far below the window: everything scrolls away, cursor lands on the last row
        negotiator.process(b"\x1b[18446744073709551615;0Hz", &screen);
        let mut screen = lock_screen(&screen);
        assert_eq!(screen.get_line(2).unwrap(), format!("z{}", " ".repeat(19)));
        assert_eq!(screen.find_on_screen("after", true), None);
    }

    #[test]
    fn test_escape_at_end_of_stream_waits_for_more() {
        let screen = screen(10, 2);
        let mut negotiator = settled(10, 2);

        negotiator.process(b"x\x1b", &screen);
        assert_eq!(lock_screen(&screen).get_line(0).unwrap(), "x         ");

        negotiator.process(b"[2Jy", &screen);
        assert_eq!(lock_screen(&screen).get_line(0).unwrap(), "y         ");
        assert_eq!(lock_screen(&screen).cursor_position(), (1, 0));
    }

    #[test]
    fn test_escape_reports_join_responses() {
        let screen = screen(80, 24);
        let mut negotiator = settled(80, 24);

        let out = negotiator.process(b"ab\x1b[6n", &screen);
        assert_eq!(out, b"\x1b[1;3R".to_vec());
    }

    #[test]
    fn test_unknown_escape_prints_rest() {
        let screen = screen(10, 1);
        let mut negotiator = settled(10, 1);

        negotiator.process(b"\x1b!ok", &screen);
        assert_eq!(lock_screen(&screen).get_line(0).unwrap(), "!ok       ");
    }

    #[test]
    fn test_reset_clears_flags() {
        let screen = screen(80, 24);
        let mut negotiator = Negotiator::new(80, 24);
        negotiator.process(&[IAC, WILL, 1, IAC, SB], &screen);

        negotiator.reset();
        assert_eq!(negotiator.flags(), NegotiationFlags::empty());
        assert!(negotiator.process(b"x", &screen).is_empty());
    }
}
