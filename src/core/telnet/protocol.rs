//! TELNET wire constants and reply builders (RFC 854 subset)

/// Interpret As Command
pub const IAC: u8 = 0xFF;
pub const DONT: u8 = 0xFE;
pub const DO: u8 = 0xFD;
pub const WONT: u8 = 0xFC;
pub const WILL: u8 = 0xFB;
/// Subnegotiation Begin
pub const SB: u8 = 0xFA;
/// Subnegotiation End
pub const SE: u8 = 0xF0;

/// Terminal-type subnegotiation verbs
pub const TERMTYPE_IS: u8 = 0;
pub const TERMTYPE_SEND: u8 = 1;

/// Terminal type reported to the host
pub const TERMINAL_TYPE: &str = "ANSI";

/// Options this client knows by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelnetOption {
    Echo = 1,
    Logout = 18,
    TerminalType = 24,
    Naws = 31,
    TerminalSpeed = 32,
    RemoteFlowControl = 33,
    XDisplayLocation = 35,
    NewEnvironment = 39,
}

impl TelnetOption {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(TelnetOption::Echo),
            18 => Some(TelnetOption::Logout),
            24 => Some(TelnetOption::TerminalType),
            31 => Some(TelnetOption::Naws),
            32 => Some(TelnetOption::TerminalSpeed),
            33 => Some(TelnetOption::RemoteFlowControl),
            35 => Some(TelnetOption::XDisplayLocation),
            39 => Some(TelnetOption::NewEnvironment),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Readable name of a command byte, for logging
pub fn command_name(byte: u8) -> &'static str {
    match byte {
        DO => "DO",
        DONT => "DONT",
        WILL => "WILL",
        WONT => "WONT",
        SB => "SB",
        SE => "SE",
        IAC => "IAC",
        _ => "?",
    }
}

/// `IAC <verb> <option>`
pub fn command(verb: u8, option: u8) -> [u8; 3] {
    [IAC, verb, option]
}

/// Double every IAC so the bytes travel as data
pub fn escape_iac(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &b in data {
        out.push(b);
        if b == IAC {
            out.push(IAC);
        }
    }
    out
}

/// `IAC SB NAWS <width:u16be> <height:u16be> IAC SE`
pub fn naws_subnegotiation(width: u16, height: u16) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4);
    payload.extend_from_slice(&width.to_be_bytes());
    payload.extend_from_slice(&height.to_be_bytes());

    let mut out = vec![IAC, SB, TelnetOption::Naws.code()];
    out.extend(escape_iac(&payload));
    out.extend_from_slice(&[IAC, SE]);
    out
}

/// `IAC SB TERMTYPE IS <name> IAC SE`
pub fn terminal_type_subnegotiation(name: &str) -> Vec<u8> {
    let mut out = vec![IAC, SB, TelnetOption::TerminalType.code(), TERMTYPE_IS];
    out.extend(escape_iac(name.as_bytes()));
    out.extend_from_slice(&[IAC, SE]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naws_payload_is_big_endian() {
        assert_eq!(
            naws_subnegotiation(80, 24),
            vec![IAC, SB, 31, 0x00, 0x50, 0x00, 0x18, IAC, SE]
        );
    }

    #[test]
    fn test_naws_doubles_iac_bytes() {
        assert_eq!(
            naws_subnegotiation(255, 0x01FF),
            vec![IAC, SB, 31, 0x00, 0xFF, 0xFF, 0x01, 0xFF, 0xFF, IAC, SE]
        );
    }

    #[test]
    fn test_terminal_type_reply() {
        assert_eq!(
            terminal_type_subnegotiation(TERMINAL_TYPE),
            vec![IAC, SB, 24, 0, b'A', b'N', b'S', b'I', IAC, SE]
        );
    }

    #[test]
    fn test_option_codes() {
        for code in 0..=u8::MAX {
            if let Some(option) = TelnetOption::from_u8(code) {
                assert_eq!(option.code(), code);
            }
        }
        assert_eq!(TelnetOption::from_u8(3), None);
    }
}
