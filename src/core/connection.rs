//! Telnet connection
//!
//! Owns the socket and the reader thread. Incoming bytes are negotiated
//! and drawn into the shared virtual screen; the foreground sends input
//! and polls the screen through the wait primitives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::telnet::protocol::{command, escape_iac, TelnetOption, DO};
use super::telnet::{NegotiationFlags, Negotiator};
use super::term::{function_key_sequence, lock_screen, SharedScreen, VirtualScreen};
use super::transport::{TcpTransport, TelnetError, Transport};

/// Receive buffer size of the reader thread
const RECEIVE_BUFFER_SIZE: usize = 4096;

/// Where to connect and how the screen is laid out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    /// Connect, send and receive timeout; also the lower bound of every wait
    pub timeout: Duration,
    pub width: u16,
    pub height: u16,
    /// Added to zero-based columns on the public surface
    pub x_offset: usize,
    /// Added to zero-based rows on the public surface
    pub y_offset: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 23,
            timeout: Duration::from_secs(10),
            width: 80,
            height: 24,
            x_offset: 0,
            y_offset: 0,
        }
    }
}

impl ConnectionSettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }
}

/// A TELNET client session
pub struct TelnetConnection {
    settings: ConnectionSettings,
    /// Screen shared with the reader thread
    screen: SharedScreen,
    negotiator: Arc<Mutex<Negotiator>>,
    transport: Option<Arc<dyn Transport>>,
    /// Running flag
    running: Arc<AtomicBool>,
    /// Reader thread handle
    reader_thread: Option<JoinHandle<()>>,
}

impl TelnetConnection {
    pub fn new(settings: ConnectionSettings) -> Self {
        let screen = VirtualScreen::with_offsets(
            settings.width,
            settings.height,
            settings.x_offset,
            settings.y_offset,
        );
        let negotiator = Negotiator::new(settings.width, settings.height);
        Self {
            settings,
            screen: Arc::new(Mutex::new(screen)),
            negotiator: Arc::new(Mutex::new(negotiator)),
            transport: None,
            running: Arc::new(AtomicBool::new(false)),
            reader_thread: None,
        }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Connect to the configured host and start receiving.
    ///
    /// Any previous session is closed first. Returns false when the host
    /// cannot be resolved or reached; the reason is logged.
    pub fn connect(&mut self) -> bool {
        self.close();
        match TcpTransport::connect(&self.settings.host, self.settings.port, self.settings.timeout) {
            Ok(transport) => {
                info!("Connected to {}:{}", self.settings.host, self.settings.port);
                self.attach(Arc::new(transport));
                true
            }
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    /// Start a session over an already established transport
    pub fn attach(&mut self, transport: Arc<dyn Transport>) {
        self.close();

        *lock_screen(&self.screen) = VirtualScreen::with_offsets(
            self.settings.width,
            self.settings.height,
            self.settings.x_offset,
            self.settings.y_offset,
        );
        lock_negotiator(&self.negotiator).reset();
        self.running.store(true, Ordering::SeqCst);
        self.transport = Some(transport.clone());

        let screen = self.screen.clone();
        let negotiator = self.negotiator.clone();
        let running = self.running.clone();
        let reader_thread = thread::spawn(move || {
            read_loop(transport.as_ref(), &screen, &negotiator, &running);
        });
        self.reader_thread = Some(reader_thread);
    }

    /// Stop the reader and release the socket; safe to call repeatedly
    pub fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(transport) = self.transport.take() {
            transport.shutdown();
            debug!("Connection closed");
        }
        if let Some(handle) = self.reader_thread.take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("Reader thread panicked");
            }
        }
        lock_negotiator(&self.negotiator).reset();
    }

    /// True while the socket is usable and the reader is running
    pub fn is_open_connection(&self) -> bool {
        self.transport.is_some() && self.running.load(Ordering::SeqCst)
    }

    /// Send raw bytes as they are; a failed write closes the connection
    pub fn send_bytes(&mut self, bytes: &[u8]) -> bool {
        match self.try_send(bytes) {
            Ok(()) => true,
            Err(TelnetError::NotConnected) => {
                debug!("Dropping {} bytes, not connected", bytes.len());
                false
            }
            Err(e) => {
                warn!("{}", e);
                self.close();
                false
            }
        }
    }

    fn try_send(&self, bytes: &[u8]) -> Result<(), TelnetError> {
        let transport = self
            .transport
            .as_ref()
            .filter(|_| self.running.load(Ordering::SeqCst))
            .ok_or(TelnetError::NotConnected)?;
        transport.write_all(bytes)
    }

    /// Send text, optionally terminated by CR LF
    pub fn send_response(&mut self, text: &str, append_newline: bool) -> bool {
        let mut bytes = escape_iac(text.as_bytes());
        if append_newline {
            bytes.extend_from_slice(b"\r\n");
        }
        self.send_bytes(&bytes)
    }

    /// Send the sequence of function key F1..F12
    pub fn send_response_function_key(&mut self, key: u8) -> bool {
        match function_key_sequence(key) {
            Some(seq) => self.send_bytes(seq),
            None => {
                warn!("{}", TelnetError::InvalidFunctionKey(key));
                false
            }
        }
    }

    /// Ask the host to log us out with IAC DO LOGOUT.
    ///
    /// With `synchronous` set, block until the host confirms and the
    /// connection has closed, at most the configured timeout. Returns
    /// false when sending failed or no confirmation arrived in time.
    pub fn send_logout(&mut self, synchronous: bool) -> bool {
        if !self.send_bytes(&command(DO, TelnetOption::Logout.code())) {
            return false;
        }
        if !synchronous {
            return true;
        }

        let deadline = Instant::now() + self.settings.timeout;
        while self.running.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if self.running.load(Ordering::SeqCst) {
            warn!("Host did not confirm logout within {:?}", self.settings.timeout);
            return false;
        }
        self.close();
        true
    }

    /// Whether the host currently echoes our input
    pub fn server_echo(&self) -> bool {
        lock_negotiator(&self.negotiator).server_echo()
    }

    pub fn negotiation_flags(&self) -> NegotiationFlags {
        lock_negotiator(&self.negotiator).flags()
    }

    /// Handle to the screen the reader draws into
    pub fn screen(&self) -> SharedScreen {
        self.screen.clone()
    }

    /// Lock the screen for direct inspection
    pub fn lock_screen(&self) -> MutexGuard<'_, VirtualScreen> {
        lock_screen(&self.screen)
    }

    /// Current screen contents, one line per row
    pub fn hardcopy(&self) -> String {
        self.lock_screen().hardcopy(false)
    }
}

impl Drop for TelnetConnection {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock_negotiator(negotiator: &Mutex<Negotiator>) -> MutexGuard<'_, Negotiator> {
    negotiator.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Marks the session closed when the reader leaves, unwinding included
struct ReaderExit<'a> {
    transport: &'a dyn Transport,
    running: &'a AtomicBool,
}

impl Drop for ReaderExit<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("Reader thread panicked, closing connection");
        }
        self.running.store(false, Ordering::SeqCst);
        self.transport.shutdown();
    }
}

/// Body of the reader thread: receive, negotiate, draw, reply
fn read_loop(
    transport: &dyn Transport,
    screen: &Mutex<VirtualScreen>,
    negotiator: &Mutex<Negotiator>,
    running: &AtomicBool,
) {
    let _exit = ReaderExit { transport, running };
    let mut buffer = vec![0u8; RECEIVE_BUFFER_SIZE];

    while running.load(Ordering::SeqCst) {
        let n = match transport.read(&mut buffer) {
            Ok(0) => {
                info!("Connection closed by remote host");
                break;
            }
            Ok(n) => n,
            Err(e) if e.is_timeout() => continue,
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    warn!("{}", e);
                }
                break;
            }
        };

        let (responses, logout) = {
            let mut negotiator = lock_negotiator(negotiator);
            let responses = negotiator.process(&buffer[..n], screen);
            (responses, negotiator.force_logout())
        };

        if !responses.is_empty() {
            if let Err(e) = transport.write_all(&responses) {
                warn!("{}", e);
                break;
            }
        }

        if logout {
            info!("Logged out by host");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::telnet::protocol::{IAC, SB, SE, WILL};
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};

    fn listener() -> (TcpListener, ConnectionSettings) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut settings = ConnectionSettings::new("127.0.0.1", listener.local_addr().unwrap().port());
        settings.timeout = Duration::from_secs(2);
        (listener, settings)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    #[test]
    fn test_session_negotiates_and_sends_input() {
        let (listener, settings) = listener();
        let peer = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            socket.write_all(&[IAC, DO, 31]).unwrap();
            socket.write_all(b"Welcome\r\nlogin: ").unwrap();

            let mut negotiation = [0u8; 12];
            socket.read_exact(&mut negotiation).unwrap();
            let mut input = [0u8; 7];
            socket.read_exact(&mut input).unwrap();
            (negotiation, input)
        });

        let mut connection = TelnetConnection::new(settings);
        assert!(connection.connect());
        assert!(connection.is_open_connection());
        assert!(wait_until(|| connection.lock_screen().find_on_screen("login:", true).is_some()));
        assert!(connection.send_response("admin", true));

        let (negotiation, input) = peer.join().unwrap();
        assert_eq!(
            negotiation,
            [IAC, WILL, 31, IAC, SB, 31, 0, 80, 0, 24, IAC, SE]
        );
        assert_eq!(&input, b"admin\r\n");
        assert!(connection
            .negotiation_flags()
            .contains(NegotiationFlags::NAWS_NEGOTIATED));
        assert_eq!(connection.lock_screen().get_line(0).unwrap().trim_end(), "Welcome");

        connection.close();
        assert!(!connection.is_open_connection());
        connection.close();
    }

    #[test]
    fn test_connect_failure() {
        let (listener, settings) = listener();
        drop(listener);

        let mut connection = TelnetConnection::new(settings);
        assert!(!connection.connect());
        assert!(!connection.is_open_connection());
        assert!(!connection.send_response("x", false));
    }

    #[test]
    fn test_remote_close_is_noticed() {
        let (listener, settings) = listener();
        let peer = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            socket.write_all(b"bye").unwrap();
        });

        let mut connection = TelnetConnection::new(settings);
        assert!(connection.connect());
        peer.join().unwrap();

        assert!(wait_until(|| !connection.is_open_connection()));
        // Screen stays readable after the host went away
        assert!(connection.hardcopy().starts_with("bye"));
        assert!(!connection.send_response("late", true));
    }

    #[test]
    fn test_synchronous_logout() {
        let (listener, settings) = listener();
        let peer = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut request = [0u8; 3];
            socket.read_exact(&mut request).unwrap();
            socket.write_all(&[IAC, WILL, 18]).unwrap();
            // Keep the socket open until the client hangs up
            let mut rest = Vec::new();
            let _ = socket.read_to_end(&mut rest);
            request
        });

        let mut connection = TelnetConnection::new(settings);
        assert!(connection.connect());
        assert!(connection.send_logout(true));
        assert!(!connection.is_open_connection());
        assert_eq!(peer.join().unwrap(), [IAC, DO, 18]);
    }

    #[test]
    fn test_function_keys() {
        let (listener, settings) = listener();
        let peer = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut received = [0u8; 8];
            socket.read_exact(&mut received).unwrap();
            received
        });

        let mut connection = TelnetConnection::new(settings);
        assert!(connection.connect());
        assert!(!connection.send_response_function_key(0));
        assert!(!connection.send_response_function_key(13));
        assert!(connection.send_response_function_key(1));
        assert!(connection.send_response_function_key(5));

        assert_eq!(&peer.join().unwrap(), b"\x1bOP\x1b[15~");
    }

    #[test]
    fn test_outgoing_iac_is_doubled() {
        let (listener, settings) = listener();
        let peer = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut received = [0u8; 4];
            socket.read_exact(&mut received).unwrap();
            received
        });

        let mut connection = TelnetConnection::new(settings);
        assert!(connection.connect());
        assert!(connection.send_response("\u{7f}", false));
        assert!(connection.send_bytes(&escape_iac(&[b'a', IAC, b'b'])));

        assert_eq!(peer.join().unwrap(), [0x7f, b'a', IAC, IAC]);
    }

    /// Transport whose first read blows up
    struct FailingTransport {
        shut_down: AtomicBool,
    }

    impl Transport for FailingTransport {
        fn read(&self, _buf: &mut [u8]) -> crate::core::transport::Result<usize> {
            panic!("read failed unexpectedly");
        }

        fn write_all(&self, _bytes: &[u8]) -> crate::core::transport::Result<()> {
            Ok(())
        }

        fn shutdown(&self) {
            self.shut_down.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_reader_panic_closes_connection() {
        let transport = Arc::new(FailingTransport {
            shut_down: AtomicBool::new(false),
        });
        let mut connection = TelnetConnection::new(ConnectionSettings::default());
        connection.attach(transport.clone());

        assert!(wait_until(|| !connection.is_open_connection()));
        assert!(transport.shut_down.load(Ordering::SeqCst));
        assert!(!connection.send_response("x", true));
        connection.close();
        assert!(!connection.is_open_connection());
    }

    #[test]
    fn test_huge_escape_counts_keep_session_open() {
        let (listener, settings) = listener();
        let peer = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            socket
                .write_all(b"\x1b[9223372036854775808A\x1b[18446744073709551615Dafter")
                .unwrap();
            let mut rest = Vec::new();
            let _ = socket.read_to_end(&mut rest);
        });

        let mut connection = TelnetConnection::new(settings);
        assert!(connection.connect());
        assert!(wait_until(|| connection.lock_screen().find_on_screen("after", true).is_some()));
        assert!(connection.is_open_connection());
        connection.close();
        peer.join().unwrap();
    }

    #[test]
    fn test_attach_existing_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (mut server, _) = listener.accept().unwrap();

        let mut connection = TelnetConnection::new(ConnectionSettings::default());
        let transport = TcpTransport::from_stream(client, Duration::from_millis(200)).unwrap();
        connection.attach(Arc::new(transport));

        server.write_all(b"\x1b[2J\x1b[3;5Hx").unwrap();
        assert!(wait_until(|| connection.lock_screen().cursor_position() == (6, 3)));
        assert_eq!(connection.lock_screen().get_line(3).unwrap().trim(), "x");
    }
}
