//! vtelnet - TELNET client with a VT100/VT52 virtual screen
//!
//! Connects to a TELNET host and either shows the session interactively or,
//! for scripting, waits for the screen and prints it.
//!
//! # Quick Start
//!
//! ```text
//! vtelnet bbs.example.org            # Interactive session on port 23
//! vtelnet -d 10.0.0.5 2323           # Print the first screen and exit
//! vtelnet -e "login:" router.lan     # Exit 0 once "login:" shows up
//! ```
//!
//! # Keys (interactive mode)
//!
//! | Key | Action |
//! |-----|--------|
//! | Ctrl+] | Quit |
//! | F1-F12 | VT100 function keys |

use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Context};
use crossterm::event::{self, Event, KeyEventKind};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use vtelnet::config::{self, Config};
use vtelnet::core::telnet::protocol::escape_iac;
use vtelnet::core::term::lock_screen;
use vtelnet::core::TelnetConnection;
use vtelnet::ui::{Frame, KeyInput, KeyMapper, Renderer};

/// Command line options; `None` keeps the config file value
#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    host: Option<String>,
    port: Option<u16>,
    width: Option<u16>,
    height: Option<u16>,
    timeout_secs: Option<u64>,
    offset: Option<usize>,
    log_level: Option<String>,
    dump: bool,
    expect: Option<String>,
}

impl CliArgs {
    /// Command line arguments override the config file
    fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.connection.host = host.clone();
        }
        if let Some(port) = self.port {
            config.connection.port = port;
        }
        if let Some(timeout) = self.timeout_secs {
            config.connection.timeout_secs = timeout;
        }
        if let Some(width) = self.width {
            config.screen.width = width;
        }
        if let Some(height) = self.height {
            config.screen.height = height;
        }
        if let Some(offset) = self.offset {
            config.screen.coordinate_offset = offset;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
    }
}

fn print_version() {
    println!("vtelnet {}", env!("CARGO_PKG_VERSION"));
}

fn print_help() {
    print_version();
    eprintln!();
    eprintln!("Usage: vtelnet [OPTIONS] HOST [PORT]");
    eprintln!();
    eprintln!("Screen options:");
    eprintln!("  -W, --width <N>       Screen width (default 80)");
    eprintln!("  -H, --height <N>      Screen height (default 24)");
    eprintln!("  -o, --offset <N>      Coordinate offset, 0 or 1 (default 0)");
    eprintln!();
    eprintln!("Connection options:");
    eprintln!("  -t, --timeout <SECS>  Connect/IO timeout and shortest wait (default 10)");
    eprintln!();
    eprintln!("Scripting options:");
    eprintln!("  -d, --dump            Wait for the first screen, print it and exit");
    eprintln!("  -e, --expect <TEXT>   Wait for TEXT, print the screen; exit 1 on timeout");
    eprintln!();
    eprintln!("Other options:");
    eprintln!("  -l, --log-level <L>   Log level (trace, debug, info, warn, error)");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Interactive mode: Ctrl+] quits.");
    eprintln!();
    eprintln!("Configuration: ~/.vtelnet/config.toml");
    eprintln!("Log file:      ~/.vtelnet/vtelnet.log");
}

/// Take the value following option `name`
fn value<T: FromStr>(args: &[String], i: &mut usize, name: &str) -> Result<T, String> {
    *i += 1;
    let raw = args
        .get(*i)
        .ok_or_else(|| format!("Missing value for {}", name))?;
    raw.parse()
        .map_err(|_| format!("Invalid value for {}: {}", name, raw))
}

fn parse_args(args: &[String]) -> Result<CliArgs, String> {
    let mut cli = CliArgs::default();
    let mut positional = Vec::new();
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-W" | "--width" => cli.width = Some(value(args, &mut i, "--width")?),
            "-H" | "--height" => cli.height = Some(value(args, &mut i, "--height")?),
            "-o" | "--offset" => cli.offset = Some(value(args, &mut i, "--offset")?),
            "-t" | "--timeout" => cli.timeout_secs = Some(value(args, &mut i, "--timeout")?),
            "-l" | "--log-level" => cli.log_level = Some(value(args, &mut i, "--log-level")?),
            "-d" | "--dump" => cli.dump = true,
            "-e" | "--expect" => cli.expect = Some(value(args, &mut i, "--expect")?),
            arg if arg.starts_with('-') && arg.len() > 1 => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
            arg => positional.push(arg.to_string()),
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    cli.host = positional.next();
    if let Some(port) = positional.next() {
        cli.port = Some(port.parse().map_err(|_| format!("Invalid port: {}", port))?);
    }
    if let Some(extra) = positional.next() {
        return Err(format!("Unexpected argument: {}", extra));
    }
    Ok(cli)
}

/// Log to `~/.vtelnet/vtelnet.log`; `RUST_LOG` overrides the configured level
fn init_logging(level: &str) {
    let log_path = config::config_dir()
        .map(|dir| dir.join("vtelnet.log"))
        .unwrap_or_else(|| PathBuf::from("vtelnet.log"));

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let cli = match parse_args(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    let mut config = Config::load();
    cli.apply(&mut config);
    init_logging(&config.log_level);
    info!("vtelnet starting...");

    let settings = config.connection_settings();
    let timeout = settings.timeout;
    let mut connection = TelnetConnection::new(settings);
    if !connection.connect() {
        error!("Failed to connect to {}:{}", config.connection.host, config.connection.port);
        bail!(
            "could not connect to {}:{}",
            config.connection.host,
            config.connection.port
        );
    }

    if let Some(text) = &cli.expect {
        let found = connection.wait_for_string(text, true, timeout);
        println!("{}", connection.hardcopy());
        connection.close();
        if found.is_none() {
            eprintln!("Timed out waiting for {:?}", text);
            std::process::exit(1);
        }
        return Ok(());
    }

    if cli.dump {
        connection.wait_for_changed_screen(timeout);
        println!("{}", connection.hardcopy());
        connection.close();
        return Ok(());
    }

    run_terminal(&mut connection)
}

/// Run the interactive session with guaranteed console cleanup
fn run_terminal(connection: &mut TelnetConnection) -> anyhow::Result<()> {
    let (cols, rows) = Renderer::size().context("no console available")?;
    let settings = connection.settings();
    if cols < settings.width || rows <= settings.height {
        info!(
            "Console {}x{} is smaller than the {}x{} screen",
            cols, rows, settings.width, settings.height
        );
    }

    let mut renderer = Renderer::new();
    renderer.init()?;
    let result = run_main_loop(connection, &mut renderer);
    let _ = renderer.cleanup();
    connection.close();
    result
}

fn status_line(connection: &TelnetConnection) -> String {
    let settings = connection.settings();
    format!(
        " {}:{} | {} | echo: {} | Ctrl+] quit ",
        settings.host,
        settings.port,
        if connection.is_open_connection() { "connected" } else { "closed" },
        if connection.server_echo() { "remote" } else { "local" },
    )
}

fn run_main_loop(connection: &mut TelnetConnection, renderer: &mut Renderer) -> anyhow::Result<()> {
    let screen = connection.screen();

    loop {
        if !connection.is_open_connection() {
            info!("Session ended by host");
            break;
        }

        let status = status_line(connection);
        let frame = Frame::capture(&lock_screen(&screen));
        renderer.render(&frame, &status)?;

        if !event::poll(Duration::from_millis(20))? {
            continue;
        }
        match event::read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => match KeyMapper::map(&key) {
                Some(KeyInput::Quit) => {
                    info!("Quit requested");
                    break;
                }
                Some(KeyInput::FunctionKey(n)) => {
                    connection.send_response_function_key(n);
                }
                Some(KeyInput::Send(bytes)) => {
                    connection.send_bytes(&escape_iac(&bytes));
                }
                None => {}
            },
            Event::Resize(..) => renderer.clear_buffer(),
            _ => {}
        }
    }
    Ok(())
}
