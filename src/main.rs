//! bufterm - demo host for the terminal session engine
//!
//! Runs one session either headless (`--dump`, print the rendered buffer
//! once the program exits) or interactively in the current console.
//!
//! # Quick Start
//!
//! ```text
//! bufterm                      # Default shell profile
//! bufterm -p Zsh               # Named profile from ~/.bufterm/config.toml
//! bufterm --dump -- ls -l      # Run a command and print what it drew
//! ```
//!
//! # Keys
//!
//! | Key | Action |
//! |-----|--------|
//! | Ctrl+Shift+C | Copy the selection |
//! | Ctrl+Shift+V | Paste the system clipboard |
//! | Ctrl+Shift+H | Paste the newest clipboard history entry |
//! | Ctrl+Backspace / Ctrl+Delete | Delete word backward / forward |
//! | Shift+Arrows | Extend the selection |

use std::env;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::SetTitle;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use bufterm::ui::ScreenPainter;
use bufterm::{
    strip_continuation, Config, KeyEncoder, OpenRequest, SessionCommand, SessionEventKind,
    SessionManager, SurfaceId, Target, TextBuffer, WordDirection,
};

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The demo host drives a single surface
const SURFACE: SurfaceId = 1;

/// Input poll interval for the interactive loop
const POLL: Duration = Duration::from_millis(10);

/// Command line options
#[derive(Debug, Default)]
struct Args {
    profile: Option<String>,
    tag: Option<String>,
    cwd: Option<PathBuf>,
    dump: bool,
    command: Vec<String>,
}

fn print_version() {
    eprintln!("bufterm {}", VERSION);
}

fn print_help() {
    eprintln!("bufterm {} - terminal session engine demo host", VERSION);
    eprintln!();
    eprintln!("Usage: bufterm [OPTIONS] [-- COMMAND [ARGS...]]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -p, --profile <NAME>  Shell profile (default: the default profile)");
    eprintln!("  -t, --tag <TAG>       Tag the session");
    eprintln!("  -d, --cwd <DIR>       Working directory (default: home)");
    eprintln!("      --dump            Run headless and print the buffer on exit");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Keys:");
    eprintln!("  Ctrl+Shift+C          Copy selection");
    eprintln!("  Ctrl+Shift+V          Paste clipboard");
    eprintln!("  Ctrl+Shift+H          Paste newest clipboard history entry");
    eprintln!("  Ctrl+Backspace        Delete word backward");
    eprintln!("  Ctrl+Delete           Delete word forward");
    eprintln!("  Shift+Arrows          Extend selection");
    eprintln!();
    eprintln!("Configuration: ~/.bufterm/config.toml");
    eprintln!("Log: ~/.bufterm/bufterm.log (level from BUFTERM_LOG)");
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut parsed = Args::default();
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
            "-p" | "--profile" => {
                parsed.profile = Some(option_value(args, &mut i, "profile")?);
            }
            "-t" | "--tag" => {
                parsed.tag = Some(option_value(args, &mut i, "tag")?);
            }
            "-d" | "--cwd" => {
                parsed.cwd = Some(PathBuf::from(option_value(args, &mut i, "directory")?));
            }
            "--dump" => {
                parsed.dump = true;
            }
            "--" => {
                parsed.command = args[i + 1..].to_vec();
                break;
            }
            arg => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
        }
        i += 1;
    }

    Ok(parsed)
}

fn option_value(args: &[String], i: &mut usize, what: &str) -> Result<String, String> {
    *i += 1;
    args.get(*i)
        .cloned()
        .ok_or_else(|| format!("Missing {} argument", what))
}

/// Log to ~/.bufterm/bufterm.log; the filter comes from BUFTERM_LOG
fn init_logging() {
    let log_path = Config::data_dir()
        .map(|dir| dir.join("bufterm.log"))
        .unwrap_or_else(|| PathBuf::from("bufterm.log"));

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter =
            EnvFilter::try_from_env("BUFTERM_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn main() -> anyhow::Result<()> {
    let raw: Vec<String> = env::args().skip(1).collect();
    let args = match parse_args(&raw) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    init_logging();
    info!("bufterm {} starting", VERSION);

    let config = Config::load();
    let request = OpenRequest {
        config_name: args.profile.clone(),
        command: args.command.clone(),
        cwd: args.cwd.clone(),
        tag: args.tag.clone(),
        ..OpenRequest::default()
    };

    let result = if args.dump {
        run_dump(config, request)
    } else {
        run_interactive(config, request)
    };
    if let Err(e) = &result {
        error!("bufterm failed: {:#}", e);
    }
    result
}

/// Run headless until the child exits, then print the rendered buffer
fn run_dump(config: Config, request: OpenRequest) -> anyhow::Result<()> {
    let (rows, cols) = (config.rows, config.cols);
    let mut manager = SessionManager::new(config);
    manager.open(SURFACE, request, rows, cols)?;

    let mut buffer = TextBuffer::new(rows as usize);
    let mut exit_code = None;
    'outer: loop {
        for event in manager.poll_events(Duration::from_millis(50)) {
            match event.kind {
                SessionEventKind::RenderReady => manager.render(SURFACE, &mut buffer)?,
                SessionEventKind::Exited(code) => {
                    exit_code = code;
                    break 'outer;
                }
                _ => {}
            }
        }
    }
    manager.render(SURFACE, &mut buffer)?;

    let text = strip_continuation(&buffer.text());
    println!("{}", text.trim_end_matches('\n'));
    info!(exit_code, "dump finished");
    Ok(())
}

/// Run in the current console until the child exits
fn run_interactive(config: Config, request: OpenRequest) -> anyhow::Result<()> {
    let (cols, rows) = ScreenPainter::size()?;
    info!("Terminal size: {}x{}", cols, rows);

    let mut manager = SessionManager::new(config);
    let session = manager.open(SURFACE, request, rows, cols)?;
    let painter = ScreenPainter::init()?;
    let mut clipboard = arboard::Clipboard::new()
        .map_err(|e| warn!("System clipboard unavailable: {}", e))
        .ok();
    let target = Target::Surface(SURFACE);
    let mut selection: Option<((u16, u16), (u16, u16))> = None;

    execute!(std::io::stdout(), SetTitle(session.title()))?;
    painter.paint(&session.snapshot())?;

    'main: loop {
        for event in manager.poll_events(Duration::ZERO) {
            match event.kind {
                SessionEventKind::RenderReady => {
                    session.take_render_request();
                    painter.paint(&session.snapshot())?;
                }
                SessionEventKind::TitleChanged(title) => {
                    execute!(std::io::stdout(), SetTitle(title))?;
                }
                SessionEventKind::ClipboardSet(text) => {
                    if let Some(clipboard) = clipboard.as_mut() {
                        clipboard_outcome(clipboard.set_text(text), "set clipboard from OSC 52");
                    }
                }
                SessionEventKind::Bell => {
                    let mut stdout = std::io::stdout();
                    let _ = stdout.write_all(b"\x07");
                    let _ = stdout.flush();
                }
                SessionEventKind::Exited(code) => {
                    info!(exit_code = code, "Session ended");
                    break 'main;
                }
            }
        }

        if !event::poll(POLL)? {
            continue;
        }
        match event::read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                let command = host_command(&key, &mut selection, &session.snapshot());
                match command {
                    HostAction::Session(command) => {
                        if let Some(text) = manager.dispatch(&target, command)? {
                            if let Some(clipboard) = clipboard.as_mut() {
                                clipboard_outcome(clipboard.set_text(text), "copy selection");
                            }
                        }
                    }
                    HostAction::PasteClipboard => {
                        let text = clipboard.as_mut().and_then(|c| c.get_text().ok());
                        if let Some(text) = text {
                            manager.dispatch(
                                &target,
                                SessionCommand::Paste {
                                    text,
                                    bracketed: false,
                                },
                            )?;
                        }
                    }
                    HostAction::PasteHistory => {
                        manager.paste_from_history(&target, 0)?;
                    }
                    HostAction::Forward => {
                        session.write(&KeyEncoder::encode_event(&key, &session.modes()));
                    }
                }
            }
            Event::Resize(cols, rows) => {
                manager.dispatch(&target, SessionCommand::Resize { rows, cols })?;
                session.take_render_request();
                painter.paint(&session.snapshot())?;
            }
            _ => {}
        }
    }

    drop(painter);
    manager.close(SURFACE);
    Ok(())
}

/// What a key press means to the host
enum HostAction {
    Session(SessionCommand),
    PasteClipboard,
    PasteHistory,
    /// Send the key to the child as is
    Forward,
}

fn host_command(
    key: &KeyEvent,
    selection: &mut Option<((u16, u16), (u16, u16))>,
    snapshot: &bufterm::ScreenSnapshot,
) -> HostAction {
    let ctrl_shift = KeyModifiers::CONTROL | KeyModifiers::SHIFT;

    if key.modifiers == ctrl_shift {
        match key.code {
            KeyCode::Char('c') | KeyCode::Char('C') => {
                return HostAction::Session(SessionCommand::Copy)
            }
            KeyCode::Char('v') | KeyCode::Char('V') => return HostAction::PasteClipboard,
            KeyCode::Char('h') | KeyCode::Char('H') => return HostAction::PasteHistory,
            _ => {}
        }
    }

    if key.modifiers == KeyModifiers::CONTROL {
        match key.code {
            KeyCode::Backspace => {
                return HostAction::Session(SessionCommand::DeleteWord(WordDirection::Backward))
            }
            KeyCode::Delete => {
                return HostAction::Session(SessionCommand::DeleteWord(WordDirection::Forward))
            }
            _ => {}
        }
    }

    if key.modifiers == KeyModifiers::SHIFT {
        let (start, end) = selection.unwrap_or_else(|| {
            let cursor = (snapshot.cursor.col, snapshot.cursor.row);
            (cursor, cursor)
        });
        let max_col = snapshot.rows.first().map_or(0, |r| r.text().chars().count()) as u16;
        let max_row = snapshot.rows.len() as u16;
        let (mut col, mut row) = end;
        match key.code {
            KeyCode::Left => col = col.saturating_sub(1),
            KeyCode::Right => col = (col + 1).min(max_col.saturating_sub(1)),
            KeyCode::Up => row = row.saturating_sub(1),
            KeyCode::Down => row = (row + 1).min(max_row.saturating_sub(1)),
            _ => return HostAction::Forward,
        }
        *selection = Some((start, (col, row)));
        return HostAction::Session(SessionCommand::Select {
            start,
            end: (col, row),
        });
    }

    *selection = None;
    HostAction::Forward
}

/// Log a failed clipboard write; returns whether it succeeded
fn clipboard_outcome(result: Result<(), arboard::Error>, action: &str) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to {}: {}", action, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        let parsed = parse_args(&args(&["-p", "Zsh", "-t", "build", "--dump"])).unwrap();
        assert_eq!(parsed.profile.as_deref(), Some("Zsh"));
        assert_eq!(parsed.tag.as_deref(), Some("build"));
        assert!(parsed.dump);
        assert!(parsed.command.is_empty());
    }

    #[test]
    fn test_parse_command_after_separator() {
        let parsed = parse_args(&args(&["-d", "/tmp", "--", "ls", "-p"])).unwrap();
        assert_eq!(parsed.cwd, Some(PathBuf::from("/tmp")));
        assert_eq!(parsed.command, vec!["ls", "-p"]);
        assert!(parsed.profile.is_none());
    }

    #[test]
    fn test_clipboard_outcome() {
        assert!(clipboard_outcome(Ok(()), "copy selection"));
        assert!(!clipboard_outcome(
            Err(arboard::Error::ContentNotAvailable),
            "copy selection"
        ));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args(&args(&["--bogus"])).is_err());
        assert!(parse_args(&args(&["-p"])).is_err());
    }
}
