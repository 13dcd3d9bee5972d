//! Smart Piano IPC command-line tool.
//!
//! Runs either end of the UI↔engine socket protocol from a terminal, so the
//! real UI or engine can be exercised without its counterpart. Received
//! messages go to stdout as JSON lines; logs go to stderr.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use smartpiano_ipc::constants::{DEFAULT_SOCKET_PATH, SOCKET_PATH_ENV};
use smartpiano_ipc::{ClientTransport, Message, RecvError, ServerState, Transport, UdsTransport};

/// How often `send` checks the inbound queue while waiting for replies.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Back-off after a failed accept, so a broken listener doesn't spin.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "smartpiano-ipc")]
#[command(about = "Talk to the Smart Piano UI or engine over its Unix socket", long_about = None)]
#[command(version)]
struct Cli {
    /// Path of the Unix domain socket
    #[arg(long, global = true, env = SOCKET_PATH_ENV, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Act as the engine: accept clients and print the messages they send
    Serve {
        /// Exit after the first client disconnects
        #[arg(long)]
        once: bool,
        /// Don't answer each message with `ack status=ok`
        #[arg(long)]
        no_ack: bool,
    },
    /// Act as the UI: send one message and print the replies
    Send {
        /// Message type (config, ready, quit, ...)
        kind: String,
        /// Message fields as KEY=VALUE
        #[arg(value_parser = parse_field)]
        fields: Vec<(String, String)>,
        /// How long to wait for replies, in milliseconds
        #[arg(long, default_value_t = 500)]
        wait_ms: u64,
    },
}

/// Parse a `KEY=VALUE` argument. The value may itself contain `=`.
fn parse_field(arg: &str) -> Result<(String, String), String> {
    let (key, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{arg}`"))?;
    if arg.contains(['\n', '\r']) {
        return Err(format!("field `{key}` contains a line break"));
    }
    Ok((key.to_owned(), value.to_owned()))
}

/// Write one message as a JSON line.
fn print_message(out: &mut impl Write, msg: &Message) -> Result<()> {
    serde_json::to_writer(&mut *out, msg)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

/// Runs the engine side until a shutdown signal arrives (or after one client
/// with `--once`).
fn run_serve(socket: &Path, once: bool, ack: bool) -> Result<()> {
    let server = Arc::new(UdsTransport::new(socket));
    if !server.start() {
        bail!("Failed to start server on {}", socket.display());
    }

    // stop() only closes descriptors, which unblocks accept/read in the
    // main loop below.
    let mut signals =
        Signals::new([SIGINT, SIGTERM, SIGHUP]).context("install signal handlers")?;
    let signals_handle = signals.handle();
    let stopper = Arc::clone(&server);
    let watcher = thread::Builder::new()
        .name("signal-watcher".to_owned())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                log::info!("Signal received: {signal}");
                stopper.stop();
                log::info!("Server stopped");
            }
        })
        .context("spawn signal watcher")?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    while server.state() != ServerState::Stopped {
        log::info!("Waiting for client on {}", socket.display());
        server.wait_for_client();
        if !server.is_client_connected() {
            if server.state() != ServerState::Stopped {
                thread::sleep(ACCEPT_RETRY_DELAY);
            }
            continue;
        }

        serve_client(server.as_ref(), &mut out, ack)?;
        if once {
            break;
        }
    }

    server.stop();
    signals_handle.close();
    if watcher.join().is_err() {
        log::error!("Signal watcher panicked");
    }
    log::info!("Shutting down...");
    Ok(())
}

/// Print and acknowledge messages until the client goes away.
fn serve_client(server: &dyn Transport, out: &mut impl Write, ack: bool) -> Result<()> {
    loop {
        match server.try_receive() {
            Ok(msg) => {
                print_message(out, &msg)?;
                if ack && !msg.is_error() {
                    server.send(&Message::with_fields("ack", [("status", "ok")]));
                }
            }
            Err(RecvError::Io(e)) => {
                // The next accept replaces this client.
                log::warn!("Abandoning client after read error: {e}");
                return Ok(());
            }
            Err(RecvError::Disconnected | RecvError::NotConnected | RecvError::Frame(_)) => {
                return Ok(());
            }
        }
    }
}

/// Runs the UI side: one message out, replies printed until `wait` elapses
/// or the engine hangs up.
fn run_send(socket: &Path, msg: &Message, wait: Duration) -> Result<()> {
    let client = ClientTransport::new(socket);
    if !client.connect() {
        bail!("Could not connect to {}", socket.display());
    }
    client.send(msg);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let deadline = Instant::now() + wait;

    while Instant::now() < deadline && client.is_connected() {
        for reply in client.drain_messages() {
            print_message(&mut out, &reply)?;
        }
        thread::sleep(POLL_INTERVAL);
    }
    for reply in client.drain_messages() {
        print_message(&mut out, &reply)?;
    }

    client.disconnect();
    Ok(())
}

fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the JSON message stream.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { once, no_ack } => run_serve(&cli.socket, once, !no_ack)?,
        Commands::Send {
            kind,
            fields,
            wait_ms,
        } => {
            let msg = Message::with_fields(kind, fields);
            run_send(&cli.socket, &msg, Duration::from_millis(wait_ms))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_field() {
        assert_eq!(parse_field("game=note"), Ok(("game".to_owned(), "note".to_owned())));
        assert_eq!(parse_field("expr=a=b"), Ok(("expr".to_owned(), "a=b".to_owned())));
        assert_eq!(parse_field("empty="), Ok(("empty".to_owned(), String::new())));
        assert!(parse_field("novalue").is_err());
        assert!(parse_field("k=line\nbreak").is_err());
    }

    #[test]
    fn test_send_arguments() {
        let cli = Cli::try_parse_from([
            "smartpiano-ipc",
            "--socket",
            "/tmp/test.sock",
            "send",
            "config",
            "game=note",
            "--wait-ms",
            "50",
        ])
        .unwrap();
        assert_eq!(cli.socket, PathBuf::from("/tmp/test.sock"));
        match cli.command {
            Commands::Send {
                kind,
                fields,
                wait_ms,
            } => {
                assert_eq!(kind, "config");
                assert_eq!(fields, vec![("game".to_owned(), "note".to_owned())]);
                assert_eq!(wait_ms, 50);
            }
            Commands::Serve { .. } => panic!("expected send"),
        }
    }

    #[test]
    fn test_print_message_writes_json_line() {
        let mut out = Vec::new();
        print_message(&mut out, &Message::with_fields("ack", [("status", "ok")])).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "{\"type\":\"ack\",\"fields\":{\"status\":\"ok\"}}\n"
        );
    }
}
