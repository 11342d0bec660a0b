// atlink-term -- CLI tool for exercising an AT-style modem through atlink,
// against real hardware or a mock transport.
//
// Usage:
//   atlink-term --port /dev/ttyUSB0 send AT
//   atlink-term --port /dev/ttyUSB0 send AT+CSQ --pattern '^\+CSQ: (\d+),(\d+)\r\n'
//   atlink-term --port /dev/ttyUSB0 --baud 9600 probe
//   atlink-term --port /dev/ttyUSB0 monitor --duration 60 --notify ring='^RING\r\n'
//   atlink-term --mock stress --count 500
//
// Logging goes through `tracing`; set RUST_LOG (e.g. `RUST_LOG=atlink=trace`)
// to see raw traffic.

use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use atlink::{Command, CommandState, Modem, ModemBuilder, ModemEvent, Notification, Value};
use atlink_test_harness::MockTransport;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// atlink-term -- talk to an AT-style modem from the command line.
#[derive(Parser)]
#[command(name = "atlink-term", version, about)]
struct Cli {
    /// Serial port path (e.g. /dev/ttyUSB0, COM3). Required unless --mock.
    #[arg(long)]
    port: Option<String>,

    /// Serial line speed.
    #[arg(long, default_value_t = 115_200)]
    baud: u32,

    /// Reply deadline in milliseconds.
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    /// Line terminator appended to commands: crlf, cr, or lf.
    #[arg(long, default_value = "crlf", value_parser = parse_eol)]
    eol: String,

    /// Use a mock modem that answers OK to everything.
    #[arg(long)]
    mock: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Send one command line and print the reply.
    Send {
        /// The command text, without terminator (e.g. AT+CGMI).
        line: String,

        /// Expect a line equal to this text (default: OK).
        #[arg(long, conflicts_with_all = ["pattern", "bytes"])]
        expect: Option<String>,

        /// Expect a reply matching this regex; capture groups are printed.
        #[arg(long, conflicts_with = "bytes")]
        pattern: Option<String>,

        /// Expect exactly this many raw bytes.
        #[arg(long)]
        bytes: Option<usize>,
    },

    /// Run a handful of identification commands.
    Probe,

    /// Print modem events (unsolicited data, notifications) as they arrive.
    Monitor {
        /// Duration in seconds (0 = run until Ctrl-C).
        #[arg(long, default_value_t = 0)]
        duration: u64,

        /// Notification to register, as NAME=REGEX. May be repeated.
        #[arg(long = "notify", value_parser = parse_notify)]
        notify: Vec<(String, String)>,
    },

    /// Stress test: rapid-fire `AT` round trips through the queue.
    Stress {
        /// Number of commands.
        #[arg(long, default_value_t = 100)]
        count: u32,
    },
}

/// Map an EOL name to its bytes.
fn parse_eol(s: &str) -> std::result::Result<String, String> {
    match s.to_ascii_lowercase().as_str() {
        "crlf" => Ok("\r\n".to_string()),
        "cr" => Ok("\r".to_string()),
        "lf" => Ok("\n".to_string()),
        other => Err(format!("unknown eol {other:?} (expected crlf, cr, or lf)")),
    }
}

/// Split `NAME=REGEX`.
fn parse_notify(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, pattern)) if !name.is_empty() && !pattern.is_empty() => {
            Ok((name.to_string(), pattern.to_string()))
        }
        _ => Err(format!("expected NAME=REGEX, got {s:?}")),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Render bytes with control characters escaped.
fn printable(bytes: &[u8]) -> String {
    bytes.escape_ascii().to_string()
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Bool(ok) => format!("{ok}"),
        Value::Bytes(bytes) => format!("\"{}\"", printable(bytes)),
        Value::Captures(groups) => groups
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, g)| format!("${i}={}", g.as_deref().unwrap_or("-")))
            .collect::<Vec<_>>()
            .join(" "),
        Value::Text(text) => text.clone(),
        Value::Integer(n) => n.to_string(),
    }
}

fn format_event(event: &ModemEvent) -> String {
    match event {
        ModemEvent::Data(bytes) => format!("rx \"{}\"", printable(bytes)),
        ModemEvent::Discarding(bytes) => format!("discarded \"{}\"", printable(bytes)),
        ModemEvent::Notification(n) => format!("{}: \"{}\"", n.name, printable(&n.bytes)),
        ModemEvent::Command { id, state, processed } => match processed {
            Some(value) => format!("command {id} {state}: {}", format_value(value)),
            None => format!("command {id} {state}"),
        },
        ModemEvent::Error(message) => format!("error: {message}"),
        other => format!("{other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Modem creation
// ---------------------------------------------------------------------------

async fn create_modem(cli: &Cli) -> Result<Modem> {
    let builder = ModemBuilder::new()
        .baud_rate(cli.baud)
        .timeout(Duration::from_millis(cli.timeout_ms))
        .eol(&cli.eol);

    if cli.mock {
        let mock = MockTransport::new();
        mock.handle().respond_to_all(b"\r\nOK\r\n");
        let modem = builder
            .build_with_transport(Box::new(mock))
            .await
            .context("failed to start mock modem")?;
        println!("Using mock modem");
        return Ok(modem);
    }

    let Some(port) = cli.port.as_deref() else {
        bail!("--port is required unless --mock is used");
    };
    let modem = builder.build().context("invalid modem settings")?;
    modem
        .open(port)
        .await
        .with_context(|| format!("failed to open {port}"))?;
    println!("Opened {port} at {} baud", cli.baud);
    Ok(modem)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_send(
    modem: &Modem,
    line: &str,
    expect: Option<&str>,
    pattern: Option<&str>,
    bytes: Option<usize>,
) -> Result<()> {
    let mut command = Command::line(line);
    if let Some(text) = expect {
        command = command.expect_text(text);
    } else if let Some(re) = pattern {
        command = command.expect_pattern(re)?;
    } else if let Some(n) = bytes {
        command = command.expect_bytes(n);
    }

    let handle = modem.run(command).await?;
    let id = handle.id();
    let result = handle
        .outcome()
        .await
        .with_context(|| format!("{line} failed"))?;

    println!("{id} {line}");
    println!("  raw:    \"{}\"", printable(&result.bytes));
    println!("  result: {}", format_value(&result.value()));
    Ok(())
}

async fn cmd_probe(modem: &Modem) -> Result<()> {
    let probes = [
        ("AT", "alive"),
        ("ATI", "identity"),
        ("AT+CGMI", "manufacturer"),
        ("AT+CGMM", "model"),
        ("AT+CSQ", "signal"),
    ];

    modem.start_processing().await?;
    let mut handles = Vec::with_capacity(probes.len());
    for (line, label) in probes {
        // Everything up to the final OK is one frame.
        let command = Command::line(line).expect_pattern(r"(?s)^(.*?)\r?\n?OK\r\n")?;
        handles.push((label, modem.add_command(command).await?));
    }

    for (label, handle) in handles {
        match handle.outcome().await {
            Ok(result) => {
                let body = result
                    .captures
                    .get(1)
                    .and_then(|g| g.as_deref())
                    .unwrap_or("")
                    .trim()
                    .to_string();
                println!("  {label:<14}{}", if body.is_empty() { "OK" } else { body.as_str() });
            }
            Err(e) => println!("  {label:<14}<{e}>"),
        }
    }
    modem.stop_processing(false, true).await?;
    Ok(())
}

async fn cmd_monitor(modem: &Modem, duration_secs: u64, notify: &[(String, String)]) -> Result<()> {
    for (name, pattern) in notify {
        let notification = Notification::new(name.as_str(), pattern)
            .with_context(|| format!("bad pattern for {name}"))?;
        modem.add_notification(notification).await?;
    }
    let mut event_rx = modem.subscribe();

    println!("Monitoring modem events (Ctrl-C to stop)...");

    let deadline = if duration_secs > 0 {
        Some(Instant::now() + Duration::from_secs(duration_secs))
    } else {
        None
    };

    loop {
        let timeout = match deadline {
            Some(dl) => {
                let remaining = dl.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    println!("Monitor duration elapsed.");
                    break;
                }
                remaining
            }
            None => Duration::from_secs(3600),
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted.");
                break;
            }
            received = tokio::time::timeout(timeout, event_rx.recv()) => match received {
                Ok(Ok(event)) => println!("[event] {}", format_event(&event)),
                Ok(Err(RecvError::Lagged(n))) => {
                    println!("[warning] missed {n} events (consumer too slow)");
                }
                Ok(Err(RecvError::Closed)) => {
                    println!("Event channel closed.");
                    break;
                }
                Err(_) => {
                    if deadline.is_some() {
                        println!("Monitor duration elapsed.");
                    }
                    break;
                }
            },
        }
    }

    Ok(())
}

async fn cmd_stress(modem: &Modem, count: u32) -> Result<()> {
    println!("Stress test: {count} AT round trips");
    modem.start_processing().await?;

    let start = Instant::now();
    let mut handles = Vec::with_capacity(count as usize);
    for _ in 0..count {
        handles.push(modem.add_command(Command::line("AT")).await?);
    }

    let mut success = 0u32;
    let mut failures = 0u32;
    for mut handle in handles {
        let id = handle.id();
        match handle.settled().await {
            CommandState::Finished => success += 1,
            state => {
                debug!(%id, %state, "stress command failed");
                failures += 1;
            }
        }
    }

    let elapsed = start.elapsed();
    println!(
        "Done: {success} ok, {failures} failed in {:.2}s ({:.1} cmd/s)",
        elapsed.as_secs_f64(),
        f64::from(count) / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    modem.stop_processing(false, true).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let cli = Cli::parse();
    let modem = create_modem(&cli).await?;

    let result = match &cli.command {
        CliCommand::Send {
            line,
            expect,
            pattern,
            bytes,
        } => {
            cmd_send(
                &modem,
                line,
                expect.as_deref(),
                pattern.as_deref(),
                *bytes,
            )
            .await
        }
        CliCommand::Probe => cmd_probe(&modem).await,
        CliCommand::Monitor { duration, notify } => cmd_monitor(&modem, *duration, notify).await,
        CliCommand::Stress { count } => cmd_stress(&modem, *count).await,
    };

    modem.shutdown().await.ok();
    result
}
