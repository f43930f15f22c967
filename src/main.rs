//! Rig Serial
//!
//! Serial bench checks for rig microcontrollers: handshake with a sketch,
//! exchange line commands, drive the stepper sketches, and confirm firmware
//! uploads.
//!
//! # Usage
//!
//! ```bash
//! # List available serial ports
//! rig-serial ports
//!
//! # Send one line and print the echo (marco/polo sketch)
//! rig-serial -p /dev/ttyACM0 -b 9600 echo marco
//!
//! # Round-trip "hi" for two seconds (speed test sketch)
//! rig-serial -p COM3 -b 19200 speed-test --duration 2
//!
//! # Interactive stepper console
//! rig-serial -p COM13 stepper --mode position
//!
//! # Upload the configured sketch and wait for it to come up
//! rig-serial upload --expect ready
//!
//! # Show the effective configuration
//! rig-serial config show
//! ```

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use rig_serial::config::{self, RigConfig};
use rig_serial::exercise::{self, StepperMode, TrialPlan};
use rig_serial::serial::{self, CancelToken, PortConfig, Reply, SerialLineChannel};
use rig_serial::upload::Uploader;
use rig_serial::UploadError;

/// Rig Serial
///
/// Serial handshake and line-command checks for rig microcontrollers
#[derive(Parser)]
#[command(name = "rig-serial")]
#[command(author = "Prasanna Gautam")]
#[command(version = "0.1.0")]
#[command(about = "Serial handshake and line-command checks for rig microcontrollers")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: $RIG_SERIAL_CONFIG or ./rig-serial.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Serial port path (overrides config)
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Baud rate (overrides config)
    #[arg(short, long, global = true)]
    baud: Option<u32>,

    /// Read timeout in milliseconds (overrides config)
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Handshake timeout in milliseconds (overrides config)
    #[arg(long, global = true)]
    handshake_timeout_ms: Option<u64>,

    /// Prefix received lines with timestamps
    #[arg(long, global = true)]
    timestamps: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List available serial ports
    Ports,

    /// Send one line and print the reply
    Echo {
        /// Text to send (without newline)
        payload: String,

        /// Upload the configured sketch first
        #[arg(long)]
        upload: bool,
    },

    /// Round-trip a payload repeatedly and report throughput
    SpeedTest {
        /// Text to send each round
        #[arg(long, default_value = "hi")]
        payload: String,

        /// Test duration in seconds
        #[arg(long, default_value_t = 2.0)]
        duration: f64,
    },

    /// Interactive stepper motor console
    Stepper {
        /// Sketch family
        #[arg(long, value_enum, default_value_t = ModeArg::Position)]
        mode: ModeArg,
    },

    /// Send paced command groups and collect replies
    Trials {
        /// Number of trials
        #[arg(long, default_value_t = 10)]
        trials: usize,

        /// Line sent once before the first trial
        #[arg(long, default_value = "5")]
        preamble: Option<String>,

        /// Skip the preamble
        #[arg(long)]
        no_preamble: bool,

        /// Lines sent in every trial
        #[arg(long, value_delimiter = ',', default_value = "23,34")]
        lines: Vec<String>,

        /// Do not send the trial index after the lines
        #[arg(long)]
        no_index: bool,

        /// Replies read per trial
        #[arg(long, default_value_t = 2)]
        replies: usize,

        /// Pause between trials in milliseconds
        #[arg(long, default_value_t = 2000)]
        pause_ms: u64,
    },

    /// Upload the configured sketch and wait for its ready line
    Upload {
        /// Fail unless the ready line contains this text
        #[arg(long)]
        expect: Option<String>,
    },

    /// Configuration file operations
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Write a starter configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = config::CONFIG_FILE_NAME)]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    /// Step counts and homing
    Position,
    /// Full forward/backward turns
    Rotation,
}

impl From<ModeArg> for StepperMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Position => StepperMode::Position,
            ModeArg::Rotation => StepperMode::Rotation,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let mut config = config::load_config(cli.config.as_deref())
        .context("Failed to load configuration")?;
    apply_cli_overrides(&mut config, &cli);
    config.validate()?;

    match cli.command {
        Commands::Ports => {
            serial::port::print_ports()?;
            Ok(())
        }
        Commands::Config(ref cmd) => handle_config(cmd, &config),
        _ => handle_session(&cli, &config),
    }
}

fn apply_cli_overrides(config: &mut RigConfig, cli: &Cli) {
    if let Some(ref port) = cli.port {
        config.port.device = port.clone();
    }
    if let Some(baud) = cli.baud {
        config.port.baud_rate = baud;
    }
    if let Some(ms) = cli.timeout_ms {
        config.port.read_timeout_ms = ms;
    }
    if let Some(ms) = cli.handshake_timeout_ms {
        config.port.handshake_timeout_ms = ms;
    }
}

fn handle_config(cmd: &ConfigCommands, config: &RigConfig) -> Result<()> {
    match cmd {
        ConfigCommands::Show => {
            println!("{}", config.to_toml()?);
        }

        ConfigCommands::Init { output, force } => {
            if output.exists() && !force {
                bail!(
                    "{} already exists (use --force to overwrite)",
                    output.display()
                );
            }
            std::fs::write(output, config::starter_config().to_toml()?)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!(
                "{} Starter config written to {}",
                "[OK]".green().bold(),
                output.display()
            );
        }
    }

    Ok(())
}

/// Commands that talk to the sketch
fn handle_session(cli: &Cli, config: &RigConfig) -> Result<()> {
    let port = config.port.port_config();
    let cancel = install_ctrlc_handler()?;

    match &cli.command {
        Commands::Echo { payload, upload } => {
            let mut channel = if *upload {
                upload_sketch(config, &port, None, &cancel)?
            } else {
                open_channel(&port, &cancel)?
            };

            print_tx(payload);
            let outcome = exercise::echo(&mut channel, payload)?;
            print_reply(&outcome.reply, cli.timestamps);
            close_channel(&mut channel);

            if outcome.reply.is_timed_out() {
                bail!("No reply from {} within {:?}", port.device, port.read_timeout);
            }
            println!(
                "{} Round trip: {:.1} ms",
                "[*]".cyan().bold(),
                outcome.round_trip.as_secs_f64() * 1000.0
            );
        }

        Commands::SpeedTest { payload, duration } => {
            if !(duration.is_finite() && *duration > 0.0) {
                bail!("--duration must be a positive number of seconds");
            }
            let mut channel = open_channel(&port, &cancel)?;

            println!(
                "{} Sending {:?} for {:.1}s",
                "[*]".cyan().bold(),
                payload,
                duration
            );
            let report =
                exercise::speed_test(&mut channel, payload, Duration::from_secs_f64(*duration))?;
            close_channel(&mut channel);

            println!("{}", "=".repeat(60));
            println!("{}", "Speed Test Summary".cyan().bold());
            println!("{}", "=".repeat(60));
            println!("  Round trips: {}", report.round_trips);
            println!("  Lines/second: {:.1}", report.lines_per_second());
            if let Some(rtt) = report.mean_round_trip {
                println!("  Mean round trip: {:.2} ms", rtt.as_secs_f64() * 1000.0);
            }
            let timeouts = if report.timeouts > 0 {
                report.timeouts.to_string().red().bold()
            } else {
                report.timeouts.to_string().green()
            };
            println!("  Timeouts: {}", timeouts);
            let mismatches = if report.mismatches > 0 {
                report.mismatches.to_string().yellow().bold()
            } else {
                report.mismatches.to_string().green()
            };
            println!("  Mismatched echoes: {}", mismatches);
            if report.cancelled {
                println!("  {}", "Stopped early".yellow());
            }
            println!("{}", "=".repeat(60));
        }

        Commands::Stepper { mode } => {
            let mut channel = open_channel(&port, &cancel)?;
            let stdin = io::stdin();
            let session = exercise::run_stepper_console(
                &mut channel,
                (*mode).into(),
                stdin.lock(),
                io::stdout(),
            )?;
            close_channel(&mut channel);
            log::info!(
                "Stepper session: {} sent, {} rejected, {} without reply",
                session.sent,
                session.rejected,
                session.timeouts
            );
        }

        Commands::Trials {
            trials,
            preamble,
            no_preamble,
            lines,
            no_index,
            replies,
            pause_ms,
        } => {
            let plan = TrialPlan {
                preamble: if *no_preamble { None } else { preamble.clone() },
                lines: lines.clone(),
                append_index: !no_index,
                replies_per_trial: *replies,
                trials: *trials,
                pause: Duration::from_millis(*pause_ms),
            };
            let mut channel = open_channel(&port, &cancel)?;

            let timestamps = cli.timestamps;
            let records = exercise::run_trials(&mut channel, &plan, |record| {
                println!("{} Trial {}", ">>>".blue().bold(), record.index + 1);
                for reply in &record.replies {
                    print_reply(reply, timestamps);
                }
            })?;
            close_channel(&mut channel);

            let complete = records.iter().filter(|r| r.complete()).count();
            let summary = format!("{}/{} trials complete", complete, records.len());
            if complete == records.len() {
                println!("{} {}", "[OK]".green().bold(), summary);
            } else {
                println!("{} {}", "[WARNING]".yellow().bold(), summary);
            }
        }

        Commands::Upload { expect } => {
            let mut channel = upload_sketch(config, &port, expect.as_deref(), &cancel)?;
            close_channel(&mut channel);
        }

        Commands::Ports | Commands::Config(_) => unreachable!("handled without a session"),
    }

    Ok(())
}

/// Open the port and wait for the sketch's ready line; Ctrl+C aborts the wait
fn open_channel(port: &PortConfig, cancel: &CancelToken) -> Result<SerialLineChannel> {
    println!(
        "{} Opening {} at {} baud",
        "[*]".cyan().bold(),
        port.device.white().bold(),
        port.baud_rate
    );
    let mut channel = SerialLineChannel::open_with(port)?.with_cancel_token(cancel.clone());

    println!(
        "{} Waiting for handshake (up to {:.1}s)...",
        "[*]".cyan().bold(),
        port.handshake_timeout.as_secs_f64()
    );
    channel
        .await_handshake(port.handshake_timeout)
        .with_context(|| format!("Sketch on {} never reported ready", port.device))?;

    println!("{} Serial port open", "[OK]".green().bold());
    Ok(channel)
}

fn upload_sketch(
    config: &RigConfig,
    port: &PortConfig,
    expect: Option<&str>,
    cancel: &CancelToken,
) -> Result<SerialLineChannel> {
    let settings = config.upload.clone().ok_or(UploadError::NotConfigured)?;
    let uploader = Uploader::new(settings).with_cancel_token(cancel.clone());

    println!(
        "{} Compiling and uploading {}...",
        "[*]".cyan().bold(),
        uploader.settings().sketch.display()
    );
    let outcome = uploader.upload(port)?;
    println!(
        "{} Upload complete in {:.1}s",
        "[OK]".green().bold(),
        outcome.tool_elapsed.as_secs_f64()
    );
    println!("{} Sketch reported: {}", "[RX]".cyan().bold(), outcome.ready_line);

    if let Some(expected) = expect {
        if !outcome.ready_line.contains(expected) {
            bail!(
                "Sketch reported {:?}, expected it to contain {:?}; the previous sketch may still be running",
                outcome.ready_line,
                expected
            );
        }
    }
    Ok(outcome.channel)
}

fn close_channel(channel: &mut SerialLineChannel) {
    channel.close();
    println!("{} Serial port closed", "[OK]".green().bold());
}

/// First Ctrl+C cancels pending reads; a second one exits immediately
fn install_ctrlc_handler() -> Result<CancelToken> {
    let cancel = CancelToken::new();
    let token = cancel.clone();
    ctrlc::set_handler(move || {
        if token.is_cancelled() {
            std::process::exit(130);
        }
        eprintln!("\n{}", "Stopping... (Ctrl+C again to force quit)".yellow());
        token.cancel();
    })
    .context("Failed to set Ctrl+C handler")?;
    Ok(cancel)
}

fn timestamp_prefix(enabled: bool) -> String {
    if enabled {
        format!("{} ", Local::now().format("%H:%M:%S%.3f").to_string().dimmed())
    } else {
        String::new()
    }
}

fn print_tx(payload: &str) {
    println!("{} {}", "[TX]".cyan().bold(), payload);
}

fn print_reply(reply: &Reply, timestamps: bool) {
    let prefix = timestamp_prefix(timestamps);
    match reply {
        Reply::Line(line) => println!("{}{} {}", prefix, "[RX]".green().bold(), line),
        Reply::TimedOut => println!("{}{}", prefix, "[TIMEOUT] no reply received".red()),
    }
}
