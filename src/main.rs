//! Rangewatch CLI
//!
//! Talks to an XM122-class distance radar on a serial port: inspect status,
//! read and write registers, and stream smoothed distance readings.

use clap::{Parser, Subcommand};
use rangewatch_core::cli::{print_exit_codes, CliResult, ExitCodes};
use rangewatch_core::config::{self, AppConfig};
use rangewatch_core::core::sink::{LogSink, MeasurementSink, OutputFormat, SinkError, WriterSink};
use rangewatch_core::core::transport::{list_ports, open_serial};
use rangewatch_core::{
    Register, RunSummary, Session, ShutdownSignal, SimulatedDevice, StatusFlags, Waveform,
};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Rangewatch CLI
#[derive(Parser, Debug)]
#[command(
    name = "rangewatch",
    version,
    about = "Distance radar register tool and level logger",
    long_about = None
)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, env = "RANGEWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Serial port, overrides the configuration
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate, overrides the configuration
    #[arg(short, long)]
    baud: Option<u32>,

    /// Output format, overrides the configuration
    #[arg(short, long, value_enum)]
    format: Option<OutputFormat>,

    /// Use a simulated module instead of a serial port
    #[arg(long)]
    simulate: bool,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    ListPorts,

    /// List known registers
    Registers,

    /// Show module status and product information
    Status,

    /// Read a register
    Read {
        /// Register name or address (e.g. status, 0x06)
        register: Register,
    },

    /// Write a register
    Write {
        /// Register name or address
        register: Register,

        /// Value (decimal or 0x-prefixed hex)
        #[arg(value_parser = parse_value)]
        value: u32,
    },

    /// Stream smoothed distance readings until interrupted
    Run {
        /// Moving window size in frames
        #[arg(long)]
        window: Option<u32>,

        /// Frames between published averages
        #[arg(long)]
        cadence: Option<u32>,

        /// Calibration offset in millimeters
        #[arg(long, allow_hyphen_values = true)]
        offset_mm: Option<f64>,

        /// Also publish every per-frame value
        #[arg(long)]
        raw: bool,

        /// Write readings to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Log readings instead of printing them
        #[arg(long)]
        log_only: bool,

        /// Skip the configured register profile
        #[arg(long)]
        no_profile: bool,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Show exit codes
    ExitCodes,
}

trait Link: Read + Write {}

impl<T: Read + Write> Link for T {}

fn parse_value(s: &str) -> Result<u32, String> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    }
    .map_err(|e| format!("invalid register value '{s}': {e}"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match AppConfig::load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => return early_exit(&CliResult::config_error(e.to_string())),
    };
    if let Some(port) = &cli.port {
        config.serial.port.clone_from(port);
    }
    if let Some(baud) = cli.baud {
        config.serial.baud_rate = baud;
    }
    if let Some(format) = cli.format {
        config.output.format = format;
    }

    let _guard = match init_logging(&cli, &config) {
        Ok(guard) => guard,
        Err(e) => return early_exit(&CliResult::config_error(e.to_string())),
    };

    let result = match execute(&cli, &config) {
        Ok(output) if output.is_empty() => CliResult::success(),
        Ok(output) => CliResult::success_with_message(output),
        Err(err) => err,
    };

    match result.message() {
        Some(msg) if result.is_success() => println!("{msg}"),
        Some(msg) => {
            tracing::error!("{}", msg);
            if !cli.quiet {
                eprintln!("Error: {msg}");
            }
        }
        None => {}
    }

    result.to_exit_code()
}

/// Report a failure that happens before logging is set up
fn early_exit(result: &CliResult) -> ExitCode {
    if let Some(msg) = result.message() {
        eprintln!("Error: {msg}");
    }
    result.to_exit_code()
}

fn init_logging(cli: &Cli, config: &AppConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => config.logging.level.as_str(),
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let console = fmt::layer().with_writer(io::stderr).with_target(false);
    let registry = tracing_subscriber::registry().with(filter).with(console);

    if !config.logging.file {
        registry.init();
        return Ok(None);
    }

    let dir = config
        .logging
        .directory
        .clone()
        .or_else(config::log_dir)
        .ok_or_else(|| anyhow::anyhow!("Could not determine log directory"))?;
    std::fs::create_dir_all(&dir)?;
    let appender = tracing_appender::rolling::daily(dir, "rangewatch.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    registry
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .init();
    Ok(Some(guard))
}

fn execute(cli: &Cli, config: &AppConfig) -> Result<String, CliResult> {
    match &cli.command {
        Commands::ListPorts => cmd_list_ports(config.output.format),
        Commands::Registers => Ok(cmd_registers(config.output.format)),
        Commands::ExitCodes => {
            print_exit_codes();
            Ok(String::new())
        }
        Commands::Status => {
            let mut session = open_session(cli, config)?;
            let flags = session.status()?;
            let info = session.product_info()?;
            session.close();
            Ok(format_status(config.output.format, &flags, &info))
        }
        Commands::Read { register } => {
            let mut session = open_session(cli, config)?;
            let value = session.read_register(*register)?;
            session.close();
            Ok(format_register(config.output.format, *register, value))
        }
        Commands::Write { register, value } => {
            let mut session = open_session(cli, config)?;
            let ack = session.write_register(*register, *value)?;
            session.close();
            if ack != *value {
                return Err(CliResult::error(
                    ExitCodes::PROTOCOL_ERROR,
                    format!("{register} acknowledged 0x{ack:08X} instead of 0x{value:08X}"),
                ));
            }
            Ok(format_register(config.output.format, *register, ack))
        }
        Commands::Run {
            window,
            cadence,
            offset_mm,
            raw,
            output,
            log_only,
            no_profile,
            duration,
        } => {
            let mut config = config.clone();
            if let Some(window) = window {
                config.smoothing.window_size = *window;
            }
            if let Some(cadence) = cadence {
                config.smoothing.cadence = *cadence;
            }
            if let Some(offset_mm) = offset_mm {
                config.smoothing.offset_mm = *offset_mm;
            }
            if *raw {
                config.smoothing.publish_raw = true;
            }
            if *no_profile {
                config.profile = Default::default();
            }
            if output.is_some() {
                config.output.path.clone_from(output);
            }
            config
                .smoothing
                .validate()
                .map_err(|e| CliResult::invalid_args(e.to_string()))?;
            cmd_run(cli, &config, *log_only, *duration)
        }
    }
}

fn open_session(cli: &Cli, config: &AppConfig) -> Result<Session<Box<dyn Link>>, CliResult> {
    let link: Box<dyn Link> = if cli.simulate {
        tracing::info!("Using simulated module");
        Box::new(SimulatedDevice::new().with_waveform(Waveform::default()))
    } else {
        Box::new(open_serial(&config.serial)?)
    };
    Ok(Session::new(link, config.engine, config.smoothing)?)
}

fn cmd_run(
    cli: &Cli,
    config: &AppConfig,
    log_only: bool,
    duration: Option<u64>,
) -> Result<String, CliResult> {
    let shutdown = ShutdownSignal::new();
    let handler = shutdown.clone();
    ctrlc::set_handler(move || handler.trigger())
        .map_err(|e| {
            CliResult::error(ExitCodes::ERROR, format!("Cannot install signal handler: {e}"))
        })?;

    if let Some(secs) = duration {
        let timer = shutdown.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs(secs));
            timer.trigger();
        });
    }

    let mut session = open_session(cli, config)?;
    let flags = session.status()?;
    if flags.has_error() {
        tracing::warn!("Module reports errors before streaming");
    }
    session.product_info()?;
    if !config.profile.is_empty() {
        session.apply_profile(&config.profile)?;
    }

    let mut sink: Box<dyn MeasurementSink> = if log_only {
        Box::new(LogSink)
    } else {
        let writer: Box<dyn Write> = match &config.output.path {
            Some(path) => Box::new(io::BufWriter::new(std::fs::File::create(path)?)),
            None => Box::new(io::stdout()),
        };
        let sink = WriterSink::new(writer, config.output.format, &config.output.measurement)
            .map_err(sink_error)?;
        Box::new(sink)
    };

    let summary = session.run(&shutdown, sink.as_mut())?;
    session.close();
    Ok(format_summary(config.output.format, &summary))
}

fn sink_error(err: SinkError) -> CliResult {
    CliResult::error(ExitCodes::IO_ERROR, err.to_string())
}

fn cmd_list_ports(format: OutputFormat) -> Result<String, CliResult> {
    let ports = list_ports()?;
    if ports.is_empty() {
        return Ok("No serial ports found.".to_string());
    }

    let out = match format {
        OutputFormat::Json => serde_json::to_string_pretty(&ports).unwrap_or_default(),
        OutputFormat::Csv => std::iter::once("port,description".to_string())
            .chain(ports.iter().map(|p| {
                format!("{},{}", p.name, p.description.as_deref().unwrap_or_default())
            }))
            .collect::<Vec<_>>()
            .join("\n"),
        OutputFormat::Text | OutputFormat::Line => ports
            .iter()
            .map(|p| match &p.description {
                Some(desc) => format!("{:<20} {}", p.name, desc),
                None => p.name.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
    };
    Ok(out)
}

fn cmd_registers(format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            let list: Vec<serde_json::Value> = Register::all()
                .iter()
                .map(|r| serde_json::json!({ "name": r.name(), "address": r.address() }))
                .collect();
            serde_json::to_string_pretty(&list).unwrap_or_default()
        }
        _ => Register::all()
            .iter()
            .map(|r| format!("0x{:02X}  {}", r.address(), r.name()))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn format_register(format: OutputFormat, register: Register, value: u32) -> String {
    match format {
        OutputFormat::Json => serde_json::json!({
            "register": register.name(),
            "address": register.address(),
            "value": value,
        })
        .to_string(),
        OutputFormat::Csv => format!("{},{},{}", register.name(), register.address(), value),
        OutputFormat::Line => format!("register,name={} value={}i", register.name(), value),
        OutputFormat::Text => format!("{register} = {value} (0x{value:08X})"),
    }
}

fn format_status(
    format: OutputFormat,
    flags: &StatusFlags,
    info: &rangewatch_core::ProductInfo,
) -> String {
    match format {
        OutputFormat::Json => serde_json::json!({
            "status": flags.raw(),
            "conditions": flags.conditions(),
            "product": info,
        })
        .to_string(),
        _ => format!("{info}\n{flags}"),
    }
}

fn format_summary(format: OutputFormat, summary: &RunSummary) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string(summary).unwrap_or_default(),
        _ => format!(
            "{} frames, {} averaged, {} raw, {} resyncs, {} malformed",
            summary.frames, summary.averaged, summary.raw, summary.resyncs, summary.malformed
        ),
    }
}
