//! PortPilot CLI - Command-line interface
//!
//! Monitor a serial link, decode frames and run traffic automation headless.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use portpilot_core::cli::{self, exit_code_for, init_logging, Verbosity};
use portpilot_core::config::{self, CoreConfig};
use portpilot_core::core::automation::{AutomationEngine, AutomationEvent, RecordSession};
use portpilot_core::core::codec::{hexdump, parse_input, to_hex, InputFormat};
use portpilot_core::core::connection::{Connection, ConnectionEvent, ConnectionState, DataEvent};
use portpilot_core::core::protocol::{DecodedFrame, FrameCodec, FrameDecoder, LayoutDecoder, RtuDecoder};
use portpilot_core::core::registry::ConnectionRegistry;
use portpilot_core::core::transport::{FlowControl, Parity, StopBits, TransportConfig};
use portpilot_core::ExitCodes;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

/// CLI output format
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON format for scripting
    Json,
}

/// How traffic chunks are printed
#[derive(Debug, Clone, Copy, ValueEnum)]
enum DisplayMode {
    /// Space-separated hex
    Hex,
    /// Lossy text
    Text,
    /// Hex dump with ASCII column
    Dump,
}

/// PortPilot CLI
#[derive(Parser, Debug)]
#[command(
    name = "portpilot",
    version,
    about = "Serial link monitor with frame decoding and traffic automation",
    long_about = None
)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "PORTPILOT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Also write logs to daily files in this directory
    #[arg(long, env = "PORTPILOT_LOG_DIR", global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Line parameters shared by the commands that open a port
#[derive(clap::Args, Debug)]
struct PortArgs {
    /// Serial port name (e.g., COM3, /dev/ttyUSB0)
    #[arg(short, long)]
    port: String,

    /// Baud rate (defaults to the configured value)
    #[arg(short, long)]
    baud: Option<u32>,

    /// Data bits (5-8)
    #[arg(long)]
    data_bits: Option<u8>,

    /// Parity (none, even, odd, mark, space)
    #[arg(long)]
    parity: Option<Parity>,

    /// Stop bits (1, 1.5, 2)
    #[arg(long)]
    stop_bits: Option<StopBits>,

    /// Flow control (none, hw, sw)
    #[arg(long)]
    flow: Option<FlowControl>,
}

impl PortArgs {
    fn transport(&self, defaults: &TransportConfig) -> TransportConfig {
        let mut config = defaults.clone();
        config.id.clone_from(&self.port);
        if let Some(baud) = self.baud {
            config.baud = baud;
        }
        if let Some(bits) = self.data_bits {
            config.data_bits = bits;
        }
        if let Some(parity) = self.parity {
            config.parity = parity;
        }
        if let Some(stop_bits) = self.stop_bits {
            config.stop_bits = stop_bits;
        }
        if let Some(flow) = self.flow {
            config.flow_control = flow;
        }
        config
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    ListPorts {
        /// Show detailed info
        #[arg(short, long)]
        detailed: bool,
    },

    /// Decode one frame given as hex
    Decode {
        /// Frame bytes, e.g. "01 03 00 00 00 0A C5 CD"
        bytes: String,

        /// Frame layout file (.json, .yaml, .toml)
        #[arg(long)]
        layout: Option<PathBuf>,

        /// Name of a layout from the config file
        #[arg(long, conflicts_with = "layout")]
        frame: Option<String>,
    },

    /// Open a port, print traffic and run automation
    Monitor {
        #[command(flatten)]
        port: PortArgs,

        /// How payload arguments are written
        #[arg(long, default_value = "auto")]
        input: InputFormat,

        /// Send this once after opening
        #[arg(long)]
        send: Option<String>,

        /// How received and sent chunks are printed
        #[arg(long, value_enum, default_value_t = DisplayMode::Hex)]
        display: DisplayMode,

        /// Try to decode each chunk as a Modbus RTU frame
        #[arg(long)]
        decode: bool,

        /// Auto-response, PATTERN=RESPONSE (prefix ^ $ ~ = for starts/ends/regex/exact)
        #[arg(long = "rule", value_name = "PATTERN=RESPONSE")]
        rules: Vec<String>,

        /// Periodic send, MS:PAYLOAD[:REPEAT]
        #[arg(long = "every", value_name = "MS:PAYLOAD")]
        tasks: Vec<String>,

        /// Record the session under this name
        #[arg(long)]
        record: Option<String>,

        /// Write the recording as JSON here on exit
        #[arg(long, requires = "record")]
        record_out: Option<PathBuf>,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Resend the TX side of a recorded session
    Replay {
        #[command(flatten)]
        port: PortArgs,

        /// Recording exported by `monitor --record-out`
        #[arg(long)]
        file: PathBuf,

        /// Playback speed (2.0 = twice as fast)
        #[arg(long, default_value_t = 1.0)]
        speed: f64,
    },

    /// Print the exit code table
    ExitCodes,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!("{err:#}");
            eprintln!("Error: {err:#}");
            ExitCode::from(exit_code_for(err.chain()))
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let core_config = match &cli.config {
        Some(path) => CoreConfig::load_from(path)?,
        None => match CoreConfig::default_path() {
            Ok(path) => CoreConfig::load_from(&path)?,
            Err(_) => CoreConfig::default(),
        },
    };

    let log_dir = cli.log_dir.clone().or_else(|| core_config.logging.directory.clone());
    let _guard = init_logging(
        Verbosity::from_flags(cli.verbose, cli.quiet),
        &core_config.logging.level,
        log_dir.as_deref(),
    )?;
    debug!(version = portpilot_core::VERSION, "Starting");

    match &cli.command {
        Commands::ListPorts { detailed } => list_ports(&cli, *detailed),
        Commands::Decode { bytes, layout, frame } => {
            decode(&cli, &core_config, bytes, layout.as_ref(), frame.as_deref())
        }
        Commands::Monitor {
            port,
            input,
            send,
            display,
            decode,
            rules,
            tasks,
            record,
            record_out,
            duration,
        } => {
            let options = MonitorOptions {
                input: *input,
                send: send.clone(),
                display: *display,
                decode: *decode,
                rules: rules.clone(),
                tasks: tasks.clone(),
                record: record.clone(),
                record_out: record_out.clone(),
                duration: duration.map(Duration::from_secs),
            };
            monitor(&cli, &core_config, port, options).await
        }
        Commands::Replay { port, file, speed } => replay(&cli, &core_config, port, file, *speed).await,
        Commands::ExitCodes => {
            print!("{}", cli::exit_code_table());
            Ok(ExitCodes::SUCCESS)
        }
    }
}

fn list_ports(cli: &Cli, detailed: bool) -> anyhow::Result<u8> {
    let ports = ConnectionRegistry::list_ports()?;

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&ports)?),
        OutputFormat::Text => {
            if ports.is_empty() {
                if !cli.quiet {
                    println!("No serial ports found.");
                }
            } else if detailed {
                println!("Available Serial Ports:");
                println!("{:-<60}", "");
                for port in &ports {
                    println!(
                        "  {:<20} [{}] {}",
                        port.name,
                        port.kind,
                        port.description.as_deref().unwrap_or("")
                    );
                }
            } else {
                for port in &ports {
                    println!("{}", port.name);
                }
            }
        }
    }

    Ok(ExitCodes::SUCCESS)
}

fn decode(
    cli: &Cli,
    core_config: &CoreConfig,
    bytes: &str,
    layout: Option<&PathBuf>,
    frame: Option<&str>,
) -> anyhow::Result<u8> {
    let data = parse_input(bytes, InputFormat::Hex)?;

    let decoder: Box<dyn FrameDecoder> = match (layout, frame) {
        (Some(path), _) => {
            let definition = config::load_frame_definition(path)
                .with_context(|| format!("loading layout {}", path.display()))?;
            Box::new(LayoutDecoder::new(Arc::new(definition)))
        }
        (None, Some(name)) => {
            let codec = FrameCodec::new();
            core_config.register_frames(&codec);
            Box::new(
                codec
                    .decoder(name)
                    .ok_or_else(|| portpilot_core::DecodeError::UnknownDefinition(name.to_string()))?,
            )
        }
        (None, None) => Box::new(RtuDecoder),
    };

    let info = decoder.describe();
    debug!(decoder = %info.name, "Decoding {} bytes", data.len());
    let decoded = decoder.decode(&data)?;
    let valid = decoded.is_valid();

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&decoded_json(&decoded))?),
        OutputFormat::Text => print_decoded(&decoded),
    }

    Ok(if valid { ExitCodes::SUCCESS } else { ExitCodes::VALIDATION_FAILED })
}

fn print_decoded(decoded: &DecodedFrame) {
    match decoded {
        DecodedFrame::Rtu(frame) => {
            println!("{}", frame.summary());
            if let Some(problem) = frame.detail.as_ref().and_then(|d| d.problem()) {
                println!("  note: {problem}");
            }
        }
        DecodedFrame::Layout(parsed) => {
            println!("{} ({})", parsed.definition, if parsed.valid { "valid" } else { "INVALID" });
            for field in &parsed.fields {
                println!("  {:>4}  {:<16} {}", field.offset, field.name, field.value);
            }
            for line in parsed.diagnostics() {
                println!("  error: {line}");
            }
        }
    }
}

fn decoded_json(decoded: &DecodedFrame) -> serde_json::Value {
    match decoded {
        DecodedFrame::Rtu(frame) => serde_json::json!({
            "unit_id": frame.unit_id,
            "function": frame.function,
            "function_name": frame.function_name(),
            "payload": to_hex(&frame.payload),
            "check": format!("0x{:04X}", frame.check),
            "valid": frame.valid,
            "message": frame.message,
            "detail": frame.detail.as_ref().map(ToString::to_string),
        }),
        DecodedFrame::Layout(parsed) => serde_json::json!({
            "definition": parsed.definition,
            "valid": parsed.valid,
            "fields": parsed.fields,
            "errors": parsed.diagnostics(),
        }),
    }
}

struct MonitorOptions {
    input: InputFormat,
    send: Option<String>,
    display: DisplayMode,
    decode: bool,
    rules: Vec<String>,
    tasks: Vec<String>,
    record: Option<String>,
    record_out: Option<PathBuf>,
    duration: Option<Duration>,
}

/// Ctrl-C as a watch channel
fn shutdown_signal() -> anyhow::Result<watch::Receiver<bool>> {
    let (tx, rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        let _ = tx.send(true);
    })?;
    Ok(rx)
}

fn open(core_config: &CoreConfig, port: &PortArgs) -> anyhow::Result<(ConnectionRegistry, Arc<Connection>)> {
    let registry = ConnectionRegistry::system(core_config.connection.options());
    let transport = port.transport(&core_config.transport);
    info!(port = %transport.id, "Opening {transport}");
    let connection = registry.open(transport)?;
    Ok((registry, connection))
}

async fn monitor(cli: &Cli, core_config: &CoreConfig, port: &PortArgs, options: MonitorOptions) -> anyhow::Result<u8> {
    let mut shutdown = shutdown_signal()?;
    let (registry, connection) = open(core_config, port)?;
    let mut traffic = connection.subscribe();

    let engine = AutomationEngine::new(connection.clone(), tokio::runtime::Handle::current());
    core_config.install_automation(&engine);
    for (index, arg) in options.rules.iter().enumerate() {
        engine.add_rule(cli::parse_rule_arg(arg, index, options.input)?)?;
    }
    for (index, arg) in options.tasks.iter().enumerate() {
        engine.add_task(cli::parse_task_arg(arg, index, options.input)?)?;
    }
    if let Some(name) = &options.record {
        engine.start_recording(name);
    }
    let listener = engine.attach(connection.subscribe());
    let mut automation = engine.subscribe();

    if !cli.quiet {
        eprintln!("Connected to {}. Press Ctrl+C to exit.", connection.id());
    }
    if let Some(text) = &options.send {
        connection.send(&parse_input(text, options.input)?)?;
    }

    let deadline = async {
        match options.duration {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut code = ExitCodes::SUCCESS;
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = shutdown.changed() => {
                code = ExitCodes::CANCELLED;
                break;
            }
            event = traffic.recv() => match event {
                Ok(ConnectionEvent::Data(chunk)) => print_chunk(cli, &chunk, options.display, options.decode),
                Ok(ConnectionEvent::State(ConnectionState::Failed(reason))) => {
                    error!(port = %connection.id(), "Link failed: {reason}");
                    code = ExitCodes::CONNECTION_FAILED;
                    break;
                }
                Ok(ConnectionEvent::State(state)) => debug!(?state, "Connection state"),
                Ok(ConnectionEvent::Error(message)) => warn!("{message}"),
                Err(broadcast::error::RecvError::Lagged(missed)) => warn!(missed, "Display fell behind"),
                Err(broadcast::error::RecvError::Closed) => break,
            },
            event = automation.recv() => {
                if let Ok(event) = event {
                    report_automation(cli, &event);
                }
            }
        }
    }

    engine.stop_all_tasks();
    if let Some(session) = engine.stop_recording() {
        if let Some(path) = &options.record_out {
            std::fs::write(path, session.to_json()?)
                .with_context(|| format!("writing recording {}", path.display()))?;
            info!(path = %path.display(), records = session.records.len(), "Recording saved");
        }
    }

    let stats = connection.stats();
    registry.close_all();
    listener.abort();
    if !cli.quiet {
        eprintln!(
            "Disconnected. TX {} bytes / RX {} bytes.",
            stats.bytes_sent, stats.bytes_received
        );
    }
    Ok(code)
}

fn print_chunk(cli: &Cli, chunk: &DataEvent, display: DisplayMode, decode: bool) {
    let time = chunk.timestamp.wall.format("%H:%M:%S%.3f");

    if let OutputFormat::Json = cli.format {
        let line = serde_json::json!({
            "time": chunk.timestamp.wall.to_rfc3339(),
            "direction": chunk.direction.to_string(),
            "bytes": to_hex(&chunk.bytes),
        });
        println!("{line}");
        return;
    }

    match display {
        DisplayMode::Hex => println!("[{time}] {} {}", chunk.direction, to_hex(&chunk.bytes)),
        DisplayMode::Text => println!("[{time}] {} {}", chunk.direction, String::from_utf8_lossy(&chunk.bytes)),
        DisplayMode::Dump => print!("[{time}] {}\n{}", chunk.direction, hexdump(&chunk.bytes, 16)),
    }

    if decode {
        if let Ok(DecodedFrame::Rtu(frame)) = RtuDecoder.decode(&chunk.bytes) {
            println!("    {}", frame.summary());
        }
    }
}

fn report_automation(cli: &Cli, event: &AutomationEvent) {
    if cli.quiet {
        return;
    }
    match event {
        AutomationEvent::RuleMatched { rule, match_count } => eprintln!("  rule {rule} matched ({match_count})"),
        AutomationEvent::TaskCompleted { task, sent_count } => eprintln!("  task {task} done after {sent_count} sends"),
        AutomationEvent::SendFailed { source, error } => eprintln!("  {source} send failed: {error}"),
        AutomationEvent::TaskSent { .. } | AutomationEvent::ReplayFinished { .. } => {}
    }
}

async fn replay(cli: &Cli, core_config: &CoreConfig, port: &PortArgs, file: &PathBuf, speed: f64) -> anyhow::Result<u8> {
    let json = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let session = RecordSession::from_json(&json)?;
    let mut shutdown = shutdown_signal()?;
    let (registry, connection) = open(core_config, port)?;

    let engine = AutomationEngine::new(connection.clone(), tokio::runtime::Handle::current());
    let name = session.name.clone();
    if !cli.quiet {
        eprintln!(
            "Replaying '{name}': {} TX bytes over {:?} at {speed}x",
            session.tx_bytes(),
            session.duration()
        );
    }
    engine.import_recording(session);
    let mut handle = engine.replay(&name, speed)?;

    let cancelled = tokio::select! {
        () = handle.wait() => false,
        _ = shutdown.changed() => true,
    };
    let code = if cancelled {
        handle.abort();
        info!(session = %name, "Replay cancelled");
        ExitCodes::CANCELLED
    } else {
        ExitCodes::SUCCESS
    };

    registry.close_all();
    Ok(code)
}
