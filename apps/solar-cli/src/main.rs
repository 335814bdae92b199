use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use modbus_transport::{MockBus, RegisterBus, RtuBus, SerialSettings};
use register_map::{
    self as regmap, CancelToken, DecodeKind, DecodeOptions, EnumTable, MetricReader,
    MetricsHub, RegisterError, RegisterSchema, RetryPolicy, SchemaProjector, Snapshot,
    SnapshotAssembler,
};
use snapshot_store::{
    flush_pending, HttpUploader, JsonlStore, MemoryStore, SnapshotStore, Uploader,
};

#[derive(Parser, Debug)]
#[command(
    name = "solar",
    version,
    about = "Solar charge controller poller",
    disable_help_subcommand = true
)]
struct Cli {
    /// Raise the default log level to debug
    #[arg(long, action = ArgAction::SetTrue, global = true, env = "SOLAR_DEBUG")]
    debug: bool,

    /// Register bus backend
    #[arg(long, value_enum, default_value_t = Backend::Mock, global = true, env = "SOLAR_BACKEND")]
    backend: Backend,

    /// Serial port path (rtu backend)
    #[arg(long, default_value = "/dev/ttyUSB0", global = true, env = "SOLAR_PORT")]
    port: String,

    /// Serial baud rate
    #[arg(long, default_value_t = 9600, global = true, env = "SOLAR_BAUD")]
    baud: u32,

    /// Modbus slave id of the controller
    #[arg(long, default_value_t = 1, global = true, env = "SOLAR_SLAVE")]
    slave: u8,

    /// Per-request timeout in milliseconds
    #[arg(long, default_value_t = 500, global = true)]
    timeout_ms: u64,

    /// Built-in model name (renogy-rover-li, renogy-rover) or a YAML schema file
    #[arg(long, default_value = "renogy-rover-li", global = true, env = "SOLAR_MODEL")]
    model: String,

    /// Report an unknown charging state as "deactivated" instead of none
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    charging_fallback: bool,

    /// Seconds between retries of volatile registers
    #[arg(long, default_value_t = 5, global = true)]
    retry_delay: u64,

    /// Give up on a volatile register after this many attempts (default: keep trying)
    #[arg(long, global = true)]
    retry_attempts: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Backend {
    Mock,
    Rtu,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List serial ports
    Ports,
    /// Print the register schema
    Schema {
        /// Emit YAML loadable with --model
        #[arg(long, action = ArgAction::SetTrue)]
        yaml: bool,
    },
    /// Print the storage columns derived from the schema
    Columns {
        /// Emit a CREATE TABLE statement
        #[arg(long, action = ArgAction::SetTrue)]
        sql: bool,
    },
    /// Read and decode one metric
    Read {
        metric: String,
    },
    /// Collect a snapshot of one group or of every group
    Snapshot {
        /// Group name (controller-info, today-historical, lifetime-historical, battery, load, solar-panel)
        #[arg(long)]
        group: Option<String>,
        /// Print JSON instead of a table
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Decode register words offline, e.g. `solar decode battery_voltage 0x0083`
    Decode {
        metric: String,
        /// Words in decimal or 0x-prefixed hex
        #[arg(required = true)]
        words: Vec<String>,
    },
    /// Poll the controller, store snapshots and optionally upload them
    Poll {
        /// Seconds between polls
        #[arg(long, default_value_t = 60, env = "SOLAR_POLL_INTERVAL")]
        interval: u64,
        /// Device identifier stored with every row
        #[arg(long, default_value_t = 1, env = "SOLAR_DEVICE_ID")]
        device_id: i64,
        /// Stop after this many polls
        #[arg(long)]
        cycles: Option<u64>,
        /// JSON-lines store file; rows are kept in memory when absent
        #[arg(long, env = "SOLAR_STORE")]
        store: Option<PathBuf>,
        /// Upload stored rows after each poll
        #[arg(long, action = ArgAction::SetTrue, env = "SOLAR_UPLOAD")]
        upload: bool,
        /// Collector endpoint for uploads
        #[arg(long, env = "SOLAR_UPLOAD_URL")]
        upload_url: Option<String>,
        /// Bearer token for the collector
        #[arg(long, env = "SOLAR_UPLOAD_TOKEN")]
        upload_token: Option<String>,
        /// Rows per upload request
        #[arg(long, default_value_t = 50)]
        batch: usize,
        /// Print Prometheus counters on exit
        #[arg(long, action = ArgAction::SetTrue)]
        metrics: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_tracing(cli.debug);

    match &cli.command {
        Commands::Ports => list_ports(cli.backend),
        Commands::Schema { yaml } => print_schema(&load_schema(&cli)?, *yaml),
        Commands::Columns { sql } => print_columns(&load_schema(&cli)?, *sql),
        Commands::Read { metric } => read_metric(&cli, metric),
        Commands::Snapshot { group, json } => snapshot(&cli, group.as_deref(), *json),
        Commands::Decode { metric, words } => decode_offline(&cli, metric, words),
        Commands::Poll {
            interval,
            device_id,
            cycles,
            store,
            upload,
            upload_url,
            upload_token,
            batch,
            metrics,
        } => poll(
            &cli,
            &PollConfig {
                interval: Duration::from_secs(*interval),
                device_id: *device_id,
                cycles: *cycles,
                store: store.clone(),
                upload: *upload,
                upload_url: upload_url.clone(),
                upload_token: upload_token.clone(),
                batch: *batch,
                metrics: *metrics,
            },
        ),
    }
}

fn setup_tracing(debug: bool) {
    let filter = if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn load_schema(cli: &Cli) -> Result<RegisterSchema> {
    regmap::resolve_schema(&cli.model)
}

fn decode_options(cli: &Cli) -> DecodeOptions {
    let opts = DecodeOptions::default();
    if cli.charging_fallback {
        opts.with_fallback(EnumTable::ChargingState, "deactivated")
    } else {
        opts
    }
}

fn retry_policy(cli: &Cli) -> RetryPolicy {
    let delay = Duration::from_secs(cli.retry_delay);
    match cli.retry_attempts {
        Some(n) => RetryPolicy::bounded(n, delay),
        None => RetryPolicy::until_cancelled(delay),
    }
}

/// Diagnostics should terminate even against a silent controller.
fn diagnostic_retry(cli: &Cli) -> RetryPolicy {
    let delay = Duration::from_secs(cli.retry_delay);
    RetryPolicy::bounded(cli.retry_attempts.unwrap_or(3), delay)
}

fn open_bus(cli: &Cli) -> Box<dyn RegisterBus> {
    match cli.backend {
        Backend::Mock => Box::new(demo_bus()),
        Backend::Rtu => {
            let settings = SerialSettings::new(cli.port.clone())
                .with_baud_rate(cli.baud)
                .with_slave(cli.slave)
                .with_timeout(Duration::from_millis(cli.timeout_ms));
            info!(%settings, "using serial controller");
            Box::new(RtuBus::new(settings))
        }
    }
}

/// Register image of a healthy Rover Li charging a lithium bank.
fn demo_bus() -> MockBus {
    let mut bus = MockBus::new("mock0");
    bus.set_register(0x000A, 0x0C14)
        .set_block(
            0x000C,
            &[0x2020, 0x524E, 0x472D, 0x4354, 0x524C, 0x2D52, 0x5652, 0x3430],
        )
        .set_block(0x0014, &[0x0001, 0x0203, 0x0004, 0x0506])
        .set_block(0x0018, &[1803, 27])
        .set_block(
            0x0100,
            &[85, 131, 250, 0x9E14, 131, 12, 2, 188, 310, 580],
        )
        .set_block(0x010B, &[120, 142, 1050, 300, 140, 36, 45, 12, 560, 144])
        .set_block(0x0115, &[400, 3, 120, 0, 9000, 0, 7000, 0, 120, 0, 95])
        .set_block(0x0120, &[0x8002, 0, 0])
        .set_block(0xE002, &[100, 0x0C0C, 4]);
    bus
}

fn list_ports(backend: Backend) -> Result<()> {
    match backend {
        Backend::Mock => println!("mock0\tmock"),
        Backend::Rtu => {
            for port in modbus_transport::list_ports()? {
                println!("{}\t{}", port.name, port.driver);
            }
        }
    }
    Ok(())
}

fn print_schema(schema: &RegisterSchema, yaml: bool) -> Result<()> {
    if yaml {
        print!("{}", regmap::schema_to_yaml(schema)?);
        return Ok(());
    }
    println!("# {} ({} metrics)", schema.model(), schema.len());
    for spec in schema.specs() {
        println!(
            "{:<32} 0x{:04X} {:>2}  {:<16} {}{}",
            spec.name,
            spec.address,
            spec.words,
            spec.group.as_str(),
            kind_label(&spec.decode),
            if spec.volatile { "  (retry)" } else { "" }
        );
    }
    Ok(())
}

fn kind_label(kind: &DecodeKind) -> String {
    match kind {
        DecodeKind::RawUint => "uint".into(),
        DecodeKind::UnsignedByte { half } => format!("byte({half:?})"),
        DecodeKind::SignedMagnitude8 { half } => format!("signed8({half:?})"),
        DecodeKind::ScaledFloat { scale } => format!("scaled(/{scale})"),
        DecodeKind::PackedVersion { part } => format!("version({part:?})"),
        DecodeKind::PackedSerial => "serial".into(),
        DecodeKind::Ascii { words } => format!("ascii({words})"),
        DecodeKind::Flag { half, bit } => format!("flag({half:?}:{bit})"),
        DecodeKind::EnumLookup { table, mask } => format!("enum({table:?}, {mask:?})"),
        DecodeKind::Raw { words } => format!("raw({words})"),
    }
}

fn print_columns(schema: &RegisterSchema, sql: bool) -> Result<()> {
    let projector = SchemaProjector::new(schema);
    if sql {
        println!("{}", projector.create_table_sql());
        return Ok(());
    }
    for col in projector.columns() {
        println!("{}", col.ddl());
    }
    Ok(())
}

fn read_metric(cli: &Cli, metric: &str) -> Result<()> {
    let schema = load_schema(cli)?;
    let mut reader = MetricReader::new(&schema, open_bus(cli))
        .with_options(decode_options(cli))
        .with_retry(diagnostic_retry(cli));
    let value = reader
        .read(metric)
        .with_context(|| format!("reading {metric}"))?;
    println!("{metric} = {value}");
    Ok(())
}

fn snapshot(cli: &Cli, group: Option<&str>, json: bool) -> Result<()> {
    let schema = load_schema(cli)?;
    let reader = MetricReader::new(&schema, open_bus(cli))
        .with_options(decode_options(cli))
        .with_retry(diagnostic_retry(cli));
    let mut asm = SnapshotAssembler::new(reader);
    let snap = match group {
        Some(g) => asm.collect_named(g)?,
        None => asm.collect_all()?,
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&snap)?);
    } else {
        print_snapshot(&snap);
    }
    Ok(())
}

fn print_snapshot(snap: &Snapshot) {
    let taken = snap
        .taken_at()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default();
    println!("# snapshot {taken}");
    for (name, value) in snap.values() {
        println!("{name:<32} {value}");
    }
}

fn decode_offline(cli: &Cli, metric: &str, words: &[String]) -> Result<()> {
    let schema = load_schema(cli)?;
    let spec = schema.lookup(metric)?;
    let raw = words
        .iter()
        .map(|w| parse_word(w))
        .collect::<Result<Vec<u16>>>()?;
    let value = regmap::decode_with(&raw, &spec.decode, &decode_options(cli))?;
    println!("{metric} = {value}");
    if let DecodeKind::PackedVersion { .. } = spec.decode {
        let (software, hardware) = regmap::decode_versions(&raw)?;
        println!("software={software} hardware={hardware}");
    }
    Ok(())
}

fn parse_word(s: &str) -> Result<u16> {
    let t = s.trim();
    let parsed = match t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => t.parse::<u16>(),
    };
    parsed.map_err(|e| anyhow!("invalid register word {s:?}: {e}"))
}

struct PollConfig {
    interval: Duration,
    device_id: i64,
    cycles: Option<u64>,
    store: Option<PathBuf>,
    upload: bool,
    upload_url: Option<String>,
    upload_token: Option<String>,
    batch: usize,
    metrics: bool,
}

fn open_store(path: Option<&PathBuf>) -> Result<Box<dyn SnapshotStore>> {
    Ok(match path {
        Some(p) => Box::new(
            JsonlStore::open(p).with_context(|| format!("opening store {}", p.display()))?,
        ),
        None => Box::new(MemoryStore::new()),
    })
}

fn open_uploader(cfg: &PollConfig) -> Result<Option<Box<dyn Uploader>>> {
    if !cfg.upload {
        return Ok(None);
    }
    let url = cfg
        .upload_url
        .as_deref()
        .ok_or_else(|| anyhow!("--upload requires --upload-url (or SOLAR_UPLOAD_URL)"))?;
    let mut up = HttpUploader::new(url, Duration::from_secs(30))?;
    if let Some(token) = &cfg.upload_token {
        up = up.with_token(token.clone());
    }
    info!(url, "uploads enabled");
    Ok(Some(Box::new(up)))
}

fn poll(cli: &Cli, cfg: &PollConfig) -> Result<()> {
    let cancel = CancelToken::new();
    cancel_on_signal(cancel.clone());
    run_poll(cli, cfg, open_bus(cli), &cancel)
}

/// Cancel `token` on Ctrl-C or SIGTERM. Runs a small signal runtime on its own thread.
fn cancel_on_signal(token: CancelToken) {
    thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                warn!(error = %e, "signal handling unavailable");
                return;
            }
        };
        if rt.block_on(shutdown_signal()) {
            info!("shutdown requested");
            token.cancel();
        }
    });
}

#[cfg(unix)]
async fn shutdown_signal() -> bool {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => tokio::select! {
            r = tokio::signal::ctrl_c() => r.is_ok(),
            _ = term.recv() => true,
        },
        Err(_) => tokio::signal::ctrl_c().await.is_ok(),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> bool {
    tokio::signal::ctrl_c().await.is_ok()
}

fn run_poll(
    cli: &Cli,
    cfg: &PollConfig,
    bus: Box<dyn RegisterBus>,
    cancel: &CancelToken,
) -> Result<()> {
    let schema = load_schema(cli)?;
    let projector = SchemaProjector::new(&schema);
    let mut store = open_store(cfg.store.as_ref())?;
    store
        .ensure_table(projector.table(), projector.columns())
        .context("preparing snapshot table")?;
    let mut uploader = open_uploader(cfg)?;
    let hub = MetricsHub::new().map_err(|e| anyhow!(e))?;

    let reader = MetricReader::new(&schema, bus)
        .with_options(decode_options(cli))
        .with_retry(retry_policy(cli))
        .with_cancel(cancel.clone())
        .with_metrics(hub.registers.clone());
    let mut asm = SnapshotAssembler::new(reader);

    info!(
        model = schema.model(),
        table = projector.table(),
        interval_s = cfg.interval.as_secs(),
        device_id = cfg.device_id,
        pending = store.len(),
        "polling started"
    );
    let mut cycle: u64 = 0;
    loop {
        let started = Instant::now();
        match asm.collect_all() {
            Ok(snap) => {
                let row = projector.filter(&snap);
                match store.append(cfg.device_id, row) {
                    Ok(id) => info!(id, missing = snap.missing().count(), "snapshot stored"),
                    Err(e) => error!(error = %e, "failed to store snapshot"),
                }
            }
            Err(RegisterError::Cancelled(metric)) => {
                info!(%metric, "polling cancelled");
                break;
            }
            Err(e) if e.is_fatal() => bail!(e),
            Err(e) => warn!(error = %e, "poll cycle failed"),
        }
        if let Some(up) = uploader.as_mut() {
            if let Err(e) = flush_pending(store.as_mut(), up.as_mut(), cfg.batch) {
                warn!(error = %e, pending = store.len(), "flush incomplete");
            }
        }
        cycle += 1;
        if cfg.cycles.is_some_and(|n| cycle >= n) {
            break;
        }
        if cancel.wait(cfg.interval.saturating_sub(started.elapsed())) {
            break;
        }
    }
    info!(cycles = cycle, pending = store.len(), "polling stopped");
    if cfg.metrics {
        print!("{}", hub.encode_text());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use register_map::{ControllerModel, DecodedValue};

    #[test]
    fn parses_decimal_and_hex_words() {
        assert_eq!(parse_word("131").unwrap(), 131);
        assert_eq!(parse_word("0x0C14").unwrap(), 0x0C14);
        assert_eq!(parse_word(" 0XFFFF ").unwrap(), 0xFFFF);
        assert!(parse_word("65536").is_err());
        assert!(parse_word("0xZZ").is_err());
    }

    #[test]
    fn demo_image_covers_every_model() {
        for model in ControllerModel::ALL {
            let schema = model.schema().unwrap();
            let reader = MetricReader::new(&schema, demo_bus()).with_retry(RetryPolicy::no_retry());
            let snap = SnapshotAssembler::new(reader).collect_all().unwrap();
            assert_eq!(snap.missing().count(), 0, "{model}");
        }
    }

    #[test]
    fn poll_cycles_into_jsonl_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.jsonl");
        let cli = Cli::parse_from(["solar", "poll"]);
        let cfg = PollConfig {
            interval: Duration::ZERO,
            device_id: 9,
            cycles: Some(3),
            store: Some(path.clone()),
            upload: false,
            upload_url: None,
            upload_token: None,
            batch: 10,
            metrics: false,
        };
        run_poll(&cli, &cfg, Box::new(demo_bus()), &CancelToken::new()).unwrap();
        let store = JsonlStore::open(&path).unwrap();
        assert_eq!(store.len(), 3);
        let row = &store.get_last(1).unwrap()[0];
        assert_eq!(row.device_id, 9);
        assert_eq!(row.values.get("battery_percentage"), Some(&DecodedValue::Int(85)));
    }

    #[test]
    fn cancel_stops_poll_stuck_on_failing_register() {
        let cli = Cli::parse_from(["solar", "--retry-delay", "30", "poll"]);
        let cfg = PollConfig {
            interval: Duration::from_secs(60),
            device_id: 1,
            cycles: None,
            store: None,
            upload: false,
            upload_url: None,
            upload_token: None,
            batch: 10,
            metrics: true,
        };
        let mut bus = demo_bus();
        // system voltage is volatile, so the reader keeps retrying it
        bus.fail_at(0x000A, modbus_transport::TransportError::Timeout);
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            trigger.cancel();
        });
        let started = Instant::now();
        run_poll(&cli, &cfg, Box::new(bus), &cancel).unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        stopper.join().unwrap();
    }

    #[test]
    fn upload_without_url_is_rejected() {
        let cfg = PollConfig {
            interval: Duration::ZERO,
            device_id: 1,
            cycles: Some(1),
            store: None,
            upload: true,
            upload_url: None,
            upload_token: None,
            batch: 1,
            metrics: false,
        };
        assert!(open_uploader(&cfg).is_err());
    }

    #[test]
    fn charging_fallback_flag() {
        let cli = Cli::parse_from(["solar", "--charging-fallback", "columns"]);
        assert_eq!(
            decode_options(&cli).fallback(EnumTable::ChargingState),
            Some("deactivated")
        );
        let cli = Cli::parse_from(["solar", "columns"]);
        assert_eq!(decode_options(&cli).fallback(EnumTable::ChargingState), None);
    }
}
