//! geocrypt: location-bound file encryption CLI
//!
//! Location tools:
//!   geohash encode <lat> <lon>     - coordinate → geohash
//!   geohash decode <tag>           - geohash → centre + cell bounds
//!   proximity <current> <ref>      - distance check between two tags
//!
//! Transfers (position from --lat/--lon or GEOCRYPT_LAT/GEOCRYPT_LON):
//!   upload <file>                  - encrypt with the current location and store
//!   list / info <id>               - show stored files
//!   download <id> [-o dir]         - proximity check, one-time code, decrypt
//!   delete <id>                    - remove a stored file
//!
//! Maintenance:
//!   health                         - check the storage backend
//!   config show                    - display the effective configuration

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use geocrypt_core::config::GeocryptConfig;
use geocrypt_core::types::{FileId, FileRecord, Requester, StoredLocation};
use geocrypt_core::GeocryptResult;
use geocrypt_geo::{Coordinate, LocationTag};
use geocrypt_otp::{CodeSink, OtpIssuer};
use geocrypt_storage::OpendalStore;
use geocrypt_transfer::{FixedSensor, TransferCoordinator, TransferSettings};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "geocrypt",
    version,
    about = "Location-bound file encryption",
    long_about = "geocrypt: encrypt files with a key derived from where you are, \
                  and release them only near that place behind a one-time code"
)]
struct Cli {
    /// Path to geocrypt.toml configuration file
    #[arg(long, short = 'c', env = "GEOCRYPT_CONFIG", default_value = "/etc/geocrypt/geocrypt.toml")]
    config: PathBuf,

    /// Log level / filter (overrides logging.level; RUST_LOG wins over both)
    #[arg(long, global = true)]
    log: Option<String>,

    /// Current latitude in decimal degrees
    #[arg(long, global = true, env = "GEOCRYPT_LAT", allow_negative_numbers = true)]
    lat: Option<f64>,

    /// Current longitude in decimal degrees
    #[arg(long, global = true, env = "GEOCRYPT_LON", allow_negative_numbers = true)]
    lon: Option<f64>,

    /// Requester identity for storage calls
    #[arg(long, global = true, env = "GEOCRYPT_USER", default_value = "local")]
    user: String,

    /// Bearer credential for storage calls
    #[arg(long, global = true, env = "GEOCRYPT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Geohash encode/decode
    Geohash {
        #[command(subcommand)]
        action: GeohashAction,
    },

    /// Check whether one geohash is within the allowed radius of another
    Proximity {
        current: String,
        reference: String,
        /// Radius in km (default: geo.radius_km)
        #[arg(long)]
        radius: Option<f64>,
    },

    /// Encrypt a file with the current location and upload it
    Upload {
        file: PathBuf,
        /// MIME type (guessed from the extension when omitted)
        #[arg(long)]
        mime: Option<String>,
    },

    /// List your stored files
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show one file record
    Info { id: String },

    /// Download and decrypt a file (requires a one-time code)
    Download {
        id: String,
        /// Directory to write into (default: current directory)
        #[arg(long, short = 'o', default_value = ".")]
        output: PathBuf,
    },

    /// Delete a stored file
    Delete { id: String },

    /// Check the storage backend
    Health,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum GeohashAction {
    /// Coordinate → geohash
    Encode {
        #[arg(allow_negative_numbers = true)]
        lat: f64,
        #[arg(allow_negative_numbers = true)]
        lon: f64,
        /// Number of characters (default: geo.precision)
        #[arg(long, short = 'p')]
        precision: Option<usize>,
    },
    /// Geohash → centre and cell bounds
    Decode { tag: String },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Display current configuration
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;
    init_logging(cli.log.as_deref().unwrap_or(&config.logging.level), &config.logging.format);

    match &cli.command {
        Commands::Geohash { action: GeohashAction::Encode { lat, lon, precision } } => {
            cmd_geohash_encode(&config, *lat, *lon, *precision)
        }
        Commands::Geohash { action: GeohashAction::Decode { tag } } => cmd_geohash_decode(tag),
        Commands::Proximity { current, reference, radius } => {
            cmd_proximity(&config, current, reference, *radius)
        }
        Commands::Upload { file, mime } => cmd_upload(&cli, &config, file, mime.as_deref()).await,
        Commands::List { json } => cmd_list(&cli, &config, *json).await,
        Commands::Info { id } => cmd_info(&cli, &config, id).await,
        Commands::Download { id, output } => cmd_download(&cli, &config, id, output).await,
        Commands::Delete { id } => cmd_delete(&cli, &config, id).await,
        Commands::Health => cmd_health(&config).await,
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<GeocryptConfig> {
    let config: GeocryptConfig = if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))?
    } else {
        GeocryptConfig::default()
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

// ── Wiring ────────────────────────────────────────────────────────────────────

/// Build the storage operator; S3 credentials come from the environment.
fn build_operator_from_env(config: &GeocryptConfig) -> Result<opendal::Operator> {
    geocrypt_storage::build_from_core_config(&config.storage).context("building storage operator")
}

/// Stands in for the email relay: prints the code on the terminal.
struct TerminalSink;

#[async_trait]
impl CodeSink for TerminalSink {
    async fn deliver(&self, file_id: &FileId, code: &str) -> GeocryptResult<()> {
        eprintln!("one-time code for {file_id}: {code}");
        Ok(())
    }
}

fn sensor_from_cli(cli: &Cli) -> FixedSensor {
    match (cli.lat, cli.lon) {
        (Some(lat), Some(lon)) => FixedSensor::new(Coordinate::new(lat, lon)),
        _ => FixedSensor::unavailable("no position: pass --lat/--lon or set GEOCRYPT_LAT/GEOCRYPT_LON"),
    }
}

fn build_coordinator(cli: &Cli, config: &GeocryptConfig) -> Result<TransferCoordinator> {
    let token = cli
        .token
        .clone()
        .context("no storage credential: pass --token or set GEOCRYPT_TOKEN")?;
    let op = build_operator_from_env(config)?;
    let issuer = Arc::new(OtpIssuer::with_ttl(
        Arc::new(TerminalSink),
        Duration::from_secs(config.otp.validity_secs),
    ));
    let store = OpendalStore::from_config(op, &config.storage, &config.geo, issuer.clone());
    debug!(user = %cli.user, "transfer coordinator ready");

    Ok(TransferCoordinator::new(
        Arc::new(store),
        Arc::new(sensor_from_cli(cli)),
        issuer,
        Requester::new(cli.user.clone(), token),
        TransferSettings::from(config),
    ))
}

// ── Progress helpers ──────────────────────────────────────────────────────────

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}") {
        pb.set_style(style);
    }
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

// ── `geocrypt geohash` / `proximity` ──────────────────────────────────────────

fn cmd_geohash_encode(
    config: &GeocryptConfig,
    lat: f64,
    lon: f64,
    precision: Option<usize>,
) -> Result<()> {
    let precision = precision.unwrap_or(config.geo.precision);
    let tag = geocrypt_geo::encode(Coordinate::new(lat, lon), precision)?;
    println!("{tag}");
    Ok(())
}

fn cmd_geohash_decode(tag: &str) -> Result<()> {
    let tag = LocationTag::parse(tag)?;
    let bbox = geocrypt_geo::decode_bbox(tag.as_str())?;
    let centre = bbox.centroid();
    println!("tag:     {tag}");
    println!("centre:  {centre}");
    println!(
        "bounds:  lat {:.6}..{:.6}  lon {:.6}..{:.6}",
        bbox.min_lat, bbox.max_lat, bbox.min_lon, bbox.max_lon
    );
    println!("cell:    ~{:.3} km", geocrypt_geo::cell_size_km(tag.precision()));
    Ok(())
}

fn cmd_proximity(
    config: &GeocryptConfig,
    current: &str,
    reference: &str,
    radius: Option<f64>,
) -> Result<()> {
    let radius = radius.unwrap_or(config.geo.radius_km);
    let distance = geocrypt_geo::distance_km(current, reference)?;
    let allowed = geocrypt_geo::is_within_allowed_area(current, reference, radius);
    println!("distance: {distance:.3} km");
    println!("radius:   {radius} km");
    println!("allowed:  {}", if allowed { "yes" } else { "no" });
    Ok(())
}

// ── `geocrypt upload` ─────────────────────────────────────────────────────────

async fn cmd_upload(cli: &Cli, config: &GeocryptConfig, file: &Path, mime: Option<&str>) -> Result<()> {
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("not a file path: {}", file.display()))?;
    let mimetype = mime.map(str::to_string).unwrap_or_else(|| guess_mimetype(file).to_string());
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;

    let coordinator = build_coordinator(cli, config)?;
    let pb = make_spinner("upload");
    pb.set_message(format!("encrypting {filename} ({})", fmt_bytes(bytes.len() as u64)));

    let record = coordinator.upload(bytes, filename, &mimetype).await;
    pb.finish_and_clear();
    let record = record.with_context(|| format!("uploading {}", file.display()))?;

    println!("Uploaded:");
    print_record(&record);
    Ok(())
}

// ── `geocrypt list` / `info` / `delete` ───────────────────────────────────────

async fn cmd_list(cli: &Cli, config: &GeocryptConfig, json: bool) -> Result<()> {
    let coordinator = build_coordinator(cli, config)?;
    let files = coordinator.list_files().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&files)?);
        return Ok(());
    }
    if files.is_empty() {
        println!("No files.");
        return Ok(());
    }
    println!("{:<36}  {:>10}  {:<14}  NAME", "ID", "SIZE", "LOCATION");
    for f in &files {
        println!(
            "{:<36}  {:>10}  {:<14}  {}",
            f.id,
            fmt_bytes(f.size),
            fmt_location(&f.location),
            f.filename
        );
    }
    Ok(())
}

async fn cmd_info(cli: &Cli, config: &GeocryptConfig, id: &str) -> Result<()> {
    let coordinator = build_coordinator(cli, config)?;
    let record = coordinator.get_file(&FileId::new(id)).await?;
    print_record(&record);
    Ok(())
}

async fn cmd_delete(cli: &Cli, config: &GeocryptConfig, id: &str) -> Result<()> {
    let coordinator = build_coordinator(cli, config)?;
    coordinator.delete(&FileId::new(id)).await?;
    println!("Deleted {id}");
    Ok(())
}

// ── `geocrypt download` ───────────────────────────────────────────────────────

async fn cmd_download(cli: &Cli, config: &GeocryptConfig, id: &str, output: &Path) -> Result<()> {
    let coordinator = build_coordinator(cli, config)?;
    let file_id = FileId::new(id);

    let pb = make_spinner("download");
    pb.set_message("checking location...".to_string());
    let handle = coordinator.begin_download(&file_id).await;
    pb.finish_and_clear();
    let handle = handle?;

    println!(
        "A one-time code was sent for {} (valid for {}s).",
        handle.record().filename,
        handle.remaining().as_secs()
    );
    let code = tokio::task::spawn_blocking(|| rpassword::prompt_password("Enter the 6-digit code: "))
        .await
        .context("code prompt task")?
        .context("reading one-time code")?;

    let pb = make_spinner("download");
    pb.set_message("fetching and decrypting...".to_string());
    let saved = coordinator.save_to(&handle, code.trim(), output).await;
    pb.finish_and_clear();
    let saved = saved?;

    println!("Downloaded:");
    println!("  local:  {}", saved.display());
    println!("  bytes:  {}", fmt_bytes(handle.record().size));
    Ok(())
}

// ── `geocrypt health` / `config show` ─────────────────────────────────────────

async fn cmd_health(config: &GeocryptConfig) -> Result<()> {
    let op = build_operator_from_env(config)?;
    let pb = make_spinner("health");
    pb.set_message(format!("{:?} backend", config.storage.backend));
    let result = geocrypt_storage::check_health(&op).await;
    pb.finish_and_clear();

    match result {
        Ok(()) => {
            println!("storage: ok ({:?})", config.storage.backend);
            Ok(())
        }
        Err(e) => {
            println!("storage: unreachable ({:?})", config.storage.backend);
            Err(e.into())
        }
    }
}

fn cmd_config_show(config: &GeocryptConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── Formatting ────────────────────────────────────────────────────────────────

fn print_record(record: &FileRecord) {
    println!("  id:        {}", record.id);
    println!("  name:      {}", record.filename);
    println!("  type:      {}", record.mimetype);
    println!("  size:      {}", fmt_bytes(record.size));
    println!("  location:  {}", fmt_location(&record.location));
    println!("  owner:     {}", record.owner);
    println!("  created:   {}", record.created_at);
}

fn fmt_location(location: &StoredLocation) -> String {
    match location {
        StoredLocation::Plain(tag) => tag.to_string(),
        StoredLocation::Hashed(hash) => format!("#{}", &hash[..hash.len().min(12)]),
    }
}

fn guess_mimetype(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("txt") | Some("md") => "text/plain",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("zip") => "application/zip",
        Some("html") | Some("htm") => "text/html",
        _ => "application/octet-stream",
    }
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
