//! bluescout - continuous Bluetooth survey daemon
//!
//! Observes LE advertisements and Classic inquiries on one or more
//! adapters, optionally reads GATT databases, correlates every observation
//! with a GPS fix, and persists everything into a local SQLite database.

use bluescout::cli::{self, Cli, ExitCodes};
use bluescout::config;
use bluescout::core::gps::{ports, GpsConfig, GpsMode, GpsState, DEFAULT_FRESHNESS_TIMEOUT};
use bluescout::core::scan::adapters::{self, InterfaceInfo};
use bluescout::core::scan::blacklist::ConnectBlacklist;
use bluescout::core::scan::markers;
use bluescout::core::scan::preflight::{self, CacheMode, PreflightOptions};
use bluescout::core::scan::supervisor::{self, SupervisorDeps};
use bluescout::core::status;
use bluescout::core::store::Store;
use bluescout::linef;
use bluescout::utils::{self, console::Color};
use bluescout::{Catalog, CatalogPaths, ScanSettings};
use clap::Parser;
use std::collections::HashSet;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();
    print_logo();

    let token = CancellationToken::new();
    spawn_signal_handler(token.clone());

    let store = match Store::open(config::DEFAULT_DB_PATH) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            linef!("[ERROR]", Color::Yellow, "failed to open database: {e}");
            return ExitCode::from(ExitCodes::STORE_ERROR);
        }
    };

    let paths = CatalogPaths::new(cli.data_dir.clone(), cli.custom_data_dir.clone());
    let catalog = match Catalog::load(&paths) {
        Ok(catalog) => Arc::new(catalog),
        Err(e) => {
            linef!("[ERROR]", Color::Yellow, "failed to load data files: {e}");
            return ExitCode::from(ExitCodes::DATA_ERROR);
        }
    };

    // Type detection is optional; scanning works without patterns.
    let patterns = Arc::new(markers::load_device_type_patterns(
        &cli.data_dir,
        cli.custom_data_dir.as_deref(),
    ));

    // GPS selection.
    let mode_flag = cli.gps_mode.trim().to_lowercase();
    let use_gps = if mode_flag == "off" {
        false
    } else {
        match cli.use_gps.as_deref() {
            Some(v) => v.eq_ignore_ascii_case("y"),
            None => utils::prompt_string("Use GPS? (y/n): ")
                .map(|s| s.eq_ignore_ascii_case("y"))
                .unwrap_or(false),
        }
    };

    let tag_input = utils::prompt_string("Enter a tag to use for new devices (leave blank if none): ")
        .unwrap_or_default();
    let tag = (!tag_input.trim().is_empty()).then(|| tag_input.trim().to_string());

    let gps = Arc::new(GpsState::new(use_gps, DEFAULT_FRESHNESS_TIMEOUT));
    if use_gps {
        let gps_cfg = match build_gps_config(&cli) {
            Ok(cfg) => cfg,
            Err(msg) => {
                linef!("[ERROR]", Color::Yellow, "{msg}");
                return ExitCode::from(ExitCodes::GPS_ERROR);
            }
        };
        let serial_mode = gps_cfg.mode == GpsMode::Serial;
        if let Err(e) = gps.start(&token, gps_cfg) {
            linef!("[ERROR]", Color::Yellow, "failed to start GPS reader: {e}");
            return ExitCode::from(ExitCodes::GPS_ERROR);
        }
        // Do not block scanning on a fix; it shows up in the status ticker.
        linef!("[GPS]", Color::Gray, "GPS reader started");
        if !gps.wait_for_first_packet(&token, Duration::from_secs(3)).await {
            linef!(
                "[GPS]",
                Color::Yellow,
                "no packets yet (will keep retrying; using last known if available)"
            );
            if utils::system::is_root() && utils::system::has_systemctl() && !serial_mode {
                linef!("[PREFLIGHT]", Color::Gray, "restarting gpsd");
                let _ = utils::system::restart_service("gpsd").await;
            }
        }
    }

    let session = match bluer::Session::new().await {
        Ok(session) => session,
        Err(e) => {
            linef!("[ERROR]", Color::Yellow, "failed to connect to the Bluetooth stack: {e}");
            return ExitCode::from(ExitCodes::ERROR);
        }
    };

    let interfaces = match adapters::get_bluetooth_interfaces(&session).await {
        Ok(list) => list,
        Err(e) => {
            linef!("[ERROR]", Color::Yellow, "failed to get Bluetooth interfaces: {e}");
            return ExitCode::from(ExitCodes::ERROR);
        }
    };
    if interfaces.is_empty() {
        println!("No Bluetooth interfaces found.");
        return ExitCode::from(ExitCodes::NO_ADAPTERS);
    }

    let chosen = match select_adapters(&interfaces, cli.adapters.as_deref(), cli.adapter_index) {
        Ok(chosen) if !chosen.is_empty() => chosen,
        Ok(_) => {
            linef!("[ERROR]", Color::Yellow, "no adapters selected");
            return ExitCode::from(ExitCodes::NO_ADAPTERS);
        }
        Err(msg) => {
            linef!("[ERROR]", Color::Yellow, "{msg}");
            return ExitCode::from(ExitCodes::NO_ADAPTERS);
        }
    };
    let adapters_joined = chosen.join(",");

    let cache_mode: CacheMode = cli.bluez_cache.parse().unwrap_or_default();
    preflight::preflight(
        &session,
        &chosen,
        PreflightOptions {
            restart_bluetooth_service: cli.restart_bluetooth,
            cache_mode,
        },
    )
    .await;

    let max_connect_total = utils::prompt_int(
        "Set the limit on the number of simultaneous connections: ",
        5,
    )
    .unwrap_or(5)
    .max(1) as usize;

    let gps_start = gps.string_for_record();
    let session_id = match store.create_session(&adapters_joined, tag.as_deref(), gps_start.as_deref())
    {
        Ok(id) => id,
        Err(e) => {
            linef!("[ERROR]", Color::Yellow, "failed to create scan session: {e}");
            return ExitCode::from(ExitCodes::STORE_ERROR);
        }
    };
    linef!("[SESSION]", Color::Gray, "id={session_id} adapters={adapters_joined}");

    // Periodic status (GPS/DB/Battery).
    tokio::spawn(status::run(
        token.clone(),
        Duration::from_secs(cli.stats_interval),
        gps.clone(),
        store.clone(),
    ));

    let blacklist = ConnectBlacklist::load(config::DEFAULT_BLACKLIST_PATH)
        .ok()
        .flatten()
        .map(Arc::new);
    if let Some(bl) = &blacklist {
        linef!(
            "[SCAN]",
            Color::Gray,
            "connect blacklist loaded ({} keywords)",
            bl.keywords().len()
        );
    }

    gps.set_scanning_started(true);

    let deps = Arc::new(SupervisorDeps {
        session,
        store,
        gps: gps.clone(),
        catalog,
        patterns,
        blacklist,
        session_id,
        tag,
        settings: ScanSettings::default(),
    });
    let limits = supervisor::partition_connect_limits(max_connect_total, chosen.len());
    let mut supervisors = Vec::with_capacity(chosen.len());
    for (adapter_id, limit) in chosen.into_iter().zip(limits) {
        supervisors.push(tokio::spawn(supervisor::run_managed_adapter_loop(
            deps.clone(),
            token.clone(),
            adapter_id,
            limit,
        )));
    }

    token.cancelled().await;
    linef!("[EXIT]", Color::Gray, "stopping");
    gps.stop();

    // Give the workers a moment to unwind.
    let unwind = async {
        for task in supervisors {
            let _ = task.await;
        }
    };
    let _ = tokio::time::timeout(Duration::from_secs(2), unwind).await;
    ExitCode::from(ExitCodes::SUCCESS)
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(config::DEFAULT_LOG_PATH)
    {
        Ok(file) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
        }
        Err(_) => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(term) => term,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                token.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
        token.cancel();
    });
}

fn build_gps_config(cli: &Cli) -> anyhow::Result<GpsConfig> {
    let mut cfg = GpsConfig {
        mode: cli.gps_mode.parse::<GpsMode>()?,
        gpsd_addr: cli.gpsd_addr.trim().to_string(),
        serial_device: cli.gps_device.clone(),
        serial_baud: cli.gps_baud,
    };

    // When the user left --gps-mode at its default, keep the interactive
    // flow.
    if cli.gps_mode.trim().eq_ignore_ascii_case("auto") {
        let choice = utils::prompt_string("GPS source (auto/gpsd/serial) [auto]: ").unwrap_or_default();
        if !choice.is_empty() {
            cfg.mode = choice.parse::<GpsMode>()?;
        }
    }

    if cfg.mode == GpsMode::Serial {
        let have_device = cfg
            .serial_device
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .is_some();
        if !have_device {
            let available = ports::list_serial_ports();
            if !available.is_empty() {
                println!("Available serial ports:");
                for (i, port) in available.iter().enumerate() {
                    println!("{i}: {port}");
                }
                let idx = utils::prompt_int("Select the serial port to use (enter the number): ", 0)
                    .unwrap_or(0);
                if idx >= 0 && (idx as usize) < available.len() {
                    cfg.serial_device = Some(available[idx as usize].clone());
                }
            }
            if cfg.serial_device.is_none() {
                let path = utils::prompt_string("Enter GPS serial device path (e.g., /dev/ttyUSB0): ")
                    .unwrap_or_default();
                if !path.is_empty() {
                    cfg.serial_device = Some(path);
                }
            }
        }
        if cfg.serial_baud == 0 {
            cfg.serial_baud = 9600;
        }
        let baud = utils::prompt_int(
            &format!("Enter baud rate [{}]: ", cfg.serial_baud),
            i64::from(cfg.serial_baud),
        )
        .unwrap_or_else(|_| i64::from(cfg.serial_baud));
        if baud > 0 {
            cfg.serial_baud = baud as u32;
        }
    }

    Ok(cfg)
}

fn select_adapters(
    interfaces: &[InterfaceInfo],
    adapters_flag: Option<&str>,
    adapter_index: Option<usize>,
) -> anyhow::Result<Vec<String>> {
    // Explicit adapter list (e.g. hci0,hci1) is validated against the stack.
    if let Some(flag) = adapters_flag.map(str::trim).filter(|s| !s.is_empty()) {
        let parts = cli::split_csv(flag);
        if parts.is_empty() {
            anyhow::bail!("--adapters is empty");
        }
        let valid: HashSet<&str> = interfaces.iter().map(|i| i.id.as_str()).collect();
        for part in &parts {
            if !valid.contains(part.as_str()) {
                anyhow::bail!("unknown adapter in --adapters: {part}");
            }
        }
        return Ok(cli::unique_strings(parts));
    }

    // Legacy single index flag.
    if let Some(idx) = adapter_index {
        if idx >= interfaces.len() {
            anyhow::bail!("adapter-index out of range");
        }
        return Ok(vec![interfaces[idx].id.clone()]);
    }

    // Interactive: a single index or multiple indices separated by commas.
    println!("Available Bluetooth interfaces:");
    for (i, iface) in interfaces.iter().enumerate() {
        println!("{i}: {}", iface.display_name);
    }
    let selection = utils::prompt_string("Select the interface(s) to use (e.g. 0 or 0,1): ")?;
    if selection.is_empty() {
        return Ok(vec![interfaces[0].id.clone()]);
    }
    let mut out = Vec::new();
    for value in cli::split_csv(&selection) {
        let idx: usize = value
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid adapter index: {value}"))?;
        if idx >= interfaces.len() {
            anyhow::bail!("adapter index out of range: {idx}");
        }
        out.push(interfaces[idx].id.clone());
    }
    Ok(cli::unique_strings(out))
}

fn print_logo() {
    let logo = r"
   _     _
  | |__ | |_   _  ___  ___  ___ ___  _   _| |_
  | '_ \| | | | |/ _ \/ __|/ __/ _ \| | | | __|
  | |_) | | |_| |  __/\__ \ (_| (_) | |_| | |_
  |_.__/|_|\__,_|\___||___/\___\___/ \__,_|\__|
";
    println!("{logo}");
    println!("bluescout - Bluetooth survey daemon");
}
