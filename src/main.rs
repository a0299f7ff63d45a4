//! Vibration DAQ - Headless Runner
//!
//! Runs one collection session from the command line. The session stops
//! after `--duration` seconds, or when stdin closes or reads `stop`.

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vibdaq_rs::{
    backend::{list_serial_ports, MockDevice, MockWaveform, RegisterBus},
    config::{default_config_path, DaqConfig, DeviceConfig, UploadOverrides},
    session::{api, SessionController},
    storage::{MySqlStore, RemoteStore, UploadTarget},
};

/// How often the runner reports progress
const STATUS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "vibdaq-rs", version, about = "Triaxial vibration acquisition over Modbus-RTU")]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Session label, used in folder and file names
    #[arg(short, long, default_value = "session")]
    label: String,

    /// Stop after this many seconds
    #[arg(short, long)]
    duration: Option<u64>,

    /// Use the simulated instrument instead of the serial port
    #[arg(long)]
    mock: bool,

    /// Upload to MySQL regardless of the configuration file
    #[arg(long)]
    upload: bool,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.list_ports {
        for port in list_serial_ports()? {
            println!("{}", port);
        }
        return Ok(());
    }

    let config_path = cli.config.clone().or_else(default_config_path);
    let config = match config_path {
        Some(ref path) => DaqConfig::load_or_default(path),
        None => DaqConfig::default(),
    };
    let _log_guard = init_logging(&config.storage.output_dir)?;

    tracing::info!("Starting vibdaq-rs {}", env!("CARGO_PKG_VERSION"));
    if let Some(ref path) = config_path {
        tracing::info!("Configuration: {:?}", path);
    }

    let mut controller = if cli.mock {
        tracing::info!("Using the simulated instrument");
        SessionController::with_backends(
            config,
            Box::new(|_: &DeviceConfig| -> Box<dyn RegisterBus> {
                Box::new(MockDevice::new().with_generator(MockWaveform::default()))
            }),
            Box::new(|target: &UploadTarget| -> Box<dyn RemoteStore> {
                Box::new(MySqlStore::new(target.clone()))
            }),
        )
    } else {
        SessionController::new(config)
    };

    let overrides = UploadOverrides {
        enabled: cli.upload.then_some(true),
        ..Default::default()
    };
    let message = controller
        .start_session(&cli.label, &overrides)
        .context("Failed to start collection")?;
    println!("{}", message);

    let commands = spawn_stdin_reader();
    let deadline = cli.duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut last_status = Instant::now();

    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            tracing::info!("Duration reached");
            break;
        }
        if !controller.is_collecting() {
            tracing::error!("Collection stopped on its own");
            break;
        }
        if last_status.elapsed() >= STATUS_INTERVAL {
            log_status(&controller);
            last_status = Instant::now();
        }

        match commands.recv_timeout(Duration::from_millis(200)) {
            Ok(line) => match line.trim() {
                "stop" => break,
                "status" => println!("{}", serde_json::to_string(&controller.status())?),
                "data" => println!("{}", serde_json::to_string(&api::data(&controller))?),
                "" => {}
                other => println!("Unknown command {:?} (try stop, status or data)", other),
            },
            Err(RecvTimeoutError::Timeout) => {}
            // Without a duration, closing stdin ends the session
            Err(RecvTimeoutError::Disconnected) if deadline.is_none() => break,
            Err(RecvTimeoutError::Disconnected) => std::thread::sleep(Duration::from_millis(200)),
        }
    }

    let message = controller.stop_session().context("Collection ended with an error")?;
    println!("{}", message);
    Ok(())
}

/// Console output plus a daily log file under `<output_dir>/logs/`
fn init_logging(output_dir: &Path) -> anyhow::Result<WorkerGuard> {
    let log_dir = output_dir.join("logs");
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory {:?}", log_dir))?;
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "vibdaq.log"));

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,vibdaq_rs=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();

    Ok(guard)
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = unbounded();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn log_status(controller: &SessionController) {
    let state = controller.status();
    tracing::info!(
        "Link {} ({:.1}% ok, {:.0} us avg): {} batches, {} samples written, {} staging files pending",
        state.link,
        state.bus_success_rate,
        state.bus_avg_read_us,
        state.batch_counter,
        state.samples_written,
        state.pending_uploads
    );
}
