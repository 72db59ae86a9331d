use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use camstream_lib::camera::backend::CameraBackend;
use camstream_lib::camera::dummy::DummyBackend;
use camstream_lib::config::{AppConfig, ConfigWatcher};
use camstream_lib::pipeline::CameraPipeline;

/// camstream: live camera capture with runtime device switching
#[derive(Parser)]
#[command(name = "camstream")]
#[command(version, about = "Capture a camera and fan frames out to consumers")]
#[command(after_help = "EXAMPLES:
    camstream list-devices --dummy
    camstream run --dummy --seconds 5
    camstream run --dummy --switch-after 3 --switch-width 320 --switch-height 240

ENVIRONMENT:
    DUMMY_CAMERA    Set to 1 to use the synthetic camera backend.
    RUST_LOG        Log filter (default: info).")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available capture devices
    ListDevices {
        /// Use the synthetic camera backend
        #[arg(long)]
        dummy: bool,
    },

    /// Run the capture pipeline and report the frame rate once per second
    Run {
        /// Use the synthetic camera backend
        #[arg(long)]
        dummy: bool,

        /// JSON configuration file (defaults apply when absent)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// How long to run before closing the pipeline
        #[arg(long, default_value_t = 5)]
        seconds: u64,

        /// Device index, used when no name is given or it cannot be resolved
        #[arg(long)]
        device_id: Option<i32>,

        /// Device name, preferred over the index
        #[arg(long)]
        device_name: Option<String>,

        #[arg(long)]
        width: Option<i32>,

        #[arg(long)]
        height: Option<i32>,

        /// Edit the configuration after this many seconds
        #[arg(long, requires_all = ["switch_width", "switch_height"])]
        switch_after: Option<u64>,

        #[arg(long)]
        switch_width: Option<i32>,

        #[arg(long)]
        switch_height: Option<i32>,
    },
}

fn backend_for(dummy: bool) -> Arc<dyn CameraBackend> {
    if dummy {
        Arc::new(DummyBackend::new())
    } else {
        camstream_lib::create_backend()
    }
}

fn list_devices(dummy: bool) -> Result<(), String> {
    let devices = backend_for(dummy)
        .enumerate_devices()
        .map_err(|e| e.to_string())?;
    if devices.is_empty() {
        println!("No capture devices found.");
    }
    for device in devices {
        println!("{device}");
    }
    Ok(())
}

struct RunOptions {
    dummy: bool,
    config: Option<PathBuf>,
    seconds: u64,
    device_id: Option<i32>,
    device_name: Option<String>,
    width: Option<i32>,
    height: Option<i32>,
    switch: Option<(u64, i32, i32)>,
}

fn run(options: RunOptions) -> Result<(), String> {
    let mut config = match &options.config {
        Some(path) => AppConfig::load(path).map_err(|e| e.to_string())?,
        None => AppConfig::default(),
    };
    if let Some(id) = options.device_id {
        config.camera.camera_id = id;
    }
    if let Some(name) = options.device_name {
        config.camera.camera_name = name;
    }
    if let Some(width) = options.width {
        config.camera.width = width;
    }
    if let Some(height) = options.height {
        config.camera.height = height;
    }

    let watcher = ConfigWatcher::new(config);
    let pipeline = CameraPipeline::new(&watcher, backend_for(options.dummy))
        .map_err(|e| e.to_string())?;

    let started = Instant::now();
    let mut switched = false;
    for _ in 0..options.seconds {
        std::thread::sleep(Duration::from_secs(1));

        if let Some((after, width, height)) = options.switch {
            if !switched && started.elapsed() >= Duration::from_secs(after) {
                info!("switching resolution to {width}x{height}");
                watcher.modify(|c| {
                    c.camera.width = width;
                    c.camera.height = height;
                });
                switched = true;
            }
        }

        let stats = pipeline.stats();
        info!(
            "state={:?} device={:?} resolution={:?} fps={:.1} frames={} latency={:.2}ms",
            pipeline.capture_state(),
            pipeline.active_device(),
            pipeline.active_resolution().map(|r| r.to_string()),
            stats.fps,
            stats.frame_count,
            stats.latency_ms
        );
    }

    pipeline.close();
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::ListDevices { dummy } => list_devices(dummy),
        Commands::Run {
            dummy,
            config,
            seconds,
            device_id,
            device_name,
            width,
            height,
            switch_after,
            switch_width,
            switch_height,
        } => {
            let switch = match (switch_after, switch_width, switch_height) {
                (Some(after), Some(w), Some(h)) => Some((after, w, h)),
                _ => None,
            };
            run(RunOptions {
                dummy,
                config,
                seconds,
                device_id,
                device_name,
                width,
                height,
                switch,
            })
        }
    };

    if let Err(e) = result {
        error!("{e}");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
