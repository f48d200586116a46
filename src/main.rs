mod angles;
mod camera;
mod config;
mod fs;
mod http;
mod mjpeg;
mod networking;
mod selftest;
mod server;
mod servo;
mod snapshot;
mod terminal;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use color_eyre::eyre::{eyre, WrapErr};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use angles::AngleStore;
use camera::Camera;
use config::{Config, Overrides};
use server::Server;
use snapshot::Snapshots;

const SELF_TEST_PAUSE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// HTTP server only, stops on Ctrl-C
    Web,
    /// Keyboard console only
    Terminal,
    /// HTTP server in the background, keyboard console in front
    Both,
    /// Check camera, servos and snapshot storage once, then exit
    #[value(name = "selftest")]
    SelfTest,
}

impl Mode {
    fn serves_web(self) -> bool {
        matches!(self, Mode::Web | Mode::Both)
    }

    fn has_console(self) -> bool {
        matches!(self, Mode::Terminal | Mode::Both)
    }
}

/// Pan/tilt camera rig: live MJPEG feed and servo control
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Config file, defaults to $XDG_CONFIG_HOME/eye/config.toml
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(short, long, value_enum, default_value_t = Mode::Both)]
    mode: Mode,
    /// Address the web interface listens on
    #[arg(long)]
    bind: Option<SocketAddr>,
    /// Degrees moved per key press or web command
    #[arg(long)]
    step: Option<i32>,
    /// Serve a still image instead of starting the camera
    #[arg(long, default_value_t = false)]
    fake_camera: bool,
    /// Log servo moves instead of driving the pan-tilt HAT
    #[arg(long, default_value_t = false)]
    fake_servo: bool,
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            bind: self.bind,
            step: self.step,
            fake_camera: self.fake_camera,
            fake_servo: self.fake_servo,
            snapshot_dir: self.snapshot_dir.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let fs = fs::Fs::new().wrap_err("Failed to locate XDG base directories")?;
    init_logging(args.mode, &fs)?;

    let config = Config::load(args.config.as_deref(), &fs)?.with_overrides(args.overrides())?;
    debug!(?config, "Configuration loaded");

    if args.mode == Mode::SelfTest {
        return self_test(&config, &fs).await;
    }

    let driver = servo::init(&config.servo).wrap_err("Servo hardware is unavailable")?;
    let store = Arc::new(AngleStore::new(driver, &config.servo));
    store
        .apply_current()
        .await
        .wrap_err("Failed to center the servos")?;

    let (camera, stream_url) = if args.mode.serves_web() {
        let (camera, url) = start_web(&config, &fs, store.clone()).await?;
        (Some(camera), Some(url))
    } else {
        (None, None)
    };

    let outcome = if args.mode.has_console() {
        terminal::run(store.clone(), stream_url)
            .await
            .wrap_err("Terminal console failed")
    } else {
        tokio::signal::ctrl_c()
            .await
            .wrap_err("Failed to wait for Ctrl-C")
    };

    if let Some(camera) = camera {
        if let Err(e) = camera.stop().await {
            warn!("Failed to stop camera: {}", e);
        }
    }
    store.park().await.wrap_err("Failed to park the servos")?;
    info!("System shutdown complete");
    outcome
}

async fn start_web(
    config: &Config,
    fs: &fs::Fs,
    store: Arc<AngleStore>,
) -> color_eyre::Result<(Arc<dyn Camera>, String)> {
    let camera = camera::init(&config.camera)
        .await
        .wrap_err("Camera is unavailable")?;
    let snapshots = open_snapshots(config, fs)?;

    let listener = TcpListener::bind(config.http.bind)
        .await
        .wrap_err_with(|| format!("Failed to listen on {}", config.http.bind))?;
    let port = listener.local_addr()?.port();
    let host = networking::local_ipv4()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| config.http.bind.ip().to_string());
    let url = format!("http://{host}:{port}");
    info!("Camera stream running: {}", url);

    let server = Arc::new(Server::new(
        store,
        camera.clone(),
        snapshots,
        config.camera.frame_interval(),
    ));
    tokio::spawn(server.serve(listener));

    if config.discovery.enabled {
        let name = config.display_name.clone();
        let interval = Duration::from_secs(config.discovery.interval_secs);
        tokio::spawn(async move {
            if let Err(e) = networking::announce(name, port, interval).await {
                error!("Multicast failed. No server discovery anymore: {}", e);
            }
        });
    }

    Ok((camera, url))
}

fn open_snapshots(config: &Config, fs: &fs::Fs) -> color_eyre::Result<Snapshots> {
    let dir = match &config.snapshots.dir {
        Some(dir) => dir.clone(),
        None => fs
            .snapshot_dir()
            .wrap_err("Failed to create snapshot directory")?,
    };
    let snapshots = Snapshots::new(dir)?;
    info!("Saving snapshots to {}", snapshots.dir().display());
    Ok(snapshots)
}

async fn self_test(config: &Config, fs: &fs::Fs) -> color_eyre::Result<()> {
    let snapshots = open_snapshots(config, fs)?;
    let report = selftest::run(config, &snapshots, SELF_TEST_PAUSE).await;
    for line in report.lines() {
        println!("{line}");
    }
    if report.passed() {
        Ok(())
    } else {
        Err(eyre!("Hardware self-test failed"))
    }
}

/// Logs go to stderr, or to a file in the XDG cache directory while the
/// console owns the terminal.
fn init_logging(mode: Mode, fs: &fs::Fs) -> color_eyre::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if mode.has_console() {
        let path = fs.log_file().wrap_err("Failed to create log file")?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .wrap_err_with(|| format!("Failed to open log file {}", path.display()))?;
        builder.with_ansi(false).with_writer(Mutex::new(file)).init();
    } else {
        builder.init();
    }
    Ok(())
}
