//! `foxbridge-cli` – operator shell for the scene → Foxglove bridge.
//!
//! This binary:
//!
//! 1. Loads `~/.foxbridge/config.toml` (writing defaults on first run).
//! 2. Builds a demo scene (camera, IMU, articulated robot) and a
//!    [`Bridge`] over it, then starts the Foxglove server.
//! 3. Drives the bridge's physics hook at `tick_hz` on a background task.
//! 4. Drops the user into an **interactive REPL** (`/sources`, `/status`,
//!    `/port`, `/resolution`, `/tfroot`, `/publish`, `/help`).
//! 5. Intercepts **Ctrl-C** to stop the server, flush telemetry and exit.

mod config;
mod repl;

use colored::Colorize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{error, warn};

use foxbridge_runtime::{Bridge, TracerProviderGuard, init_tracing};
use foxbridge_scene::SimScene;
use foxbridge_sources::SimProducers;
use foxbridge_sources::registry::{ARTICULATION_ROOT_API, CAMERA_TYPE, IMU_TYPE};
use foxbridge_types::{Matrix4, Quaternion, Vec3};

const ARM_PATH: &str = "/World/Robot/Base/Arm";

fn main() {
    let telemetry = Arc::new(Mutex::new(init_tracing("foxbridge")));

    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let cfg = config::Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };

    // ── Runtime ───────────────────────────────────────────────────────────
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to build Tokio runtime");
            return;
        }
    };

    // ── Bridge ────────────────────────────────────────────────────────────
    let scene = Arc::new(demo_scene());
    let bridge = Arc::new(Bridge::new(scene.clone(), Arc::new(SimProducers::new()), cfg.settings()));

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    install_interrupt_handler(shutdown.clone(), bridge.clone(), runtime.handle().clone(), telemetry.clone());

    match runtime.block_on(bridge.start()) {
        Ok(()) => println!(
            "  {} Foxglove server listening on {}",
            "✓".green().bold(),
            format!("ws://0.0.0.0:{}", cfg.server_port).bold()
        ),
        Err(e) => println!("{}: {} (use {} to retry)", "Server failed to start".red(), e, "/publish on".bold()),
    }

    runtime.spawn(demo_loop(bridge.clone(), scene.clone(), cfg.tick_hz, shutdown.clone()));

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    let session = repl::Session {
        bridge: bridge.clone(),
        scene,
        runtime: runtime.handle().clone(),
        config: cfg,
    };
    repl::run(session, shutdown);

    runtime.block_on(bridge.stop());
    shutdown_telemetry(&telemetry);
}

/// On Ctrl-C: stop the server and flush spans, then exit.  The REPL may be
/// parked in `read_line`, so the handler finishes the job itself.
fn install_interrupt_handler(
    shutdown: Arc<AtomicBool>,
    bridge: Arc<Bridge>,
    runtime: Handle,
    telemetry: Arc<Mutex<TracerProviderGuard>>,
) {
    let result = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        shutdown.store(true, Ordering::SeqCst);
        runtime.block_on(bridge.stop());
        shutdown_telemetry(&telemetry);
        println!("{}", "  ✓ Exiting foxbridge.".green());
        std::process::exit(0);
    });
    if let Err(e) = result {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }
}

fn shutdown_telemetry(telemetry: &Mutex<TracerProviderGuard>) {
    telemetry.lock().unwrap_or_else(PoisonError::into_inner).shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// Demo simulation
// ─────────────────────────────────────────────────────────────────────────────

fn demo_scene() -> SimScene {
    SimScene::new()
        .with_node("/World", "Xform")
        .with_node("/World/Camera", CAMERA_TYPE)
        .with_local_transform("/World/Camera", offset(2.0, 0.0, 1.5))
        .with_node("/World/Imu", IMU_TYPE)
        .with_node("/World/Robot", "Xform")
        .with_capability("/World/Robot", ARTICULATION_ROOT_API)
        .with_node("/World/Robot/Base", "Xform")
        .with_local_transform("/World/Robot/Base", offset(0.0, 0.0, 0.1))
        .with_node(ARM_PATH, "Xform")
        .with_node("/World/Looks", "Scope")
}

fn offset(x: f64, y: f64, z: f64) -> Matrix4 {
    Matrix4::from_translation_rotation(Vec3::new(x, y, z), Quaternion::identity())
}

/// Swing the arm and tick the bridge at `tick_hz` until shutdown.
async fn demo_loop(bridge: Arc<Bridge>, scene: Arc<SimScene>, tick_hz: u32, shutdown: Arc<AtomicBool>) {
    let period = Duration::from_secs_f64(1.0 / f64::from(tick_hz.max(1)));
    let mut interval = tokio::time::interval(period);
    let mut t = 0.0_f64;

    while !shutdown.load(Ordering::SeqCst) {
        interval.tick().await;
        t += period.as_secs_f64();

        let half = 0.5 * t.sin();
        let swing = Quaternion::new(half.cos(), 0.0, 0.0, half.sin());
        let pose = Matrix4::from_translation_rotation(Vec3::new(0.0, 0.0, 0.4), swing);
        if let Err(e) = scene.set_local_transform(ARM_PATH, pose) {
            warn!(path = ARM_PATH, error = %e, "demo arm not moved");
        }

        bridge.on_physics_step();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ____         __         _     __         "#.bold().cyan());
    println!("{}", r#"  / __/__ __ __/ /  ____  (_)__/ /__ ____   "#.bold().cyan());
    println!("{}", r#" / _// _ \\ \ / _ \/ __/ / / _  / _ `/ -_)  "#.bold().cyan());
    println!("{}", r#"/_/  \___/_\_\_.__/_/   /_/\_,_/\_, /\__/   "#.bold().cyan());
    println!("{}", r#"                               /___/        "#.bold().cyan());
    println!();
    println!("  {} {}", "foxbridge".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Simulated scene → Foxglove bridge");
    println!();
}
