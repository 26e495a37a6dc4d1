use chrono::Utc;
use clap::Parser;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use laserpresets_core::bridge::Background;
use laserpresets_core::cloud::DirSyncArea;
use laserpresets_core::logging::setup_logging;
use laserpresets_core::{CloudMirror, Config, Controller, LocalStore, Paths};
use laserpresets_nativehost::protocol::{handle_message, OutgoingMessage};
use laserpresets_nativehost::{
    manifests, read_native_message, write_native_message, HostError,
};

#[derive(Parser)]
#[command(name = "laserpresets-nativehost")]
#[command(about = "Native messaging host for the Laser Presets browser extension")]
struct Cli {
    /// Install native messaging manifests for all supported browsers
    #[arg(long)]
    install: bool,

    /// Remove native messaging manifests for all browsers
    #[arg(long)]
    uninstall: bool,
}

fn do_install() -> io::Result<()> {
    let exe_path = std::env::current_exe()?;
    println!("Installing native messaging manifests for Laser Presets...");
    println!("Binary path: {}", exe_path.display());
    manifests::install_all(&exe_path)?;
    println!("Native messaging manifests installed for all supported browsers.");
    Ok(())
}

fn do_uninstall() -> io::Result<()> {
    println!("Removing native messaging manifests for Laser Presets...");
    manifests::uninstall_all()?;
    println!("Native messaging manifests removed.");
    Ok(())
}

fn send<W: Write>(out: &Mutex<W>, message: &OutgoingMessage) -> Result<(), HostError> {
    let mut out = out
        .lock()
        .map_err(|_| HostError::NativeMessaging("stdout lock poisoned".to_string()))?;
    write_native_message(&mut *out, message)
}

fn open_controller(paths: &Paths, config: &Config) -> Result<Controller, HostError> {
    let store = LocalStore::open(paths.local_document());
    let cloud = CloudMirror::new(DirSyncArea::new(paths.cloud_dir(), config.cloud_quota_bytes));
    let background = Background::shared(store.clone(), config.channel_capacity);
    let mut controller = Controller::new(store, cloud, background).with_dev_mode(config.dev_mode);
    controller.load()?;
    Ok(controller)
}

fn main() {
    let cli = Cli::parse();

    if cli.install {
        if let Err(e) = do_install() {
            eprintln!("Install failed: {}", e);
            std::process::exit(1);
        }
        return;
    }

    if cli.uninstall {
        if let Err(e) = do_uninstall() {
            eprintln!("Uninstall failed: {}", e);
            std::process::exit(1);
        }
        return;
    }

    let paths = match Paths::from_env() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to locate data directory: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = paths.ensure() {
        eprintln!("Failed to create directories: {}", e);
        std::process::exit(1);
    }

    let config = match Config::load(&paths.config()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config, using defaults: {}", e);
            Config::default()
        }
    };

    setup_logging(&paths.log_file("log"), config.dev_mode);
    log::info!("Laser Presets native host started");

    let controller = match open_controller(&paths, &config) {
        Ok(c) => Arc::new(Mutex::new(c)),
        Err(e) => {
            log::error!("Failed to open material store: {}", e);
            std::process::exit(1);
        }
    };
    let stdout = Arc::new(Mutex::new(io::stdout()));

    let running = Arc::new(AtomicBool::new(true));

    // Editor poll: push the state whenever a tick changes it.
    {
        let running = running.clone();
        let controller = controller.clone();
        let stdout = stdout.clone();
        let interval = config.ui_poll_interval();
        thread::spawn(move || {
            while running.load(Ordering::Relaxed) {
                thread::sleep(interval);
                let push = match controller.lock() {
                    Ok(mut c) => match c.tick(Utc::now()) {
                        Ok(true) => Some(OutgoingMessage::state_push(c.snapshot())),
                        Ok(false) => None,
                        Err(e) => {
                            log::error!("Tick error: {}", e);
                            None
                        }
                    },
                    Err(_) => {
                        log::error!("Controller lock poisoned, stopping poll");
                        break;
                    }
                };
                if let Some(push) = push {
                    if let Err(e) = send(&stdout, &push) {
                        log::error!("Failed to push state: {}", e);
                    }
                }
            }
        });
    }

    let stdin = io::stdin();
    let mut stdin_lock = stdin.lock();

    loop {
        match read_native_message(&mut stdin_lock) {
            Ok(Some(msg)) => {
                let response = match controller.lock() {
                    Ok(mut c) => handle_message(&mut c, &msg),
                    Err(_) => OutgoingMessage::failure(
                        msg.id,
                        &HostError::NativeMessaging("controller lock poisoned".to_string()),
                    ),
                };
                if let Err(e) = send(&stdout, &response) {
                    log::error!("Failed to write response: {}", e);
                }
            }
            Ok(None) => {
                running.store(false, Ordering::Relaxed);
                log::info!("Laser Presets native host shutting down");
                break;
            }
            Err(e) => {
                log::error!("Error reading message: {}", e);
                let response = OutgoingMessage::failure(None, &e);
                let _ = send(&stdout, &response);
                if e.is_fatal() {
                    running.store(false, Ordering::Relaxed);
                    break;
                }
            }
        }
    }
}
