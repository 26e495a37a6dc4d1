use chrono::Utc;
use clap::Parser;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tiny_http::{Header, Request, Response, Server, StatusCode};

use laserpresets_core::bridge::{Background, ContentBridge, HttpSource, JsonLinesDispatcher};
use laserpresets_core::cloud::DirSyncArea;
use laserpresets_core::logging::setup_logging;
use laserpresets_core::{CloudMirror, Config, Controller, LocalStore, Paths, PresetError};
use laserpresets_daemon::{route, Reply};

#[derive(Parser)]
#[command(name = "laserpresets-daemon")]
#[command(about = "Optional local daemon for the Laser Presets browser extension")]
struct Cli {
    /// Port to listen on (defaults to the configured port)
    #[arg(long)]
    port: Option<u16>,

    /// Instead of serving, poll a running daemon as the page script would and
    /// print the resulting host actions as JSON lines
    #[arg(long, value_name = "URL")]
    watch: Option<String>,
}

fn cors_headers() -> Vec<Header> {
    [
        ("Access-Control-Allow-Origin", "*"),
        ("Access-Control-Allow-Methods", "GET, POST, OPTIONS"),
        ("Access-Control-Allow-Headers", "Content-Type"),
    ]
    .iter()
    .filter_map(|(name, value)| Header::from_bytes(*name, *value).ok())
    .collect()
}

fn respond(request: Request, reply: Reply) {
    let mut response = Response::from_string(reply.body).with_status_code(StatusCode(reply.status));
    for h in cors_headers() {
        response.add_header(h);
    }
    if reply.json {
        if let Ok(h) = Header::from_bytes("Content-Type", "application/json") {
            response.add_header(h);
        }
    }
    let _ = request.respond(response);
}

fn handle_request(mut request: Request, controller: &Mutex<Controller>) {
    let method = request.method().clone();
    let url = request.url().to_string();

    let mut body = String::new();
    if let Err(e) = request.as_reader().read_to_string(&mut body) {
        respond(request, Reply::text(400, &format!("Unreadable body: {}", e)));
        return;
    }

    let reply = match controller.lock() {
        Ok(mut c) => route(&mut c, &method, &url, &body),
        Err(_) => Reply::text(500, "controller lock poisoned"),
    };
    respond(request, reply);
}

fn open_controller(paths: &Paths, config: &Config) -> Result<Controller, PresetError> {
    let store = LocalStore::open(paths.local_document());
    let cloud = CloudMirror::new(DirSyncArea::new(paths.cloud_dir(), config.cloud_quota_bytes));
    let background = Background::shared(store.clone(), config.channel_capacity);
    let mut controller = Controller::new(store, cloud, background).with_dev_mode(config.dev_mode);
    controller.load()?;
    Ok(controller)
}

fn watch(url: &str, config: &Config) -> Result<(), PresetError> {
    let source = HttpSource::new(url)?;
    let dispatcher = JsonLinesDispatcher::new(io::stdout());
    let mut bridge = ContentBridge::new(
        source,
        dispatcher,
        config.bridge_poll_interval(),
        config.dev_mode,
    );
    log::info!("Watching {} every {:?}", url, config.bridge_poll_interval());
    let running = AtomicBool::new(true);
    bridge.run(&running);
    Ok(())
}

fn main() {
    let cli = Cli::parse();

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

    setup_logging(&paths.log_file("daemon-log"), config.dev_mode);

    if let Some(url) = cli.watch {
        if let Err(e) = watch(&url, &config) {
            log::error!("Watch failed: {}", e);
            std::process::exit(1);
        }
        return;
    }

    let controller = match open_controller(&paths, &config) {
        Ok(c) => Arc::new(Mutex::new(c)),
        Err(e) => {
            log::error!("Failed to open material store: {}", e);
            std::process::exit(1);
        }
    };

    let addr = format!("127.0.0.1:{}", cli.port.unwrap_or(config.daemon_port));
    let server = match Server::http(&addr) {
        Ok(s) => s,
        Err(e) => {
            log::error!("Failed to start HTTP server on {}: {}", addr, e);
            eprintln!("Failed to start HTTP server on {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    log::info!("Laser Presets daemon listening on {}", addr);
    println!("Laser Presets daemon listening on {}", addr);

    let running = Arc::new(AtomicBool::new(true));

    // Background cloud sync
    {
        let running = running.clone();
        let controller = controller.clone();
        let interval = config.cloud_sync_interval();
        thread::spawn(move || {
            while running.load(Ordering::Relaxed) {
                match controller.lock() {
                    Ok(mut c) => {
                        if let Err(e) = c.tick(Utc::now()) {
                            log::error!("Sync error: {}", e);
                        }
                    }
                    Err(_) => {
                        log::error!("Controller lock poisoned, stopping sync");
                        break;
                    }
                }
                thread::sleep(interval);
            }
        });
    }

    for request in server.incoming_requests() {
        handle_request(request, &controller);
    }
    running.store(false, Ordering::Relaxed);
}
