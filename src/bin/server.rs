use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use crossterm::execute;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use pcbook::bus::BroadcastBus;
use pcbook::pb::{AuthServiceServer, LaptopInfo, LaptopServiceServer};
use pcbook::server::{self, AuthServiceImpl, LaptopServiceImpl, ServerConfig};
use pcbook::store::{DiskImageStore, LaptopStore, RatingStore, UserStore};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic_health::server::{health_reporter, HealthReporter};
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "server")]
#[command(about = "Laptop catalog gRPC server", long_about = None)]
#[command(version)]
struct Args {
    /// Host to bind to (overrides configuration)
    #[arg(short = 'H', long, env = "PCBOOK_HOST")]
    host: Option<String>,

    /// Port to listen on (overrides configuration)
    #[arg(short, long, env = "PCBOOK_PORT")]
    port: Option<u16>,

    /// Directory uploaded images are written to
    #[arg(long)]
    image_dir: Option<PathBuf>,

    /// Enable the Prometheus metrics endpoint
    #[arg(long)]
    metrics: bool,

    /// Metrics port
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Run without the interactive console
    #[arg(long)]
    headless: bool,
}

enum Command {
    Status,
    Laptops,
    Images,
    Users,
    Help,
    Quit,
    Unknown(String),
}

impl Command {
    fn parse(input: &str) -> Self {
        let input = input.trim();

        if input.is_empty() {
            return Command::Unknown(String::new());
        }

        if !input.starts_with('/') {
            return Command::Unknown(
                "Commands must start with '/'. Type /help for available commands.".to_string(),
            );
        }

        let cmd = input.split_whitespace().next().unwrap_or("").to_lowercase();

        match cmd.as_str() {
            "/status" | "/st" => Command::Status,
            "/laptops" | "/l" => Command::Laptops,
            "/images" | "/i" => Command::Images,
            "/users" | "/u" => Command::Users,
            "/help" | "/h" | "/?" => Command::Help,
            "/quit" | "/exit" | "/q" => Command::Quit,
            _ => Command::Unknown(format!(
                "Unknown command: {cmd}. Type /help for available commands."
            )),
        }
    }
}

fn print_colored(color: Color, text: &str) {
    let mut stdout = io::stdout();
    execute!(stdout, SetForegroundColor(color), Print(text), ResetColor).ok();
    stdout.flush().ok();
}

fn println_colored(color: Color, text: &str) {
    print_colored(color, text);
    println!();
}

fn display_banner() {
    println!();
    println_colored(
        Color::Cyan,
        "+---------------------------------------------------------+",
    );
    println_colored(
        Color::Cyan,
        "|              pcbook Laptop Catalog Server               |",
    );
    println_colored(
        Color::Cyan,
        "+---------------------------------------------------------+",
    );
    println!();
}

fn display_help() {
    println!();
    println_colored(Color::Yellow, "Available Commands:");
    println!();
    println!("  /status              - Show server status and configuration");
    println!("  /laptops             - Show stored laptop count");
    println!("  /images              - Show stored image count");
    println!("  /users               - Show registered user count");
    println!("  /help                - Show this help message");
    println!("  /quit or /exit       - Initiate graceful shutdown");
    println!();
}

fn display_prompt(addr: &str) {
    print_colored(Color::Green, &format!("pcbook@{addr}"));
    print_colored(Color::White, "> ");
    io::stdout().flush().ok();
}

/// Logs every republished telemetry snapshot.
async fn log_bus_messages(bus: BroadcastBus, topic: String) {
    let mut rx = bus.subscribe();
    loop {
        match rx.recv().await {
            Ok(message) if message.topic == topic => {
                match serde_json::from_slice::<LaptopInfo>(&message.payload) {
                    Ok(info) => debug!(
                        id = %info.id,
                        battery = info.battery,
                        cpu_usage = info.cpu_usage,
                        "telemetry update"
                    ),
                    Err(e) => warn!("undecodable telemetry payload: {e}"),
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!("telemetry log skipped {skipped} messages"),
            Err(RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    display_banner();

    let mut config = ServerConfig::from_env().unwrap_or_else(|e| {
        error!("Failed to load configuration: {e}");
        info!("Using default configuration");
        ServerConfig::default()
    });

    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(image_dir) = args.image_dir {
        config.storage.image_dir = image_dir;
    }
    if args.metrics {
        config.metrics.enabled = true;
    }
    if let Some(metrics_port) = args.metrics_port {
        config.metrics.port = metrics_port;
    }

    if let Err(e) = config.validate() {
        println_colored(Color::Red, &format!("Configuration validation failed: {e}"));
        return Err(e.into());
    }

    let tokens = config.token_manager();
    let users = UserStore::new();
    server::seed_users(&users, &config.bootstrap_users()?).await?;

    let laptops = LaptopStore::new();
    let images = DiskImageStore::new(&config.storage.image_dir);
    let bus = BroadcastBus::new(config.telemetry.bus_capacity);
    tokio::spawn(log_bus_messages(bus.clone(), config.telemetry.topic.clone()));

    let laptop_service = LaptopServiceImpl::new(
        laptops.clone(),
        Arc::new(images.clone()),
        RatingStore::new(),
        Arc::new(bus.clone()),
    )
    .with_topic(config.telemetry.topic.clone());
    let auth_service = AuthServiceImpl::new(users.clone(), tokens.clone());

    if config.metrics.enabled {
        let metrics_addr = config.metrics.addr()?;
        if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .install()
        {
            error!("Failed to start metrics server: {e}");
        } else {
            info!("Metrics server started on {metrics_addr}");
        }
    }

    let (mut health_reporter, health_service) = health_reporter();
    health_reporter
        .set_serving::<LaptopServiceServer<LaptopServiceImpl>>()
        .await;
    health_reporter
        .set_serving::<AuthServiceServer<AuthServiceImpl>>()
        .await;

    let addr = config.addr()?;
    let addr_str = addr.to_string();

    println_colored(Color::Green, &format!("Server starting on {addr}"));
    println_colored(
        Color::White,
        &format!("  Image directory: {}", config.storage.image_dir.display()),
    );
    println_colored(
        Color::White,
        &format!("  Token lifetime: {}s", config.auth.token_duration_secs),
    );
    println_colored(
        Color::White,
        &format!(
            "  Metrics: {}",
            if config.metrics.enabled { "enabled" } else { "disabled" }
        ),
    );
    println_colored(Color::White, "  Health check: enabled");
    println!();

    let shutdown = CancellationToken::new();
    let server_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        let reporter = health_reporter.clone();
        let layer = server::auth_layer(tokens);
        async move {
            Server::builder()
                .layer(layer)
                .add_service(health_service)
                .add_service(AuthServiceServer::new(auth_service))
                .add_service(LaptopServiceServer::new(laptop_service))
                .serve_with_shutdown(addr, shutdown_signal(reporter, shutdown))
                .await
        }
    });

    if args.headless {
        shutdown.cancelled().await;
    } else {
        println_colored(
            Color::Yellow,
            "Type /help for available commands or /quit to exit",
        );
        println!();
        run_console(&addr_str, &config, &laptops, &images, &users, &bus, &shutdown).await;
    }

    match server_handle.await {
        Ok(Ok(())) => {
            println_colored(Color::Green, "Server shutdown complete. Goodbye!");
        }
        Ok(Err(e)) => {
            println_colored(Color::Red, &format!("Server error: {e}"));
        }
        Err(e) => {
            println_colored(Color::Red, &format!("Server task panicked: {e}"));
        }
    }

    println!();
    Ok(())
}

async fn run_console(
    addr: &str,
    config: &ServerConfig,
    laptops: &LaptopStore,
    images: &DiskImageStore,
    users: &UserStore,
    bus: &BroadcastBus,
    shutdown: &CancellationToken,
) {
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);
    let mut line = String::new();

    loop {
        display_prompt(addr);

        line.clear();
        let read = tokio::select! {
            read = reader.read_line(&mut line) => read,
            () = shutdown.cancelled() => break,
        };
        match read {
            Ok(0) => {
                shutdown.cancelled().await;
                break;
            }
            Ok(_) => {}
            Err(e) => {
                println_colored(Color::Red, &format!("Error reading input: {e}"));
                continue;
            }
        }

        match Command::parse(&line) {
            Command::Status => {
                println!();
                println_colored(Color::Cyan, "Server Status:");
                println_colored(Color::White, &format!("  Address: {addr}"));
                println_colored(
                    Color::White,
                    &format!("  Image directory: {}", config.storage.image_dir.display()),
                );
                println_colored(
                    Color::White,
                    &format!("  Telemetry topic: {}", config.telemetry.topic),
                );
                println!();
                println_colored(Color::Cyan, "State:");
                println_colored(Color::White, &format!("  Laptops: {}", laptops.len().await));
                println_colored(Color::White, &format!("  Images: {}", images.len().await));
                println_colored(Color::White, &format!("  Users: {}", users.len().await));
                println_colored(
                    Color::White,
                    &format!("  Bus subscribers: {}", bus.subscriber_count()),
                );
                println!();
            }
            Command::Laptops => {
                let count = laptops.len().await;
                println_colored(Color::Cyan, &format!("Stored laptops: {count}"));
            }
            Command::Images => {
                let count = images.len().await;
                println_colored(Color::Cyan, &format!("Stored images: {count}"));
            }
            Command::Users => {
                let count = users.len().await;
                println_colored(Color::Cyan, &format!("Registered users: {count}"));
            }
            Command::Help => {
                display_help();
            }
            Command::Quit => {
                println!();
                println_colored(Color::Yellow, "Initiating graceful shutdown...");
                shutdown.cancel();
                break;
            }
            Command::Unknown(msg) => {
                if !msg.is_empty() {
                    println_colored(Color::Red, &msg);
                }
            }
        }
    }
}

async fn shutdown_signal(mut health_reporter: HealthReporter, shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install terminate handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
        _ = shutdown.cancelled() => {
            info!("Shutdown requested via console");
        },
    }
    shutdown.cancel();

    health_reporter
        .set_not_serving::<LaptopServiceServer<LaptopServiceImpl>>()
        .await;
    health_reporter
        .set_not_serving::<AuthServiceServer<AuthServiceImpl>>()
        .await;

    info!("Initiating graceful shutdown (allowing in-flight requests to complete)");

    tokio::time::sleep(Duration::from_secs(2)).await;
}
