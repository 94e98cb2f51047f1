use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use clap::{Parser, Subcommand};
use pcbook::client::{self, telemetry_queue, ClientConfig, Sampler};
use pcbook::pb::{
    keyboard, laptop, memory, screen, storage, Cpu, Filter, Gpu, Keyboard, Laptop, LaptopInfo,
    Memory, Screen, Storage,
};
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "Laptop catalog client", long_about = None)]
struct Cli {
    #[arg(short, long, env = "PCBOOK_SERVER", default_value = "http://127.0.0.1:8080")]
    server: String,

    #[arg(short, long, env = "PCBOOK_USERNAME", default_value = "admin")]
    username: String,

    #[arg(short, long, env = "PCBOOK_PASSWORD", default_value = "secret")]
    password: String,

    /// Seconds between access token renewals
    #[arg(long, default_value_t = 30)]
    refresh_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and print the access token
    Login,

    /// Create randomly generated laptops
    Create {
        #[arg(short, long, default_value_t = 1)]
        count: usize,

        /// Explicit id for the first laptop
        #[arg(long)]
        id: Option<String>,
    },

    /// Search the catalog
    Search {
        #[arg(long, default_value_t = 3000)]
        max_price: u32,

        #[arg(long, default_value_t = 4)]
        min_cores: u32,

        #[arg(long, default_value_t = 2.5)]
        min_ghz: f64,

        /// Minimum RAM in gigabytes
        #[arg(long, default_value_t = 8)]
        min_ram_gb: u64,
    },

    /// Upload an image file for a laptop
    Upload {
        #[arg(short, long)]
        laptop_id: String,

        #[arg(short, long)]
        image: PathBuf,
    },

    /// Rate laptops on a single stream
    Rate {
        #[arg(short, long, value_delimiter = ',', help = "Comma-separated laptop IDs")]
        laptop_ids: Vec<String>,

        #[arg(
            short,
            long,
            value_delimiter = ',',
            help = "Comma-separated scores (must match order of laptop IDs)"
        )]
        scores: Vec<f64>,
    },

    /// Stream periodic measurements of this machine until Ctrl+C or --count
    Telemetry {
        #[arg(long, default_value_t = client::telemetry::DEFAULT_QUEUE_CAPACITY)]
        queue_capacity: usize,

        /// Seconds between measurements
        #[arg(long, default_value_t = 2)]
        interval_secs: u64,

        /// Stop after this many measurements
        #[arg(long)]
        count: Option<usize>,

        /// Device id to report instead of the host name
        #[arg(long)]
        device_id: Option<String>,

        /// Read newline-delimited JSON snapshots from stdin instead of measuring
        #[arg(long)]
        stdin: bool,
    },
}

const MODELS: &[(&str, &[&str])] = &[
    ("Apple", &["Macbook Air", "Macbook Pro"]),
    ("Dell", &["Latitude", "Vostro", "XPS", "Alienware"]),
    ("Lenovo", &["Thinkpad X1", "Thinkpad P1", "Thinkpad P53"]),
];

fn random_memory(rng: &mut impl Rng, choices: &[u64], unit: memory::Unit) -> Memory {
    Memory {
        value: choices.choose(rng).copied().unwrap_or(choices[0]),
        unit: unit as i32,
    }
}

fn random_laptop(rng: &mut impl Rng, id: String) -> Laptop {
    let (brand, names) = *MODELS.choose(rng).unwrap_or(&MODELS[0]);

    let cores = rng.gen_range(2..=8u32);
    let min_ghz = rng.gen_range(2.0..3.5);
    let cpu = Cpu {
        brand: ["Intel", "AMD"].choose(rng).copied().unwrap_or("Intel").to_string(),
        name: "Core i7-9750H".to_string(),
        number_cores: cores,
        number_threads: rng.gen_range(cores..=12),
        min_ghz,
        max_ghz: rng.gen_range(min_ghz..5.0),
    };

    let gpu_min_ghz = rng.gen_range(1.0..1.5);
    let gpu = Gpu {
        brand: "NVIDIA".to_string(),
        name: "RTX 2070".to_string(),
        min_ghz: gpu_min_ghz,
        max_ghz: rng.gen_range(gpu_min_ghz..2.0),
        memory: Some(random_memory(rng, &[2, 4, 6], memory::Unit::Gigabyte)),
    };

    let width = rng.gen_range(1080..=4320u32);
    Laptop {
        id,
        brand: brand.to_string(),
        name: names.choose(rng).copied().unwrap_or(names[0]).to_string(),
        cpu: Some(cpu),
        ram: Some(random_memory(rng, &[4, 8, 16, 32, 64], memory::Unit::Gigabyte)),
        gpus: vec![gpu],
        storages: vec![
            Storage {
                driver: storage::Driver::Ssd as i32,
                memory: Some(random_memory(rng, &[128, 256, 512, 1024], memory::Unit::Gigabyte)),
            },
            Storage {
                driver: storage::Driver::Hdd as i32,
                memory: Some(random_memory(rng, &[1, 2, 4, 6], memory::Unit::Terabyte)),
            },
        ],
        screen: Some(Screen {
            size_inch: rng.gen_range(13.0..17.0),
            resolution: Some(screen::Resolution {
                width,
                height: width * 9 / 16,
            }),
            panel: [screen::Panel::Ips, screen::Panel::Oled]
                .choose(rng)
                .copied()
                .unwrap_or(screen::Panel::Ips) as i32,
            multitouch: rng.gen(),
        }),
        keyboard: Some(Keyboard {
            layout: [
                keyboard::Layout::Qwerty,
                keyboard::Layout::Qwertz,
                keyboard::Layout::Azerty,
            ]
            .choose(rng)
            .copied()
            .unwrap_or(keyboard::Layout::Qwerty) as i32,
            backlit: rng.gen(),
        }),
        weight: Some(laptop::Weight::WeightKg(rng.gen_range(1.0..3.0))),
        price: rng.gen_range(1500..=3500),
        release_year: rng.gen_range(2015..=2019),
        updated_at: Some(prost_types::Timestamp::from(SystemTime::now())),
    }
}

async fn forward_stdin(tx: &mpsc::Sender<LaptopInfo>) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LaptopInfo>(&line) {
            Ok(snapshot) => {
                if tx.send(snapshot).await.is_err() {
                    warn!("telemetry stream closed early");
                    break;
                }
            }
            Err(e) => error!("skipping malformed snapshot: {e}"),
        }
    }
    Ok(())
}

fn image_type(path: &std::path::Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("bin")
        .to_string()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ClientConfig {
        server_url: cli.server.clone(),
        username: cli.username.clone(),
        password: cli.password.clone(),
        refresh_interval: Duration::from_secs(cli.refresh_secs.max(1)),
    };

    let (laptops, tokens) = client::connect(&config).await?;

    match cli.command {
        Commands::Login => {
            println!("{}", tokens.current());
        }

        Commands::Create { count, id } => {
            let mut rng = rand::thread_rng();
            let mut explicit = id;

            for _ in 0..count.max(1) {
                let laptop = random_laptop(&mut rng, explicit.take().unwrap_or_default());
                match laptops.create_laptop(laptop).await {
                    Ok(id) => println!("Created laptop {id}"),
                    Err(status) => {
                        eprintln!("Failed: {}", status.message());
                        std::process::exit(1);
                    }
                }
            }
        }

        Commands::Search {
            max_price,
            min_cores,
            min_ghz,
            min_ram_gb,
        } => {
            let filter = Filter {
                max_price,
                min_cpu_cores: min_cores,
                min_cpu_ghz: min_ghz,
                min_ram: Some(Memory {
                    value: min_ram_gb,
                    unit: memory::Unit::Gigabyte as i32,
                }),
            };

            let found = laptops.search_laptop(filter).await?;
            for laptop in &found {
                let cores = laptop.cpu.as_ref().map_or(0, |cpu| cpu.number_cores);
                println!(
                    "{}  {} {}  {} cores  ${}",
                    laptop.id, laptop.brand, laptop.name, cores, laptop.price
                );
            }
            println!("{} laptops found", found.len());
        }

        Commands::Upload { laptop_id, image } => {
            let data = tokio::fs::read(&image).await?;
            let response = laptops
                .upload_image(&laptop_id, &image_type(&image), &data)
                .await?;
            println!("Uploaded image {} ({} bytes)", response.id, response.size);
        }

        Commands::Rate { laptop_ids, scores } => {
            if laptop_ids.len() != scores.len() {
                eprintln!(
                    "Error: Number of laptop IDs ({}) does not match number of scores ({})",
                    laptop_ids.len(),
                    scores.len()
                );
                std::process::exit(1);
            }

            let responses = laptops
                .rate_laptop(laptop_ids.into_iter().zip(scores).collect())
                .await?;
            for response in responses {
                println!(
                    "{}  rated {} times, average {:.2}",
                    response.laptop_id, response.rated_count, response.average_score
                );
            }
        }

        Commands::Telemetry {
            queue_capacity,
            interval_secs,
            count,
            device_id,
            stdin,
        } => {
            let (tx, rx) = telemetry_queue(queue_capacity);
            let sender = tokio::spawn(laptops.telemetry_sender(rx).run());

            if stdin {
                forward_stdin(&tx).await?;
            } else {
                let shutdown = CancellationToken::new();
                let mut measuring = tokio::spawn(client::run_sampler(
                    Sampler::new(device_id),
                    Duration::from_secs(interval_secs.max(1)),
                    count,
                    tx.clone(),
                    shutdown.clone(),
                ));

                let queued = tokio::select! {
                    joined = &mut measuring => joined?,
                    result = signal::ctrl_c() => {
                        if let Err(e) = result {
                            error!("Failed to listen for Ctrl+C: {e}");
                        }
                        info!("Stopping measurements");
                        shutdown.cancel();
                        measuring.await?
                    }
                };
                info!(queued, "measurements queued");
            }
            drop(tx);

            let response = sender.await??;
            info!(received = response.received, "telemetry done");
            println!("{}", response.msg);
        }
    }

    tokens.stop();
    Ok(())
}
