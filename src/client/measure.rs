//! Periodic local measurements feeding the telemetry queue.

use std::path::Path;
use std::time::Duration;

use sysinfo::{Disks, Networks, System};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::pb::{LaptopInfo, MemoryUsage, Network};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Takes snapshots of this machine's resource usage.
///
/// Network figures are byte deltas since the previous snapshot; the first
/// snapshot reports the traffic since the sampler was created.
pub struct Sampler {
    device_id: String,
    system: System,
    disks: Disks,
    networks: Networks,
    last_network: (u64, u64),
}

impl Sampler {
    /// Creates a sampler reporting as `device_id`, or the host name if `None`.
    pub fn new(device_id: Option<String>) -> Self {
        let device_id = device_id
            .or_else(System::host_name)
            .unwrap_or_else(|| "unknown".to_string());

        let mut system = System::new();
        system.refresh_cpu();
        let networks = Networks::new_with_refreshed_list();
        let last_network = network_totals(&networks);

        Self {
            device_id,
            system,
            disks: Disks::new_with_refreshed_list(),
            networks,
            last_network,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Refreshes every source and returns one snapshot.
    pub fn sample(&mut self) -> LaptopInfo {
        self.system.refresh_cpu();
        self.system.refresh_memory();
        self.disks.refresh();
        self.networks.refresh();

        let totals = network_totals(&self.networks);
        let network = network_delta(self.last_network, totals);
        self.last_network = totals;

        LaptopInfo {
            id: self.device_id.clone(),
            battery: battery_percent().unwrap_or(0),
            cpu_usage: f64::from(self.system.global_cpu_info().cpu_usage()),
            ram: Some(usage(
                self.system.total_memory(),
                self.system.used_memory(),
            )),
            storage: root_disk_usage(&self.disks),
            network: Some(network),
        }
    }
}

/// Samples every `interval` into `queue` until `limit` snapshots were queued,
/// `shutdown` fires or the queue closes. Returns how many were queued.
///
/// A full queue delays the next sample rather than dropping one.
pub async fn run_sampler(
    mut sampler: Sampler,
    interval: Duration,
    limit: Option<usize>,
    queue: mpsc::Sender<LaptopInfo>,
    shutdown: CancellationToken,
) -> usize {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut queued = 0;

    info!(device = %sampler.device_id(), ?interval, "measurement loop started");
    while limit.map_or(true, |limit| queued < limit) {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let snapshot = sampler.sample();
        debug!(cpu = snapshot.cpu_usage, "sampled laptop info");
        if queue.send(snapshot).await.is_err() {
            debug!("telemetry queue closed");
            break;
        }
        queued += 1;
    }

    info!(queued, "measurement loop stopped");
    queued
}

fn usage(total_bytes: u64, used_bytes: u64) -> MemoryUsage {
    let percent = if total_bytes == 0 {
        0.0
    } else {
        used_bytes as f64 / total_bytes as f64 * 100.0
    };

    MemoryUsage {
        total_memory: total_bytes as f64 / GIB,
        current_memory: used_bytes as f64 / GIB,
        usage: percent,
    }
}

fn root_disk_usage(disks: &Disks) -> Option<MemoryUsage> {
    let disk = disks
        .iter()
        .find(|disk| disk.mount_point() == Path::new("/"))
        .or_else(|| disks.iter().next())?;

    let total = disk.total_space();
    Some(usage(total, total.saturating_sub(disk.available_space())))
}

fn network_totals(networks: &Networks) -> (u64, u64) {
    networks.iter().fold((0u64, 0u64), |(rx, tx), (_, data)| {
        (
            rx.saturating_add(data.total_received()),
            tx.saturating_add(data.total_transmitted()),
        )
    })
}

/// Byte deltas between two counter readings. Counters that went backwards
/// (an interface vanished or reset) count as no traffic.
fn network_delta(previous: (u64, u64), current: (u64, u64)) -> Network {
    Network {
        rx: current.0.saturating_sub(previous.0),
        tx: current.1.saturating_sub(previous.1),
    }
}

/// Charge of the first battery the kernel exposes, if any.
fn battery_percent() -> Option<u32> {
    let entries = std::fs::read_dir("/sys/class/power_supply").ok()?;
    entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("BAT"))
        .find_map(|entry| {
            std::fs::read_to_string(entry.path().join("capacity"))
                .ok()?
                .trim()
                .parse::<u32>()
                .ok()
        })
        .map(|percent| percent.min(100))
}
