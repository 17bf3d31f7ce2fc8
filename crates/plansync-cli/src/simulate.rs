//! Two-device convergence simulation
//!
//! Device A and device B share one remote store and sign in as the same
//! identity. A performs random edits at random intervals; afterwards B's
//! local state must equal A's and the remote document.

use anyhow::{Context, Result};
use plansync_core::{
    connect_remote, DocumentPath, Identity, LocalStore, MemoryLocalStore, MpscChildChannel,
    OutboundMessage, RemoteStore, ResolvedKeys, StorageSnapshot, SyncConfig, SyncController,
    ToolDescriptor,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

const IDENTITY: &str = "simulated-user";
const SIMULATION_ENDPOINT: &str = "memory://simulation";
/// Quiet periods to wait for after the last edit before giving up
const SETTLE_ROUNDS: u32 = 20;

/// Simulation parameters
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub tool: ToolDescriptor,
    pub edits: u32,
    pub seed: u64,
    pub sync: SyncConfig,
}

impl SimulationConfig {
    /// Timings short enough to run many edits in a few seconds
    pub fn accelerated_timings() -> SyncConfig {
        SyncConfig::new()
            .with_poll_interval(Duration::from_millis(50))
            .with_debounce(Duration::from_millis(30))
            .with_settle(Duration::from_millis(10))
            .with_handshake_delay(Duration::from_millis(10))
    }
}

/// Counters gathered during a run
#[derive(Debug, Clone, Default)]
pub struct SimulationStats {
    pub writes: u32,
    pub removals: u32,
    pub pushes_a: u64,
    pub pushes_b: u64,
    pub remote_applies_b: u64,
    pub data_ready_b: usize,
}

/// Outcome of a run
#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub tool_id: String,
    pub seed: u64,
    pub stats: SimulationStats,
    pub converged: bool,
    pub divergent_keys: Vec<String>,
    pub elapsed: Duration,
}

impl SimulationReport {
    /// Human-readable summary
    pub fn generate_text(&self) -> String {
        let mut report = String::new();
        let _ = writeln!(report, "=== Plansync Simulation Report ===\n");
        let _ = writeln!(report, "Tool: {}", self.tool_id);
        let _ = writeln!(report, "Seed: {}", self.seed);
        let _ = writeln!(report, "Writes: {}", self.stats.writes);
        let _ = writeln!(report, "Removals: {}", self.stats.removals);
        let _ = writeln!(report, "Pushes (device A): {}", self.stats.pushes_a);
        let _ = writeln!(report, "Pushes (device B): {} (should be 0)", self.stats.pushes_b);
        let _ = writeln!(report, "Remote applications (device B): {}", self.stats.remote_applies_b);
        let _ = writeln!(report, "DATA_READY sent to device B: {}", self.stats.data_ready_b);
        let _ = writeln!(report, "Elapsed: {:.2?}", self.elapsed);

        if !self.divergent_keys.is_empty() {
            let _ = writeln!(report, "\n=== Divergent keys ===");
            for key in &self.divergent_keys {
                let _ = writeln!(report, "- {key}");
            }
        }
        let _ = writeln!(
            report,
            "\n=== Result: {} ===",
            if self.converged { "CONVERGED" } else { "DIVERGED" }
        );
        report
    }
}

struct SimDevice {
    local: Arc<MemoryLocalStore>,
    messages: mpsc::Receiver<OutboundMessage>,
    controller: SyncController,
}

impl SimDevice {
    fn new(tool: &ToolDescriptor, remote: &Arc<dyn RemoteStore>, sync: &SyncConfig) -> Self {
        let local = Arc::new(MemoryLocalStore::new());
        // keep every message so the count at the end is exact
        let (child, messages) = MpscChildChannel::new(sync.child_channel_capacity.max(4096));
        let controller = SyncController::new(
            tool.clone(),
            Arc::clone(&local) as Arc<dyn LocalStore>,
            Arc::clone(remote),
            Arc::new(child),
            sync.clone(),
        );
        Self {
            local,
            messages,
            controller,
        }
    }

    fn snapshot(&self, keys: &ResolvedKeys) -> StorageSnapshot {
        self.local.read(keys)
    }

    fn data_ready_count(&mut self) -> usize {
        let mut count = 0;
        while let Ok(message) = self.messages.try_recv() {
            if message == OutboundMessage::DataReady {
                count += 1;
            }
        }
        count
    }
}

/// Run one simulation
///
/// # Errors
/// Returns error if the remote store cannot be set up or read
pub async fn run_simulation(config: SimulationConfig) -> Result<SimulationReport> {
    let started = Instant::now();
    let mut sync = config.sync.clone();
    if !sync.remote.is_configured() {
        sync.remote.endpoint = Some(SIMULATION_ENDPOINT.to_string());
    }
    let remote = connect_remote(&sync.remote).context("connecting remote store")?;

    let identity = Identity::new(IDENTITY);
    let keys = config
        .tool
        .resolve(Some(&identity))
        .context("tool keys cannot be resolved")?;
    let path = DocumentPath::new(identity.clone(), config.tool.id.clone());

    let mut a = SimDevice::new(&config.tool, &remote, &sync);
    let mut b = SimDevice::new(&config.tool, &remote, &sync);
    a.controller.set_identity(Some(identity.clone()));
    b.controller.set_identity(Some(identity));
    tokio::time::sleep(sync.handshake_delay() + sync.poll_interval()).await;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut stats = SimulationStats::default();
    for i in 0..config.edits {
        let key = &keys[rng.random_range(0..keys.len())];
        if rng.random_bool(0.1) {
            a.local.remove_item(key);
            stats.removals += 1;
        } else {
            let value = format!("edit-{i}-{:08x}", rng.random::<u32>());
            a.local.set_item(key, &value);
            stats.writes += 1;
        }
        let pause = rng.random_range(0..=2 * sync.poll_interval_ms);
        tokio::time::sleep(Duration::from_millis(pause)).await;
    }

    let round = sync.poll_interval() + sync.debounce() + sync.settle();
    let deadline = Instant::now() + round * SETTLE_ROUNDS;
    let mut divergent_keys;
    loop {
        let expected = a.snapshot(&keys);
        let remote_state = remote
            .load(&path)
            .await
            .context("reading remote document")?
            .and_then(|doc| doc.project(&keys))
            .unwrap_or_else(|| StorageSnapshot::absent(keys.iter()));
        let observed = b.snapshot(&keys);

        divergent_keys = keys
            .iter()
            .filter(|k| {
                let want = expected.get(k);
                observed.get(k) != want || remote_state.get(k) != want
            })
            .cloned()
            .collect::<Vec<_>>();
        if divergent_keys.is_empty() || Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(sync.poll_interval()).await;
    }

    stats.pushes_a = a.controller.status().borrow().pushes;
    stats.pushes_b = b.controller.status().borrow().pushes;
    stats.remote_applies_b = b.controller.status().borrow().remote_applies;
    stats.data_ready_b = b.data_ready_count();
    a.controller.shutdown();
    b.controller.shutdown();

    tracing::info!(
        converged = divergent_keys.is_empty(),
        pushes = stats.pushes_a,
        "simulation finished"
    );
    Ok(SimulationReport {
        tool_id: config.tool.id.to_string(),
        seed: config.seed,
        stats,
        converged: divergent_keys.is_empty(),
        divergent_keys,
        elapsed: started.elapsed(),
    })
}
