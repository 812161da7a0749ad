mod backend;
mod config;
mod stratum;
mod types;
mod ui;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use crossbeam_channel::{after, unbounded, Receiver};
use peach_pow::solve::peach_hash;
use peach_pow::trigg::{nonce_tokens, rand64, trigg_generate};
use peach_pow::TileCompute;
use serde::Serialize;

use backend::cpu::CpuBackend;
use backend::opencl::OpenclBackend;
use backend::{BackendEvent, MiningJob, MiningSolution, PowBackend};
use config::{BackendKind, Config};
use stratum::{StratumCommand, StratumEvent};
use types::{format_hashrate, trailer_from_job, unix_time};

const MIN_EVENT_WAIT: Duration = Duration::from_millis(1);
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(200);

struct Stats {
    started_at: Instant,
    hashes: u64,
    jobs: u64,
    submitted: u64,
    accepted: u64,
    rejected: u64,
}

impl Stats {
    fn new() -> Self {
        Self {
            started_at: Instant::now(),
            hashes: 0,
            jobs: 0,
            submitted: 0,
            accepted: 0,
            rejected: 0,
        }
    }

    fn print(&self) {
        let elapsed = self.started_at.elapsed().as_secs_f64().max(0.001);
        ui::info(
            "STATS",
            format!(
                "{:.0}s elapsed | {} | jobs={} submitted={} accepted={} rejected={}",
                elapsed,
                format_hashrate(self.hashes as f64 / elapsed),
                self.jobs,
                self.submitted,
                self.accepted,
                self.rejected,
            ),
        );
    }
}

fn main() {
    if let Err(err) = run() {
        ui::error("FATAL", format!("{err:#}"));
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cfg = Config::load()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
        })
        .context("failed to install shutdown handler")?;
    }

    if let Some(secs) = cfg.bench {
        return run_benchmark(&cfg, secs, &shutdown);
    }

    ui::startup_banner(
        "peachminer",
        "Peach proof-of-work pool miner",
        &[
            ("pool", format!("{}:{}", cfg.host, cfg.port)),
            ("login", cfg.login()),
            (
                "backends",
                cfg.backends
                    .iter()
                    .map(|b| format!("{b:?}").to_lowercase())
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            ("threads", cfg.threads.to_string()),
        ],
    );

    let (backend_events_tx, backend_events) = unbounded::<BackendEvent>();
    let mut backends: Vec<Box<dyn PowBackend>> = Vec::new();
    for kind in &cfg.backends {
        let mut instance: Box<dyn PowBackend> = match kind {
            BackendKind::Cpu => Box::new(CpuBackend::new(cfg.threads)),
            BackendKind::Opencl => Box::new(OpenclBackend::new(cfg.device)),
        };
        instance.set_event_sink(backend_events_tx.clone());
        match instance.start() {
            Ok(()) => {
                ui::success(
                    "BACKEND",
                    format!("{} started ({} lanes)", instance.name(), instance.lanes()),
                );
                backends.push(instance);
            }
            Err(err) => {
                ui::warn(
                    "BACKEND",
                    format!("{} unavailable: {err:#}", instance.name()),
                );
            }
        }
    }
    if backends.is_empty() {
        bail!("no mining backend could be started");
    }

    let (client, stratum_events) = stratum::spawn_client(
        cfg.host.clone(),
        cfg.port,
        cfg.login(),
        Arc::clone(&shutdown),
    );

    let result = run_mining_loop(&cfg, &shutdown, &mut backends, &backend_events, &stratum_events, &client.commands);

    for instance in &mut backends {
        instance.stop();
    }
    shutdown.store(true, Ordering::SeqCst);
    client.join();
    result
}

fn run_mining_loop(
    cfg: &Config,
    shutdown: &AtomicBool,
    backends: &mut Vec<Box<dyn PowBackend>>,
    backend_events: &Receiver<BackendEvent>,
    stratum_events: &Receiver<StratumEvent>,
    submit_tx: &crossbeam_channel::Sender<StratumCommand>,
) -> Result<()> {
    let mut stats = Stats::new();
    let mut epoch = 0u64;
    let mut share_diff = 0u8;
    let mut current_job: Option<MiningJob> = None;
    let mut last_stats_print = Instant::now();

    while !shutdown.load(Ordering::Relaxed) {
        crossbeam_channel::select! {
            recv(stratum_events) -> event => {
                // A closed channel means the client thread is gone, which
                // only happens on shutdown.
                let Ok(event) = event else { break };
                handle_stratum_event(
                    event,
                    &mut epoch,
                    &mut share_diff,
                    &mut current_job,
                    backends,
                    &mut stats,
                )?;
            }
            recv(backend_events) -> event => {
                let Ok(event) = event else { break };
                handle_backend_event(event, epoch, submit_tx, &mut stats);
            }
            recv(after(EVENT_POLL_INTERVAL.max(MIN_EVENT_WAIT))) -> _ => {}
        }

        for instance in backends.iter() {
            stats.hashes += instance.take_hashes();
        }
        if last_stats_print.elapsed() >= cfg.stats_interval() {
            stats.print();
            last_stats_print = Instant::now();
        }
    }

    stats.print();
    ui::info("MAIN", "peachminer stopped");
    Ok(())
}

fn handle_stratum_event(
    event: StratumEvent,
    epoch: &mut u64,
    share_diff: &mut u8,
    current_job: &mut Option<MiningJob>,
    backends: &mut [Box<dyn PowBackend>],
    stats: &mut Stats,
) -> Result<()> {
    match event {
        StratumEvent::Connected => {
            ui::info("STRATUM", "connected, authorizing");
        }
        StratumEvent::Authorized => {
            ui::success("STRATUM", "authorized, waiting for work");
        }
        StratumEvent::Disconnected => {
            ui::warn("STRATUM", "disconnected; idling backends");
            *current_job = None;
            for instance in backends.iter() {
                instance.clear_job();
            }
        }
        StratumEvent::Job(job) => {
            let mut trailer = trailer_from_job(&job);
            // Some pools send time0 = 0; without a start time the bridge
            // age check would mark the job stale on arrival.
            if trailer.time0() == 0 {
                trailer.set_time0(unix_time());
            }
            *epoch += 1;
            stats.jobs += 1;
            ui::info(
                "JOB",
                format!(
                    "job {} diff={} clean={} epoch={}",
                    job.job_id,
                    trailer.difficulty(),
                    job.clean,
                    epoch
                ),
            );
            let mining_job = MiningJob {
                epoch: *epoch,
                job_id: Arc::from(job.job_id.as_str()),
                trailer,
                share_diff: *share_diff,
            };
            dispatch_job(backends, &mining_job);
            *current_job = Some(mining_job);
        }
        StratumEvent::Difficulty(diff) => {
            ui::info("STRATUM", format!("pool difficulty set to {diff}"));
            *share_diff = diff;
            // Re-dispatch so in-flight work picks the new share target up.
            if let Some(job) = current_job.as_mut() {
                *epoch += 1;
                job.epoch = *epoch;
                job.share_diff = diff;
                let job = job.clone();
                dispatch_job(backends, &job);
            }
        }
        StratumEvent::ShareAccepted { accepted, rejected } => {
            stats.accepted = accepted;
            stats.rejected = rejected;
            ui::success("SHARE", format!("accepted ({accepted}/{})", accepted + rejected));
        }
        StratumEvent::ShareRejected { accepted, rejected } => {
            stats.accepted = accepted;
            stats.rejected = rejected;
            ui::warn("SHARE", format!("rejected ({rejected}/{})", accepted + rejected));
        }
    }
    Ok(())
}

fn dispatch_job(backends: &[Box<dyn PowBackend>], job: &MiningJob) {
    for instance in backends {
        if let Err(err) = instance.set_job(job.clone()) {
            ui::warn(
                "BACKEND",
                format!("failed to set job on {}: {err:#}", instance.name()),
            );
        }
    }
}

fn handle_backend_event(
    event: BackendEvent,
    epoch: u64,
    submit_tx: &crossbeam_channel::Sender<StratumCommand>,
    stats: &mut Stats,
) {
    match event {
        BackendEvent::Solution(solution) => {
            if solution.epoch != epoch {
                ui::info(
                    "SOLVE",
                    format!("stale solution from {} discarded", solution.backend),
                );
                return;
            }
            submit_solution(solution, submit_tx, stats);
        }
        BackendEvent::Error { backend, message } => {
            // The failed worker has already stopped itself; remaining
            // workers and backends keep mining.
            ui::error("BACKEND", format!("{backend} failed: {message}"));
        }
    }
}

fn submit_solution(
    solution: MiningSolution,
    submit_tx: &crossbeam_channel::Sender<StratumCommand>,
    stats: &mut Stats,
) {
    let MiningSolution {
        job_id,
        mut trailer,
        hash,
        backend,
        ..
    } = solution;
    trailer.set_stime(unix_time());
    trailer.set_bhash(&hash);

    ui::success(
        "SOLVE",
        format!("{backend} solved job {job_id}, submitting share"),
    );
    stats.submitted += 1;
    let _ = submit_tx.send(StratumCommand::Submit {
        job_id: job_id.to_string(),
        nonce: *trailer.nonce(),
        hash,
    });
}

#[derive(Debug, Serialize)]
struct BenchReport {
    threads: usize,
    bench_secs: u64,
    hashes: u64,
    hps: f64,
}

/// CPU reference pipeline benchmark: on-demand tiles, fixed trailer, all
/// configured threads.
fn run_benchmark(cfg: &Config, secs: u64, shutdown: &AtomicBool) -> Result<()> {
    let secs = secs.max(1);
    ui::info(
        "BENCH",
        format!("cpu reference pipeline, {} threads, {secs}s", cfg.threads),
    );

    let mut trailer = peach_pow::BlockTrailer::default();
    trailer.set_tcount(1);
    trailer.set_difficulty(255);
    let deadline = Instant::now() + Duration::from_secs(secs);
    let total = AtomicU64::new(0);

    thread::scope(|scope| {
        for lane in 0..cfg.threads {
            let total = &total;
            let trailer = &trailer;
            scope.spawn(move || {
                let tiles = TileCompute { phash: &[0u8; 32] };
                let mut prng = 0x6265_6e63_68u64 ^ ((lane as u64) << 32);
                let mut nonce = [0u8; 32];
                let mut local = 0u64;
                while Instant::now() < deadline && !shutdown.load(Ordering::Relaxed) {
                    let mut half = [0u8; 16];
                    trigg_generate(&mut prng, &mut half);
                    nonce[..16].copy_from_slice(&half);
                    let (a, b) = nonce_tokens(rand64(&mut prng));
                    nonce[16..24].copy_from_slice(&a.to_le_bytes());
                    nonce[24..].copy_from_slice(&b.to_le_bytes());
                    let _ = peach_hash(&tiles, trailer, &nonce);
                    local += 1;
                }
                total.fetch_add(local, Ordering::Relaxed);
            });
        }
    });

    let hashes = total.load(Ordering::Relaxed);
    let report = BenchReport {
        threads: cfg.threads,
        bench_secs: secs,
        hashes,
        hps: hashes as f64 / secs as f64,
    };
    ui::info(
        "BENCH",
        format!("{} over {secs}s", format_hashrate(report.hps)),
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("failed to serialize bench report")?
    );
    Ok(())
}
