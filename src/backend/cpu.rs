use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use crossbeam_channel::Sender;
use peach_pow::solve::try_nonce;
use peach_pow::trigg::{nonce_tokens, rand64, trigg_generate};
use peach_pow::{solve_difficulty, PeachMap, BRIDGE_V3_SECS, PEACH_CACHE_LEN};

use crate::backend::{BackendEvent, MiningJob, MiningSolution, PowBackend};
use crate::types::unix_time;
use crate::ui;

const IDLE_SLEEP: Duration = Duration::from_millis(2);
const STALE_SLEEP: Duration = Duration::from_millis(50);
const BUILD_WAIT_SLEEP: Duration = Duration::from_millis(100);
const HASH_FLUSH_BATCH: u64 = 64;

struct Shared {
    started: AtomicBool,
    shutdown: AtomicBool,
    current_epoch: AtomicU64,
    solved_epoch: AtomicU64,
    hashes: AtomicU64,
    job: RwLock<Option<Arc<MiningJob>>>,
    map: RwLock<Option<Arc<PeachMap>>>,
    building: AtomicBool,
    build_progress: AtomicUsize,
    event_sink: RwLock<Option<Sender<BackendEvent>>>,
}

pub struct CpuBackend {
    threads: usize,
    shared: Arc<Shared>,
    worker_handles: Vec<JoinHandle<()>>,
}

impl CpuBackend {
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
            shared: Arc::new(Shared {
                started: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                current_epoch: AtomicU64::new(0),
                solved_epoch: AtomicU64::new(0),
                hashes: AtomicU64::new(0),
                job: RwLock::new(None),
                map: RwLock::new(None),
                building: AtomicBool::new(false),
                build_progress: AtomicUsize::new(0),
                event_sink: RwLock::new(None),
            }),
            worker_handles: Vec::new(),
        }
    }
}

impl PowBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn lanes(&self) -> usize {
        self.threads
    }

    fn set_event_sink(&mut self, sink: Sender<BackendEvent>) {
        if let Ok(mut slot) = self.shared.event_sink.write() {
            *slot = Some(sink);
        }
    }

    fn start(&mut self) -> Result<()> {
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.shared.shutdown.store(false, Ordering::SeqCst);
        self.shared.current_epoch.store(0, Ordering::SeqCst);
        self.shared.solved_epoch.store(0, Ordering::SeqCst);

        for thread_idx in 0..self.threads {
            let shared = Arc::clone(&self.shared);
            let lanes = self.threads;
            self.worker_handles.push(thread::spawn(move || {
                cpu_worker_loop(shared, thread_idx, lanes)
            }));
        }

        Ok(())
    }

    fn stop(&mut self) {
        if !self.shared.started.swap(false, Ordering::SeqCst) {
            return;
        }

        self.shared.shutdown.store(true, Ordering::SeqCst);
        for handle in self.worker_handles.drain(..) {
            let _ = handle.join();
        }

        if let Ok(mut job) = self.shared.job.write() {
            *job = None;
        }
        if let Ok(mut map) = self.shared.map.write() {
            *map = None;
        }
        self.shared.current_epoch.store(0, Ordering::SeqCst);
    }

    fn set_job(&self, job: MiningJob) -> Result<()> {
        if !self.shared.started.load(Ordering::SeqCst) {
            return Err(anyhow!("CPU backend is not started"));
        }

        let epoch = job.epoch;
        self.shared.solved_epoch.store(0, Ordering::SeqCst);
        {
            let mut slot = self
                .shared
                .job
                .write()
                .map_err(|_| anyhow!("CPU job lock poisoned"))?;
            *slot = Some(Arc::new(job));
        }
        self.shared.current_epoch.store(epoch, Ordering::SeqCst);
        Ok(())
    }

    fn clear_job(&self) {
        self.shared.current_epoch.store(0, Ordering::SeqCst);
        if let Ok(mut slot) = self.shared.job.write() {
            *slot = None;
        }
    }

    fn take_hashes(&self) -> u64 {
        self.shared.hashes.swap(0, Ordering::AcqRel)
    }
}

impl Drop for CpuBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

fn cpu_worker_loop(shared: Arc<Shared>, thread_idx: usize, lanes: usize) {
    let mut prng = unix_time() as u64 ^ ((thread_idx as u64) << 32);
    let mut local_epoch = 0u64;
    let mut local_job: Option<Arc<MiningJob>> = None;
    let mut pending_hashes = 0u64;

    loop {
        if shared.shutdown.load(Ordering::Relaxed) {
            flush_hashes(&shared, &mut pending_hashes);
            break;
        }

        let current_epoch = shared.current_epoch.load(Ordering::Acquire);
        if current_epoch == 0 {
            flush_hashes(&shared, &mut pending_hashes);
            local_job = None;
            thread::sleep(IDLE_SLEEP);
            continue;
        }

        if current_epoch != local_epoch {
            flush_hashes(&shared, &mut pending_hashes);
            let next_job = match shared.job.read() {
                Ok(slot) => slot.clone(),
                Err(_) => {
                    emit_error(&shared, format!("cpu thread {thread_idx}: job lock poisoned"));
                    shared.shutdown.store(true, Ordering::SeqCst);
                    break;
                }
            };
            let Some(job) = next_job else {
                thread::sleep(IDLE_SLEEP);
                continue;
            };
            if job.epoch != current_epoch {
                thread::yield_now();
                continue;
            }
            local_epoch = current_epoch;
            local_job = Some(job);
        }

        let Some(job) = local_job.as_ref() else {
            thread::sleep(IDLE_SLEEP);
            continue;
        };

        // Stale conditions mirror the device orchestrator: solved epoch,
        // empty trailer, or a block older than the bridge time.
        if shared.solved_epoch.load(Ordering::Relaxed) == local_epoch
            || job.trailer.tcount() == 0
            || unix_time().saturating_sub(job.trailer.time0()) >= BRIDGE_V3_SECS
        {
            flush_hashes(&shared, &mut pending_hashes);
            thread::sleep(STALE_SLEEP);
            continue;
        }

        let Some(map) = current_map(&shared, job.as_ref(), thread_idx, lanes) else {
            thread::sleep(BUILD_WAIT_SLEEP);
            continue;
        };

        // One candidate per iteration: full nonce from the haiku tables,
        // full pipeline against the prebuilt map.
        let mut nonce = [0u8; 32];
        let mut half = [0u8; 16];
        trigg_generate(&mut prng, &mut half);
        nonce[..16].copy_from_slice(&half);
        let (hi_a, hi_b) = nonce_tokens(rand64(&mut prng));
        nonce[16..24].copy_from_slice(&hi_a.to_le_bytes());
        nonce[24..].copy_from_slice(&hi_b.to_le_bytes());

        let diff = solve_difficulty(&job.trailer, job.share_diff);
        let found = try_nonce(map.as_ref(), &job.trailer, &nonce, diff);

        pending_hashes += 1;
        if pending_hashes >= HASH_FLUSH_BATCH {
            flush_hashes(&shared, &mut pending_hashes);
        }

        if let Some(hash) = found {
            if shared
                .solved_epoch
                .compare_exchange(0, local_epoch, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                flush_hashes(&shared, &mut pending_hashes);
                let mut trailer = job.trailer;
                trailer.set_nonce(&nonce);
                emit_event(
                    &shared,
                    BackendEvent::Solution(MiningSolution {
                        epoch: local_epoch,
                        job_id: Arc::clone(&job.job_id),
                        trailer,
                        hash,
                        backend: "cpu",
                    }),
                );
            }
        }
    }
}

/// Map for the job's phash, building it cooperatively when missing. The
/// first thread to claim the build runs it (internally parallel); the rest
/// wait. Returns `None` while a build is in flight.
fn current_map(
    shared: &Arc<Shared>,
    job: &MiningJob,
    thread_idx: usize,
    lanes: usize,
) -> Option<Arc<PeachMap>> {
    if let Ok(slot) = shared.map.read() {
        if let Some(map) = slot.as_ref() {
            if map.phash() == job.trailer.phash() {
                return Some(Arc::clone(map));
            }
        }
    }

    if shared.building.swap(true, Ordering::AcqRel) {
        return None;
    }

    // Double-check under the claim: another thread may have finished the
    // build between our read and the claim.
    if let Ok(slot) = shared.map.read() {
        if let Some(map) = slot.as_ref() {
            if map.phash() == job.trailer.phash() {
                shared.building.store(false, Ordering::Release);
                return Some(Arc::clone(map));
            }
        }
    }

    ui::info(
        "CPU",
        format!(
            "thread {thread_idx}: building peach map ({PEACH_CACHE_LEN} tiles, {lanes} workers)"
        ),
    );
    let started = Instant::now();
    shared.build_progress.store(0, Ordering::Release);
    let map = PeachMap::build(
        job.trailer.phash(),
        lanes,
        &shared.build_progress,
        &shared.shutdown,
    );

    let mut result = None;
    if !shared.shutdown.load(Ordering::Relaxed) {
        ui::info(
            "CPU",
            format!("peach map built in {:.1}s", started.elapsed().as_secs_f64()),
        );
        let map = Arc::new(map);
        if let Ok(mut slot) = shared.map.write() {
            *slot = Some(Arc::clone(&map));
        }
        result = Some(map);
    }
    shared.building.store(false, Ordering::Release);
    result
}

fn flush_hashes(shared: &Shared, pending: &mut u64) {
    if *pending > 0 {
        shared.hashes.fetch_add(*pending, Ordering::Relaxed);
        *pending = 0;
    }
}

fn emit_error(shared: &Shared, message: String) {
    emit_event(
        shared,
        BackendEvent::Error {
            backend: "cpu",
            message,
        },
    );
}

fn emit_event(shared: &Shared, event: BackendEvent) {
    let sink = match shared.event_sink.read() {
        Ok(slot) => slot.clone(),
        Err(_) => None,
    };
    if let Some(sink) = sink {
        let _ = sink.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Simultaneous finders race on the solved-epoch slot; exactly one CAS
    /// wins and later finders leave it intact.
    #[test]
    fn solve_publication_has_a_single_winner() {
        let solved = AtomicU64::new(0);
        let winners = AtomicU64::new(0);

        thread::scope(|scope| {
            for _ in 0..8 {
                let solved = &solved;
                let winners = &winners;
                scope.spawn(move || {
                    if solved
                        .compare_exchange(0, 42, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert_eq!(solved.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn set_job_requires_started_backend() {
        let backend = CpuBackend::new(1);
        let job = MiningJob {
            epoch: 1,
            job_id: Arc::from("j1"),
            trailer: peach_pow::BlockTrailer::default(),
            share_diff: 0,
        };
        assert!(backend.set_job(job).is_err());
    }
}
