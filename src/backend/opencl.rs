//! OpenCL mining backend.
//!
//! One worker thread per eligible GPU drives a small state machine over
//! {Null, Init, Idle, Work, Fail}. Init streams build-kernel launches across
//! two command queues until all 2^20 tiles of the peach map are generated;
//! Work double-buffers solve launches on the same two queues, tracking each
//! queue's in-flight kernel with an event and reading the solve slot back
//! only once the event completes. The solve slot is a claim word followed by
//! the 32-byte winning nonce; every GPU solve is re-verified against the CPU
//! reference before it is reported.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use crossbeam_channel::Sender;
use ocl::enums::{DeviceInfo, DeviceInfoResult};
use ocl::{Buffer, Context, Device, Event, Kernel, Platform, Program, Queue};
use peach_pow::{
    peach_check, solve_difficulty, BlockTrailer, BRIDGE_V3_SECS, PEACH_CACHE_LEN, PEACH_MAP_LEN,
};

use crate::backend::{BackendEvent, MiningJob, MiningSolution, PowBackend};
use crate::types::{format_hashrate, unix_time};
use crate::ui;

const BACKEND_NAME: &str = "opencl";
const KERNEL_SRC: &str = include_str!("opencl/peach.cl");

/// Peach map plus working buffers; devices below this are skipped.
const MIN_DEVICE_MEM_BYTES: u64 = 1_200_000_000;
const MAX_LOCAL_SIZE: usize = 256;
const GRID_PER_COMPUTE_UNIT: usize = 256;

/// Solve slot layout: claim word, pad, eight nonce words.
const SOLVE_SLOT_WORDS: usize = 10;

const IDLE_SLEEP: Duration = Duration::from_millis(2);
const PENDING_SLEEP: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Null,
    Init,
    Idle,
    Work,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    Allocated,
    BuildComplete,
    JobReady,
    JobStale,
    PhashChanged,
    SolveFound,
    DeviceError,
}

/// The orchestrator state machine as a pure transition function.
pub fn next_state(state: DeviceState, event: DeviceEvent) -> DeviceState {
    use DeviceEvent::*;
    use DeviceState::*;
    match (state, event) {
        (Null, Allocated) => Init,
        (Init, BuildComplete) => Idle,
        (Idle, JobReady) => Work,
        (Work, PhashChanged) => Init,
        (Work, JobStale) => Idle,
        (Work, SolveFound) => Work,
        (Init | Work, DeviceError) => Fail,
        (state, _) => state,
    }
}

#[derive(Debug, Clone)]
struct DeviceDescriptor {
    platform_idx: usize,
    device_idx: usize,
    id: usize,
    name: String,
    compute_units: u32,
    max_work_group: usize,
    global_mem: u64,
}

impl DeviceDescriptor {
    fn local_size(&self) -> usize {
        self.max_work_group.min(MAX_LOCAL_SIZE).max(1)
    }

    fn global_size(&self) -> usize {
        self.compute_units as usize * GRID_PER_COMPUTE_UNIT * self.local_size()
    }
}

struct Shared {
    started: AtomicBool,
    shutdown: AtomicBool,
    current_epoch: AtomicU64,
    hashes: AtomicU64,
    job: RwLock<Option<Arc<MiningJob>>>,
    event_sink: RwLock<Option<Sender<BackendEvent>>>,
}

pub struct OpenclBackend {
    device_index: Option<usize>,
    lanes: AtomicUsize,
    shared: Arc<Shared>,
    worker_handles: Vec<JoinHandle<()>>,
}

impl OpenclBackend {
    pub fn new(device_index: Option<usize>) -> Self {
        Self {
            device_index,
            lanes: AtomicUsize::new(0),
            shared: Arc::new(Shared {
                started: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                current_epoch: AtomicU64::new(0),
                hashes: AtomicU64::new(0),
                job: RwLock::new(None),
                event_sink: RwLock::new(None),
            }),
            worker_handles: Vec::new(),
        }
    }
}

impl PowBackend for OpenclBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn lanes(&self) -> usize {
        self.lanes.load(Ordering::Acquire)
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

        let descriptors = enumerate_gpus(self.device_index)?;
        if descriptors.is_empty() {
            self.shared.started.store(false, Ordering::SeqCst);
            bail!("no eligible OpenCL GPU found");
        }

        let total_lanes: usize = descriptors.iter().map(DeviceDescriptor::global_size).sum();
        self.lanes.store(total_lanes, Ordering::Release);

        for desc in descriptors {
            ui::info(
                "OPENCL",
                format!(
                    "device {}: {} ({} CU, {} MB, {} threads)",
                    desc.id,
                    desc.name,
                    desc.compute_units,
                    desc.global_mem / 1024 / 1024,
                    desc.global_size()
                ),
            );
            let shared = Arc::clone(&self.shared);
            self.worker_handles
                .push(thread::spawn(move || device_worker_loop(shared, desc)));
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
        self.shared.current_epoch.store(0, Ordering::SeqCst);
    }

    fn set_job(&self, job: MiningJob) -> Result<()> {
        if !self.shared.started.load(Ordering::SeqCst) {
            return Err(anyhow!("OpenCL backend is not started"));
        }
        let epoch = job.epoch;
        {
            let mut slot = self
                .shared
                .job
                .write()
                .map_err(|_| anyhow!("OpenCL job lock poisoned"))?;
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

impl Drop for OpenclBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

fn enumerate_gpus(selector: Option<usize>) -> Result<Vec<DeviceDescriptor>> {
    let mut found = Vec::new();
    for (platform_idx, platform) in Platform::list().into_iter().enumerate() {
        let devices = match Device::list(platform, Some(ocl::flags::DEVICE_TYPE_GPU)) {
            Ok(devices) => devices,
            Err(_) => continue,
        };
        for (device_idx, device) in devices.into_iter().enumerate() {
            let name = device.name().unwrap_or_else(|_| "unknown".to_string());
            let queried = device_info_u32(&device, DeviceInfo::MaxComputeUnits)
                .and_then(|cu| {
                    device_info_usize(&device, DeviceInfo::MaxWorkGroupSize).map(|wg| (cu, wg))
                })
                .and_then(|(cu, wg)| {
                    device_info_u64(&device, DeviceInfo::GlobalMemSize)
                        .map(|mem| (cu, wg, mem))
                });
            let (compute_units, max_work_group, global_mem) = match queried {
                Ok(values) => values,
                Err(err) => {
                    ui::warn("OPENCL", format!("skipping {name}: info query failed ({err})"));
                    continue;
                }
            };

            if global_mem < MIN_DEVICE_MEM_BYTES {
                ui::warn(
                    "OPENCL",
                    format!(
                        "skipping {name}: {} MB memory, peach map needs 1 GiB",
                        global_mem / 1024 / 1024
                    ),
                );
                continue;
            }

            let id = found.len();
            found.push(DeviceDescriptor {
                platform_idx,
                device_idx,
                id,
                name,
                compute_units,
                max_work_group,
                global_mem,
            });
        }
    }

    if let Some(index) = selector {
        if index >= found.len() {
            bail!(
                "requested OpenCL device index {index}, but only {} eligible device(s) found",
                found.len()
            );
        }
        found = vec![found.swap_remove(index)];
    }
    Ok(found)
}

fn device_info_u32(device: &Device, info: DeviceInfo) -> ocl::Result<u32> {
    match device.info(info)? {
        DeviceInfoResult::MaxComputeUnits(v) => Ok(v),
        other => Err(ocl::Error::from(format!(
            "unexpected device info result: {other:?}"
        ))),
    }
}

fn device_info_usize(device: &Device, info: DeviceInfo) -> ocl::Result<usize> {
    match device.info(info)? {
        DeviceInfoResult::MaxWorkGroupSize(v) => Ok(v),
        other => Err(ocl::Error::from(format!(
            "unexpected device info result: {other:?}"
        ))),
    }
}

fn device_info_u64(device: &Device, info: DeviceInfo) -> ocl::Result<u64> {
    match device.info(info)? {
        DeviceInfoResult::GlobalMemSize(v) => Ok(v),
        other => Err(ocl::Error::from(format!(
            "unexpected device info result: {other:?}"
        ))),
    }
}

enum StepOutcome {
    /// Nothing to report; call again.
    Working,
    /// The device published a solve; trailer carries the winning nonce.
    Solved(BlockTrailer),
}

struct QueueSlot {
    queue: Queue,
    d_bt: Buffer<u8>,
    d_state: Buffer<u64>,
    d_solve: Buffer<u32>,
    h_bt: BlockTrailer,
    h_solve: [u32; SOLVE_SLOT_WORDS],
    pending: Option<Event>,
}

impl QueueSlot {
    /// A queue is ready when its tracked tail command has completed.
    fn ready(&self) -> ocl::Result<bool> {
        match &self.pending {
            None => Ok(true),
            Some(event) => Ok(event.is_complete()?),
        }
    }

    fn clear_solve(&mut self) -> ocl::Result<()> {
        self.d_solve.cmd().queue(&self.queue).fill(0u32, None).enq()?;
        self.h_solve = [0u32; SOLVE_SLOT_WORDS];
        Ok(())
    }
}

struct PeachDevice {
    id: usize,
    _program: Program,
    k_build: Kernel,
    k_solve: Kernel,
    /// Held for the device lifetime; the kernels reference it through their
    /// bound arguments.
    _d_map: Buffer<u8>,
    d_phash: Buffer<u8>,
    slots: [QueueSlot; 2],
    state: DeviceState,
    /// Tiles scheduled so far during Init.
    built: usize,
    init_primed: bool,
    /// Hashes attempted since entering Work.
    work: u64,
    last: Instant,
    hps: f64,
    last_solved_bnum: Option<u64>,
    global_size: usize,
    local_size: usize,
    host_prng: u64,
}

impl PeachDevice {
    fn create(desc: &DeviceDescriptor) -> ocl::Result<Self> {
        let platform = Platform::list()
            .into_iter()
            .nth(desc.platform_idx)
            .ok_or_else(|| ocl::Error::from("OpenCL platform disappeared"))?;
        let device = Device::list(platform, Some(ocl::flags::DEVICE_TYPE_GPU))?
            .into_iter()
            .nth(desc.device_idx)
            .ok_or_else(|| ocl::Error::from("OpenCL device disappeared"))?;

        let context = Context::builder()
            .platform(platform)
            .devices(device)
            .build()?;

        let queue0 = Queue::new(&context, device, None)?;
        let queue1 = Queue::new(&context, device, None)?;

        // Built with default options: the dflops float contract forbids
        // fast-math and fmad contraction.
        let program = Program::builder()
            .devices(device)
            .src(KERNEL_SRC)
            .build(&context)?;

        let local_size = desc.local_size();
        let global_size = desc.global_size();

        let d_map = Buffer::<u8>::builder()
            .queue(queue0.clone())
            .len(PEACH_MAP_LEN)
            .build()?;
        let d_phash = Buffer::<u8>::builder()
            .queue(queue0.clone())
            .len(32)
            .fill_val(0u8)
            .build()?;

        let k_build = Kernel::builder()
            .program(&program)
            .name("kcl_peach_build")
            .queue(queue0.clone())
            .global_work_size(global_size)
            .local_work_size(local_size)
            .arg(0u32)
            .arg(&d_map)
            .arg(&d_phash)
            .build()?;

        let k_srand = Kernel::builder()
            .program(&program)
            .name("kcl_srand64")
            .queue(queue0.clone())
            .global_work_size(global_size)
            .local_work_size(local_size)
            .arg(None::<&Buffer<u64>>)
            .arg(0u64)
            .build()?;

        let make_slot = |queue: &Queue, queue_id: usize| -> ocl::Result<QueueSlot> {
            let d_bt = Buffer::<u8>::builder()
                .queue(queue.clone())
                .len(160)
                .fill_val(0u8)
                .build()?;
            let d_state = Buffer::<u64>::builder()
                .queue(queue.clone())
                .len(global_size)
                .build()?;
            let d_solve = Buffer::<u32>::builder()
                .queue(queue.clone())
                .len(SOLVE_SLOT_WORDS)
                .fill_val(0u32)
                .build()?;

            // Seed the per-work-item PRNG cells once per queue.
            let seed = unix_time() as u64 ^ ((desc.id as u64) << 32) ^ queue_id as u64;
            k_srand.set_arg(0, &d_state)?;
            k_srand.set_arg(1, seed)?;
            // Safety: the state buffer outlives the launch and the queue is
            // finished before the slot is used.
            unsafe {
                k_srand.cmd().queue(queue).enq()?;
            }
            queue.finish()?;

            Ok(QueueSlot {
                queue: queue.clone(),
                d_bt,
                d_state,
                d_solve,
                h_bt: BlockTrailer::default(),
                h_solve: [0u32; SOLVE_SLOT_WORDS],
                pending: None,
            })
        };

        let slot0 = make_slot(&queue0, 0)?;
        let slot1 = make_slot(&queue1, 1)?;

        let k_solve = Kernel::builder()
            .program(&program)
            .name("kcl_peach_solve")
            .queue(queue0.clone())
            .global_work_size(global_size)
            .local_work_size(local_size)
            .arg(&d_map)
            .arg(None::<&Buffer<u8>>)
            .arg(None::<&Buffer<u64>>)
            .arg(0u8)
            .arg(None::<&Buffer<u32>>)
            .build()?;

        Ok(Self {
            id: desc.id,
            _program: program,
            k_build,
            k_solve,
            _d_map: d_map,
            d_phash,
            slots: [slot0, slot1],
            state: next_state(DeviceState::Null, DeviceEvent::Allocated),
            built: 0,
            init_primed: false,
            work: 0,
            last: Instant::now(),
            hps: 0.0,
            last_solved_bnum: None,
            global_size,
            local_size,
            host_prng: unix_time() as u64 ^ ((desc.id as u64) << 32) ^ 0x7269_6767,
        })
    }

    fn enter(&mut self, event: DeviceEvent) {
        self.state = next_state(self.state, event);
    }

    /// Drive one iteration of the device state machine against the current
    /// job trailer.
    fn step(&mut self, bt: &BlockTrailer, share_diff: u8) -> ocl::Result<StepOutcome> {
        match self.state {
            DeviceState::Null | DeviceState::Fail => Ok(StepOutcome::Working),
            DeviceState::Init => self.step_init(bt),
            DeviceState::Idle => {
                self.step_idle(bt);
                Ok(StepOutcome::Working)
            }
            DeviceState::Work => self.step_work(bt, share_diff),
        }
    }

    fn step_init(&mut self, bt: &BlockTrailer) -> ocl::Result<StepOutcome> {
        if !self.init_primed {
            // Both queues must drain before late solves are wiped and the
            // new phash is uploaded.
            if !(self.slots[0].ready()? && self.slots[1].ready()?) {
                return Ok(StepOutcome::Working);
            }
            self.slots[0].pending = None;
            self.slots[1].pending = None;
            for slot in &mut self.slots {
                slot.clear_solve()?;
                slot.h_bt = *bt;
            }
            self.d_phash
                .cmd()
                .queue(&self.slots[0].queue)
                .write(&bt.phash()[..])
                .enq()?;
            self.slots[0].queue.finish()?;
            self.built = 0;
            self.init_primed = true;
        }

        for id in 0..2 {
            if !self.slots[id].ready()? {
                continue;
            }
            self.slots[id].pending = None;

            if self.built < PEACH_CACHE_LEN {
                let remaining = PEACH_CACHE_LEN - self.built;
                let chunk =
                    remaining.min(self.global_size).div_ceil(self.local_size) * self.local_size;

                self.k_build.set_arg(0, self.built as u32)?;
                let mut event = Event::empty();
                // Safety: map and phash buffers outlive the launch; the
                // event gates every later read of the map.
                unsafe {
                    self.k_build
                        .cmd()
                        .queue(&self.slots[id].queue)
                        .gws(chunk)
                        .lws(self.local_size)
                        .enew(&mut event)
                        .enq()?;
                }
                self.slots[id].pending = Some(event);
                self.built += chunk;
            } else if self.slots[id ^ 1].ready()? {
                // Build complete and both queues drained.
                self.last = Instant::now();
                self.built = 0;
                self.init_primed = false;
                self.work = 0;
                self.enter(DeviceEvent::BuildComplete);
                break;
            }
        }

        Ok(StepOutcome::Working)
    }

    fn step_idle(&mut self, bt: &BlockTrailer) {
        if job_is_stale(bt, self.last_solved_bnum) {
            return;
        }
        self.last = Instant::now();
        self.work = 0;
        self.enter(DeviceEvent::JobReady);
    }

    fn step_work(&mut self, bt: &BlockTrailer, share_diff: u8) -> ocl::Result<StepOutcome> {
        for id in 0..2 {
            if !self.slots[id].ready()? {
                continue;
            }

            // Trailer mirror detects a block change before anything else.
            if self.slots[id].h_bt.phash() != bt.phash() {
                self.enter(DeviceEvent::PhashChanged);
                self.work = 0;
                return Ok(StepOutcome::Working);
            }

            if job_is_stale(bt, self.last_solved_bnum) {
                self.enter(DeviceEvent::JobStale);
                self.work = 0;
                return Ok(StepOutcome::Working);
            }

            // A completed launch means the solve slot is coherent to read.
            if self.slots[id].pending.take().is_some() {
                let slot = &mut self.slots[id];
                slot.d_solve
                    .cmd()
                    .queue(&slot.queue)
                    .read(&mut slot.h_solve[..])
                    .enq()?;
                if slot.h_solve[0] != 0 {
                    let mut nonce = [0u8; 32];
                    for (word, out) in slot.h_solve[2..].iter().zip(nonce.chunks_exact_mut(4)) {
                        out.copy_from_slice(&word.to_le_bytes());
                    }
                    let mut solved = slot.h_bt;
                    solved.set_nonce(&nonce);
                    slot.clear_solve()?;
                    self.last_solved_bnum = Some(solved.bnum());
                    self.enter(DeviceEvent::SolveFound);
                    return Ok(StepOutcome::Solved(solved));
                }
            }

            // Refresh the trailer (fresh host half-nonce) and launch.
            let slot = &mut self.slots[id];
            slot.h_bt = *bt;
            let mut half = [0u8; 16];
            peach_pow::trigg::trigg_generate(&mut self.host_prng, &mut half);
            slot.h_bt.set_nonce_half(&half);
            slot.d_bt
                .cmd()
                .queue(&slot.queue)
                .write(&slot.h_bt.as_bytes()[..108])
                .enq()?;

            let diff = solve_difficulty(bt, share_diff);
            self.k_solve.set_arg(1, &slot.d_bt)?;
            self.k_solve.set_arg(2, &slot.d_state)?;
            self.k_solve.set_arg(3, diff)?;
            self.k_solve.set_arg(4, &slot.d_solve)?;

            let mut event = Event::empty();
            // Safety: buffers are slot-owned and outlive the launch; the
            // event gates the readback.
            unsafe {
                self.k_solve
                    .cmd()
                    .queue(&slot.queue)
                    .gws(self.global_size)
                    .lws(self.local_size)
                    .enew(&mut event)
                    .enq()?;
            }
            slot.pending = Some(event);

            self.work += self.global_size as u64;
            let elapsed = self.last.elapsed().as_secs_f64();
            self.hps = self.work as f64 / elapsed.max(1.0);
        }

        Ok(StepOutcome::Working)
    }
}

fn job_is_stale(bt: &BlockTrailer, last_solved_bnum: Option<u64>) -> bool {
    bt.tcount() == 0
        || last_solved_bnum == Some(bt.bnum())
        || unix_time().saturating_sub(bt.time0()) >= BRIDGE_V3_SECS
}

fn device_worker_loop(shared: Arc<Shared>, desc: DeviceDescriptor) {
    let mut device = match PeachDevice::create(&desc) {
        Ok(device) => device,
        Err(err) => {
            emit_event(
                &shared,
                BackendEvent::Error {
                    backend: BACKEND_NAME,
                    message: format!("device {} ({}) init failed: {err}", desc.id, desc.name),
                },
            );
            return;
        }
    };
    ui::success(
        "OPENCL",
        format!("device {} ({}) initialized", desc.id, desc.name),
    );

    let mut local_epoch = 0u64;
    let mut local_job: Option<Arc<MiningJob>> = None;
    let mut launched_before = 0u64;

    loop {
        if shared.shutdown.load(Ordering::Relaxed) {
            break;
        }

        let current_epoch = shared.current_epoch.load(Ordering::Acquire);
        if current_epoch == 0 {
            local_job = None;
            thread::sleep(IDLE_SLEEP);
            continue;
        }
        if current_epoch != local_epoch {
            let next_job = match shared.job.read() {
                Ok(slot) => slot.clone(),
                Err(_) => break,
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

        let before_state = device.state;
        let outcome = device.step(&job.trailer, job.share_diff);

        // Account for hashes scheduled by this step.
        if device.work >= launched_before {
            shared
                .hashes
                .fetch_add(device.work - launched_before, Ordering::Relaxed);
        }
        launched_before = device.work;

        match outcome {
            Ok(StepOutcome::Working) => {
                if before_state == DeviceState::Init && device.state == DeviceState::Idle {
                    ui::success("OPENCL", format!("device {}: peach map built", device.id));
                }
                if device.state == DeviceState::Idle {
                    thread::sleep(IDLE_SLEEP);
                } else {
                    thread::sleep(PENDING_SLEEP);
                }
            }
            Ok(StepOutcome::Solved(trailer)) => {
                // Cross-check on the CPU reference before reporting; a GPU
                // that produces bad solves keeps mining but its results are
                // dropped loudly.
                let (hash, ok) = peach_check(&trailer);
                if ok {
                    ui::success(
                        "OPENCL",
                        format!(
                            "device {}: solve found ({})",
                            device.id,
                            format_hashrate(device.hps)
                        ),
                    );
                    emit_event(
                        &shared,
                        BackendEvent::Solution(MiningSolution {
                            epoch: job.epoch,
                            job_id: Arc::clone(&job.job_id),
                            trailer,
                            hash,
                            backend: BACKEND_NAME,
                        }),
                    );
                } else {
                    ui::warn(
                        "OPENCL",
                        format!(
                            "device {}: solve failed CPU verification, discarded",
                            device.id
                        ),
                    );
                }
            }
            Err(err) => {
                device.enter(DeviceEvent::DeviceError);
                emit_event(
                    &shared,
                    BackendEvent::Error {
                        backend: BACKEND_NAME,
                        message: format!("device {} runtime error: {err}", device.id),
                    },
                );
                break;
            }
        }
    }
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
