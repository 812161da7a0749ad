use std::sync::Arc;

use anyhow::Result;
use crossbeam_channel::Sender;
use peach_pow::BlockTrailer;

pub mod cpu;
pub mod opencl;

/// One unit of pool work fanned out to every backend. `epoch` is the job
/// generation; solutions from older epochs are discarded.
#[derive(Debug, Clone)]
pub struct MiningJob {
    pub epoch: u64,
    pub job_id: Arc<str>,
    pub trailer: BlockTrailer,
    /// Pool share difficulty; zero means "use the trailer difficulty".
    pub share_diff: u8,
}

#[derive(Debug, Clone)]
pub struct MiningSolution {
    pub epoch: u64,
    pub job_id: Arc<str>,
    /// Trailer with the winning nonce installed.
    pub trailer: BlockTrailer,
    /// Final pipeline digest, verified against the CPU reference.
    pub hash: [u8; 32],
    pub backend: &'static str,
}

#[derive(Debug, Clone)]
pub enum BackendEvent {
    Solution(MiningSolution),
    Error {
        backend: &'static str,
        message: String,
    },
}

pub trait PowBackend: Send {
    fn name(&self) -> &'static str;

    /// Parallel lanes this backend mines with (threads or GPU work items),
    /// for reporting only.
    fn lanes(&self) -> usize;

    fn set_event_sink(&mut self, sink: Sender<BackendEvent>);

    fn start(&mut self) -> Result<()>;

    fn stop(&mut self);

    /// Replace the current job. Backends pick the new epoch up on their next
    /// iteration; stale launches finish and are ignored.
    fn set_job(&self, job: MiningJob) -> Result<()>;

    /// Drop the current job (pool disconnect or stale tip); backends idle
    /// until the next `set_job`.
    fn clear_job(&self);

    /// Hashes attempted since the last call.
    fn take_hashes(&self) -> u64;
}
