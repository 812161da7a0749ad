use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    Cpu,
    Opencl,
}

#[derive(Debug, Parser)]
#[command(
    name = "peachminer",
    about = "Peach proof-of-work pool miner",
    version
)]
pub struct Config {
    /// Pool hostname.
    #[arg(long, default_value = "pool.example.net")]
    pub host: String,

    /// Pool port.
    #[arg(long, default_value_t = 3333)]
    pub port: u16,

    /// Wallet address used as the Stratum login.
    #[arg(long, required_unless_present = "bench")]
    pub wallet: Option<String>,

    /// Worker name appended to the wallet address.
    #[arg(long, default_value = "worker1")]
    pub worker: String,

    /// Mining backends to start, in order.
    #[arg(long, value_delimiter = ',', default_value = "opencl")]
    pub backends: Vec<BackendKind>,

    /// CPU worker threads (CPU backend only).
    #[arg(long, default_value_t = default_threads())]
    pub threads: usize,

    /// OpenCL device index; all eligible GPUs when unset.
    #[arg(long)]
    pub device: Option<usize>,

    /// Seconds between stats lines.
    #[arg(long, default_value_t = 30)]
    pub stats_secs: u64,

    /// Run the CPU reference pipeline benchmark for this many seconds and
    /// exit.
    #[arg(long)]
    pub bench: Option<u64>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let cfg = Self::parse();
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            bail!("at least one backend must be enabled");
        }
        if self.threads == 0 {
            bail!("--threads must be nonzero");
        }
        if let Some(wallet) = &self.wallet {
            if wallet.is_empty() || wallet.contains('.') {
                bail!("wallet address must be non-empty and must not contain '.'");
            }
        }
        Ok(())
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_secs.max(1))
    }

    /// Stratum login: `<wallet>.<worker>`.
    pub fn login(&self) -> String {
        format!(
            "{}.{}",
            self.wallet.as_deref().unwrap_or_default(),
            self.worker
        )
    }
}

fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config> {
        let cfg = Config::try_parse_from(args)?;
        cfg.validate()?;
        Ok(cfg)
    }

    #[test]
    fn backend_list_parses_comma_separated() {
        let cfg = parse(&[
            "peachminer",
            "--wallet",
            "abc123",
            "--backends",
            "cpu,opencl",
        ])
        .expect("valid config");
        assert_eq!(cfg.backends, vec![BackendKind::Cpu, BackendKind::Opencl]);
    }

    #[test]
    fn wallet_with_separator_is_rejected() {
        assert!(parse(&["peachminer", "--wallet", "abc.def"]).is_err());
    }

    #[test]
    fn login_joins_wallet_and_worker() {
        let cfg = parse(&["peachminer", "--wallet", "abc", "--worker", "rig2"])
            .expect("valid config");
        assert_eq!(cfg.login(), "abc.rig2");
    }

    #[test]
    fn bench_mode_does_not_require_wallet() {
        let cfg = parse(&["peachminer", "--bench", "10"]).expect("bench config");
        assert_eq!(cfg.bench, Some(10));
    }
}
