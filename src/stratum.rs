//! Stratum pool client: line-delimited JSON over TCP.
//!
//! Protocol logic lives in [`StratumSession`], a pure state machine over
//! received lines, so it can be unit-tested without sockets. [`spawn_client`]
//! runs the socket loop on its own thread, forwarding session events over a
//! channel and draining submit commands from another; it reconnects with a
//! fixed backoff whenever the connection drops.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use serde_json::Value;

use crate::types::{decode_hex_array, encode_hex, parse_u32_flex};
use crate::ui;

const RECV_BUF_LIMIT: usize = 64 * 1024;
const READ_TIMEOUT: Duration = Duration::from_millis(100);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_POOL_DIFFICULTY: u8 = 28;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StratumJob {
    pub job_id: String,
    pub phash: [u8; 32],
    pub bnum: [u8; 8],
    pub difficulty: u8,
    pub time0: u32,
    pub mroot: [u8; 32],
    pub clean: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StratumEvent {
    Connected,
    Disconnected,
    Authorized,
    Job(StratumJob),
    Difficulty(u8),
    ShareAccepted { accepted: u64, rejected: u64 },
    ShareRejected { accepted: u64, rejected: u64 },
}

/// What a received line amounted to.
#[derive(Debug)]
pub enum LineOutcome {
    /// Valid message with nothing for the miner to act on.
    None,
    /// Unparseable line; log and drop.
    Dropped,
    Event(StratumEvent),
    /// Protocol failure that warrants closing the connection.
    Fatal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authorizing,
    Connected,
}

pub enum StratumCommand {
    Submit {
        job_id: String,
        nonce: [u8; 32],
        hash: [u8; 32],
    },
}

/// Stratum protocol session: message formatting, response handling, share
/// counters. Socket-free.
pub struct StratumSession {
    state: SessionState,
    login: String,
    msg_id: u64,
    accepted: u64,
    rejected: u64,
    pool_difficulty: u8,
}

impl StratumSession {
    pub fn new(login: &str) -> Self {
        Self {
            state: SessionState::Disconnected,
            login: login.to_string(),
            msg_id: 1,
            accepted: 0,
            rejected: 0,
            pool_difficulty: DEFAULT_POOL_DIFFICULTY,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    pub fn pool_difficulty(&self) -> u8 {
        self.pool_difficulty
    }

    pub fn counters(&self) -> (u64, u64) {
        (self.accepted, self.rejected)
    }

    /// `mining.authorize` request line; moves the session to Authorizing.
    pub fn authorize_line(&mut self) -> String {
        let id = self.next_id();
        self.state = SessionState::Authorizing;
        format!(
            "{{\"id\":{id},\"method\":\"mining.authorize\",\"params\":[\"{}\",\"x\"]}}\n",
            self.login
        )
    }

    /// `mining.submit` request line for a solved share.
    pub fn submit_line(&mut self, job_id: &str, nonce: &[u8; 32], hash: &[u8; 32]) -> String {
        let id = self.next_id();
        format!(
            "{{\"id\":{id},\"method\":\"mining.submit\",\"params\":[\"{}\",\"{}\",\"{}\",\"{}\"]}}\n",
            self.login,
            job_id,
            encode_hex(nonce),
            encode_hex(hash)
        )
    }

    fn next_id(&mut self) -> u64 {
        let id = self.msg_id;
        self.msg_id += 1;
        id
    }

    pub fn handle_line(&mut self, line: &str) -> LineOutcome {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return LineOutcome::None;
        }
        let msg: Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(_) => return LineOutcome::Dropped,
        };

        if let Some(method) = msg.get("method").and_then(Value::as_str) {
            return self.handle_notification(method, msg.get("params"));
        }

        if msg.get("id").is_some() {
            return self.handle_response(&msg);
        }

        LineOutcome::None
    }

    fn handle_notification(&mut self, method: &str, params: Option<&Value>) -> LineOutcome {
        match method {
            "mining.notify" => match params.and_then(Value::as_array).map(|p| parse_job(p)) {
                Some(Ok(job)) => LineOutcome::Event(StratumEvent::Job(job)),
                Some(Err(_)) | None => LineOutcome::Dropped,
            },
            "mining.set_difficulty" => {
                let diff = params
                    .and_then(Value::as_array)
                    .and_then(|p| p.first())
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                if diff == 0 {
                    return LineOutcome::None;
                }
                self.pool_difficulty = diff.min(255) as u8;
                LineOutcome::Event(StratumEvent::Difficulty(self.pool_difficulty))
            }
            _ => LineOutcome::None,
        }
    }

    fn handle_response(&mut self, msg: &Value) -> LineOutcome {
        let result = msg.get("result");
        let error_is_null = msg.get("error").map(Value::is_null).unwrap_or(true);

        match self.state {
            SessionState::Authorizing => {
                let ok = matches!(result, Some(Value::Bool(true)))
                    || (error_is_null
                        && result.is_some_and(|r| !r.is_null() && *r != Value::Bool(false)));
                if ok {
                    self.state = SessionState::Connected;
                    LineOutcome::Event(StratumEvent::Authorized)
                } else {
                    LineOutcome::Fatal("authorization rejected by pool".to_string())
                }
            }
            SessionState::Connected => match result {
                Some(Value::Bool(true)) => {
                    self.accepted += 1;
                    LineOutcome::Event(StratumEvent::ShareAccepted {
                        accepted: self.accepted,
                        rejected: self.rejected,
                    })
                }
                Some(Value::Bool(false)) => {
                    self.rejected += 1;
                    LineOutcome::Event(StratumEvent::ShareRejected {
                        accepted: self.accepted,
                        rejected: self.rejected,
                    })
                }
                _ => LineOutcome::None,
            },
            _ => LineOutcome::None,
        }
    }
}

fn parse_job(params: &[Value]) -> Result<StratumJob> {
    if params.len() < 6 {
        bail!("mining.notify carries {} params, expected 6+", params.len());
    }
    let text = |idx: usize, what: &str| -> Result<String> {
        match &params[idx] {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(anyhow!("{what} has unexpected type: {other}")),
        }
    };

    let job_id = text(0, "job_id")?;
    let phash = decode_hex_array::<32>(&text(1, "phash")?, "phash")?;
    let bnum = decode_hex_array::<8>(&text(2, "bnum")?, "bnum")?;
    let difficulty = (parse_u32_flex(&text(3, "difficulty")?, "difficulty")? & 0xFF) as u8;
    let time0 = parse_u32_flex(&text(4, "time0")?, "time0")?;
    let mroot = decode_hex_array::<32>(&text(5, "mroot")?, "mroot")?;
    let clean = params.get(6).and_then(Value::as_bool).unwrap_or(false);

    Ok(StratumJob {
        job_id,
        phash,
        bnum,
        difficulty,
        time0,
        mroot,
        clean,
    })
}

pub struct StratumClient {
    pub commands: Sender<StratumCommand>,
    handle: Option<JoinHandle<()>>,
}

impl StratumClient {
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Spawn the pool client thread. Events arrive on the returned receiver;
/// submits go through `client.commands`.
pub fn spawn_client(
    host: String,
    port: u16,
    login: String,
    shutdown: Arc<AtomicBool>,
) -> (StratumClient, Receiver<StratumEvent>) {
    let (event_tx, event_rx) = unbounded();
    let (cmd_tx, cmd_rx) = unbounded();

    let handle = thread::spawn(move || {
        while !shutdown.load(Ordering::Relaxed) {
            match run_connection(&host, port, &login, &event_tx, &cmd_rx, &shutdown) {
                Ok(()) => break,
                Err(err) => {
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    ui::warn("STRATUM", format!("connection lost: {err:#}"));
                    let _ = event_tx.send(StratumEvent::Disconnected);
                }
            }
            let mut waited = Duration::ZERO;
            while waited < RECONNECT_DELAY && !shutdown.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(200));
                waited += Duration::from_millis(200);
            }
        }
    });

    (
        StratumClient {
            commands: cmd_tx,
            handle: Some(handle),
        },
        event_rx,
    )
}

/// One connection lifetime: connect, authorize, pump messages until the
/// socket drops or shutdown is requested. `Ok(())` means clean shutdown.
fn run_connection(
    host: &str,
    port: u16,
    login: &str,
    events: &Sender<StratumEvent>,
    commands: &Receiver<StratumCommand>,
    shutdown: &AtomicBool,
) -> Result<()> {
    let mut session = StratumSession::new(login);
    session.set_state(SessionState::Connecting);

    let addr = (host, port)
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve {host}:{port}"))?
        .next()
        .ok_or_else(|| anyhow!("no addresses for {host}:{port}"))?;
    let mut stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
        .with_context(|| format!("failed to connect to {host}:{port}"))?;
    stream
        .set_read_timeout(Some(READ_TIMEOUT))
        .context("failed to set read timeout")?;
    ui::info("STRATUM", format!("connected to {host}:{port}"));
    let _ = events.send(StratumEvent::Connected);

    let line = session.authorize_line();
    stream
        .write_all(line.as_bytes())
        .context("failed to send authorize")?;

    let mut recv_buf: Vec<u8> = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    while !shutdown.load(Ordering::Relaxed) {
        // Drain pending submits; shares are only sendable once authorized.
        loop {
            match commands.try_recv() {
                Ok(StratumCommand::Submit {
                    job_id,
                    nonce,
                    hash,
                }) => {
                    if session.state() == SessionState::Connected {
                        let line = session.submit_line(&job_id, &nonce, &hash);
                        stream
                            .write_all(line.as_bytes())
                            .context("failed to send share")?;
                        ui::info("STRATUM", format!("submitted share for job {job_id}"));
                    } else {
                        ui::warn("STRATUM", "dropping share: not authorized");
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Ok(()),
            }
        }

        match stream.read(&mut chunk) {
            Ok(0) => bail!("connection closed by pool"),
            Ok(n) => {
                recv_buf.extend_from_slice(&chunk[..n]);
                while let Some(pos) = recv_buf.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = recv_buf.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
                    match session.handle_line(&line) {
                        LineOutcome::None => {}
                        LineOutcome::Dropped => {
                            ui::warn("STRATUM", format!("dropping unparseable line: {line}"));
                        }
                        LineOutcome::Event(event) => {
                            let _ = events.send(event);
                        }
                        LineOutcome::Fatal(reason) => bail!("{reason}"),
                    }
                }
                if recv_buf.len() >= RECV_BUF_LIMIT {
                    ui::warn("STRATUM", "receive buffer overflow, clearing");
                    recv_buf.clear();
                }
            }
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut => {}
            Err(err) => return Err(err).context("socket read failed"),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authorized_session() -> StratumSession {
        let mut session = StratumSession::new("wallet.worker1");
        let _ = session.authorize_line();
        let outcome = session.handle_line("{\"id\":1,\"result\":true,\"error\":null}");
        assert!(matches!(
            outcome,
            LineOutcome::Event(StratumEvent::Authorized)
        ));
        session
    }

    #[test]
    fn authorize_response_moves_to_connected() {
        let session = authorized_session();
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn authorize_rejection_is_fatal() {
        let mut session = StratumSession::new("wallet.worker1");
        let _ = session.authorize_line();
        let outcome =
            session.handle_line("{\"id\":1,\"result\":false,\"error\":\"bad wallet\"}");
        assert!(matches!(outcome, LineOutcome::Fatal(_)));
    }

    #[test]
    fn notify_parses_into_a_valid_job() {
        let mut session = authorized_session();
        let zeros32 = "0".repeat(64);
        let zeros8 = "0".repeat(16);
        let line = format!(
            "{{\"method\":\"mining.notify\",\"params\":[\"j1\",\"{zeros32}\",\"{zeros8}\",\"1c\",\"0\",\"{zeros32}\",true]}}"
        );
        match session.handle_line(&line) {
            LineOutcome::Event(StratumEvent::Job(job)) => {
                assert_eq!(job.job_id, "j1");
                assert_eq!(job.phash, [0u8; 32]);
                assert_eq!(job.bnum, [0u8; 8]);
                assert_eq!(job.difficulty, 0x1c);
                assert_eq!(job.time0, 0);
                assert!(job.clean);
            }
            other => panic!("expected a job event, got {other:?}"),
        }
    }

    #[test]
    fn set_difficulty_updates_pool_difficulty() {
        let mut session = authorized_session();
        let outcome =
            session.handle_line("{\"method\":\"mining.set_difficulty\",\"params\":[24]}");
        assert!(matches!(
            outcome,
            LineOutcome::Event(StratumEvent::Difficulty(24))
        ));
        assert_eq!(session.pool_difficulty(), 24);

        // Oversized values clamp to the byte the PoW consumes.
        session.handle_line("{\"method\":\"mining.set_difficulty\",\"params\":[300]}");
        assert_eq!(session.pool_difficulty(), 255);
    }

    #[test]
    fn share_responses_update_counters() {
        let mut session = authorized_session();
        let a = session.handle_line("{\"id\":2,\"result\":true,\"error\":null}");
        assert!(matches!(
            a,
            LineOutcome::Event(StratumEvent::ShareAccepted {
                accepted: 1,
                rejected: 0
            })
        ));
        let r = session.handle_line("{\"id\":3,\"result\":false,\"error\":null}");
        assert!(matches!(
            r,
            LineOutcome::Event(StratumEvent::ShareRejected {
                accepted: 1,
                rejected: 1
            })
        ));
        assert_eq!(session.counters(), (1, 1));
    }

    #[test]
    fn unparseable_lines_are_dropped_not_fatal() {
        let mut session = authorized_session();
        assert!(matches!(
            session.handle_line("this is not json"),
            LineOutcome::Dropped
        ));
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn request_lines_are_line_terminated_json() {
        let mut session = StratumSession::new("wallet.rig");
        let auth = session.authorize_line();
        assert!(auth.ends_with('\n'));
        let parsed: Value = serde_json::from_str(auth.trim()).expect("valid json");
        assert_eq!(parsed["method"], "mining.authorize");
        assert_eq!(parsed["params"][0], "wallet.rig");
        assert_eq!(parsed["params"][1], "x");

        let submit = session.submit_line("j9", &[0xAB; 32], &[0xCD; 32]);
        let parsed: Value = serde_json::from_str(submit.trim()).expect("valid json");
        assert_eq!(parsed["method"], "mining.submit");
        assert_eq!(parsed["params"][1], "j9");
        assert_eq!(parsed["params"][2].as_str().map(str::len), Some(64));
        assert_eq!(parsed["params"][3].as_str().map(str::len), Some(64));
        // Message ids are monotonically increasing.
        assert_eq!(parsed["id"], 2);
    }

    #[test]
    fn notify_with_missing_params_is_dropped() {
        let mut session = authorized_session();
        let outcome =
            session.handle_line("{\"method\":\"mining.notify\",\"params\":[\"only-id\"]}");
        assert!(matches!(outcome, LineOutcome::Dropped));
    }
}
