//! Remote control: one flowcat process changing another's options
//! while it runs.
//!
//! The channel is a per-recipient message file in a user-scoped
//! runtime directory (`$XDG_RUNTIME_DIR/flowcat`, else
//! `$HOME/.flowcat`). The sender writes the encoded message via a
//! temporary file and an atomic rename, then polls for the receiver to
//! consume it; the receiver checks for its file on a 100 ms cadence
//! from the main loop and deletes it once applied.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use std::{env, fs};

use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::RemoteError;
use crate::options::{Config, MAX_DIMENSION, MAX_INTERVAL, MIN_INTERVAL};

/// Wire-format version; bumped on any layout change.
pub const MESSAGE_VERSION: u8 = 1;
/// Longest accepted name or format string, in bytes.
pub const MAX_STRING: usize = 255;
/// How often the sender re-checks for pickup.
const SEND_POLL: Duration = Duration::from_millis(10);
/// How long the sender waits before withdrawing the message.
const SEND_TIMEOUT: Duration = Duration::from_millis(1100);

/// The option-update message. Numeric fields at zero mean "leave
/// unchanged"; the display switches travel as a complete set. `None`
/// strings leave the value alone, empty strings reset it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRequest {
    pub version: u8,
    /// Recipient process id.
    pub pid: u32,
    pub progress: bool,
    pub timer: bool,
    pub eta: bool,
    pub fineta: bool,
    pub rate: bool,
    pub average_rate: bool,
    pub bytes: bool,
    pub buffer_percent: bool,
    pub last_written: u32,
    pub rate_limit: u64,
    pub buffer_size: u64,
    pub size: u64,
    pub interval: f64,
    pub width: u32,
    pub height: u32,
    pub width_set_manually: bool,
    pub height_set_manually: bool,
    pub name: Option<String>,
    pub format: Option<String>,
}

impl RemoteRequest {
    /// Builds the message a sender-mode invocation derives from its own
    /// command line.
    pub fn from_config(cfg: &Config, pid: u32) -> Self {
        RemoteRequest {
            version: MESSAGE_VERSION,
            pid,
            progress: cfg.show_progress,
            timer: cfg.show_timer,
            eta: cfg.show_eta,
            fineta: cfg.show_fineta,
            rate: cfg.show_rate,
            average_rate: cfg.show_average_rate,
            bytes: cfg.show_bytes,
            buffer_percent: cfg.show_buffer_percent,
            last_written: cfg.last_written_n as u32,
            rate_limit: cfg.rate_limit,
            buffer_size: cfg.buffer_size as u64,
            size: cfg.size,
            interval: if cfg.interval == crate::options::DEFAULT_INTERVAL {
                0.0
            } else {
                cfg.interval
            },
            width: if cfg.width_set_manually {
                cfg.width as u32
            } else {
                0
            },
            height: if cfg.height_set_manually {
                cfg.height as u32
            } else {
                0
            },
            width_set_manually: cfg.width_set_manually,
            height_set_manually: cfg.height_set_manually,
            name: cfg.name.clone(),
            format: cfg.format.clone(),
        }
    }

    /// Clamps every field to its accepted range.
    pub fn clamped(mut self) -> Self {
        if self.interval != 0.0 {
            self.interval = self.interval.clamp(MIN_INTERVAL, MAX_INTERVAL);
        }
        self.width = self.width.min(MAX_DIMENSION as u32);
        self.height = self.height.min(MAX_DIMENSION as u32);
        if let Some(name) = &mut self.name {
            name.truncate(MAX_STRING);
        }
        if let Some(format) = &mut self.format {
            format.truncate(MAX_STRING);
        }
        self
    }
}

/// Applies a received message to the live config. Options that cannot
/// change mid-transfer (cursor, line mode, force, delay-start, skip
/// policy, stop-at-size) are not part of the message at all. Returns
/// true: the display always reparses, since the switch set feeds the
/// effective format.
pub fn apply(req: &RemoteRequest, cfg: &mut Config) -> bool {
    cfg.show_progress = req.progress;
    cfg.show_timer = req.timer;
    cfg.show_eta = req.eta;
    cfg.show_fineta = req.fineta;
    cfg.show_rate = req.rate;
    cfg.show_average_rate = req.average_rate;
    cfg.show_bytes = req.bytes;
    cfg.show_buffer_percent = req.buffer_percent;
    if req.last_written > 0 {
        cfg.last_written_n = req.last_written as usize;
    }
    if req.rate_limit > 0 {
        cfg.rate_limit = req.rate_limit;
    }
    if req.buffer_size > 0 {
        cfg.buffer_size = req.buffer_size as usize;
    }
    if req.size > 0 {
        cfg.size = req.size;
    }
    if req.interval > 0.0 {
        cfg.interval = req.interval.clamp(MIN_INTERVAL, MAX_INTERVAL);
    }
    if req.width > 0 && req.width_set_manually {
        cfg.width = (req.width as usize).min(MAX_DIMENSION);
        cfg.width_set_manually = true;
    }
    if req.height > 0 && req.height_set_manually {
        cfg.height = (req.height as usize).min(MAX_DIMENSION);
        cfg.height_set_manually = true;
    }
    match &req.name {
        None => {}
        Some(s) if s.is_empty() => cfg.name = None,
        Some(s) => cfg.name = Some(s.clone()),
    }
    match &req.format {
        None => {}
        Some(s) if s.is_empty() => cfg.format = None,
        Some(s) => cfg.format = Some(s.clone()),
    }
    true
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// The per-user message directory.
fn runtime_dir() -> Option<PathBuf> {
    if let Ok(dir) = env::var("XDG_RUNTIME_DIR")
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir).join("flowcat"));
    }
    env::var("HOME")
        .ok()
        .filter(|h| !h.is_empty())
        .map(|h| PathBuf::from(h).join(".flowcat"))
}

fn message_path(dir: &Path, pid: u32) -> PathBuf {
    dir.join(format!("remote.{}", pid))
}

fn send_in(dir: &Path, req: &RemoteRequest) -> Result<(), RemoteError> {
    fs::create_dir_all(dir)?;
    let encoded =
        bincode::serialize(req).map_err(|e| RemoteError::Codec(e.to_string()))?;
    let path = message_path(dir, req.pid);
    let tmp = dir.join(format!("remote.{}.tmp.{}", req.pid, std::process::id()));
    fs::write(&tmp, &encoded)?;
    fs::rename(&tmp, &path)?;

    let deadline = Instant::now() + SEND_TIMEOUT;
    while Instant::now() < deadline {
        if !path.exists() {
            return Ok(());
        }
        std::thread::sleep(SEND_POLL);
    }
    // Withdraw the unclaimed message.
    let _ = fs::remove_file(&path);
    Err(RemoteError::Timeout)
}

fn receive_in(dir: &Path, my_pid: u32) -> Option<RemoteRequest> {
    let path = message_path(dir, my_pid);
    let data = fs::read(&path).ok()?;
    let _ = fs::remove_file(&path);
    match bincode::deserialize::<RemoteRequest>(&data) {
        Ok(req) if req.version == MESSAGE_VERSION => {
            debug!(from_pid = req.pid, "remote message accepted");
            Some(req)
        }
        Ok(req) => {
            warn!(version = req.version, "remote message version mismatch");
            None
        }
        Err(e) => {
            warn!("undecodable remote message: {}", e);
            None
        }
    }
}

/// Sender mode: deliver `req` to the process named in it and wait for
/// pickup.
pub fn send(req: &RemoteRequest) -> Result<(), RemoteError> {
    kill(Pid::from_raw(req.pid as i32), None)
        .map_err(|_| RemoteError::NoSuchProcess(req.pid))?;
    let dir = runtime_dir().ok_or(RemoteError::NoRuntimeDir)?;
    send_in(&dir, &req.clone().clamped())
}

/// Non-blocking receive for this process; called from the main loop.
pub fn receive(my_pid: u32) -> Option<RemoteRequest> {
    let dir = runtime_dir()?;
    receive_in(&dir, my_pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RemoteRequest {
        RemoteRequest {
            version: MESSAGE_VERSION,
            pid: 1234,
            progress: true,
            timer: false,
            eta: true,
            fineta: false,
            rate: true,
            average_rate: false,
            bytes: true,
            buffer_percent: false,
            last_written: 0,
            rate_limit: 0,
            buffer_size: 0,
            size: 0,
            interval: 0.0,
            width: 0,
            height: 0,
            width_set_manually: false,
            height_set_manually: false,
            name: None,
            format: None,
        }
    }

    #[test]
    fn round_trips_through_bincode() {
        let mut req = request();
        req.rate_limit = 50 * 1024 * 1024;
        req.name = Some("upload".into());
        let bytes = bincode::serialize(&req).unwrap();
        let back: RemoteRequest = bincode::deserialize(&bytes).unwrap();
        assert_eq!(req, back);
    }

    #[test]
    fn zero_numerics_leave_config_unchanged() {
        let mut cfg = Config {
            rate_limit: 1000,
            size: 5000,
            interval: 2.0,
            ..Config::default()
        };
        apply(&request(), &mut cfg);
        assert_eq!(cfg.rate_limit, 1000);
        assert_eq!(cfg.size, 5000);
        assert_eq!(cfg.interval, 2.0);
    }

    #[test]
    fn switches_apply_as_a_set() {
        let mut cfg = Config {
            show_average_rate: true,
            ..Config::default()
        };
        apply(&request(), &mut cfg);
        assert!(cfg.show_progress && cfg.show_eta && cfg.show_rate && cfg.show_bytes);
        assert!(!cfg.show_average_rate);
    }

    #[test]
    fn nonzero_numerics_apply() {
        let mut cfg = Config::default();
        let mut req = request();
        req.rate_limit = 42;
        req.size = 9000;
        req.interval = 0.5;
        req.width = 100;
        req.width_set_manually = true;
        apply(&req, &mut cfg);
        assert_eq!(cfg.rate_limit, 42);
        assert_eq!(cfg.size, 9000);
        assert_eq!(cfg.interval, 0.5);
        assert_eq!(cfg.width, 100);
        assert!(cfg.width_set_manually);
    }

    #[test]
    fn width_without_manual_flag_is_ignored() {
        let mut cfg = Config::default();
        let mut req = request();
        req.width = 100;
        apply(&req, &mut cfg);
        assert_eq!(cfg.width, 0);
        assert!(!cfg.width_set_manually);
    }

    #[test]
    fn empty_string_resets_name_and_format() {
        let mut cfg = Config {
            name: Some("old".into()),
            format: Some("%b".into()),
            ..Config::default()
        };
        let mut req = request();
        req.name = Some(String::new());
        req.format = Some(String::new());
        apply(&req, &mut cfg);
        assert_eq!(cfg.name, None);
        assert_eq!(cfg.format, None);
    }

    #[test]
    fn clamping_bounds_fields() {
        let mut req = request();
        req.interval = 10_000.0;
        req.width = 5_000_000;
        req.name = Some("x".repeat(500));
        let req = req.clamped();
        assert_eq!(req.interval, MAX_INTERVAL);
        assert_eq!(req.width, MAX_DIMENSION as u32);
        assert_eq!(req.name.unwrap().len(), MAX_STRING);
    }

    #[test]
    fn message_delivery_and_pickup() {
        let dir = tempfile::tempdir().unwrap();
        let dir_path = dir.path().to_path_buf();
        let mut req = request();
        req.pid = 4321;
        req.rate_limit = 77;

        let receiver_dir = dir_path.clone();
        let receiver = std::thread::spawn(move || {
            for _ in 0..100 {
                if let Some(got) = receive_in(&receiver_dir, 4321) {
                    return Some(got);
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            None
        });

        send_in(&dir_path, &req).unwrap();
        let got = receiver.join().unwrap().expect("message should arrive");
        assert_eq!(got.rate_limit, 77);
        assert!(!message_path(&dir_path, 4321).exists());
    }

    #[test]
    fn unclaimed_message_is_withdrawn() {
        let dir = tempfile::tempdir().unwrap();
        let req = request();
        let err = send_in(dir.path(), &req).unwrap_err();
        assert!(matches!(err, RemoteError::Timeout));
        assert!(!message_path(dir.path(), req.pid).exists());
    }

    #[test]
    fn receive_ignores_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = message_path(dir.path(), 99);
        fs::write(&path, b"not a message").unwrap();
        assert!(receive_in(dir.path(), 99).is_none());
        // Garbage is consumed, not left to poison the queue.
        assert!(!path.exists());
    }
}
