//! The main transfer loop.
//!
//! One single-threaded scheduler: each iteration drains at most one
//! remote message, tops up the rate-limit token bucket, performs one
//! bounded transfer step, samples output back-pressure, and — when the
//! update interval has elapsed — runs the rate calculator and repaints
//! the display. Signal handlers only latch flags; this loop observes
//! them between steps.

use std::fs::File;
use std::io;
use std::os::fd::AsFd;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::time::Duration;

use chrono::Local;
use tracing::{debug, info, warn};

use crate::calc::RateCalc;
use crate::clock;
use crate::display::Display;
use crate::error::exit;
use crate::format::render::RenderContext;
use crate::input::{self, InputList};
use crate::options::{Config, Spool};
use crate::remote;
use crate::signals;
use crate::terminal::Terminal;
use crate::transfer::{self, Output, StepLimits, Transfer, lines::LineTracker};
use crate::units;

/// Remote-control poll cadence, seconds.
const REMOTE_CHECK_SECS: f64 = 0.1;
/// Background-restore probe cadence, seconds.
const BACKGROUND_CHECK_SECS: f64 = 1.0;
/// Sleep while the output pipe drains after end of input, or while the
/// token bucket is empty.
const IDLE_SLEEP: Duration = Duration::from_millis(50);
/// Token-bucket burst cap, in multiples of the per-second rate limit.
pub const RATE_BURST_WINDOW: f64 = 5.0;

/// Runs a complete transfer: signal supervision, terminal setup, the
/// optional store-and-forward phases, and the exit-status roll-up.
pub fn run(mut cfg: Config, input_names: &[String], output_path: Option<&Path>) -> i32 {
    let guard = match signals::install() {
        Ok(g) => g,
        Err(e) => {
            eprintln!("flowcat: cannot install signal handlers: {}", e);
            return exit::TRANSFER;
        }
    };
    let mut terminal = Terminal::open();
    terminal.init_tostop();
    let (w, h) = terminal.size();
    if !cfg.width_set_manually {
        cfg.width = w;
    }
    if !cfg.height_set_manually {
        cfg.height = h;
    }

    let status = run_phases(cfg, input_names, output_path, &terminal);

    terminal.teardown();
    guard.teardown();
    status
}

fn run_phases(
    mut cfg: Config,
    input_names: &[String],
    output_path: Option<&Path>,
    terminal: &Terminal,
) -> i32 {
    let output = match open_output(output_path) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("flowcat: output: {}", e);
            return exit::TRANSFER;
        }
    };
    let output_id = input::file_id(&output.file);
    let delimiter = if cfg.null_delimiter { 0u8 } else { b'\n' };

    match cfg.store_and_forward.clone() {
        None => {
            let mut inputs = InputList::new(input_names, output_id);
            if cfg.size == 0
                && let Some(total) = inputs.compute_total(cfg.line_mode, delimiter)
            {
                cfg.size = total;
            }
            Engine::new(cfg, output).pump(inputs, terminal)
        }
        Some(spool) => {
            // Phase one: swallow every input into the spool file.
            let (spool_path, temp_guard) = match spool {
                Spool::Temp => match tempfile::NamedTempFile::new() {
                    Ok(t) => (t.path().to_path_buf(), Some(t)),
                    Err(e) => {
                        eprintln!("flowcat: store-and-forward: {}", e);
                        return exit::TRANSFER;
                    }
                },
                Spool::Path(p) => (p, None),
            };
            let spool_out = match File::create(&spool_path) {
                Ok(f) => Output {
                    file: f,
                    name: spool_path.display().to_string(),
                    is_pipe: false,
                },
                Err(e) => {
                    eprintln!("flowcat: {}: {}", spool_path.display(), e);
                    return exit::TRANSFER;
                }
            };
            info!(spool = %spool_path.display(), "store-and-forward: spooling");
            let mut cfg1 = cfg.clone();
            let mut inputs = InputList::new(input_names, input::file_id(&spool_out.file));
            if cfg1.size == 0
                && let Some(total) = inputs.compute_total(cfg1.line_mode, delimiter)
            {
                cfg1.size = total;
            }
            let status1 = Engine::new(cfg1, spool_out).pump(inputs, terminal);
            if status1 & (exit::SIGNAL | exit::TRANSFER | exit::ALLOC) != 0 {
                return status1;
            }

            // Phase two: replay the spool into the real output. The
            // total is now exact, whatever the original inputs were.
            let spool_name = vec![spool_path.display().to_string()];
            let mut cfg2 = cfg.clone();
            let mut replay = InputList::new(&spool_name, output_id);
            match replay.compute_total(cfg2.line_mode, delimiter) {
                Some(total) => cfg2.size = total,
                None => {
                    eprintln!("flowcat: {}: cannot replay spool", spool_path.display());
                    return status1 | exit::ADVANCE;
                }
            }
            let status2 = Engine::new(cfg2, output).pump(replay, terminal);
            drop(temp_guard);
            status1 | status2
        }
    }
}

/// Opens the output sink: stdout unless `-o` named a file.
fn open_output(path: Option<&Path>) -> io::Result<Output> {
    let (file, name) = match path {
        None => {
            let fd = io::stdout().as_fd().try_clone_to_owned()?;
            (File::from(fd), "-".to_string())
        }
        Some(p) => (File::create(p)?, p.display().to_string()),
    };
    let is_pipe = file
        .metadata()
        .map(|md| {
            let ft = md.file_type();
            ft.is_fifo() || ft.is_socket()
        })
        .unwrap_or(false);
    Ok(Output {
        file,
        name,
        is_pipe,
    })
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct Engine {
    cfg: Config,
    output: Output,
    display: Display,
    calc: RateCalc,
    transfer: Transfer,

    /// Cumulative count: bytes, or lines in line mode.
    total_written: u64,
    /// `total_written` minus whatever still sits in the output pipe.
    transferred: u64,

    // Schedule, all monotonic nanoseconds.
    start: u64,
    next_update: u64,
    next_remote: u64,
    next_background: u64,

    // Token bucket.
    target: f64,
    last_topup: u64,

    first_data_seen: bool,
    status: i32,
}

impl Engine {
    fn new(cfg: Config, output: Output) -> Engine {
        let delimiter = if cfg.null_delimiter { 0u8 } else { b'\n' };
        let display = Display::new(&cfg);
        let shows = *display.shows();
        let tracker = LineTracker::new(
            delimiter,
            cfg.line_mode,
            shows.last_written.max(cfg.last_written_n),
            shows.previous_line,
        );
        let calc = RateCalc::new(cfg.average_window, cfg.bits);
        Engine {
            transfer: Transfer::new(tracker),
            display,
            calc,
            cfg,
            output,
            total_written: 0,
            transferred: 0,
            start: 0,
            next_update: 0,
            next_remote: 0,
            next_background: 0,
            target: 0.0,
            last_topup: 0,
            first_data_seen: false,
            status: 0,
        }
    }

    /// Whether any display component forces the buffered path.
    fn needs_buffer(&self) -> bool {
        let shows = self.display.shows();
        shows.buffer_percent || shows.last_written > 0 || shows.previous_line
    }

    /// Reads the monotonic clock. A failed read is a fatal transfer
    /// error: every rate, ETA, and deadline downstream depends on it.
    fn clock_now(&mut self) -> Option<u64> {
        match clock::monotonic_nanos() {
            Ok(n) => Some(n),
            Err(e) => {
                eprintln!("flowcat: monotonic clock read failed: {}", e);
                self.status |= exit::TRANSFER;
                None
            }
        }
    }

    /// The main loop. Returns the accumulated exit-status bits.
    fn pump(mut self, mut inputs: InputList, terminal: &Terminal) -> i32 {
        let Some(mut input) = inputs.open_next() else {
            eprintln!("flowcat: no input could be opened");
            return inputs.status_bits | self.status;
        };

        let buf_size = if self.cfg.buffer_size > 0 {
            self.cfg.buffer_size
        } else {
            transfer::auto_buffer_size(input.blksize)
        };
        if self.transfer.set_buffer_size(buf_size).is_err() {
            return inputs.status_bits | exit::ALLOC;
        }
        if self.cfg.direct_io {
            transfer::set_direct_io(&input.file, true);
            transfer::set_direct_io(&self.output.file, true);
        }

        let my_pid = std::process::id();
        let Some(start) = self.clock_now() else {
            return inputs.status_bits | self.status;
        };
        self.start = start;
        self.last_topup = start;
        self.next_update =
            start + clock::secs_to_nanos(self.cfg.delay_start.max(self.cfg.interval));
        self.next_remote = start;
        self.next_background = start + clock::secs_to_nanos(BACKGROUND_CHECK_SECS);
        debug!(buf_size, size = self.cfg.size, "transfer starting");

        loop {
            let Some(now) = self.clock_now() else {
                break;
            };

            // Remote reconfiguration, on its own short cadence.
            if now >= self.next_remote {
                if let Some(req) = remote::receive(my_pid) {
                    self.apply_remote(&req);
                }
                self.next_remote = now + clock::secs_to_nanos(REMOTE_CHECK_SECS);
            }

            if signals::exit_requested() {
                self.status |= exit::SIGNAL;
                break;
            }

            if now >= self.next_background {
                if signals::background_check() {
                    terminal.reassert_tostop();
                    self.display.reinit_cursor();
                }
                self.next_background = now + clock::secs_to_nanos(BACKGROUND_CHECK_SECS);
            }

            // Token bucket top-up.
            let mut cansend: Option<u64> = None;
            if self.cfg.rate_limit > 0 {
                let limit = self.cfg.rate_limit as f64;
                let dt = clock::secs_between(self.last_topup, now);
                self.target = (self.target + limit * dt).min(limit * RATE_BURST_WINDOW);
                cansend = Some(self.target.floor() as u64);
            }
            self.last_topup = now;

            // Size cap.
            let mut cap_remaining = None;
            let mut line_cap = None;
            if self.cfg.stop_at_size && self.cfg.size > 0 {
                let rem = self.cfg.size.saturating_sub(self.total_written);
                if rem == 0 {
                    self.transfer.eof_in = true;
                    self.transfer.eof_out = true;
                } else if self.cfg.line_mode {
                    line_cap = Some(rem);
                } else {
                    cap_remaining = Some(rem);
                    cansend = Some(cansend.map_or(rem, |c| c.min(rem)));
                }
            }

            // One transfer step, unless the bucket is dry.
            if cansend == Some(0) && !self.transfer.eof_out {
                std::thread::sleep(IDLE_SLEEP);
            } else if !(self.transfer.eof_in && self.transfer.eof_out) {
                let limits = StepLimits {
                    cansend,
                    display_needs_buffer: self.needs_buffer(),
                    cap_remaining,
                    line_cap,
                };
                match self.transfer.step(&mut input, &self.output, &self.cfg, limits) {
                    Ok(step) => {
                        let written_units = if self.cfg.line_mode {
                            step.lines
                        } else {
                            step.written
                        };
                        self.total_written += written_units;
                        self.target = (self.target - step.written as f64).max(0.0);
                        if step.written > 0 && !self.first_data_seen {
                            self.first_data_seen = true;
                            if self.cfg.wait {
                                // The clock restarts at the first byte.
                                let Some(n) = self.clock_now() else { break };
                                self.start = n;
                                signals::reset_stopped();
                            }
                        }
                    }
                    Err(e) => {
                        eprintln!("flowcat: {}: {}", self.output.name, e);
                        self.status |= e.exit_bit();
                        break;
                    }
                }
            }

            // Consumer back-pressure.
            let in_pipe_bytes = if self.output.is_pipe && !signals::pipe_closed() {
                transfer::pipe_backlog(self.output.fd()).unwrap_or(0)
            } else {
                0
            };
            self.transferred = if self.cfg.line_mode {
                let consumed_pos = self
                    .transfer
                    .tracker
                    .output_pos()
                    .saturating_sub(in_pipe_bytes);
                self.total_written
                    .saturating_sub(self.transfer.tracker.lines_after(consumed_pos))
            } else {
                self.total_written.saturating_sub(in_pipe_bytes)
            };

            // Advance to the next input once both sides hit EOF.
            if self.transfer.eof_in && self.transfer.eof_out && inputs.remaining() {
                if let Some(next) = inputs.open_next() {
                    input = next;
                    self.transfer.next_input();
                    if self.cfg.direct_io {
                        transfer::set_direct_io(&input.file, true);
                    }
                }
            }

            let all_done =
                self.transfer.eof_in && self.transfer.eof_out && !inputs.remaining();
            let mut final_now = false;
            if all_done {
                if in_pipe_bytes == 0 {
                    final_now = true;
                } else {
                    // Let the consumer drain without busy-spinning.
                    std::thread::sleep(IDLE_SLEEP);
                }
            }

            // Display housekeeping.
            if self.cfg.wait && !self.first_data_seen {
                continue;
            }
            let Some(now) = self.clock_now() else {
                break;
            };
            if !final_now && now < self.next_update {
                continue;
            }
            self.next_update += clock::secs_to_nanos(self.cfg.interval);
            if self.next_update < now {
                self.next_update = now;
            }

            let elapsed = clock::secs_between(self.start, now)
                - clock::nanos_to_secs(signals::stopped_nanos());
            let elapsed = elapsed.max(0.0);

            if signals::take_resize() {
                let (w, h) = terminal.size();
                if !self.cfg.width_set_manually {
                    self.cfg.width = w;
                }
                if !self.cfg.height_set_manually {
                    self.cfg.height = h;
                }
            }
            if signals::take_cursor_reinit() {
                self.display.reinit_cursor();
            }

            self.calc
                .update(elapsed, self.total_written, self.cfg.size, final_now);
            self.paint(terminal, elapsed, final_now);

            if final_now {
                break;
            }
        }

        self.finish();
        inputs.status_bits | self.status
    }

    fn apply_remote(&mut self, req: &remote::RemoteRequest) {
        debug!("applying remote reconfiguration");
        let reparse = remote::apply(req, &mut self.cfg);
        if reparse {
            self.display.recompile(&self.cfg);
            let shows = *self.display.shows();
            self.transfer.set_tracking(
                shows.last_written.max(self.cfg.last_written_n),
                shows.previous_line,
            );
        }
        if self.cfg.buffer_size > 0
            && self.transfer.set_buffer_size(self.cfg.buffer_size).is_err()
        {
            warn!("remote buffer resize failed");
            self.status |= exit::ALLOC;
        }
    }

    fn paint(&mut self, terminal: &Terminal, elapsed: f64, final_update: bool) {
        let unscale = if self.cfg.bits { 8.0 } else { 1.0 };
        let ctx = RenderContext {
            units: self.cfg.units(),
            elapsed,
            rate: self.calc.rate(),
            avg_rate: self.calc.avg_rate(),
            max_rate: self.calc.stats.max / unscale,
            percentage: self.calc.percentage(),
            transferred: self.transferred,
            size: self.cfg.size,
            eta_secs: self.calc.eta_secs(self.transferred, self.cfg.size),
            final_update,
            gauge: self.cfg.rate_gauge,
            buffer_percent: if self.transfer.splice_used {
                None
            } else {
                Some(self.transfer.buffer_percent())
            },
            last_written: self.transfer.tracker.last_written(),
            previous_line: self.transfer.tracker.previous_line(),
            name: self.cfg.name.as_deref(),
            bar_style: self.cfg.bar_style,
            colors: terminal.supports_color(),
            now: Local::now(),
        };
        self.display.paint(&self.cfg, terminal, &ctx, self.cfg.width);
    }

    /// End-of-run output: move off the progress line, then the
    /// statistics summary if requested.
    fn finish(&mut self) {
        if self.display.visible && !self.cfg.numeric && !self.cfg.cursor {
            eprintln!();
        }
        if self.cfg.show_stats && self.calc.stats.count > 0 {
            let unscale = if self.cfg.bits { 8.0 } else { 1.0 };
            let u = self.cfg.units();
            eprintln!(
                "flowcat: rate min/avg/max/mdev = {}/{}/{}/{}",
                units::rate(self.calc.stats.min / unscale, u),
                units::rate(self.calc.stats.mean() / unscale, u),
                units::rate(self.calc.stats.max / unscale, u),
                units::rate(self.calc.stats.mdev() / unscale, u),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn quiet_cfg() -> Config {
        Config {
            quiet: true,
            ..Config::default()
        }
    }

    fn write_input(dir: &tempfile::TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    fn run_to_file(cfg: Config, inputs: &[String], dir: &tempfile::TempDir) -> (i32, Vec<u8>) {
        let out_path = dir.path().join("out.dat");
        let status = run(cfg, inputs, Some(&out_path));
        let data = std::fs::read(&out_path).unwrap_or_default();
        (status, data)
    }

    #[test]
    fn copies_input_to_output() {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 199) as u8).collect();
        let input = write_input(&dir, "in.dat", &data);
        let (status, out) = run_to_file(quiet_cfg(), &[input.display().to_string()], &dir);
        assert_eq!(status, 0);
        assert_eq!(out, data);
    }

    #[test]
    fn concatenates_multiple_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_input(&dir, "a", b"first,");
        let b = write_input(&dir, "b", b"second");
        let (status, out) = run_to_file(
            quiet_cfg(),
            &[a.display().to_string(), b.display().to_string()],
            &dir,
        );
        assert_eq!(status, 0);
        assert_eq!(out, b"first,second");
    }

    #[test]
    fn missing_input_contributes_access_bit() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_input(&dir, "good", b"data");
        let (status, out) = run_to_file(
            quiet_cfg(),
            &["/no/such/file".to_string(), good.display().to_string()],
            &dir,
        );
        assert_eq!(status, exit::ACCESS);
        assert_eq!(out, b"data");
    }

    #[test]
    fn stop_at_size_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&dir, "in.dat", &vec![9u8; 10_000]);
        let cfg = Config {
            size: 1234,
            stop_at_size: true,
            ..quiet_cfg()
        };
        let (status, out) = run_to_file(cfg, &[input.display().to_string()], &dir);
        assert_eq!(status, 0);
        assert_eq!(out.len(), 1234);
    }

    #[test]
    fn stop_at_size_beyond_input_takes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&dir, "in.dat", &vec![9u8; 500]);
        let cfg = Config {
            size: 10_000,
            stop_at_size: true,
            ..quiet_cfg()
        };
        let (_, out) = run_to_file(cfg, &[input.display().to_string()], &dir);
        assert_eq!(out.len(), 500);
    }

    #[test]
    fn stop_at_size_in_line_mode_stops_on_line_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&dir, "in.txt", b"one\ntwo\nthree\nfour\n");
        let cfg = Config {
            line_mode: true,
            size: 2,
            stop_at_size: true,
            ..quiet_cfg()
        };
        let (status, out) = run_to_file(cfg, &[input.display().to_string()], &dir);
        assert_eq!(status, 0);
        assert_eq!(out, b"one\ntwo\n");
    }

    #[test]
    fn store_and_forward_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 233) as u8).collect();
        let input = write_input(&dir, "in.dat", &data);
        let cfg = Config {
            store_and_forward: Some(Spool::Temp),
            ..quiet_cfg()
        };
        let (status, out) = run_to_file(cfg, &[input.display().to_string()], &dir);
        assert_eq!(status, 0);
        assert_eq!(out, data);
    }

    #[test]
    fn store_and_forward_keeps_named_spool() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&dir, "in.dat", b"spooled");
        let spool = dir.path().join("spool.dat");
        let cfg = Config {
            store_and_forward: Some(Spool::Path(spool.clone())),
            ..quiet_cfg()
        };
        let (status, out) = run_to_file(cfg, &[input.display().to_string()], &dir);
        assert_eq!(status, 0);
        assert_eq!(out, b"spooled");
        assert_eq!(std::fs::read(&spool).unwrap(), b"spooled");
    }

    #[test]
    fn rate_limit_bounds_throughput() {
        let dir = tempfile::tempdir().unwrap();
        // The bucket starts empty, so 4 KiB at 8 KiB/s takes roughly
        // half a second regardless of how fast the files are.
        let input = write_input(&dir, "in.dat", &vec![0u8; 4 * 1024]);
        let cfg = Config {
            rate_limit: 8 * 1024,
            ..quiet_cfg()
        };
        let started = std::time::Instant::now();
        let (status, out) = run_to_file(cfg, &[input.display().to_string()], &dir);
        let elapsed = started.elapsed();
        assert_eq!(status, 0);
        assert_eq!(out.len(), 4 * 1024);
        assert!(elapsed >= Duration::from_millis(300), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(5), "elapsed {:?}", elapsed);
    }

    #[test]
    fn discard_produces_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&dir, "in.dat", &vec![1u8; 4096]);
        let cfg = Config {
            discard: true,
            ..quiet_cfg()
        };
        let (status, out) = run_to_file(cfg, &[input.display().to_string()], &dir);
        assert_eq!(status, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn pipe_output_drains_and_exits_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&dir, "in.dat", &vec![5u8; 2000]);
        let fifo = dir.path().join("sink.fifo");
        nix::unistd::mkfifo(&fifo, nix::sys::stat::Mode::from_bits_truncate(0o600)).unwrap();

        // A consumer that reads the whole FIFO.
        let fifo_clone = fifo.clone();
        let consumer = std::thread::spawn(move || {
            let mut f = File::open(&fifo_clone).unwrap();
            let mut sink = Vec::new();
            io::Read::read_to_end(&mut f, &mut sink).unwrap();
            sink.len()
        });

        let status = run(
            quiet_cfg(),
            &[input.display().to_string()],
            Some(&fifo),
        );
        let consumed = consumer.join().unwrap();
        assert_eq!(status, 0);
        assert_eq!(consumed, 2000);
    }

    #[test]
    fn open_output_to_file_is_not_a_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("o");
        let out = open_output(Some(&path)).unwrap();
        assert!(!out.is_pipe);
        drop(out);
        let mut f = File::create(&path).unwrap();
        f.write_all(b"x").unwrap();
    }
}
