//! flowcat - pipeline flow meter.
//!
//! Copies its inputs to its output while showing progress, rate, and
//! ETA on the terminal, with optional transfer shaping. Also acts as a
//! remote-control sender for an already running flowcat (`-R`).

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use flowcat::engine;
use flowcat::options::{
    BarStyle, Config, ExtraDisplay, Spool, parse_interval, parse_rate, parse_seconds, parse_size,
};
use flowcat::pidfile::PidFile;
use flowcat::remote;

/// Pipeline flow meter: copy inputs to output with a live progress
/// display and transfer shaping.
#[derive(Parser, Debug)]
#[command(name = "flowcat", version, about)]
struct Args {
    /// Input files; '-' means standard input. With no files, standard
    /// input is read.
    #[arg(value_name = "FILE")]
    files: Vec<String>,

    // --- Display switches -------------------------------------------------
    /// Show the progress bar (moving indicator when size is unknown).
    #[arg(short = 'p', long = "progress")]
    progress: bool,

    /// Show elapsed time.
    #[arg(short = 't', long = "timer")]
    timer: bool,

    /// Show estimated time to completion.
    #[arg(short = 'e', long = "eta")]
    eta: bool,

    /// Show the estimated local time of completion.
    #[arg(short = 'I', long = "fineta")]
    fineta: bool,

    /// Show the current transfer rate.
    #[arg(short = 'r', long = "rate")]
    rate: bool,

    /// Show the average transfer rate.
    #[arg(short = 'a', long = "average-rate")]
    average_rate: bool,

    /// Show the number of bytes (or lines) transferred.
    #[arg(short = 'b', long = "bytes")]
    bytes: bool,

    /// Show transfer buffer utilisation.
    #[arg(short = 'T', long = "buffer-percent")]
    buffer_percent: bool,

    /// Show the last N bytes written.
    #[arg(short = 'A', long = "last-written", value_name = "N")]
    last_written: Option<usize>,

    /// Use this format string for the display.
    #[arg(short = 'F', long = "format", value_name = "FORMAT")]
    format: Option<String>,

    /// Numeric output: whitespace-separated values, one line per update.
    #[arg(short = 'n', long = "numeric")]
    numeric: bool,

    /// No display at all; the transfer (and shaping) still runs.
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    // --- Output modifiers -------------------------------------------------
    /// Count bits instead of bytes.
    #[arg(short = '8', long = "bits")]
    bits: bool,

    /// Use SI units (powers of 1000) instead of IEC (powers of 1024).
    #[arg(short = 'k', long = "si")]
    si: bool,

    /// Hold the display until the first byte (or line) is transferred,
    /// then start the clock from there.
    #[arg(short = 'W', long = "wait")]
    wait: bool,

    /// Wait SEC seconds before the first display update.
    #[arg(short = 'D', long = "delay-start", value_name = "SEC", value_parser = parse_seconds)]
    delay_start: Option<f64>,

    /// Expected total data size; accepts K/M/G/T suffixes.
    #[arg(short = 's', long = "size", value_name = "SIZE", value_parser = parse_size)]
    size: Option<u64>,

    /// Show the current rate against the maximum seen instead of
    /// progress through a known size.
    #[arg(short = 'g', long = "rate-gauge")]
    rate_gauge: bool,

    /// Count lines instead of bytes.
    #[arg(short = 'l', long = "line-mode")]
    line_mode: bool,

    /// Lines are terminated by NUL instead of newline.
    #[arg(short = '0', long = "null")]
    null: bool,

    /// Update the display every SEC seconds.
    #[arg(short = 'i', long = "interval", value_name = "SEC", value_parser = parse_interval)]
    interval: Option<f64>,

    /// Window over which the average rate is estimated, in seconds.
    #[arg(short = 'm', long = "average-rate-window", value_name = "SEC", value_parser = parse_seconds)]
    average_window: Option<f64>,

    /// Assume this terminal width instead of asking the terminal.
    #[arg(short = 'w', long = "width", value_name = "COLS")]
    width: Option<usize>,

    /// Assume this terminal height instead of asking the terminal.
    #[arg(short = 'H', long = "height", value_name = "ROWS")]
    height: Option<usize>,

    /// Prefix the display with this name.
    #[arg(short = 'N', long = "name", value_name = "NAME")]
    name: Option<String>,

    /// Progress bar style: plain, block, granular, or shaded.
    #[arg(short = 'u', long = "bar-style", value_name = "STYLE", value_parser = parse_bar_style)]
    bar_style: Option<BarStyle>,

    /// Extra display destinations: windowtitle, processtitle
    /// (comma-separated).
    #[arg(short = 'x', long = "extra-display", value_name = "SPEC", value_parser = parse_extra)]
    extra_display: Option<ExtraDisplay>,

    /// Print transfer-rate statistics (min/avg/max/mdev) at the end.
    #[arg(short = 'v', long = "stats")]
    stats: bool,

    /// Display even when stderr is not a terminal or the process is in
    /// the background.
    #[arg(short = 'f', long = "force")]
    force: bool,

    /// Repaint a reserved terminal row instead of rewriting the
    /// current line.
    #[arg(short = 'c', long = "cursor")]
    cursor: bool,

    // --- Transfer modifiers -----------------------------------------------
    /// Write the output to FILE instead of standard output.
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output: Option<PathBuf>,

    /// Limit the transfer to RATE bytes per second; accepts suffixes.
    #[arg(short = 'L', long = "rate-limit", value_name = "RATE", value_parser = parse_rate)]
    rate_limit: Option<u64>,

    /// Use a transfer buffer of BYTES bytes.
    #[arg(short = 'B', long = "buffer-size", value_name = "BYTES", value_parser = parse_size)]
    buffer_size: Option<u64>,

    /// Never use the zero-copy transfer path.
    #[arg(short = 'C', long = "no-splice")]
    no_splice: bool,

    /// Skip read errors, replacing the bad region with null bytes.
    /// Given twice, only the first warning per file is shown.
    #[arg(short = 'E', long = "skip-errors", action = clap::ArgAction::Count)]
    skip_errors: u8,

    /// After a read error, skip to the next multiple of BYTES.
    #[arg(short = 'Z', long = "error-skip-block", value_name = "BYTES", value_parser = parse_size)]
    error_skip_block: Option<u64>,

    /// Stop after --size bytes (or lines) even if input remains.
    #[arg(short = 'S', long = "stop-at-size")]
    stop_at_size: bool,

    /// Flush the output to disk after every write.
    #[arg(short = 'Y', long = "sync")]
    sync: bool,

    /// Use direct I/O, bypassing the page cache.
    #[arg(short = 'K', long = "direct-io")]
    direct_io: bool,

    /// Read the input but write nothing; counters advance as usual.
    #[arg(short = 'X', long = "discard")]
    discard: bool,

    /// Spool all input to FILE first, then replay it to the output.
    /// With no FILE, an auto-removed temporary is used.
    #[arg(
        short = 'U',
        long = "store-and-forward",
        value_name = "FILE",
        num_args = 0..=1,
        default_missing_value = ""
    )]
    store_and_forward: Option<String>,

    // --- Modes ------------------------------------------------------------
    /// Send these display and shaping options to the running flowcat
    /// process PID instead of transferring anything.
    #[arg(short = 'R', long = "remote", value_name = "PID")]
    remote: Option<u32>,

    /// Write our process id to FILE; removed on exit.
    #[arg(short = 'P', long = "pidfile", value_name = "FILE")]
    pidfile: Option<PathBuf>,
}

/// Diagnostics go through the standard env filter; by default only
/// errors, so nothing fights the progress line for stderr.
fn init_logging() {
    let filter = EnvFilter::try_from_env("FLOWCAT_LOG")
        .unwrap_or_else(|_| EnvFilter::new("flowcat=error"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_bar_style(s: &str) -> Result<BarStyle, String> {
    s.parse()
}

fn parse_extra(s: &str) -> Result<ExtraDisplay, String> {
    s.parse()
}

fn config_from(args: &Args) -> Config {
    let mut cfg = Config {
        line_mode: args.line_mode,
        null_delimiter: args.null,
        bits: args.bits,
        si: args.si,
        interval: args.interval.unwrap_or(flowcat::options::DEFAULT_INTERVAL),
        delay_start: args.delay_start.unwrap_or(0.0),
        average_window: args
            .average_window
            .unwrap_or(flowcat::options::DEFAULT_AVERAGE_WINDOW),
        size: args.size.unwrap_or(0),
        rate_limit: args.rate_limit.unwrap_or(0),
        buffer_size: args.buffer_size.unwrap_or(0) as usize,
        stop_at_size: args.stop_at_size,
        sync_after_write: args.sync,
        direct_io: args.direct_io,
        no_splice: args.no_splice,
        discard: args.discard,
        store_and_forward: args.store_and_forward.as_ref().map(|f| {
            if f.is_empty() {
                Spool::Temp
            } else {
                Spool::Path(PathBuf::from(f))
            }
        }),
        skip_errors: args.skip_errors,
        error_skip_block: args.error_skip_block.unwrap_or(0),
        show_progress: args.progress,
        show_timer: args.timer,
        show_eta: args.eta,
        show_fineta: args.fineta,
        show_rate: args.rate,
        show_average_rate: args.average_rate,
        show_bytes: args.bytes,
        show_buffer_percent: args.buffer_percent,
        last_written_n: args.last_written.unwrap_or(0),
        numeric: args.numeric,
        quiet: args.quiet,
        wait: args.wait,
        force: args.force,
        cursor: args.cursor,
        rate_gauge: args.rate_gauge,
        show_stats: args.stats,
        name: args.name.clone(),
        format: args.format.clone(),
        width: args.width.unwrap_or(0),
        height: args.height.unwrap_or(0),
        width_set_manually: args.width.is_some(),
        height_set_manually: args.height.is_some(),
        bar_style: args.bar_style.unwrap_or_default(),
        extra: args.extra_display.unwrap_or_default(),
    };
    // A fixed skip block is only meaningful with the skip policy on.
    if cfg.error_skip_block > 0 && cfg.skip_errors == 0 {
        cfg.skip_errors = 1;
    }
    // Numeric mode reports percentage alone unless switches say
    // otherwise; everything else (sender mode included) gets the
    // standard display set.
    if !cfg.numeric {
        cfg.apply_display_defaults();
    }
    cfg
}

fn main() {
    let args = Args::parse();
    init_logging();
    let cfg = config_from(&args);

    // Sender mode: deliver the options and exit.
    if let Some(pid) = args.remote {
        let req = remote::RemoteRequest::from_config(&cfg, pid);
        match remote::send(&req) {
            Ok(()) => std::process::exit(0),
            Err(e) => {
                eprintln!("flowcat: {}", e);
                std::process::exit(1);
            }
        }
    }

    let _pidfile = args.pidfile.as_ref().and_then(|path| {
        PidFile::create(path)
            .map_err(|e| eprintln!("flowcat: {}: {}", path.display(), e))
            .ok()
    });

    let status = engine::run(cfg, &args.files, args.output.as_deref());
    std::process::exit(status);
}
