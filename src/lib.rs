//! flowcat — pipeline flow meter.
//!
//! Copies bytes (or lines) from its inputs to its output while painting
//! a live progress line on the controlling terminal.
//!
//! Provides:
//! - `engine` — the main transfer loop and exit-status accumulation
//! - `transfer` — buffered and zero-copy data movement, line accounting
//! - `calc` — instantaneous and windowed-average rate estimation
//! - `format` — format-string compiler and one-line renderer
//! - `display` — terminal / numeric / title output driver
//! - `remote` — live reconfiguration from a peer process
//! - `signals`, `terminal` — POSIX signal and tty supervision

pub mod calc;
pub mod clock;
pub mod display;
pub mod engine;
pub mod error;
pub mod format;
pub mod input;
pub mod options;
pub mod pidfile;
pub mod remote;
pub mod signals;
pub mod terminal;
pub mod transfer;
pub mod units;
