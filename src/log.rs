//! Leveled logging for conductor runs.
//!
//! Log levels:
//! - ERROR: Failures that abort the current command
//! - WARN: Absorbed failures (classifier fallback, duplicate run, retries)
//! - INFO: Pipeline milestones (task labeled, subtasks created, runs dispatched)
//! - DEBUG: Tracker and model calls
//! - TRACE: Raw payloads
//!
//! Lines go to `~/.conductor/conductor.log`. Inside CI (`CI=true`) or with
//! `--stderr` they are mirrored to stderr so they land in the workflow log.
//! `--debug` or `CONDUCTOR_DEBUG=1` lowers the threshold to DEBUG;
//! `CONDUCTOR_LOG=<level>` sets it explicitly.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::OnceLock;

static SINK: OnceLock<PathBuf> = OnceLock::new();
static TO_STDERR: AtomicBool = AtomicBool::new(false);
static THRESHOLD: AtomicU8 = AtomicU8::new(Level::Info as u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

const LEVELS: [Level; 5] = [
    Level::Error,
    Level::Warn,
    Level::Info,
    Level::Debug,
    Level::Trace,
];

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LEVELS
            .into_iter()
            .find(|l| l.tag().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown log level '{}'", s))
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Pick the threshold: an explicit `CONDUCTOR_LOG` wins over the debug flag.
fn threshold_from(explicit: Option<&str>, debug: bool) -> Level {
    match explicit.map(Level::from_str) {
        Some(Ok(level)) => level,
        _ if debug => Level::Debug,
        _ => Level::Info,
    }
}

/// Set up the log sink. Call once from `main` before anything logs.
pub fn init(debug: bool, stderr: bool) {
    let explicit = std::env::var("CONDUCTOR_LOG").ok();
    let level = threshold_from(explicit.as_deref(), debug || env_flag("CONDUCTOR_DEBUG"));
    THRESHOLD.store(level as u8, Ordering::SeqCst);
    TO_STDERR.store(stderr || env_flag("CI"), Ordering::SeqCst);

    if let Some(dir) = dirs::home_dir().map(|h| h.join(".conductor")) {
        let _ = std::fs::create_dir_all(&dir);
        SINK.set(dir.join("conductor.log")).ok();
    }
}

pub fn enabled(level: Level) -> bool {
    level as u8 <= THRESHOLD.load(Ordering::Relaxed)
}

fn format_line(level: Level, msg: &str) -> String {
    format!(
        "{} {:<5} {}",
        chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
        level.tag(),
        msg
    )
}

/// Write one line at `level`. Used through the `clog*` macros.
pub fn write(level: Level, msg: &str) {
    if !enabled(level) {
        return;
    }
    let line = format_line(level, msg);

    if TO_STDERR.load(Ordering::Relaxed) {
        eprintln!("{}", line);
    }
    if let Some(path) = SINK.get() {
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", line);
        }
    }
}

#[macro_export]
macro_rules! clog {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::Level::Info, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! clog_error {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::Level::Error, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! clog_warn {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::Level::Warn, &format!($($arg)*))
    };
}

/// Skips formatting entirely when DEBUG is filtered out.
#[macro_export]
macro_rules! clog_debug {
    ($($arg:tt)*) => {
        if $crate::log::enabled($crate::log::Level::Debug) {
            $crate::log::write($crate::log::Level::Debug, &format!($($arg)*))
        }
    };
}

/// Raw payloads; formatted only when TRACE is on.
#[macro_export]
macro_rules! clog_trace {
    ($($arg:tt)*) => {
        if $crate::log::enabled($crate::log::Level::Trace) {
            $crate::log::write($crate::log::Level::Trace, &format!($($arg)*))
        }
    };
}
