//! Pass progress on stderr.
//!
//! The driver emits a [`ProgressEvent`] at each step worth watching; a
//! [`ProgressSink`] decides how (or whether) to show it. Everything goes to
//! stderr so stdout stays parseable.

use std::fmt;
use std::io::Write;

use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ProgressEvent {
    Scanning { root: String },
    Retiring { n: u64, total: u64 },
    Uploading { n: u64, total: u64, document: String },
    Ingesting { completed: u64, expected: u64 },
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::Scanning { root } => write!(f, "sync  scanning {}...", root),
            ProgressEvent::Retiring { n, total } => write!(
                f,
                "sync  retiring  {} / {} old versions",
                grouped(*n),
                grouped(*total)
            ),
            ProgressEvent::Uploading { n, total, document } => write!(
                f,
                "sync  uploading  {} / {}  {}",
                grouped(*n),
                grouped(*total),
                document
            ),
            ProgressEvent::Ingesting {
                completed,
                expected,
            } => write!(
                f,
                "sync  ingesting  {} / {} files processed",
                grouped(*completed),
                grouped(*expected)
            ),
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// One readable line per event.
pub struct HumanProgress;

impl ProgressSink for HumanProgress {
    fn emit(&self, event: ProgressEvent) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", event);
        let _ = err.flush();
    }
}

/// One JSON object per event: `{"event":"progress","phase":"uploading",...}`.
pub struct JsonLinesProgress;

#[derive(Serialize)]
struct Envelope<'a> {
    event: &'static str,
    #[serde(flatten)]
    progress: &'a ProgressEvent,
}

impl ProgressSink for JsonLinesProgress {
    fn emit(&self, event: ProgressEvent) {
        let envelope = Envelope {
            event: "progress",
            progress: &event,
        };
        if let Ok(line) = serde_json::to_string(&envelope) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

pub struct Silent;

impl ProgressSink for Silent {
    fn emit(&self, _: ProgressEvent) {}
}

/// Thousands separators: 1234567 → "1,234,567".
fn grouped(n: u64) -> String {
    let digits = n.to_string();
    let head = digits.len() % 3;
    let mut out = String::from(&digits[..head]);
    for (i, chunk) in digits.as_bytes()[head..].chunks(3).enumerate() {
        if head > 0 || i > 0 {
            out.push(',');
        }
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
    }
    out
}

/// `--progress` values.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human output on a terminal, nothing otherwise.
    pub fn default_for_tty() -> Self {
        match atty::is(atty::Stream::Stderr) {
            true => ProgressMode::Human,
            false => ProgressMode::Off,
        }
    }

    pub fn sink(self) -> Box<dyn ProgressSink> {
        match self {
            ProgressMode::Off => Box::new(Silent),
            ProgressMode::Human => Box::new(HumanProgress),
            ProgressMode::Json => Box::new(JsonLinesProgress),
        }
    }
}
