//! Push and pull progress reporting.
//!
//! Network round trips can take a while, so push and pull announce each
//! phase as they enter it. Progress is emitted on **stderr** so stdout
//! stays parseable for editor integrations reading the result.

use std::io::Write;

use serde::Serialize;

/// Phase of a push or pull.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncPhase {
    Checking,
    Rendering,
    Uploading,
    Writing,
    Commenting,
    Fetching,
    Merging,
    Downloading,
    Saving,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Checking => "checking",
            SyncPhase::Rendering => "rendering",
            SyncPhase::Uploading => "uploading",
            SyncPhase::Writing => "writing",
            SyncPhase::Commenting => "commenting",
            SyncPhase::Fetching => "fetching",
            SyncPhase::Merging => "merging",
            SyncPhase::Downloading => "downloading",
            SyncPhase::Saving => "saving",
        }
    }
}

/// A single progress event.
#[derive(Clone, Debug)]
pub enum SyncProgressEvent {
    /// Entered a phase whose amount of work is not known up front.
    Phase { command: &'static str, phase: SyncPhase },
    /// n of total items done within a phase.
    Items {
        command: &'static str,
        phase: SyncPhase,
        n: u64,
        total: u64,
    },
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "push  uploading  2 / 5 items".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Phase { command, phase } => {
                format!("{}  {}...\n", command, phase.as_str())
            }
            SyncProgressEvent::Items {
                command,
                phase,
                n,
                total,
            } => format!(
                "{}  {}  {} / {} items\n",
                command,
                phase.as_str(),
                format_number(*n),
                format_number(*total)
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match &event {
            SyncProgressEvent::Phase { command, phase } => serde_json::json!({
                "event": "progress",
                "command": command,
                "phase": phase,
            }),
            SyncProgressEvent::Items {
                command,
                phase,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "command": command,
                "phase": phase,
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

/// Keeps every event; handy for asserting phase order.
#[derive(Default)]
pub struct RecordingProgress {
    events: std::sync::Mutex<Vec<SyncProgressEvent>>,
}

impl RecordingProgress {
    pub fn phases(&self) -> Vec<SyncPhase> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        let mut phases: Vec<SyncPhase> = Vec::new();
        for event in events.iter() {
            let phase = match event {
                SyncProgressEvent::Phase { phase, .. } | SyncProgressEvent::Items { phase, .. } => *phase,
            };
            if phases.last() != Some(&phase) {
                phases.push(phase);
            }
        }
        phases
    }
}

impl SyncProgressReporter for RecordingProgress {
    fn report(&self, event: SyncProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
