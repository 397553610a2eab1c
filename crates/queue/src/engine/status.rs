//! Progress parsing for both engine backends.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use super::ProgressReport;

static ENCODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"Encoding: task (\d+) of (\d+), (\d+(?:\.\d+)?) %(?: \((\d+(?:\.\d+)?) fps, avg (\d+(?:\.\d+)?) fps, ETA (\d+)h(\d+)m(\d+)s\))?",
    )
    .expect("valid regex")
});

static SCAN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"Scanning title (\d+) of (\d+)(?:, preview (\d+))?(?:, (\d+(?:\.\d+)?) %)?",
    )
    .expect("valid regex")
});

/// Parse one line of CLI progress output.
///
/// The CLI rewrites its progress line in place, so callers should split
/// stdout on carriage returns as well as newlines before calling this.
pub fn parse_cli_status(line: &str) -> Option<ProgressReport> {
    if let Some(caps) = ENCODE_RE.captures(line) {
        let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<f64>().ok());
        let int = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok());

        let eta = match (int(6), int(7), int(8)) {
            (Some(h), Some(m), Some(s)) => Duration::from_secs(h * 3600 + m * 60 + s),
            _ => Duration::ZERO,
        };

        return Some(ProgressReport::Working {
            pass: int(1).unwrap_or(1) as u32,
            pass_count: int(2).unwrap_or(1) as u32,
            percent: num(3).unwrap_or(0.0).clamp(0.0, 100.0),
            current_fps: num(4).unwrap_or(0.0),
            avg_fps: num(5).unwrap_or(0.0),
            eta,
        });
    }

    let caps = SCAN_RE.captures(line)?;
    let int = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    let percent = caps
        .get(4)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(0.0);

    Some(ProgressReport::Scanning {
        progress: percent / 100.0,
        current_preview: int(3).unwrap_or(0),
        preview_count: 0,
        current_title: int(1).unwrap_or(0),
        title_count: int(2).unwrap_or(0),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StateJson {
    state: String,
    #[serde(default)]
    working: Option<WorkingJson>,
    #[serde(default)]
    scanning: Option<ScanningJson>,
    #[serde(default)]
    work_done: Option<WorkDoneJson>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct WorkingJson {
    progress: f64,
    rate: f64,
    rate_avg: f64,
    #[serde(rename = "ETASeconds")]
    eta_seconds: i64,
    pass: i32,
    pass_count: i32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ScanningJson {
    progress: f64,
    preview: u32,
    preview_count: u32,
    title: u32,
    title_count: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct WorkDoneJson {
    error: i32,
}

/// Translate the library backend's JSON state document into a report.
///
/// Returns `Ok(None)` for the idle state, which carries no progress.
pub fn parse_library_state(json: &str) -> Result<Option<ProgressReport>, serde_json::Error> {
    let state: StateJson = serde_json::from_str(json)?;

    let report = match state.state.as_str() {
        "WORKING" | "PAUSED" | "MUXING" | "SEARCHING" => {
            let w = state.working.unwrap_or_default();
            let percent = if state.state == "MUXING" {
                100.0
            } else {
                (w.progress * 100.0).clamp(0.0, 100.0)
            };
            Some(ProgressReport::Working {
                percent,
                current_fps: w.rate,
                avg_fps: w.rate_avg,
                eta: Duration::from_secs(w.eta_seconds.max(0) as u64),
                pass: w.pass.max(1) as u32,
                pass_count: w.pass_count.max(1) as u32,
            })
        }
        "SCANNING" => {
            let s = state.scanning.unwrap_or_default();
            Some(ProgressReport::Scanning {
                progress: s.progress.clamp(0.0, 1.0),
                current_preview: s.preview,
                preview_count: s.preview_count,
                current_title: s.title,
                title_count: s.title_count,
            })
        }
        "WORKDONE" | "SCANDONE" => {
            let error_code = state.work_done.map(|d| d.error).unwrap_or(0);
            Some(ProgressReport::Done {
                success: error_code == 0,
                error_code,
            })
        }
        _ => None,
    };
    Ok(report)
}
