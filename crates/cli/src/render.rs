//! Human-readable output for queue listings and run events.

use std::time::Duration;

use hbqueue::{Job, ProgressReport, QueueEvent, RunSummary};

pub fn job_line(index: usize, job: &Job) -> String {
    format!(
        "{:>3}  #{:<4} {:<11} {} -> {}",
        index,
        job.id,
        job.status.to_string(),
        job.source.display(),
        job.destination.display()
    )
}

fn format_eta(eta: Duration) -> String {
    let secs = eta.as_secs();
    format!("{:02}h{:02}m{:02}s", secs / 3600, (secs / 60) % 60, secs % 60)
}

pub fn progress_line(report: &ProgressReport) -> String {
    match report {
        ProgressReport::Scanning {
            progress,
            current_title,
            title_count,
            ..
        } => format!(
            "scanning title {} of {}, {:.1} %",
            current_title,
            title_count,
            progress * 100.0
        ),
        ProgressReport::Working {
            percent,
            current_fps,
            avg_fps,
            eta,
            pass,
            pass_count,
        } => format!(
            "pass {} of {}, {:.2} % ({:.1} fps, avg {:.1} fps, ETA {})",
            pass,
            pass_count,
            percent,
            current_fps,
            avg_fps,
            format_eta(*eta)
        ),
        ProgressReport::Done { success, error_code } => {
            if *success {
                "done".to_string()
            } else {
                format!("failed with code {error_code}")
            }
        }
    }
}

pub fn event_line(event: &QueueEvent) -> String {
    match event {
        QueueEvent::NewJobStarted { job } => format!(
            "[#{}] encoding {} -> {}",
            job.id,
            job.source.display(),
            job.destination.display()
        ),
        QueueEvent::Progress { job_id, report } => format!("[#{}] {}", job_id, progress_line(report)),
        QueueEvent::CurrentJobCompleted { job, success } => match (success, &job.error_reason) {
            (true, _) => format!("[#{}] completed", job.id),
            (false, Some(reason)) => format!("[#{}] {}: {}", job.id, job.status, reason),
            (false, None) => format!("[#{}] {}", job.id, job.status),
        },
        QueueEvent::QueuePaused => "queue paused".to_string(),
        QueueEvent::QueueCompleted => "queue completed".to_string(),
        QueueEvent::QueueStopped => "queue stopped".to_string(),
    }
}

pub fn summary_line(summary: &RunSummary) -> String {
    format!(
        "{} completed, {} failed, {} cancelled{}",
        summary.completed,
        summary.failed,
        summary.cancelled,
        if summary.stopped { " (stopped)" } else { "" }
    )
}
