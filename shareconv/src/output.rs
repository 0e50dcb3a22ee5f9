use serde::Serialize;
use shareconv::{JobEvent, JobStatus, QueueEvent};
use std::collections::HashMap;
use std::io::{self, Write};

/// Human-readable progress is printed in steps of this many percent.
const PROGRESS_STEP: u8 = 10;

/// Writes queue events to stdout, either as JSON lines or as short status
/// lines.
pub struct EventPrinter {
    json: bool,
    last_step: HashMap<String, (JobStatus, u8)>,
}

impl EventPrinter {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            last_step: HashMap::new(),
        }
    }

    pub fn print(&mut self, event: &QueueEvent) -> io::Result<()> {
        let line = if self.json {
            Some(to_json_line(event)?)
        } else {
            self.human_line(event)
        };
        if let Some(line) = line {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{}", line)?;
            stdout.flush()?;
        }
        Ok(())
    }

    fn human_line(&mut self, event: &QueueEvent) -> Option<String> {
        match event {
            QueueEvent::Job(job) => self.job_line(job),
            QueueEvent::Paused => Some("Queue paused".to_string()),
            QueueEvent::Resumed => Some("Queue resumed".to_string()),
            QueueEvent::Idle => Some("All conversions finished".to_string()),
        }
    }

    /// Prints status changes, and progress only when it crosses a step.
    fn job_line(&mut self, job: &JobEvent) -> Option<String> {
        let step = job.progress / PROGRESS_STEP;
        let previous = self.last_step.insert(job.id.clone(), (job.status, step));
        if previous == Some((job.status, step)) {
            return None;
        }

        let line = match job.status {
            JobStatus::Queued => format!("[queued] {}", job.id),
            JobStatus::Processing => {
                let mut line = format!("[processing] {}", job.id);
                if let Some(dest) = &job.dest_path {
                    line.push_str(&format!(" -> {}", dest.display()));
                }
                line.push_str(&format!(" {}%", job.progress));
                if let Some(speed) = &job.speed {
                    line.push_str(&format!(" ({})", speed));
                }
                line
            }
            JobStatus::Done => match &job.dest_path {
                Some(dest) => format!("[done] {} -> {}", job.id, dest.display()),
                None => format!("[done] {}", job.id),
            },
            JobStatus::Error => format!(
                "[error] {}: {}",
                job.id,
                job.error.as_deref().unwrap_or("unknown error")
            ),
        };
        Some(line)
    }
}

pub fn to_json_line<T: Serialize>(value: &T) -> io::Result<String> {
    serde_json::to_string(value).map_err(io::Error::other)
}
