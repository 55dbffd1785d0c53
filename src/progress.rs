use std::io::{self, Write};
use std::time::Instant;

use crate::models::{StepStatus, WorkflowStep};

/// Prints one status line per finished pipeline stage.
pub struct ProgressIndicator {
    enabled: bool,
    start_time: Instant,
}

impl ProgressIndicator {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            start_time: Instant::now(),
        }
    }

    pub fn stage(&self, step: &WorkflowStep, progress: f64) {
        if !self.enabled {
            return;
        }
        println!("{}", stage_line(step, progress));
        io::stdout().flush().unwrap_or(());
    }

    pub fn finish(&self, message: &str) {
        if !self.enabled {
            return;
        }
        println!("✅ {} completed in {:.1}s", message, self.start_time.elapsed().as_secs_f64());
    }

    pub fn error(&self, message: &str) {
        if !self.enabled {
            return;
        }
        println!("❌ {}", message);
    }
}

pub fn stage_line(step: &WorkflowStep, progress: f64) -> String {
    let icon = match step.status {
        StepStatus::Completed => "✅",
        StepStatus::Failed => "❌",
        StepStatus::Skipped => "⏭️ ",
        StepStatus::Pending | StepStatus::InProgress => "🔍",
    };
    let bar_width = 20;
    let filled = ((progress.clamp(0.0, 100.0) / 100.0) * bar_width as f64) as usize;
    let bar = format!("{}{}", "█".repeat(filled), "░".repeat(bar_width - filled));
    let mut line = format!(
        "{} [{}] {:>3.0}% {} ({:.1}s)",
        icon, bar, progress, step.step_name, step.duration_seconds
    );
    if let Some(error) = &step.error_message {
        line.push_str(&format!(" - {}", error));
    }
    line
}

/// Spinner-style line for a single long operation.
pub struct Spinner {
    enabled: bool,
    message: String,
    start_time: Instant,
}

impl Spinner {
    pub fn new(enabled: bool, message: &str) -> Self {
        if enabled {
            print!("🔍 {}...", message);
            io::stdout().flush().unwrap_or(());
        }
        Self {
            enabled,
            message: message.to_string(),
            start_time: Instant::now(),
        }
    }

    pub fn succeed(self, message: Option<&str>) {
        if self.enabled {
            let msg = message.unwrap_or(&self.message);
            println!("\r✅ {} completed in {:.1}s", msg, self.start_time.elapsed().as_secs_f64());
        }
    }

    pub fn fail(self, message: Option<&str>) {
        if self.enabled {
            let msg = message.unwrap_or(&self.message);
            println!("\r❌ {} failed", msg);
        }
    }
}
