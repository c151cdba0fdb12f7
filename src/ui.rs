//! Terminal output — spinner while a job runs, styled report afterwards.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::supervisor::{JobReport, State};

/// Visual progress for one job run in the terminal.
pub struct JobProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
}

impl JobProgress {
    /// Starts the spinner for a document.
    pub fn start(document_id: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .expect("invalid template"),
        );
        pb.set_message(format!("processing {document_id}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
        }
    }

    /// Stops the spinner and prints the job outcome.
    pub fn complete(&self, report: &JobReport) {
        self.pb.finish_and_clear();
        match report.final_state {
            State::Done => {
                println!(
                    "  {} {} promoted, {} rejected ({} steps, ${:.4})",
                    self.green.apply_to("✓"),
                    report.promoted.len(),
                    report.rejected.len(),
                    report.steps,
                    report.cost_incurred,
                );
            }
            _ => {
                println!(
                    "  {} job failed: {}",
                    self.red.apply_to("✗"),
                    report.errors.last().map(String::as_str).unwrap_or("unknown"),
                );
            }
        }
    }

    /// Prints the full report as pretty JSON.
    pub fn print_report(&self, report: &JobReport) {
        let style = if report.final_state == State::Done {
            &self.green
        } else {
            &self.red
        };
        println!();
        println!("{}", style.apply_to("─── Job Report ───"));
        println!(
            "{}",
            serde_json::to_string_pretty(report).unwrap_or_default()
        );
    }
}
