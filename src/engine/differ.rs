//! Reporting applied tasks and the run summary

use colored::Colorize;
use std::io;

use crate::tasks::{Output, Outputs};
use crate::ui;

/// Print one task's status and diff.
///
/// Hosts apply in parallel; stdout stays locked for the whole block so a
/// task's lines are never interleaved with another host's.
pub fn display(output: &Output) {
    let _stdout = io::stdout().lock();
    ui::task_status(&output.host, &output.role, &output.name, output.changed);
    if !output.changed {
        return;
    }
    for (category, lines) in &output.diff {
        ui::diff_category(category, lines);
    }
}

/// Counts over every task applied in a run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Summary {
    pub hosts: usize,
    pub tasks: usize,
    pub changed: usize,
}

impl Summary {
    pub fn new(outputs: &Outputs) -> Self {
        Self {
            hosts: outputs.hosts().len(),
            tasks: outputs.len(),
            changed: outputs.iter().filter(|o| o.changed).count(),
        }
    }

    pub fn up_to_date(&self) -> usize {
        self.tasks - self.changed
    }
}

pub fn print_summary(summary: &Summary, dry_run: bool) {
    println!();
    let applied = if dry_run { "Checked" } else { "Applied" };
    ui::success(&format!(
        "{applied} {} on {}",
        ui::plural(summary.tasks, "task"),
        ui::plural(summary.hosts, "host")
    ));
    if summary.changed > 0 {
        let verb = if dry_run { "would change" } else { "changed" };
        println!("    • {} {verb}", summary.changed.to_string().yellow());
    }
    if summary.up_to_date() > 0 {
        println!("    • {} up-to-date", summary.up_to_date());
    }
    if dry_run {
        ui::info("Dry run - no changes made");
    }
}
