use colored::Colorize;
use rpc::sanitize::escape_controls;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

// ============================================================================
// Task reporting
// ============================================================================

/// Print the outcome of one applied task
pub fn task_status(host: &str, role: &str, task: &str, changed: bool) {
    let label = task_label(host, role, task);
    if changed {
        println!("{} {} {}", "~".yellow(), label, "changed".yellow());
    } else {
        println!("{} {} {}", "○".dimmed(), label, "up-to-date".dimmed());
    }
}

/// Print one diff category of a task
pub fn diff_category(category: &str, lines: &[String]) {
    if lines.is_empty() {
        return;
    }
    println!("    {}", escape_controls(category).cyan().bold());
    for line in diff_lines(lines) {
        println!("      {}", colorize_diff_line(&line));
    }
}

/// Diff lines split for display, with control characters made visible.
///
/// Diffs come back from the worker and may quote arbitrary file content.
fn diff_lines(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .flat_map(|line| line.lines())
        .map(escape_controls)
        .collect()
}

fn colorize_diff_line(line: &str) -> String {
    if let Some(rest) = line.strip_prefix('+') {
        format!("+{rest}").green().to_string()
    } else if let Some(rest) = line.strip_prefix('-') {
        format!("-{rest}").red().to_string()
    } else {
        line.to_string()
    }
}

pub fn task_label(host: &str, role: &str, task: &str) -> String {
    format!("{host}: {role}.{task}")
}

/// `1 task`, `2 tasks`
pub fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_label() {
        assert_eq!(task_label("web1", "nginx", "config"), "web1: nginx.config");
    }

    #[test]
    fn test_plural() {
        assert_eq!(plural(0, "host"), "0 hosts");
        assert_eq!(plural(1, "host"), "1 host");
        assert_eq!(plural(3, "task"), "3 tasks");
    }

    #[test]
    fn test_diff_lines_escape_terminal_sequences() {
        let lines = vec![
            "+title \u{1b}]0;pwned\u{7}\n-clear \u{1b}[2J".to_string(),
            " \ttab kept".to_string(),
        ];
        assert_eq!(diff_lines(&lines), vec![
            "+title \\u{1b}]0;pwned\\u{7}",
            "-clear \\u{1b}[2J",
            " \ttab kept",
        ]);
    }

    #[test]
    fn test_colorize_diff_line_plain() {
        colored::control::set_override(false);
        assert_eq!(colorize_diff_line("+added"), "+added");
        assert_eq!(colorize_diff_line(" same"), " same");
        colored::control::unset_override();
    }
}
