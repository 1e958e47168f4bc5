use anyhow::{Context, Result};
use std::io::{self, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;

/// Captured result of a finished command
#[derive(Debug)]
pub struct Captured {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl Captured {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Error out with stderr unless the command succeeded
    pub fn check(self, what: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            anyhow::bail!("{what} failed ({}): {}", self.status, self.stderr.trim())
        }
    }
}

/// Run a command and capture output, whatever its exit status
pub fn capture<S: AsRef<str>>(argv: &[S]) -> Result<Captured> {
    capture_with_stdin(argv, None)
}

/// Run a command, feeding `stdin` to it, and capture output
pub fn capture_with_stdin<S: AsRef<str>>(argv: &[S], stdin: Option<&[u8]>) -> Result<Captured> {
    let (program, args) = argv.split_first().context("Empty command")?;
    let display = display(argv);

    let mut child = Command::new(program.as_ref())
        .args(args.iter().map(AsRef::as_ref))
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to execute: {display}"))?;

    // Feed stdin from its own thread so a child that fills its stdout or
    // stderr pipe before reading everything cannot deadlock us.
    let pipe = child.stdin.take();
    let (written, output) = thread::scope(|scope| {
        let writer = scope.spawn(move || match (stdin, pipe) {
            (Some(data), Some(mut pipe)) => pipe.write_all(data),
            _ => Ok(()),
        });
        let output = child.wait_with_output();
        let written = writer
            .join()
            .unwrap_or_else(|_| Err(io::Error::other("stdin writer panicked")));
        (written, output)
    });

    let output = output.with_context(|| format!("Failed to wait for: {display}"))?;
    written.with_context(|| format!("Failed to write stdin of: {display}"))?;

    Ok(Captured {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Run a command and return its trimmed stdout, failing on non-zero exit
pub fn run_capture<S: AsRef<str>>(argv: &[S]) -> Result<String> {
    let out = capture(argv)?.check(&display(argv))?;
    Ok(out.stdout.trim().to_string())
}

fn display<S: AsRef<str>>(argv: &[S]) -> String {
    argv.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(" ")
}

/// Quote `arg` for a POSIX shell
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_keeps_failure() {
        let out = capture(&["sh", "-c", "echo out; echo err >&2; exit 3"]).unwrap();
        assert!(!out.success());
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
        assert!(out.check("sh").is_err());
    }

    #[test]
    fn test_capture_with_stdin() {
        let out = capture_with_stdin(&["cat"], Some(b"piped")).unwrap();
        assert_eq!(out.stdout, "piped");
    }

    #[test]
    fn test_capture_with_stdin_while_child_floods_stderr() {
        // Writes well past a pipe buffer to stderr before reading stdin.
        let script = "head -c 1048576 /dev/zero >&2; wc -c";
        let data = vec![b'x'; 1 << 20];
        let out = capture_with_stdin(&["sh", "-c", script], Some(&data)).unwrap();
        assert_eq!(out.stdout.trim(), "1048576");
        assert_eq!(out.stderr.len(), 1 << 20);
    }

    #[test]
    fn test_stdin_write_failure_still_reaps_child() {
        let data = vec![b'x'; 1 << 20];
        let err = capture_with_stdin(&["true"], Some(&data)).unwrap_err();
        assert!(err.to_string().starts_with("Failed to write stdin of: true"));
    }

    #[test]
    fn test_run_capture_trims() {
        assert_eq!(run_capture(&["echo", "  hi  "]).unwrap(), "hi");
    }

    #[test]
    fn test_empty_command() {
        let argv: [&str; 0] = [];
        assert!(capture(&argv).is_err());
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
