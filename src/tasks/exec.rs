//! `exec` task: run a command
//!
//! Always reports a change. Output is captured into the `stdout` and
//! `stderr` categories. Nothing is run under dry-run.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use super::output::Output;
use crate::runner;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Params {
    pub cmd: String,
    /// Run through `/bin/sh -c` instead of splitting into words
    #[serde(default)]
    pub shell: bool,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Default)]
pub struct Executor;

impl rpc::Executor for Executor {
    type Params = Params;
    type Output = Output;

    fn execute(&self, params: Params) -> Result<Output> {
        let argv = if params.shell {
            vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                "--".to_string(),
                params.cmd.clone(),
            ]
        } else {
            split_words(&params.cmd)?
        };
        if argv.is_empty() {
            bail!("empty command");
        }

        let mut output = Output::new(true);
        if params.dry_run {
            log::debug!("dry-run: not running {}", params.cmd);
            return Ok(output);
        }

        log::debug!("running {argv:?}");
        let captured = runner::capture(&argv)?.check(&params.cmd)?;
        if !captured.stdout.is_empty() {
            output = output.with("stdout", lines(&captured.stdout));
        }
        if !captured.stderr.is_empty() {
            output = output.with("stderr", lines(&captured.stderr));
        }
        Ok(output)
    }
}

fn lines(s: &str) -> Vec<String> {
    s.lines().map(str::to_string).collect()
}

/// Split a command line into words using POSIX shell quoting rules
pub fn split_words(input: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => word.push(c),
                        None => bail!("unterminated single quote in {input:?}"),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\' | '$' | '`')) => word.push(c),
                            Some('\n') => {}
                            Some(c) => {
                                word.push('\\');
                                word.push(c);
                            }
                            None => bail!("unterminated double quote in {input:?}"),
                        },
                        Some(c) => word.push(c),
                        None => bail!("unterminated double quote in {input:?}"),
                    }
                }
            }
            '\\' => match chars.next() {
                Some('\n') => {}
                Some(c) => {
                    in_word = true;
                    word.push(c);
                }
                None => bail!("trailing backslash in {input:?}"),
            },
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                word.push(c);
            }
        }
    }

    if in_word {
        words.push(word);
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpc::Executor as _;

    fn run(cmd: &str, shell: bool, dry_run: bool) -> Result<Output> {
        Executor.execute(Params {
            cmd: cmd.to_string(),
            shell,
            dry_run,
        })
    }

    #[test]
    fn test_split_words() {
        assert_eq!(
            split_words(r#"echo 'a b' "c \"d\"" e\ f"#).unwrap(),
            vec!["echo", "a b", r#"c "d""#, "e f"]
        );
        assert_eq!(split_words("  ").unwrap(), Vec::<String>::new());
        assert_eq!(split_words("''").unwrap(), vec![""]);
        assert!(split_words("echo 'oops").is_err());
    }

    #[test]
    fn test_exec_captures_stdout() {
        let output = run("echo hi", false, false).unwrap();
        assert!(output.changed);
        assert_eq!(output.diff["stdout"], vec!["hi"]);
        assert!(!output.diff.contains_key("stderr"));
    }

    #[test]
    fn test_exec_shell_captures_stderr() {
        let output = run("echo one; echo two >&2", true, false).unwrap();
        assert_eq!(output.diff["stdout"], vec!["one"]);
        assert_eq!(output.diff["stderr"], vec!["two"]);
    }

    #[test]
    fn test_exec_failure() {
        let err = run("exit 4", true, false).unwrap_err();
        assert!(err.to_string().contains("exit 4"));
    }

    #[test]
    fn test_exec_dry_run_runs_nothing() {
        let tmp = tempfile::TempDir::new().unwrap();
        let marker = tmp.path().join("marker");
        let output = run(&format!("touch {}", marker.display()), false, true).unwrap();
        assert!(output.changed);
        assert!(output.diff.is_empty());
        assert!(!marker.exists());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let params = serde_json::json!({"cmd": "true", "bogus": 1});
        assert!(serde_json::from_value::<Params>(params).is_err());
    }
}
