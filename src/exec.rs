use anyhow::{Context, Result};
use std::io::Write;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

const SOURCE_EXIT_POLLS: u32 = 50;

#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run a command and return the result regardless of exit code.
pub fn run_cmd_unchecked(cmd: &str, args: &[&str]) -> Result<ExecResult> {
    let start = Instant::now();
    let output = Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("failed to execute {cmd}"))?;
    let duration = start.elapsed();

    Ok(ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        duration,
    })
}

/// Like [`run_cmd_unchecked`], but writes `input` to the command's stdin and closes it.
pub fn run_cmd_with_input(cmd: &str, args: &[&str], input: &str) -> Result<ExecResult> {
    let start = Instant::now();
    let mut child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to execute {cmd}"))?;

    if let Some(mut stdin) = child.stdin.take() {
        match stdin.write_all(input.as_bytes()) {
            Ok(()) => {}
            // The command may exit without reading its input.
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
            Err(e) => return Err(e).with_context(|| format!("failed to write stdin of {cmd}")),
        }
    }

    let output = child
        .wait_with_output()
        .with_context(|| format!("failed to wait for {cmd}"))?;
    Ok(ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        duration: start.elapsed(),
    })
}

/// Outcome of streaming a command's stdout into a pager.
#[derive(Debug, Clone, Default)]
pub struct PagedResult {
    pub exit_code: i32,
    pub stderr: String,
    pub pager_exit_code: i32,
    /// The pager was closed before the source finished writing.
    pub truncated: bool,
    pub duration: Duration,
}

/// Connect `cmd`'s stdout straight to `pager`'s stdin. Nothing is buffered here,
/// so the pager opens as soon as the first bytes arrive.
pub fn pipe_cmd_to_pager(cmd: &str, args: &[&str], pager: &str) -> Result<PagedResult> {
    let (program, pager_args) = split_pager(pager)?;
    let start = Instant::now();

    let mut source = Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to execute {cmd}"))?;
    let source_out = source.stdout.take().context("source stdout not captured")?;
    let stderr_reader = source.stderr.take().map(|mut err| {
        std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = std::io::Read::read_to_string(&mut err, &mut buf);
            buf
        })
    });

    let pager_status = Command::new(program)
        .args(&pager_args)
        .stdin(Stdio::from(source_out))
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status();
    let pager_status = match pager_status {
        Ok(status) => status,
        Err(e) => {
            let _ = source.kill();
            let _ = source.wait();
            return Err(e).with_context(|| format!("failed to start pager {program}"));
        }
    };

    let status = match wait_briefly(&mut source)? {
        Some(status) => status,
        None => {
            // Still running with nobody reading: stop it.
            let _ = source.kill();
            source.wait().with_context(|| format!("failed to wait for {cmd}"))?
        }
    };
    // No exit code means a signal: SIGPIPE from the closed pager, or our own kill.
    let (exit_code, truncated) = match status.code() {
        Some(code) => (code, false),
        None => (0, true),
    };
    let stderr = stderr_reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();

    Ok(PagedResult {
        exit_code,
        stderr,
        pager_exit_code: pager_status.code().unwrap_or(-1),
        truncated,
        duration: start.elapsed(),
    })
}

/// Run a command attached to the controlling terminal (stdin/stdout/stderr inherited).
/// Returns the exit code; a non-zero exit is not an error here.
pub fn run_cmd_attached(cmd: &str, args: &[&str]) -> Result<i32> {
    let status = Command::new(cmd)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .with_context(|| format!("failed to execute {cmd}"))?;

    Ok(status.code().unwrap_or(-1))
}

/// Feed `text` to a pager command line such as `less -R` and wait for the user to quit it.
pub fn pipe_to_pager(pager: &str, text: &str) -> Result<i32> {
    let (program, args) = split_pager(pager)?;

    let mut child = Command::new(program)
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .with_context(|| format!("failed to start pager {program}"))?;

    if let Some(mut stdin) = child.stdin.take() {
        // The user may quit the pager before reading everything.
        match stdin.write_all(text.as_bytes()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
            Err(e) => return Err(e).context("failed to write to pager"),
        }
    }

    let status = child.wait().context("failed to wait for pager")?;
    Ok(status.code().unwrap_or(-1))
}

/// Give a source whose reader went away a moment to exit on its own.
fn wait_briefly(child: &mut Child) -> Result<Option<ExitStatus>> {
    for _ in 0..SOURCE_EXIT_POLLS {
        if let Some(status) = child.try_wait().context("failed to poll child")? {
            return Ok(Some(status));
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    Ok(None)
}

/// Split a pager command line such as `less -R` into program and arguments.
fn split_pager(pager: &str) -> Result<(&str, Vec<&str>)> {
    let mut parts = pager.split_whitespace();
    let program = parts.next().context("pager command is empty")?;
    Ok((program, parts.collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unchecked_captures_nonzero_exit() {
        let result = run_cmd_unchecked("sh", &["-c", "echo out; echo err >&2; exit 3"]).unwrap();
        assert_eq!(result.exit_code, 3);
        assert!(!result.success());
        assert_eq!(result.stdout.trim(), "out");
        assert_eq!(result.stderr.trim(), "err");
    }

    #[test]
    fn test_missing_binary_is_error() {
        let err = run_cmd_unchecked("definitely-not-a-real-binary-xyz", &[]).unwrap_err();
        assert!(format!("{err:#}").contains("failed to execute"));
    }

    #[test]
    fn test_pipe_to_pager_uses_given_program() {
        assert_eq!(pipe_to_pager("cat", "hello\n").unwrap(), 0);
        assert!(pipe_to_pager("   ", "x").is_err());
    }

    #[test]
    fn test_with_input_feeds_stdin() {
        let result = run_cmd_with_input("sh", &["-c", "IFS= read -r line; echo \"got $line\""], "secret\n").unwrap();
        assert!(result.success());
        assert_eq!(result.stdout.trim(), "got secret");
    }

    #[test]
    fn test_pipe_cmd_to_pager_streams_output() {
        let result = pipe_cmd_to_pager("sh", &["-c", "echo line; echo warn >&2"], "cat").unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.pager_exit_code, 0);
        assert!(!result.truncated);
        assert_eq!(result.stderr.trim(), "warn");
    }

    #[test]
    fn test_pipe_cmd_to_pager_stops_source_when_pager_quits() {
        // `yes` never ends on its own; closing the pager must not hang.
        let result = pipe_cmd_to_pager("yes", &[], "head -n 1").unwrap();
        assert_eq!(result.pager_exit_code, 0);
        assert!(result.truncated);
    }

    #[test]
    fn test_pipe_cmd_to_pager_reports_source_failure() {
        let result = pipe_cmd_to_pager("sh", &["-c", "echo missing >&2; exit 2"], "cat").unwrap();
        assert_eq!(result.exit_code, 2);
        assert!(!result.truncated);
        assert_eq!(result.stderr.trim(), "missing");
    }
}
