use anyhow::{Context, Result};

use crate::exec::{self, ExecResult, PagedResult};
use crate::pods::PodTarget;
use crate::runlog::RunLog;

/// Remote execution inside a pod.
pub trait PodExec {
    /// Run `command` in the pod and capture its output.
    fn exec(&self, pod: &PodTarget, command: &[&str]) -> Result<ExecResult>;

    /// Like [`PodExec::exec`], with `input` written to the remote command's stdin.
    /// Used for secrets that must stay off the local argv.
    fn exec_with_input(&self, pod: &PodTarget, command: &[&str], input: &str) -> Result<ExecResult>;

    /// Stream the command's stdout into `pager` without holding it in memory.
    fn exec_paged(&self, pod: &PodTarget, command: &[&str], pager: &str) -> Result<PagedResult>;

    /// Run `command` attached to the local terminal. `tty` allocates a terminal
    /// in the pod; without it stdin is still forwarded so input can be piped.
    fn exec_attached(&self, pod: &PodTarget, command: &[&str], tty: bool) -> Result<i32>;
}

/// [`PodExec`] over `kubectl exec`, pinned to one kubeconfig context.
pub struct Kubectl {
    context: Option<String>,
}

impl Kubectl {
    pub fn new(context: Option<String>) -> Self {
        Self { context }
    }

    /// Ensure the kubectl binary is on PATH.
    pub fn ensure_available() -> Result<()> {
        which::which("kubectl").context(
            "kubectl not found on PATH. Install it: https://kubernetes.io/docs/tasks/tools/",
        )?;
        Ok(())
    }

    fn exec_args<'a>(&'a self, pod: &'a PodTarget, flags: &[&'a str], command: &[&'a str]) -> Vec<&'a str> {
        let mut args = Vec::with_capacity(command.len() + 9);
        if let Some(ctx) = &self.context {
            args.push("--context");
            args.push(ctx.as_str());
        }
        args.push("exec");
        args.extend_from_slice(flags);
        args.push("-n");
        args.push(pod.namespace.as_str());
        args.push(pod.name.as_str());
        args.push("--");
        args.extend_from_slice(command);
        args
    }
}

impl PodExec for Kubectl {
    fn exec(&self, pod: &PodTarget, command: &[&str]) -> Result<ExecResult> {
        let args = self.exec_args(pod, &[], command);
        tracing::debug!(pod = %pod, command = %redact(command), "kubectl exec");
        let result = exec::run_cmd_unchecked("kubectl", &args)?;
        tracing::debug!(pod = %pod, exit_code = result.exit_code, duration = ?result.duration, "kubectl exec finished");
        Ok(result)
    }

    fn exec_with_input(&self, pod: &PodTarget, command: &[&str], input: &str) -> Result<ExecResult> {
        let args = self.exec_args(pod, &["-i"], command);
        tracing::debug!(pod = %pod, command = %redact(command), "kubectl exec (stdin)");
        let result = exec::run_cmd_with_input("kubectl", &args, input)?;
        tracing::debug!(pod = %pod, exit_code = result.exit_code, duration = ?result.duration, "kubectl exec finished");
        Ok(result)
    }

    fn exec_paged(&self, pod: &PodTarget, command: &[&str], pager: &str) -> Result<PagedResult> {
        let args = self.exec_args(pod, &[], command);
        tracing::debug!(pod = %pod, pager, command = %redact(command), "kubectl exec (paged)");
        exec::pipe_cmd_to_pager("kubectl", &args, pager)
    }

    fn exec_attached(&self, pod: &PodTarget, command: &[&str], tty: bool) -> Result<i32> {
        let flags: &[&str] = if tty { &["-it"] } else { &["-i"] };
        let args = self.exec_args(pod, flags, command);
        tracing::debug!(pod = %pod, tty, command = %redact(command), "kubectl exec (attached)");
        exec::run_cmd_attached("kubectl", &args)
    }
}

/// Decorator that appends every exec and its output to the run log.
pub struct LoggedExec<'a> {
    inner: &'a dyn PodExec,
    log: &'a RunLog,
}

impl<'a> LoggedExec<'a> {
    pub fn new(inner: &'a dyn PodExec, log: &'a RunLog) -> Self {
        Self { inner, log }
    }
}

impl PodExec for LoggedExec<'_> {
    fn exec(&self, pod: &PodTarget, command: &[&str]) -> Result<ExecResult> {
        let result = self.inner.exec(pod, command)?;
        self.log.record_exec(pod, &redact(command), &result);
        Ok(result)
    }

    fn exec_with_input(&self, pod: &PodTarget, command: &[&str], input: &str) -> Result<ExecResult> {
        // The input itself is never recorded.
        let result = self.inner.exec_with_input(pod, command, input)?;
        self.log.record_exec(pod, &redact(command), &result);
        Ok(result)
    }

    fn exec_paged(&self, pod: &PodTarget, command: &[&str], pager: &str) -> Result<PagedResult> {
        let result = self.inner.exec_paged(pod, command, pager)?;
        self.log.record_paged(pod, &redact(command), &result);
        Ok(result)
    }

    fn exec_attached(&self, pod: &PodTarget, command: &[&str], tty: bool) -> Result<i32> {
        let code = self.inner.exec_attached(pod, command, tty)?;
        self.log.record_attached(pod, &redact(command), code);
        Ok(code)
    }
}

/// Join a command for display, masking the value after any `--password` flag.
pub fn redact(command: &[&str]) -> String {
    let mut out = Vec::with_capacity(command.len());
    let mut mask_next = false;
    for arg in command {
        if mask_next {
            out.push("****".to_string());
            mask_next = false;
        } else if *arg == "--password" {
            out.push(arg.to_string());
            mask_next = true;
        } else if arg.starts_with("--password=") {
            out.push("--password=****".to_string());
        } else {
            out.push(arg.to_string());
        }
    }
    out.join(" ")
}

/// Single-quote `s` for a POSIX shell.
pub fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
