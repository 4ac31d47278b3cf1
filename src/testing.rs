//! In-memory stand-ins for the cluster, the terminal and the clock.

use std::cell::{Cell, RefCell};
use std::time::Duration;

use anyhow::Result;

use crate::exec::{ExecResult, PagedResult};
use crate::kubectl::PodExec;
use crate::pods::{PodSource, PodTarget};
use crate::retry::Sleeper;
use crate::viewer::Viewer;

pub struct FakePods {
    pods: Vec<(String, String)>,
    calls: Cell<usize>,
}

impl FakePods {
    pub fn new(pods: &[(&str, &str)]) -> Self {
        Self {
            pods: pods.iter().map(|(ns, n)| (ns.to_string(), n.to_string())).collect(),
            calls: Cell::new(0),
        }
    }

    pub fn list_calls(&self) -> usize {
        self.calls.get()
    }
}

impl PodSource for FakePods {
    fn list_pods(&self) -> Result<Vec<(String, String)>> {
        self.calls.set(self.calls.get() + 1);
        Ok(self.pods.clone())
    }
}

pub fn ok(stdout: &str) -> ExecResult {
    ExecResult {
        exit_code: 0,
        stdout: stdout.to_string(),
        ..Default::default()
    }
}

pub fn fail(exit_code: i32, stderr: &str) -> ExecResult {
    ExecResult {
        exit_code,
        stderr: stderr.to_string(),
        ..Default::default()
    }
}

struct Rule {
    needle: String,
    responses: Vec<ExecResult>,
    next: usize,
}

/// Scripted [`PodExec`]. The first rule whose needle occurs in the joined
/// command answers; its responses are played in order and the last one repeats.
#[derive(Default)]
pub struct FakeExec {
    rules: RefCell<Vec<Rule>>,
    calls: RefCell<Vec<(String, String)>>,
    inputs: RefCell<Vec<String>>,
    attached_code: i32,
}

impl FakeExec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, needle: &str, responses: Vec<ExecResult>) -> Self {
        self.rules.borrow_mut().push(Rule {
            needle: needle.to_string(),
            responses,
            next: 0,
        });
        self
    }

    pub fn attached_exit(mut self, code: i32) -> Self {
        self.attached_code = code;
        self
    }

    /// `(pod, command)` pairs in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.borrow().clone()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.calls.borrow().iter().filter(|(_, c)| c.contains(needle)).count()
    }

    /// Everything written to remote stdin, in call order.
    pub fn inputs(&self) -> Vec<String> {
        self.inputs.borrow().clone()
    }

    fn respond(&self, joined: &str) -> Result<ExecResult> {
        let mut rules = self.rules.borrow_mut();
        let rule = rules
            .iter_mut()
            .find(|r| joined.contains(&r.needle))
            .ok_or_else(|| anyhow::anyhow!("unexpected command: {joined}"))?;
        let idx = rule.next.min(rule.responses.len().saturating_sub(1));
        rule.next += 1;
        rule.responses
            .get(idx)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no response scripted for: {joined}"))
    }
}

impl PodExec for FakeExec {
    fn exec(&self, pod: &PodTarget, command: &[&str]) -> Result<ExecResult> {
        let joined = command.join(" ");
        self.calls.borrow_mut().push((pod.to_string(), joined.clone()));
        self.respond(&joined)
    }

    fn exec_with_input(&self, pod: &PodTarget, command: &[&str], input: &str) -> Result<ExecResult> {
        self.inputs.borrow_mut().push(input.to_string());
        self.exec(pod, command)
    }

    /// Scripted stdout is dropped, as the pager would consume it.
    fn exec_paged(&self, pod: &PodTarget, command: &[&str], pager: &str) -> Result<PagedResult> {
        let joined = command.join(" ");
        self.calls
            .borrow_mut()
            .push((pod.to_string(), format!("[{pager}] {joined}")));
        let result = self.respond(&joined)?;
        Ok(PagedResult {
            exit_code: result.exit_code,
            stderr: result.stderr,
            pager_exit_code: 0,
            truncated: false,
            duration: result.duration,
        })
    }

    fn exec_attached(&self, pod: &PodTarget, command: &[&str], tty: bool) -> Result<i32> {
        let mode = if tty { "tty" } else { "stdin" };
        self.calls
            .borrow_mut()
            .push((pod.to_string(), format!("[{mode}] {}", command.join(" "))));
        Ok(self.attached_code)
    }
}

#[derive(Default)]
pub struct FakeViewer {
    pub interactive: bool,
    pub pager: Option<String>,
    shown: RefCell<Vec<(String, String)>>,
}

impl FakeViewer {
    pub fn shown(&self) -> Vec<(String, String)> {
        self.shown.borrow().clone()
    }
}

impl Viewer for FakeViewer {
    fn show(&self, title: &str, text: &str) -> Result<()> {
        self.shown.borrow_mut().push((title.to_string(), text.to_string()));
        Ok(())
    }

    fn interactive(&self) -> bool {
        self.interactive
    }

    fn pager(&self) -> Option<&str> {
        self.pager.as_deref()
    }
}

#[derive(Default)]
pub struct RecordingSleeper {
    delays: RefCell<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, delay: Duration) {
        self.delays.borrow_mut().push(delay);
    }
}
