use anyhow::{Context, Result};
use console::Term;

use crate::exec;

/// Where long remote output (logs, crash excerpts) ends up, and whether
/// interactive sessions get a terminal.
pub trait Viewer {
    fn show(&self, title: &str, text: &str) -> Result<()>;

    fn interactive(&self) -> bool;

    /// Pager command line when output can be streamed straight into one.
    fn pager(&self) -> Option<&str> {
        None
    }
}

/// Pages output through an external program such as `less -R`.
pub struct PagerViewer {
    command: String,
}

impl PagerViewer {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl Viewer for PagerViewer {
    fn show(&self, title: &str, text: &str) -> Result<()> {
        tracing::debug!(pager = %self.command, title, bytes = text.len(), "opening pager");
        let code = exec::pipe_to_pager(&self.command, text)?;
        if code != 0 {
            anyhow::bail!("pager '{}' exited with code {}", self.command, code);
        }
        Ok(())
    }

    fn interactive(&self) -> bool {
        true
    }

    fn pager(&self) -> Option<&str> {
        Some(&self.command)
    }
}

/// Writes output to a plain terminal stream for scripted, non-TTY use.
pub struct PlainViewer {
    term: Term,
}

impl PlainViewer {
    pub fn new(term: Term) -> Self {
        Self { term }
    }
}

impl Viewer for PlainViewer {
    fn show(&self, title: &str, text: &str) -> Result<()> {
        self.term
            .write_line(&format!("==> {title} <=="))
            .context("failed to write output")?;
        self.term.write_str(text).context("failed to write output")?;
        if !text.ends_with('\n') {
            self.term.write_line("").context("failed to write output")?;
        }
        Ok(())
    }

    fn interactive(&self) -> bool {
        false
    }
}

/// Pick the pager when stdout is a terminal and paging wasn't disabled.
/// With `json` set, plain output goes to stderr so stdout holds only the document.
pub fn select(no_pager: bool, json: bool, pager: &str) -> Box<dyn Viewer> {
    if !no_pager && Term::stdout().is_term() {
        Box::new(PagerViewer::new(pager))
    } else if json {
        Box::new(PlainViewer::new(Term::stderr()))
    } else {
        Box::new(PlainViewer::new(Term::stdout()))
    }
}

/// Stream for human-readable report tables.
pub fn report_term(json: bool) -> Term {
    if json { Term::stderr() } else { Term::stdout() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_pager_is_captured() {
        let viewer = select(true, false, "less -R");
        assert!(!viewer.interactive());
        assert!(viewer.pager().is_none());
        viewer.show("log", "line").unwrap();
    }

    #[test]
    fn test_json_keeps_plain_output_off_stdout() {
        let viewer = select(true, true, "less -R");
        assert!(viewer.pager().is_none());
        viewer.show("log", "line\n").unwrap();
    }

    #[test]
    fn test_pager_viewer_streams_through_its_command() {
        let viewer = PagerViewer::new("less -R");
        assert_eq!(viewer.pager(), Some("less -R"));
    }

    #[test]
    fn test_failing_pager_is_error() {
        let viewer = PagerViewer::new("false");
        assert!(viewer.interactive());
        assert!(viewer.show("log", "text").is_err());
    }
}
