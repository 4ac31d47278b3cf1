use anyhow::Context;
use console::Style;
use serde::Serialize;

use crate::pods::PodTarget;
use crate::types::{ExecutionResult, Outcome};

/// Print one line per target, styled like a check report.
pub fn print_summary(results: &[ExecutionResult]) {
    if results.is_empty() {
        return;
    }
    let green = Style::new().green().bold();
    let yellow = Style::new().yellow().bold();
    let red = Style::new().red().bold();

    eprintln!();
    for r in results {
        let label = match r.outcome {
            Outcome::Ok => green.apply_to("OK  "),
            Outcome::Degraded => yellow.apply_to("WARN"),
            Outcome::Failed => red.apply_to("FAIL"),
        };
        // Multi-line messages (candidate lists, causes) only show their first line here.
        let message = r.message.lines().next().unwrap_or("");
        eprintln!("  {} {}: {}", label, r.target, message);
    }
    eprintln!();
}

/// The only thing written to stdout in `--json` mode.
pub fn print_json<T: Serialize>(items: &[T]) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(items).context("Failed to serialize results")?;
    println!("{json}");
    Ok(())
}

/// `list` output: candidate pods as an aligned table.
pub fn print_candidates(pods: &[PodTarget]) {
    if pods.is_empty() {
        println!("No clickhouse/postgres pods found");
        return;
    }
    let ns_width = pods.iter().map(|p| p.namespace.len()).max().unwrap_or(0).max("NAMESPACE".len());
    let name_width = pods.iter().map(|p| p.name.len()).max().unwrap_or(0).max("NAME".len());

    println!("{:<ns_width$}  {:<name_width$}  {}", "NAMESPACE", "NAME", "ENGINE");
    for pod in pods {
        println!("{:<ns_width$}  {:<name_width$}  {}", pod.namespace, pod.name, pod.engine);
    }
}
