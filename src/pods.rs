use std::fmt;

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use serde::Serialize;

use crate::error::AdminError;
use crate::k8s::create_kube_client;

/// Database engine a pod hosts, inferred from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineKind {
    ClickHouse,
    PostgreSQL,
    Unknown,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineKind::ClickHouse => "clickhouse",
            EngineKind::PostgreSQL => "postgresql",
            EngineKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Name markers in priority order. The first marker contained in a pod name
/// decides its engine, so `pgclickhouse` is ClickHouse.
pub const ENGINE_MARKERS: &[(&str, EngineKind)] = &[
    ("clickhouse", EngineKind::ClickHouse),
    ("postgres", EngineKind::PostgreSQL),
    ("pg", EngineKind::PostgreSQL),
];

impl EngineKind {
    /// Case-sensitive substring detection over [`ENGINE_MARKERS`].
    pub fn detect(pod_name: &str) -> Self {
        ENGINE_MARKERS
            .iter()
            .find(|(marker, _)| pod_name.contains(marker))
            .map(|(_, kind)| *kind)
            .unwrap_or(EngineKind::Unknown)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodTarget {
    pub name: String,
    pub namespace: String,
    pub engine: EngineKind,
}

impl PodTarget {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            engine: EngineKind::detect(name),
        }
    }
}

impl fmt::Display for PodTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Anything that can enumerate (namespace, pod name) pairs across the cluster.
pub trait PodSource {
    fn list_pods(&self) -> Result<Vec<(String, String)>>;
}

/// Lists pods in every namespace through the Kubernetes API. The client is
/// only built when a listing is actually needed.
pub struct KubePodSource {
    context: Option<String>,
}

impl KubePodSource {
    pub fn new(context: Option<String>) -> Self {
        Self { context }
    }
}

impl PodSource for KubePodSource {
    fn list_pods(&self) -> Result<Vec<(String, String)>> {
        let (rt, client) = create_kube_client(self.context.as_deref())?;
        let api: Api<Pod> = Api::all(client);
        let pods = rt
            .block_on(api.list(&ListParams::default()))
            .context("Failed to list pods across all namespaces")?;

        Ok(pods
            .items
            .into_iter()
            .filter_map(|pod| {
                let name = pod.metadata.name?;
                let namespace = pod.metadata.namespace?;
                Some((namespace, name))
            })
            .collect())
    }
}

/// Keep only pods whose name carries an engine marker, in source order.
pub fn filter_candidates(pods: Vec<(String, String)>) -> Vec<PodTarget> {
    pods.into_iter()
        .filter(|(_, name)| ENGINE_MARKERS.iter().any(|(marker, _)| name.contains(marker)))
        .map(|(namespace, name)| PodTarget::new(&namespace, &name))
        .collect()
}

/// Maps a target argument (`all`, `pod`, or `namespace/pod`) to concrete pods.
pub struct Resolver<'a> {
    source: &'a dyn PodSource,
}

impl<'a> Resolver<'a> {
    pub fn new(source: &'a dyn PodSource) -> Self {
        Self { source }
    }

    pub fn list_candidate_pods(&self) -> Result<Vec<PodTarget>> {
        let pods = self.source.list_pods()?;
        let candidates = filter_candidates(pods);
        tracing::debug!(count = candidates.len(), "discovered candidate pods");
        Ok(candidates)
    }

    pub fn resolve(&self, target_spec: &str) -> Result<Vec<PodTarget>> {
        if target_spec.is_empty() {
            return Err(AdminError::Usage("target must not be empty".into()).into());
        }

        if target_spec == "all" {
            let mut candidates = self.list_candidate_pods()?;
            sort_targets(&mut candidates);
            return Ok(candidates);
        }

        // Explicit namespace: taken verbatim, existence is checked by the exec itself.
        if let Some((namespace, name)) = target_spec.split_once('/') {
            return Ok(vec![PodTarget::new(namespace, name)]);
        }

        let candidates = self.list_candidate_pods()?;
        find_by_name(candidates, target_spec)
    }
}

/// Exact (not substring) name lookup among candidates. When the name exists in
/// several namespaces the lexically first namespace wins, with a warning.
pub fn find_by_name(mut candidates: Vec<PodTarget>, name: &str) -> Result<Vec<PodTarget>> {
    sort_targets(&mut candidates);
    let mut matches: Vec<PodTarget> = candidates.iter().filter(|c| c.name == name).cloned().collect();

    if matches.is_empty() {
        return Err(AdminError::NotFound {
            name: name.to_string(),
            candidates,
        }
        .into());
    }

    if matches.len() > 1 {
        let all: Vec<String> = matches.iter().map(|m| m.to_string()).collect();
        eprintln!(
            "WARNING: pod '{}' exists in {} namespaces ({}); using {}",
            name,
            matches.len(),
            all.join(", "),
            matches[0]
        );
        tracing::warn!(pod = name, matches = ?all, "ambiguous pod name");
    }
    matches.truncate(1);
    Ok(matches)
}

/// Stable order: namespace first, then pod name.
fn sort_targets(targets: &mut [PodTarget]) {
    targets.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
}
