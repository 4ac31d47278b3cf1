use anyhow::Context;
use kube::config::{Config, KubeConfigOptions};

/// Creates a kube client for the given kubeconfig context (current context when `None`).
/// Returns both the tokio Runtime (needed for subsequent async calls) and the Client.
pub fn create_kube_client(
    context: Option<&str>,
) -> anyhow::Result<(tokio::runtime::Runtime, kube::Client)> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    let options = KubeConfigOptions {
        context: context.map(str::to_string),
        ..Default::default()
    };

    let config = rt
        .block_on(Config::from_kubeconfig(&options))
        .with_context(|| match context {
            Some(ctx) => format!("Failed to load kubeconfig context '{ctx}'"),
            None => "Failed to load kubeconfig. Is KUBECONFIG set?".to_string(),
        })?;

    // Client construction spawns its buffer task, so it needs the runtime entered.
    let _guard = rt.enter();
    let client = kube::Client::try_from(config)
        .context("Failed to connect to cluster. Check: kubectl cluster-info")?;

    Ok((rt, client))
}
