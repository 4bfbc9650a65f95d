use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Namespace;
use kube::Api;
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use tracing::debug;

/// Kubeconfig-driven entry point for connecting to a cluster
pub struct KubeClient {
    kubeconfig: Option<Kubeconfig>,
    current_context: Option<String>,
}

impl KubeClient {
    /// Load the kubeconfig. A missing kubeconfig is not an error: the
    /// in-cluster service account is used instead.
    pub fn new() -> Self {
        match Kubeconfig::read() {
            Ok(kubeconfig) => {
                let current_context = kubeconfig.current_context.clone();
                Self {
                    kubeconfig: Some(kubeconfig),
                    current_context,
                }
            }
            Err(e) => {
                debug!(error = %e, "No kubeconfig, falling back to in-cluster config");
                Self {
                    kubeconfig: None,
                    current_context: None,
                }
            }
        }
    }

    /// Get the current context name
    pub fn current_context(&self) -> Option<&str> {
        self.current_context.as_deref()
    }

    /// Create a kube::Client for a named context, or the default config
    pub async fn client(&self, context: Option<&str>) -> Result<kube::Client> {
        let Some(context_name) = context else {
            let config = kube::Config::infer()
                .await
                .context("Failed to infer Kubernetes config. Is kubectl configured?")?;
            return kube::Client::try_from(config).context("Failed to create Kubernetes client");
        };

        let kubeconfig = self
            .kubeconfig
            .clone()
            .context("Failed to read kubeconfig. Is kubectl configured?")?;

        if !kubeconfig.contexts.iter().any(|c| c.name == context_name) {
            anyhow::bail!("Context '{}' not found in kubeconfig", context_name);
        }

        let config = kube::Config::from_custom_kubeconfig(
            kubeconfig,
            &KubeConfigOptions {
                context: Some(context_name.to_string()),
                ..Default::default()
            },
        )
        .await
        .context(format!(
            "Failed to create config for context: {}",
            context_name
        ))?;

        kube::Client::try_from(config).context(format!(
            "Failed to create client for context: {}",
            context_name
        ))
    }

    /// Fetch all namespace names from the cluster
    pub async fn get_namespaces(&self, client: &kube::Client) -> Result<Vec<String>> {
        let namespaces: Api<Namespace> = Api::all(client.clone());
        let list = namespaces
            .list(&ListParams::default())
            .await
            .context("Failed to list namespaces")?;

        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }
}

impl Default for KubeClient {
    fn default() -> Self {
        Self::new()
    }
}
