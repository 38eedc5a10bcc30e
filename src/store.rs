use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{api::ListParams, Api, Client};
use tracing::debug;

use crate::resources::LabelSelector;

/// Label filtered access to the secrets stored in the cluster.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Secrets in `namespace` matching `selector`, in the order the store lists them.
    async fn list(&self, namespace: &str, selector: &LabelSelector) -> kube::Result<Vec<Secret>>;
}

/// A [`SecretStore`] backed by the kubernetes API server.
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn list(&self, namespace: &str, selector: &LabelSelector) -> kube::Result<Vec<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let label_selector = selector.to_string();
        debug!(namespace, %label_selector, "listing secrets");
        let secrets = api
            .list(&ListParams::default().labels(&label_selector))
            .await?;
        Ok(secrets.items)
    }
}
