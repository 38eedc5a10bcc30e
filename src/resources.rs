use std::{collections::BTreeMap, fmt};

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};

/// Label marking the kind of configuration a secret holds.
pub const LABEL_CONFIG_TYPE: &str = "config.oam.dev/type";

/// Label scoping a configuration secret to a project. Secrets without it are global.
pub const LABEL_CONFIG_PROJECT: &str = "config.oam.dev/project";

/// Value of [`LABEL_CONFIG_TYPE`] for helm repository registrations.
pub const HELM_REPOSITORY_CONFIG_TYPE: &str = "config-helm-repository";

/// Namespace holding the repository registration secrets.
pub const DEFAULT_NAMESPACE: &str = "vela-system";

/// Data key of a registration secret holding the repository URL.
pub const URL_KEY: &str = "url";

/// A set of label requirements, all of which must hold.
///
/// Renders to the kubernetes label selector syntax, e.g. `a=b,!c`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSelector {
    match_labels: BTreeMap<String, String>,
    does_not_exist: Vec<String>,
}

impl LabelSelector {
    /// Requires label `key` to be set to `value`.
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.match_labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Requires label `key` to be absent, whatever its value would be.
    pub fn without_label(mut self, key: &str) -> Self {
        self.does_not_exist.push(key.to_string());
        self
    }

    /// All helm repository registrations.
    pub fn helm_repositories() -> Self {
        Self::default().with_label(LABEL_CONFIG_TYPE, HELM_REPOSITORY_CONFIG_TYPE)
    }

    /// Helm repository registrations scoped to `project`.
    pub fn project_helm_repositories(project: &str) -> Self {
        Self::helm_repositories().with_label(LABEL_CONFIG_PROJECT, project)
    }

    /// Helm repository registrations not scoped to any project.
    pub fn global_helm_repositories() -> Self {
        Self::helm_repositories().without_label(LABEL_CONFIG_PROJECT)
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
            && self.does_not_exist.iter().all(|k| !labels.contains_key(k))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let requirements = self
            .match_labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .chain(self.does_not_exist.iter().map(|k| format!("!{k}")));
        write!(f, "{}", itertools::join(requirements, ","))
    }
}

/// A registered chart repository.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartRepoResponse {
    pub url: String,
    pub secret_name: String,
}

impl From<&Secret> for ChartRepoResponse {
    /// A secret without a `url` entry yields an empty URL.
    fn from(secret: &Secret) -> Self {
        let url = secret
            .data
            .as_ref()
            .and_then(|data| data.get(URL_KEY))
            .map(|url| String::from_utf8_lossy(&url.0).into_owned())
            .unwrap_or_default();
        Self {
            url,
            secret_name: secret.name_any(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartRepoResponseList {
    pub chart_repo_response: Vec<ChartRepoResponse>,
}
