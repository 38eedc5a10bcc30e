use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The `index.yaml` document served at the root of a Helm chart repository.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexFile {
    #[serde(default)]
    pub api_version: String,

    #[serde(default)]
    pub entries: BTreeMap<String, ChartVersions>,
}

pub type ChartVersions = Vec<ChartVersion>;

/// One published version of a chart as listed in the repository index.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartVersion {
    pub name: String,
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", rename = "type")]
    pub chart_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    #[serde(default, skip_serializing_if = "<[_]>::is_empty")]
    pub keywords: Vec<String>,

    #[serde(default, skip_serializing_if = "<[_]>::is_empty")]
    pub sources: Vec<String>,

    /// Where the chart archive can be downloaded from. Entries may be relative
    /// to the repository URL.
    #[serde(default)]
    pub urls: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,

    #[serde(default)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deprecated: bool,
}

impl IndexFile {
    pub fn from_slice(data: &[u8]) -> serde_yaml::Result<Self> {
        serde_yaml::from_slice(data)
    }

    /// Chart names in ascending order.
    pub fn chart_names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// All versions of a chart in index order, or an empty list if the chart is
    /// not in the index.
    pub fn versions(&self, chart: &str) -> ChartVersions {
        self.entries.get(chart).cloned().unwrap_or_default()
    }

    /// Looks up a specific version of a chart. An empty `version` selects the
    /// first listed entry, which is the latest one in indexes generated by helm.
    pub fn get(&self, chart: &str, version: &str) -> Option<&ChartVersion> {
        let versions = self.entries.get(chart)?;
        if version.is_empty() {
            return versions.first();
        }
        versions.iter().find(|v| v.version == version)
    }
}
