use std::{collections::HashMap, io::Read, path::Component, sync::Arc};

use async_trait::async_trait;
use flate2::read::GzDecoder;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::index::{ChartVersion, ChartVersions, IndexFile};

const INDEX_FILE: &str = "index.yaml";
const VALUES_FILE: &str = "values.yaml";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} fetching {url}")]
    Status { url: String, status: StatusCode },

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Error decoding repository index YAML: {0}")]
    DecodeIndex(serde_yaml::Error),

    #[error("Chart {0} not found in repository index")]
    ChartNotFound(String),

    #[error("Version {version} of chart {chart} not found in repository index")]
    VersionNotFound { chart: String, version: String },

    #[error("Version {version} of chart {chart} has no download URL")]
    NoChartUrl { chart: String, version: String },

    #[error("Error reading chart archive: {0}")]
    Archive(#[from] std::io::Error),

    #[error("Chart archive doesn't contain values.yaml")]
    MissingValuesFile,

    #[error("Error decoding chart values YAML: {0}")]
    DecodeValues(serde_yaml::Error),

    #[error("Error converting chart values to JSON: {0}")]
    ConvertValues(serde_json::Error),

    #[error("Chart values must be a map, got: {0}")]
    ValuesNotMap(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Read access to Helm chart repositories.
///
/// `skip_cache` forces a fresh fetch, bypassing any cached index or chart.
#[async_trait]
pub trait ChartHelper: Send + Sync {
    /// Names of all charts published in the repository.
    async fn list_charts_from_repo(&self, url: &str, skip_cache: bool) -> Result<Vec<String>>;

    /// Published versions of a chart. A chart missing from the repository has
    /// no versions.
    async fn list_versions(&self, url: &str, chart: &str, skip_cache: bool)
        -> Result<ChartVersions>;

    /// The default values document of a chart version, as nested maps.
    async fn get_values_from_chart(
        &self,
        url: &str,
        chart: &str,
        version: &str,
        skip_cache: bool,
    ) -> Result<Map<String, Value>>;
}

type ValuesKey = (String, String, String);

/// A [`ChartHelper`] for classic HTTP chart repositories.
///
/// Indexes and chart values are kept in memory once fetched, for the lifetime
/// of the helper.
#[derive(Default)]
pub struct HttpChartHelper {
    client: Client,
    indexes: RwLock<HashMap<String, Arc<IndexFile>>>,
    values: RwLock<HashMap<ValuesKey, Arc<Map<String, Value>>>>,
}

impl HttpChartHelper {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            ..Default::default()
        }
    }

    async fn index(&self, url: &str, skip_cache: bool) -> Result<Arc<IndexFile>> {
        if !skip_cache {
            if let Some(index) = self.indexes.read().await.get(url) {
                debug!(url, "repository index cache hit");
                return Ok(index.clone());
            }
        }

        let base = repo_base(url)?;
        let mut index_url = base.join(INDEX_FILE).map_err(|e| invalid_url(url, e))?;
        index_url.set_query(base.query());
        info!(%index_url, "fetching repository index");
        let body = self.fetch(index_url).await?;
        let index = Arc::new(IndexFile::from_slice(&body).map_err(Error::DecodeIndex)?);

        self.indexes
            .write()
            .await
            .insert(url.to_string(), index.clone());
        Ok(index)
    }

    async fn fetch(&self, url: Url) -> Result<Vec<u8>> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                url: url.to_string(),
                status,
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Tries every download URL of the chart in turn, returning the values of
    /// the first archive that loads, or the last error.
    async fn fetch_values(&self, url: &str, chart: &ChartVersion) -> Result<Map<String, Value>> {
        let base = repo_base(url)?;
        let mut last_error = None;
        for chart_url in chart.urls.iter().filter_map(|u| base.join(u).ok()) {
            info!(%chart_url, "fetching chart archive");
            let values = self
                .fetch(chart_url.clone())
                .await
                .and_then(|archive| values_from_archive(&archive));
            match values {
                Ok(values) => return Ok(values),
                Err(error) => {
                    warn!(%chart_url, %error, "cannot load chart archive");
                    last_error = Some(error);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::NoChartUrl {
            chart: chart.name.clone(),
            version: chart.version.clone(),
        }))
    }
}

#[async_trait]
impl ChartHelper for HttpChartHelper {
    async fn list_charts_from_repo(&self, url: &str, skip_cache: bool) -> Result<Vec<String>> {
        Ok(self.index(url, skip_cache).await?.chart_names())
    }

    async fn list_versions(
        &self,
        url: &str,
        chart: &str,
        skip_cache: bool,
    ) -> Result<ChartVersions> {
        Ok(self.index(url, skip_cache).await?.versions(chart))
    }

    async fn get_values_from_chart(
        &self,
        url: &str,
        chart: &str,
        version: &str,
        skip_cache: bool,
    ) -> Result<Map<String, Value>> {
        let key = (url.to_string(), chart.to_string(), version.to_string());
        if !skip_cache {
            if let Some(values) = self.values.read().await.get(&key) {
                debug!(url, chart, version, "chart values cache hit");
                return Ok(values.as_ref().clone());
            }
        }

        let index = self.index(url, skip_cache).await?;
        let chart_version = index.get(chart, version).ok_or_else(|| {
            if index.entries.contains_key(chart) {
                Error::VersionNotFound {
                    chart: chart.to_string(),
                    version: version.to_string(),
                }
            } else {
                Error::ChartNotFound(chart.to_string())
            }
        })?;

        let values = self.fetch_values(url, chart_version).await?;
        self.values
            .write()
            .await
            .insert(key, Arc::new(values.clone()));
        Ok(values)
    }
}

/// Parses the repository URL so that relative chart URLs resolve beneath it.
///
/// The trailing slash goes on the path, leaving any query string untouched.
fn repo_base(url: &str) -> Result<Url> {
    let mut base = Url::parse(url).map_err(|e| invalid_url(url, e))?;
    base.path_segments_mut()
        .map_err(|_| invalid_url(url, "URL cannot be a base"))?
        .pop_if_empty()
        .push("");
    Ok(base)
}

fn invalid_url(url: &str, reason: impl ToString) -> Error {
    Error::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}

/// Extracts the top level `values.yaml` of a gzipped chart archive.
///
/// Charts are packaged under a single directory named after the chart, so the
/// values file of the chart itself sits at `<dir>/values.yaml`; files of the
/// same name deeper down belong to subcharts.
pub fn values_from_archive(archive: &[u8]) -> Result<Map<String, Value>> {
    let mut tarball = tar::Archive::new(GzDecoder::new(archive));
    for entry in tarball.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let components: Vec<_> = path
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect();
        if let [Component::Normal(_), Component::Normal(file)] = components.as_slice() {
            if *file == VALUES_FILE {
                let mut data = vec![];
                entry.read_to_end(&mut data)?;
                return values_from_slice(&data);
            }
        }
    }
    Err(Error::MissingValuesFile)
}

/// Parses a values document. An empty document has no values.
///
/// Non-string map keys (e.g. `1: one`) are turned into strings.
pub fn values_from_slice(data: &[u8]) -> Result<Map<String, Value>> {
    let Some(document) = serde_yaml::Deserializer::from_slice(data).next() else {
        return Ok(Map::new());
    };
    let yaml = serde_yaml::Value::deserialize(document).map_err(Error::DecodeValues)?;
    match serde_json::to_value(yaml).map_err(Error::ConvertValues)? {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map),
        other => Err(Error::ValuesNotMap(other.to_string())),
    }
}
