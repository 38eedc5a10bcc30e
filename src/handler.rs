use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::{
    flatten::flatten,
    helm::ChartHelper,
    index::ChartVersions,
    resources::{ChartRepoResponse, ChartRepoResponseList, LabelSelector, DEFAULT_NAMESPACE},
    store::SecretStore,
    Error, Result,
};

/// Read only view over helm chart repositories and the repositories registered
/// in the cluster.
///
/// Holds no state of its own; concurrent calls are as safe as the injected
/// [`ChartHelper`] and [`SecretStore`].
#[derive(Clone)]
pub struct HelmHandler {
    helper: Arc<dyn ChartHelper>,
    store: Arc<dyn SecretStore>,
    namespace: String,
}

impl HelmHandler {
    pub fn new(helper: Arc<dyn ChartHelper>, store: Arc<dyn SecretStore>) -> Self {
        Self {
            helper,
            store,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// Namespace where repository registrations are looked up.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub async fn list_chart_names(
        &self,
        url: &str,
        secret_name: &str,
        skip_cache: bool,
    ) -> Result<Vec<String>> {
        // TODO: authenticate against private repositories with `secret_name`
        debug!(url, secret_name, skip_cache, "listing charts");
        self.helper
            .list_charts_from_repo(url, skip_cache)
            .await
            .map_err(|error| {
                error!(url, %error, "cannot fetch charts repo");
                Error::ListHelmChart(error)
            })
    }

    /// Fails with [`Error::ChartNotExist`] when the repository is reachable but
    /// has no versions of the chart.
    pub async fn list_chart_versions(
        &self,
        url: &str,
        chart: &str,
        secret_name: &str,
        skip_cache: bool,
    ) -> Result<ChartVersions> {
        debug!(url, chart, secret_name, skip_cache, "listing chart versions");
        let versions = self
            .helper
            .list_versions(url, chart, skip_cache)
            .await
            .map_err(|error| {
                error!(url, chart, %error, "cannot fetch chart versions");
                Error::ListHelmVersions(error)
            })?;
        if versions.is_empty() {
            error!(url, chart, "chart has no versions");
            return Err(Error::ChartNotExist {
                repo: url.to_string(),
                chart: chart.to_string(),
            });
        }
        Ok(versions)
    }

    /// The chart's default values flattened to dot separated keys,
    /// see [`crate::flatten::flatten_key`].
    pub async fn get_chart_values(
        &self,
        url: &str,
        chart: &str,
        version: &str,
        secret_name: &str,
        skip_cache: bool,
    ) -> Result<Map<String, Value>> {
        debug!(url, chart, version, secret_name, skip_cache, "getting chart values");
        let values = self
            .helper
            .get_values_from_chart(url, chart, version, skip_cache)
            .await
            .map_err(|error| {
                error!(url, chart, version, %error, "cannot fetch chart values");
                Error::GetChartValues(error)
            })?;
        Ok(flatten(&values))
    }

    /// Repositories registered for `project` followed by the global ones.
    ///
    /// An empty `project` lists the global repositories only.
    pub async fn list_chart_repo(&self, project: &str) -> Result<ChartRepoResponseList> {
        let mut chart_repo_response = vec![];

        if !project.is_empty() {
            let selector = LabelSelector::project_helm_repositories(project);
            chart_repo_response.extend(self.list_repos(project, &selector).await?);
        }

        let selector = LabelSelector::global_helm_repositories();
        chart_repo_response.extend(self.list_repos(project, &selector).await?);

        Ok(ChartRepoResponseList {
            chart_repo_response,
        })
    }

    async fn list_repos(
        &self,
        project: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ChartRepoResponse>> {
        let secrets = self
            .store
            .list(&self.namespace, selector)
            .await
            .map_err(|error| {
                error!(project, %selector, %error, "cannot list chart repositories");
                Error::ListChartRepo(error)
            })?;
        Ok(secrets.iter().map(ChartRepoResponse::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, sync::Mutex};

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use k8s_openapi::{api::core::v1::Secret, ByteString};
    use kube::core::{ErrorResponse, ObjectMeta};
    use serde_json::json;

    use super::*;
    use crate::{
        helm,
        index::ChartVersion,
        resources::{HELM_REPOSITORY_CONFIG_TYPE, LABEL_CONFIG_PROJECT, LABEL_CONFIG_TYPE, URL_KEY},
    };

    const REPO: &str = "https://charts.example.com";

    #[derive(Default)]
    struct FakeHelper {
        charts: Vec<String>,
        versions: BTreeMap<String, ChartVersions>,
        values: Option<Value>,
        unreachable: bool,
        calls: Mutex<Vec<bool>>,
    }

    impl FakeHelper {
        fn check(&self, skip_cache: bool) -> helm::Result<()> {
            self.calls.lock().unwrap().push(skip_cache);
            if self.unreachable {
                return Err(helm::Error::ChartNotFound("unreachable".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ChartHelper for FakeHelper {
        async fn list_charts_from_repo(
            &self,
            _url: &str,
            skip_cache: bool,
        ) -> helm::Result<Vec<String>> {
            self.check(skip_cache)?;
            Ok(self.charts.clone())
        }

        async fn list_versions(
            &self,
            _url: &str,
            chart: &str,
            skip_cache: bool,
        ) -> helm::Result<ChartVersions> {
            self.check(skip_cache)?;
            Ok(self.versions.get(chart).cloned().unwrap_or_default())
        }

        async fn get_values_from_chart(
            &self,
            _url: &str,
            _chart: &str,
            _version: &str,
            skip_cache: bool,
        ) -> helm::Result<Map<String, Value>> {
            self.check(skip_cache)?;
            match self.values.clone() {
                Some(Value::Object(values)) => Ok(values),
                _ => Ok(Map::new()),
            }
        }
    }

    /// Evaluates selectors in memory over a fixed list of secrets.
    #[derive(Default)]
    struct FakeStore {
        secrets: Vec<Secret>,
        failing: bool,
        queries: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl SecretStore for FakeStore {
        async fn list(
            &self,
            namespace: &str,
            selector: &LabelSelector,
        ) -> kube::Result<Vec<Secret>> {
            self.queries
                .lock()
                .unwrap()
                .push((namespace.to_string(), selector.to_string()));
            if self.failing {
                return Err(kube::Error::Api(ErrorResponse {
                    status: "Failure".to_string(),
                    message: "secrets is forbidden".to_string(),
                    reason: "Forbidden".to_string(),
                    code: 403,
                }));
            }
            Ok(self
                .secrets
                .iter()
                .filter(|s| s.metadata.namespace.as_deref() == Some(namespace))
                .filter(|s| selector.matches(s.metadata.labels.as_ref().unwrap_or(&BTreeMap::new())))
                .cloned()
                .collect())
        }
    }

    fn repo_secret(name: &str, url: &str, project: Option<&str>) -> Secret {
        let mut labels = BTreeMap::from([(
            LABEL_CONFIG_TYPE.to_string(),
            HELM_REPOSITORY_CONFIG_TYPE.to_string(),
        )]);
        if let Some(project) = project {
            labels.insert(LABEL_CONFIG_PROJECT.to_string(), project.to_string());
        }
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(DEFAULT_NAMESPACE.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                URL_KEY.to_string(),
                ByteString(url.as_bytes().to_vec()),
            )])),
            ..Default::default()
        }
    }

    fn version(v: &str) -> ChartVersion {
        ChartVersion {
            name: "nginx".to_string(),
            version: v.to_string(),
            ..Default::default()
        }
    }

    fn handler(helper: FakeHelper, store: FakeStore) -> HelmHandler {
        HelmHandler::new(Arc::new(helper), Arc::new(store))
    }

    fn names(list: &ChartRepoResponseList) -> Vec<&str> {
        list.chart_repo_response
            .iter()
            .map(|r| r.secret_name.as_str())
            .collect()
    }

    #[tokio::test]
    async fn list_chart_names() {
        let helper = Arc::new(FakeHelper {
            charts: vec!["apache".to_string(), "nginx".to_string()],
            ..Default::default()
        });
        let h = HelmHandler::new(helper.clone(), Arc::new(FakeStore::default()));

        let charts = h.list_chart_names(REPO, "", false).await.expect("no errors");
        assert_eq!(charts, ["apache", "nginx"]);
        h.list_chart_names(REPO, "creds", true).await.expect("no errors");

        assert_eq!(*helper.calls.lock().unwrap(), [false, true]);
    }

    #[tokio::test]
    async fn list_chart_names_unreachable() {
        let h = handler(
            FakeHelper {
                unreachable: true,
                ..Default::default()
            },
            FakeStore::default(),
        );
        assert_matches!(
            h.list_chart_names(REPO, "", false).await,
            Err(Error::ListHelmChart(_))
        );
    }

    #[tokio::test]
    async fn list_chart_versions() {
        let h = handler(
            FakeHelper {
                versions: BTreeMap::from([(
                    "nginx".to_string(),
                    vec![version("1.1.0"), version("1.0.0")],
                )]),
                ..Default::default()
            },
            FakeStore::default(),
        );
        let versions = h
            .list_chart_versions(REPO, "nginx", "", false)
            .await
            .expect("no errors");
        assert_eq!(versions, [version("1.1.0"), version("1.0.0")]);
    }

    #[tokio::test]
    async fn chart_without_versions_does_not_exist() {
        let h = handler(
            FakeHelper {
                versions: BTreeMap::from([("nginx".to_string(), vec![])]),
                ..Default::default()
            },
            FakeStore::default(),
        );
        assert_matches!(
            h.list_chart_versions(REPO, "nginx", "", false).await,
            Err(Error::ChartNotExist { repo, chart }) if repo == REPO && chart == "nginx"
        );
        assert_matches!(
            h.list_chart_versions(REPO, "redis", "", false).await,
            Err(Error::ChartNotExist { .. })
        );
    }

    #[tokio::test]
    async fn list_chart_versions_unreachable() {
        let h = handler(
            FakeHelper {
                unreachable: true,
                ..Default::default()
            },
            FakeStore::default(),
        );
        assert_matches!(
            h.list_chart_versions(REPO, "nginx", "", false).await,
            Err(Error::ListHelmVersions(_))
        );
    }

    #[tokio::test]
    async fn chart_values_are_flattened() {
        let h = handler(
            FakeHelper {
                values: Some(json!({
                    "image": {"repository": "nginx", "tag": "1.25"},
                    "ports": [80, 443],
                    "extraEnv": [{"name": "A", "value": "1"}],
                    "debug": false,
                })),
                ..Default::default()
            },
            FakeStore::default(),
        );
        let values = h
            .get_chart_values(REPO, "nginx", "1.0.0", "", false)
            .await
            .expect("no errors");
        assert_eq!(
            Value::Object(values),
            json!({
                "image.repository": "nginx",
                "image.tag": "1.25",
                "ports.0": 80,
                "ports.1": 443,
                "extraEnv.0": {"name": "A", "value": "1"},
                "debug": false,
            })
        );
    }

    #[tokio::test]
    async fn chart_values_unreachable() {
        let h = handler(
            FakeHelper {
                unreachable: true,
                ..Default::default()
            },
            FakeStore::default(),
        );
        assert_matches!(
            h.get_chart_values(REPO, "nginx", "1.0.0", "", false).await,
            Err(Error::GetChartValues(_))
        );
    }

    fn registrations() -> FakeStore {
        let mut other_namespace = repo_secret("elsewhere", "https://elsewhere.example.com", None);
        other_namespace.metadata.namespace = Some("default".to_string());
        let mut not_a_repo = repo_secret("registry", "https://registry.example.com", None);
        not_a_repo.metadata.labels = Some(BTreeMap::from([(
            LABEL_CONFIG_TYPE.to_string(),
            "config-image-registry".to_string(),
        )]));

        FakeStore {
            secrets: vec![
                repo_secret("global-1", "https://one.example.com", None),
                repo_secret("team-a-1", "https://a1.example.com", Some("team-a")),
                repo_secret("team-b-1", "https://b1.example.com", Some("team-b")),
                other_namespace,
                repo_secret("team-a-2", "https://a2.example.com", Some("team-a")),
                not_a_repo,
                repo_secret("global-2", "https://two.example.com", None),
            ],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn project_repos_come_before_global_ones() {
        let h = handler(FakeHelper::default(), registrations());
        let list = h.list_chart_repo("team-a").await.expect("no errors");
        assert_eq!(names(&list), ["team-a-1", "team-a-2", "global-1", "global-2"]);
        assert_eq!(
            list.chart_repo_response[0],
            ChartRepoResponse {
                url: "https://a1.example.com".to_string(),
                secret_name: "team-a-1".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn no_project_lists_global_repos_only() {
        let store = Arc::new(registrations());
        let h = HelmHandler::new(Arc::new(FakeHelper::default()), store.clone());
        let list = h.list_chart_repo("").await.expect("no errors");
        assert_eq!(names(&list), ["global-1", "global-2"]);

        let queries = store.queries.lock().unwrap();
        assert_eq!(
            *queries,
            [(
                DEFAULT_NAMESPACE.to_string(),
                LabelSelector::global_helm_repositories().to_string()
            )]
        );
    }

    #[tokio::test]
    async fn unknown_project_lists_global_repos() {
        let h = handler(FakeHelper::default(), registrations());
        let list = h.list_chart_repo("team-c").await.expect("no errors");
        assert_eq!(names(&list), ["global-1", "global-2"]);
    }

    #[tokio::test]
    async fn configured_namespace_is_used() {
        let h = handler(FakeHelper::default(), registrations()).with_namespace("default");
        let list = h.list_chart_repo("").await.expect("no errors");
        assert_eq!(names(&list), ["elsewhere"]);
    }

    #[tokio::test]
    async fn store_failure_is_reported() {
        let h = handler(
            FakeHelper::default(),
            FakeStore {
                failing: true,
                ..Default::default()
            },
        );
        assert_matches!(
            h.list_chart_repo("team-a").await,
            Err(Error::ListChartRepo(kube::Error::Api(ae))) if ae.code == 403
        );
    }
}
