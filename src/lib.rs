#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Error listing helm charts: {0}")]
    ListHelmChart(#[source] helm::Error),

    #[error("Error listing helm chart versions: {0}")]
    ListHelmVersions(#[source] helm::Error),

    #[error("Chart {chart} doesn't exist in repository {repo}")]
    ChartNotExist { repo: String, chart: String },

    #[error("Error getting helm chart values: {0}")]
    GetChartValues(#[source] helm::Error),

    #[error("Error listing chart repositories: {0}")]
    ListChartRepo(#[source] kube::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Chart repository facade used by the API handlers.
pub mod handler;

/// Chart repository access.
pub mod helm;

/// Label contract and response types.
pub mod resources;

pub mod flatten;
pub mod index;
pub mod store;
