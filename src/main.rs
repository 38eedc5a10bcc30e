#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]

use std::{fs, path::PathBuf, sync::Arc};

use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::Serialize;

use chartrepo::{
    flatten::flatten,
    handler::HelmHandler,
    helm::{values_from_slice, HttpChartHelper},
    resources::DEFAULT_NAMESPACE,
    store::KubeSecretStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    #[derive(Clone, Parser)]
    #[clap(version)]
    struct Args {
        /// The tracing filter used for logs
        #[clap(long, env = "CHARTREPO_LOG", default_value = "chartrepo=info,warn")]
        log_level: kubert::LogFilter,

        /// The logging format
        #[clap(long, default_value = "plain")]
        log_format: kubert::LogFormat,

        #[clap(flatten)]
        client: kubert::ClientArgs,

        /// Namespace holding the chart repository registrations
        #[clap(long, env = "CHARTREPO_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
        namespace: String,

        #[command(subcommand)]
        command: Commands,
    }

    #[derive(Clone, Subcommand)]
    enum Commands {
        /// List the charts published in a repository
        Charts {
            url: String,
            #[clap(flatten)]
            repo: RepoArgs,
        },

        /// List the published versions of a chart
        Versions {
            url: String,
            chart: String,
            #[clap(flatten)]
            repo: RepoArgs,
        },

        /// Show the default values of a chart, flattened to dot separated keys
        Values {
            url: String,
            chart: String,
            /// Chart version, the latest one if empty
            #[clap(long, default_value = "")]
            version: String,
            #[clap(flatten)]
            repo: RepoArgs,
        },

        /// List the chart repositories registered in the cluster
        Repos {
            /// Also list the repositories registered for this project
            #[clap(long, default_value = "")]
            project: String,
        },

        /// Flatten a local values file
        Flatten { file: PathBuf },
    }

    #[derive(Clone, ClapArgs)]
    struct RepoArgs {
        /// Secret holding the repository credentials
        #[clap(long, default_value = "")]
        secret_name: String,

        /// Bypass any cached repository index
        #[clap(long)]
        skip_cache: bool,
    }

    let Args {
        log_level,
        log_format,
        client,
        namespace,
        command,
    } = Args::parse();

    log_format.try_init(log_level)?;

    match command {
        Commands::Charts { url, repo } => {
            let charts = handler(client, namespace)
                .await?
                .list_chart_names(&url, &repo.secret_name, repo.skip_cache)
                .await?;
            print_json(&charts)
        }
        Commands::Versions { url, chart, repo } => {
            let versions = handler(client, namespace)
                .await?
                .list_chart_versions(&url, &chart, &repo.secret_name, repo.skip_cache)
                .await?;
            print_json(&versions)
        }
        Commands::Values {
            url,
            chart,
            version,
            repo,
        } => {
            let values = handler(client, namespace)
                .await?
                .get_chart_values(&url, &chart, &version, &repo.secret_name, repo.skip_cache)
                .await?;
            print_json(&values)
        }
        Commands::Repos { project } => {
            let repos = handler(client, namespace)
                .await?
                .list_chart_repo(&project)
                .await?;
            print_json(&repos)
        }
        // Works offline, no cluster needed.
        Commands::Flatten { file } => {
            let values = values_from_slice(&fs::read(file)?)?;
            print_json(&flatten(&values))
        }
    }
}

async fn handler(client: kubert::ClientArgs, namespace: String) -> anyhow::Result<HelmHandler> {
    let http = reqwest::Client::builder()
        .user_agent(concat!("chartrepo/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let client = client.try_client().await?;
    Ok(HelmHandler::new(
        Arc::new(HttpChartHelper::new(http)),
        Arc::new(KubeSecretStore::new(client)),
    )
    .with_namespace(namespace))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
