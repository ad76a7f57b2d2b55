use std::{
    fs,
    io::{self, Write as _},
    path::{Path, PathBuf},
};

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serving_sidecar::{
    config::Config,
    k8s_openapi::api::core::v1::ConfigMap,
    kube::CustomResourceExt as _,
    logging::initialize_logging,
    queue::{self, make_queue_container},
    revision::Revision,
};
use snafu::{ResultExt as _, Snafu};

const APP_NAME: &str = "queue-spec";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to initialize logging"))]
    InitializeLogging {
        source: serving_sidecar::logging::Error,
    },

    #[snafu(display("failed to read {path:?}"))]
    ReadFile { source: io::Error, path: PathBuf },

    #[snafu(display("failed to parse the Revision in {path:?}"))]
    ParseRevision {
        source: serde_yaml::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse the ConfigMaps in {path:?}"))]
    ParseConfigMaps {
        source: serde_yaml::Error,
        path: PathBuf,
    },

    #[snafu(display("invalid configuration"))]
    InvalidConfig {
        source: serving_sidecar::config::Error,
    },

    #[snafu(display("failed to build the queue sidecar container"))]
    BuildQueueContainer { source: queue::Error },

    #[snafu(display("failed to serialize output"))]
    SerializeOutput { source: serde_yaml::Error },

    #[snafu(display("failed to write output"))]
    WriteOutput { source: io::Error },
}

/// Renders the queue sidecar container of serving Revisions.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Prints the Revision CustomResourceDefinition.
    Crd,

    /// Prints the queue sidecar container for a Revision.
    Render {
        /// A Revision manifest.
        #[arg(long, env = "QUEUE_SPEC_REVISION")]
        revision: PathBuf,

        /// A manifest with one or more ConfigMaps, separated by `---`. Only the image is required,
        /// everything else falls back to defaults.
        #[arg(long, env = "QUEUE_SPEC_CONFIG")]
        config: Option<PathBuf>,

        /// Sets the queue sidecar image, taking precedence over the `config-deployment` ConfigMap.
        #[arg(long)]
        image: Option<String>,
    },
}

#[snafu::report]
fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    initialize_logging("QUEUE_SPEC_LOG", APP_NAME).context(InitializeLoggingSnafu)?;

    match cli.command {
        Command::Crd => print_yaml(&Revision::crd()),
        Command::Render {
            revision,
            config,
            image,
        } => {
            let revision: Revision = serde_yaml::from_str(&read_file(&revision)?)
                .context(ParseRevisionSnafu { path: &revision })?;

            let mut config_maps = match &config {
                Some(path) => read_config_maps(path)?,
                None => Vec::new(),
            };
            if let Some(image) = image {
                config_maps.push(deployment_config_map_with_image(config_maps.as_slice(), image));
            }

            let config =
                Config::from_config_map_objects(&config_maps).context(InvalidConfigSnafu)?;
            tracing::debug!(?config, "read configuration");

            let container =
                make_queue_container(&revision, &config).context(BuildQueueContainerSnafu)?;
            print_yaml(&container)
        }
    }
}

fn read_file(path: &Path) -> Result<String, Error> {
    fs::read_to_string(path).context(ReadFileSnafu { path })
}

fn read_config_maps(path: &Path) -> Result<Vec<ConfigMap>, Error> {
    let contents = read_file(path)?;

    serde_yaml::Deserializer::from_str(&contents)
        .map(ConfigMap::deserialize)
        .collect::<Result<_, _>>()
        .context(ParseConfigMapsSnafu { path })
}

/// Returns a copy of the last `config-deployment` ConfigMap (or an empty one) with the image
/// replaced. Later ConfigMaps win, so pushing it overrides the original.
fn deployment_config_map_with_image(config_maps: &[ConfigMap], image: String) -> ConfigMap {
    let name = serving_sidecar::config::DeploymentConfig::CONFIG_MAP_NAME;

    let mut config_map = config_maps
        .iter()
        .rev()
        .find(|config_map| config_map.metadata.name.as_deref() == Some(name))
        .cloned()
        .unwrap_or_default();

    config_map.metadata.name = Some(name.to_owned());
    config_map.data.get_or_insert_with(Default::default).insert(
        serving_sidecar::config::DeploymentConfig::QUEUE_SIDECAR_IMAGE_KEY.to_owned(),
        image,
    );
    config_map
}

fn print_yaml(value: &impl Serialize) -> Result<(), Error> {
    let yaml = serde_yaml::to_string(value).context(SerializeOutputSnafu)?;
    io::stdout()
        .lock()
        .write_all(yaml.as_bytes())
        .context(WriteOutputSnafu)
}
