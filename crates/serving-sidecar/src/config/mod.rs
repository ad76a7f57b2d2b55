//! Configuration of the queue sidecar, read from the string data of the cluster ConfigMaps.
//!
//! Each section is read from its own ConfigMap, see the `CONFIG_MAP_NAME` constants. Absent
//! ConfigMaps and absent keys fall back to defaults, malformed values are errors which name the
//! offending ConfigMap and key.
use std::{
    collections::BTreeMap,
    num::ParseFloatError,
    str::{FromStr, ParseBoolError},
};

use k8s_openapi::api::core::v1::ConfigMap;
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use strum::VariantNames;

use crate::{
    quantity::{ParseQuantityError, Quantity},
    resources::InvertedBoundaryError,
};

mod deployment;
mod observability;

pub use deployment::*;
pub use observability::*;

type Result<T, E = Error> = std::result::Result<T, E>;

pub const DEFAULT_SYSTEM_NAMESPACE: &str = "knative-serving";
pub const DEFAULT_METRICS_DOMAIN: &str = "knative.dev/internal/serving";

#[derive(Debug, PartialEq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("ConfigMap {config_map:?} is missing the required key {key:?}"))]
    MissingKey { config_map: String, key: String },

    #[snafu(display("failed to parse {key:?} in ConfigMap {config_map:?} as quantity"))]
    ParseQuantity {
        source: ParseQuantityError,
        config_map: String,
        key: String,
    },

    #[snafu(display("failed to parse {key:?} in ConfigMap {config_map:?} as boolean"))]
    ParseBool {
        source: ParseBoolError,
        config_map: String,
        key: String,
    },

    #[snafu(display("failed to parse {key:?} in ConfigMap {config_map:?} as number"))]
    ParseNumber {
        source: ParseFloatError,
        config_map: String,
        key: String,
    },

    #[snafu(display(
        "invalid value {value:?} for {key:?} in ConfigMap {config_map:?}, expected one of: {expected}"
    ))]
    InvalidVariant {
        config_map: String,
        key: String,
        value: String,
        expected: String,
    },

    #[snafu(display("invalid {name} boundary in ConfigMap {config_map:?}"))]
    InvalidBoundary {
        source: InvertedBoundaryError,
        config_map: String,
        name: String,
    },

    #[snafu(display("sample rate {sample_rate} in ConfigMap {config_map:?} is not in [0, 1]"))]
    SampleRateOutOfRange { config_map: String, sample_rate: f64 },

    #[snafu(display("ConfigMap {config_map:?} enables zipkin tracing without a zipkin endpoint"))]
    MissingZipkinEndpoint { config_map: String },
}

/// All configuration the queue sidecar container is built from.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub deployment: DeploymentConfig,
    pub observability: ObservabilityConfig,
    pub tracing: TracingConfig,
    pub logging: LoggingConfig,
    pub features: FeaturesConfig,

    /// The namespace the serving control plane runs in.
    pub system_namespace: String,

    /// The domain metrics are reported under.
    pub metrics_domain: String,
}

impl Config {
    /// Creates a configuration with all defaults, only the deployment section is required.
    pub fn new(deployment: DeploymentConfig) -> Self {
        Self {
            deployment,
            observability: ObservabilityConfig::default(),
            tracing: TracingConfig::default(),
            logging: LoggingConfig::default(),
            features: FeaturesConfig::default(),
            system_namespace: DEFAULT_SYSTEM_NAMESPACE.to_owned(),
            metrics_domain: DEFAULT_METRICS_DOMAIN.to_owned(),
        }
    }

    /// Reads the configuration from ConfigMap data keyed by ConfigMap name.
    pub fn from_config_maps(
        config_maps: &BTreeMap<String, BTreeMap<String, String>>,
    ) -> Result<Self> {
        let section = |name: &'static str| ConfigMapData::new(name, config_maps.get(name));

        Ok(Self {
            deployment: DeploymentConfig::from_config_map(&section(
                DeploymentConfig::CONFIG_MAP_NAME,
            ))?,
            observability: ObservabilityConfig::from_config_map(&section(
                ObservabilityConfig::CONFIG_MAP_NAME,
            ))?,
            tracing: TracingConfig::from_config_map(&section(TracingConfig::CONFIG_MAP_NAME))?,
            logging: LoggingConfig::from_config_map(&section(LoggingConfig::CONFIG_MAP_NAME))?,
            features: FeaturesConfig::from_config_map(&section(FeaturesConfig::CONFIG_MAP_NAME))?,
            system_namespace: DEFAULT_SYSTEM_NAMESPACE.to_owned(),
            metrics_domain: DEFAULT_METRICS_DOMAIN.to_owned(),
        })
    }

    /// Like [`Config::from_config_maps`], but takes the ConfigMap objects themselves. ConfigMaps
    /// without a name are ignored.
    pub fn from_config_map_objects<'a>(
        config_maps: impl IntoIterator<Item = &'a ConfigMap>,
    ) -> Result<Self> {
        let config_maps = config_maps
            .into_iter()
            .filter_map(|config_map| {
                let name = config_map.metadata.name.clone()?;
                Some((name, config_map.data.clone().unwrap_or_default()))
            })
            .collect();

        Self::from_config_maps(&config_maps)
    }
}

/// The string data of a single (possibly absent) ConfigMap.
#[derive(Clone, Copy, Debug)]
pub struct ConfigMapData<'a> {
    name: &'a str,
    data: Option<&'a BTreeMap<String, String>>,
}

impl<'a> ConfigMapData<'a> {
    pub fn new(name: &'a str, data: Option<&'a BTreeMap<String, String>>) -> Self {
        Self { name, data }
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.data
            .and_then(|data| data.get(key))
            .map(String::as_str)
    }

    pub fn required_string(&self, key: &str) -> Result<String> {
        self.get(key)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned)
            .context(MissingKeySnafu {
                config_map: self.name,
                key,
            })
    }

    pub fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_owned()
    }

    pub fn bool(&self, key: &str, default: bool) -> Result<bool> {
        self.get(key).map_or(Ok(default), |value| {
            value
                .to_ascii_lowercase()
                .parse::<bool>()
                .context(ParseBoolSnafu {
                    config_map: self.name,
                    key,
                })
        })
    }

    pub fn number(&self, key: &str, default: f64) -> Result<f64> {
        self.get(key).map_or(Ok(default), |value| {
            value.trim().parse::<f64>().context(ParseNumberSnafu {
                config_map: self.name,
                key,
            })
        })
    }

    /// Empty values are treated like absent ones.
    pub fn quantity(&self, key: &str) -> Result<Option<Quantity>> {
        self.get(key)
            .filter(|value| !value.is_empty())
            .map(|value| {
                Quantity::from_str(value).context(ParseQuantitySnafu {
                    config_map: self.name,
                    key,
                })
            })
            .transpose()
    }

    pub fn variant<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr + VariantNames,
    {
        let Some(value) = self.get(key) else {
            return Ok(default);
        };

        T::from_str(value).ok().context(InvalidVariantSnafu {
            config_map: self.name,
            key,
            value,
            expected: T::VARIANTS.join(", "),
        })
    }

    /// Returns all keys starting with `prefix`, with the prefix stripped.
    pub fn with_prefix(self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.data
            .into_iter()
            .flatten()
            .filter_map(move |(key, value)| {
                key.strip_prefix(prefix)
                    .map(|stripped| (stripped, value.as_str()))
            })
    }
}
