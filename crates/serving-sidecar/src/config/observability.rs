use std::{collections::BTreeMap, str::FromStr};

use snafu::{OptionExt as _, ensure};
use strum::VariantNames as _;

use crate::config::{
    ConfigMapData, InvalidVariantSnafu, MissingZipkinEndpointSnafu, Result,
    SampleRateOutOfRangeSnafu,
};

/// The `config-observability` section.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservabilityConfig {
    pub enable_profiling: bool,
    pub request_log_template: String,
    pub enable_request_log: bool,
    pub enable_probe_request_log: bool,
    pub request_metrics_backend: String,
    pub metrics_collector_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enable_profiling: false,
            request_log_template: String::new(),
            enable_request_log: false,
            enable_probe_request_log: false,
            request_metrics_backend: "prometheus".to_owned(),
            metrics_collector_address: String::new(),
        }
    }
}

impl ObservabilityConfig {
    pub const CONFIG_MAP_NAME: &'static str = "config-observability";

    pub fn from_config_map(data: &ConfigMapData<'_>) -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            enable_profiling: data.bool("profiling.enable", defaults.enable_profiling)?,
            request_log_template: data
                .string("logging.request-log-template", &defaults.request_log_template),
            enable_request_log: data
                .bool("logging.enable-request-log", defaults.enable_request_log)?,
            enable_probe_request_log: data.bool(
                "logging.enable-probe-request-log",
                defaults.enable_probe_request_log,
            )?,
            request_metrics_backend: data.string(
                "metrics.request-metrics-backend-destination",
                &defaults.request_metrics_backend,
            ),
            metrics_collector_address: data.string(
                "metrics.opencensus-address",
                &defaults.metrics_collector_address,
            ),
        })
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::VariantNames,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TracingBackend {
    #[default]
    None,
    Zipkin,
}

/// The `config-tracing` section.
#[derive(Clone, Debug, PartialEq)]
pub struct TracingConfig {
    pub backend: TracingBackend,
    pub zipkin_endpoint: String,
    pub debug: bool,

    /// The fraction of requests which are sampled, in `[0, 1]`.
    pub sample_rate: f64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            backend: TracingBackend::None,
            zipkin_endpoint: String::new(),
            debug: false,
            sample_rate: 0.1,
        }
    }
}

impl TracingConfig {
    pub const CONFIG_MAP_NAME: &'static str = "config-tracing";

    pub fn from_config_map(data: &ConfigMapData<'_>) -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            backend: data.variant("backend", defaults.backend)?,
            zipkin_endpoint: data.string("zipkin-endpoint", &defaults.zipkin_endpoint),
            debug: data.bool("debug", defaults.debug)?,
            sample_rate: data.number("sample-rate", defaults.sample_rate)?,
        };

        ensure!(
            (0.0..=1.0).contains(&config.sample_rate),
            SampleRateOutOfRangeSnafu {
                config_map: data.name(),
                sample_rate: config.sample_rate,
            }
        );
        ensure!(
            config.backend != TracingBackend::Zipkin || !config.zipkin_endpoint.is_empty(),
            MissingZipkinEndpointSnafu {
                config_map: data.name(),
            }
        );

        Ok(config)
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::EnumString, strum::VariantNames,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    DPanic,
    Panic,
    Fatal,
}

/// The `config-logging` section.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoggingConfig {
    /// The logger configuration handed to components as is.
    pub logging_config: String,

    /// Log level overrides per component, e.g. `queueproxy`.
    pub logging_level: BTreeMap<String, LogLevel>,
}

impl LoggingConfig {
    pub const CONFIG_MAP_NAME: &'static str = "config-logging";

    const LEVEL_KEY_PREFIX: &'static str = "loglevel.";

    pub fn from_config_map(data: &ConfigMapData<'_>) -> Result<Self> {
        let logging_level = data
            .with_prefix(Self::LEVEL_KEY_PREFIX)
            .map(|(component, level)| {
                let level = LogLevel::from_str(level).ok().context(InvalidVariantSnafu {
                    config_map: data.name(),
                    key: format!("{prefix}{component}", prefix = Self::LEVEL_KEY_PREFIX),
                    value: level,
                    expected: LogLevel::VARIANTS.join(", "),
                })?;

                Ok((component.to_owned(), level))
            })
            .collect::<Result<_>>()?;

        Ok(Self {
            logging_config: data.string("zap-logger-config", ""),
            logging_level,
        })
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::VariantNames,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Flag {
    Enabled,
    #[default]
    Disabled,
    Allowed,
}

/// The `config-features` section, only the flags the queue sidecar cares about.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeaturesConfig {
    pub auto_detect_http2: Flag,
}

impl FeaturesConfig {
    pub const CONFIG_MAP_NAME: &'static str = "config-features";

    pub fn from_config_map(data: &ConfigMapData<'_>) -> Result<Self> {
        Ok(Self {
            auto_detect_http2: data.variant("autodetect-http2", Flag::default())?,
        })
    }
}
