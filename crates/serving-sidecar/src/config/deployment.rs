use snafu::ResultExt as _;

use crate::{
    config::{ConfigMapData, InvalidBoundarySnafu, Result},
    quantity::{Format, Quantity},
    resources::ResourceBoundary,
};

const MEBI: i64 = 1024 * 1024;

/// The `config-deployment` section: image and resources of the queue sidecar.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeploymentConfig {
    pub queue_sidecar_image: String,

    pub queue_sidecar_cpu_request: Option<Quantity>,
    pub queue_sidecar_cpu_limit: Option<Quantity>,
    pub queue_sidecar_memory_request: Option<Quantity>,
    pub queue_sidecar_memory_limit: Option<Quantity>,
    pub queue_sidecar_ephemeral_storage_request: Option<Quantity>,
    pub queue_sidecar_ephemeral_storage_limit: Option<Quantity>,

    /// Bounds for resources derived from the resource percentage annotation.
    pub queue_sidecar_boundaries: ResourceBoundaries,

    pub concurrency_state_endpoint: String,
}

impl DeploymentConfig {
    pub const CONFIG_MAP_NAME: &'static str = "config-deployment";

    pub const QUEUE_SIDECAR_IMAGE_KEY: &'static str = "queue-sidecar-image";
    pub const CONCURRENCY_STATE_ENDPOINT_KEY: &'static str = "concurrency-state-endpoint";

    /// Creates the default deployment configuration for the given image.
    pub fn new(queue_sidecar_image: impl Into<String>) -> Self {
        Self {
            queue_sidecar_image: queue_sidecar_image.into(),
            queue_sidecar_cpu_request: Some(default_cpu_request()),
            queue_sidecar_cpu_limit: None,
            queue_sidecar_memory_request: None,
            queue_sidecar_memory_limit: None,
            queue_sidecar_ephemeral_storage_request: None,
            queue_sidecar_ephemeral_storage_limit: None,
            queue_sidecar_boundaries: ResourceBoundaries::default(),
            concurrency_state_endpoint: String::new(),
        }
    }

    pub fn from_config_map(data: &ConfigMapData<'_>) -> Result<Self> {
        let resource =
            |name: &str, kind: &str| data.quantity(&format!("queue-sidecar-{name}-{kind}"));

        Ok(Self {
            queue_sidecar_image: data.required_string(Self::QUEUE_SIDECAR_IMAGE_KEY)?,
            queue_sidecar_cpu_request: resource("cpu", "request")?
                .or_else(|| Some(default_cpu_request())),
            queue_sidecar_cpu_limit: resource("cpu", "limit")?,
            queue_sidecar_memory_request: resource("memory", "request")?,
            queue_sidecar_memory_limit: resource("memory", "limit")?,
            queue_sidecar_ephemeral_storage_request: resource("ephemeral-storage", "request")?,
            queue_sidecar_ephemeral_storage_limit: resource("ephemeral-storage", "limit")?,
            queue_sidecar_boundaries: ResourceBoundaries::from_config_map(data)?,
            concurrency_state_endpoint: data.string(Self::CONCURRENCY_STATE_ENDPOINT_KEY, ""),
        })
    }
}

fn default_cpu_request() -> Quantity {
    Quantity::from_milli(25, Format::DecimalSI)
}

/// The [`ResourceBoundary`] of every resource the percentage annotation can override.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceBoundaries {
    pub request_cpu: ResourceBoundary,
    pub limit_cpu: ResourceBoundary,
    pub request_memory: ResourceBoundary,
    pub limit_memory: ResourceBoundary,
}

impl Default for ResourceBoundaries {
    fn default() -> Self {
        let cpu = |millis| Quantity::from_milli(millis, Format::DecimalSI);
        let memory = |mebi| Quantity::from_value(mebi * MEBI, Format::BinarySI);

        Self {
            request_cpu: ResourceBoundary::new_unchecked(cpu(25), cpu(100)),
            limit_cpu: ResourceBoundary::new_unchecked(cpu(40), cpu(500)),
            request_memory: ResourceBoundary::new_unchecked(memory(50), memory(200)),
            limit_memory: ResourceBoundary::new_unchecked(memory(200), memory(500)),
        }
    }
}

impl ResourceBoundaries {
    /// Reads `queue-sidecar-<resource>-<request|limit>-<min|max>`, falling back to the default
    /// bound for every absent key.
    fn from_config_map(data: &ConfigMapData<'_>) -> Result<Self> {
        let defaults = Self::default();

        let boundary = |name: &str, default: ResourceBoundary| -> Result<ResourceBoundary> {
            let min = data
                .quantity(&format!("queue-sidecar-{name}-min"))?
                .unwrap_or(default.min());
            let max = data
                .quantity(&format!("queue-sidecar-{name}-max"))?
                .unwrap_or(default.max());

            ResourceBoundary::new(min, max).context(InvalidBoundarySnafu {
                config_map: data.name(),
                name,
            })
        };

        Ok(Self {
            request_cpu: boundary("cpu-request", defaults.request_cpu)?,
            limit_cpu: boundary("cpu-limit", defaults.limit_cpu)?,
            request_memory: boundary("memory-request", defaults.request_memory)?,
            limit_memory: boundary("memory-limit", defaults.limit_memory)?,
        })
    }
}
