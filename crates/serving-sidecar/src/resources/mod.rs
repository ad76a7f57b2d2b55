//! Derives the resource requirements of the queue sidecar.
//!
//! The requirements are seeded from the configured quantities. The resource percentage annotation
//! can then override CPU and memory requests and limits with a fraction of the user container's
//! own values, clamped into the configured [`ResourceBoundary`].
use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::{Container, ResourceRequirements},
    apimachinery::pkg::api::resource::Quantity as K8sQuantity,
};
use tracing::{debug, warn};

use crate::{
    config::DeploymentConfig,
    kvp::{KeyPriority, annotation::QUEUE_SIDECAR_RESOURCE_PERCENTAGE},
    quantity::{Format, Quantity},
};

mod boundary;

pub use boundary::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, strum::Display, strum::AsRefStr)]
pub enum ResourceKind {
    #[strum(serialize = "cpu")]
    Cpu,

    #[strum(serialize = "memory")]
    Memory,

    #[strum(serialize = "ephemeral-storage")]
    EphemeralStorage,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ResourceRequirementsType {
    Requests,
    Limits,
}

/// Builds the resource requirements of the queue sidecar.
///
/// The requests are always set (but may be empty), the limits only if at least one limit is
/// present.
pub fn create_queue_resources(
    config: &DeploymentConfig,
    annotations: Option<&BTreeMap<String, String>>,
    user_container: &Container,
) -> ResourceRequirements {
    let mut requests = BTreeMap::new();
    let mut limits = BTreeMap::new();

    for (kind, request, limit) in [
        (
            ResourceKind::Cpu,
            config.queue_sidecar_cpu_request,
            config.queue_sidecar_cpu_limit,
        ),
        (
            ResourceKind::Memory,
            config.queue_sidecar_memory_request,
            config.queue_sidecar_memory_limit,
        ),
        (
            ResourceKind::EphemeralStorage,
            config.queue_sidecar_ephemeral_storage_request,
            config.queue_sidecar_ephemeral_storage_limit,
        ),
    ] {
        if let Some(request) = request {
            requests.insert(kind, request);
        }
        if let Some(limit) = limit {
            limits.insert(kind, limit);
        }
    }

    if let Some(fraction) = fraction_from_percentage(annotations, QUEUE_SIDECAR_RESOURCE_PERCENTAGE)
    {
        let boundaries = &config.queue_sidecar_boundaries;

        // Ephemeral storage is never derived from the user container.
        for (rr_type, kind, boundary) in [
            (
                ResourceRequirementsType::Requests,
                ResourceKind::Cpu,
                &boundaries.request_cpu,
            ),
            (
                ResourceRequirementsType::Limits,
                ResourceKind::Cpu,
                &boundaries.limit_cpu,
            ),
            (
                ResourceRequirementsType::Requests,
                ResourceKind::Memory,
                &boundaries.request_memory,
            ),
            (
                ResourceRequirementsType::Limits,
                ResourceKind::Memory,
                &boundaries.limit_memory,
            ),
        ] {
            let user_quantity = user_container_quantity(user_container, rr_type, kind);

            match compute_resource_requirements(&user_quantity, fraction, boundary) {
                Some(quantity) => {
                    let list = match rr_type {
                        ResourceRequirementsType::Requests => &mut requests,
                        ResourceRequirementsType::Limits => &mut limits,
                    };
                    list.insert(kind, quantity);
                }
                None => debug!(
                    %rr_type,
                    %kind,
                    "user container does not set the resource, keeping the configured value"
                ),
            }
        }
    }

    ResourceRequirements {
        requests: Some(into_resource_list(requests)),
        limits: (!limits.is_empty()).then(|| into_resource_list(limits)),
        ..ResourceRequirements::default()
    }
}

/// Scales `quantity` by `fraction` and clamps the result into `boundary`.
///
/// Returns [`None`] if `quantity` is zero, in which case nothing can be derived from it. The
/// computation happens in milli-units and saturates at [`i64::MAX`] milli-units instead of
/// overflowing.
pub fn compute_resource_requirements(
    quantity: &Quantity,
    fraction: f64,
    boundary: &ResourceBoundary,
) -> Option<Quantity> {
    if quantity.is_zero() {
        return None;
    }

    let scaled_milli_value = if quantity.value() < i64::MAX / 1000 {
        quantity.milli_value()
    } else {
        i64::MAX - 1
    };

    // i64::MAX as f64 rounds up to 2^63, so values equal to it are out of range as well.
    let percentage_value = scaled_milli_value as f64 * fraction;
    let new_value = if percentage_value < i64::MAX as f64 {
        percentage_value as i64
    } else {
        i64::MAX
    };

    Some(boundary.apply(Quantity::from_milli(new_value, Format::BinarySI)))
}

/// Reads the percentage behind the first present key and returns it as fraction, e.g. `25`
/// becomes `0.25`.
///
/// Absent, malformed, negative and non-finite values all disable the override.
pub fn fraction_from_percentage(
    annotations: Option<&BTreeMap<String, String>>,
    key: KeyPriority,
) -> Option<f64> {
    let (key, value) = key.get_opt(annotations)?;

    match value.parse::<f64>() {
        Ok(percentage) if percentage.is_finite() && percentage >= 0.0 => Some(percentage / 100.0),
        _ => {
            debug!(
                key,
                value, "ignoring resource percentage annotation, it is not a non-negative number"
            );
            None
        }
    }
}

/// Returns the quantity the user container declares, or zero if it declares none.
fn user_container_quantity(
    container: &Container,
    rr_type: ResourceRequirementsType,
    kind: ResourceKind,
) -> Quantity {
    let list = container
        .resources
        .as_ref()
        .and_then(|resources| match rr_type {
            ResourceRequirementsType::Requests => resources.requests.as_ref(),
            ResourceRequirementsType::Limits => resources.limits.as_ref(),
        });

    let Some(quantity) = list.and_then(|list| list.get(kind.as_ref())) else {
        return Quantity::ZERO;
    };

    Quantity::try_from(quantity).unwrap_or_else(|error| {
        warn!(
            container = container.name,
            %rr_type,
            %kind,
            quantity = quantity.0.as_str(),
            error = &error as &dyn std::error::Error,
            "failed to parse user container quantity, treating it as unset"
        );
        Quantity::ZERO
    })
}

fn into_resource_list(list: BTreeMap<ResourceKind, Quantity>) -> BTreeMap<String, K8sQuantity> {
    list.into_iter()
        .map(|(kind, quantity)| (kind.to_string(), quantity.into()))
        .collect()
}
