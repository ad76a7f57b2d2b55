use const_format::concatcp;

/// The serving key prefix, used by labels and annotations alike.
pub const SERVING_KEY_PREFIX: &str = "serving.knative.dev/";

/// The queue sidecar specific annotation key prefix.
pub const QUEUE_SIDECAR_KEY_PREFIX: &str = concatcp!("queue.sidecar.", SERVING_KEY_PREFIX);

/// The label key `serving.knative.dev/service`. It carries the name of the Service owning a
/// Revision, if there is one.
pub const SERVICE_LABEL_KEY: &str = concatcp!(SERVING_KEY_PREFIX, "service");

/// The annotation key `queue.sidecar.serving.knative.dev/resource-percentage`.
pub const QUEUE_SIDECAR_RESOURCE_PERCENTAGE_KEY: &str =
    concatcp!(QUEUE_SIDECAR_KEY_PREFIX, "resource-percentage");

/// The deprecated camel case spelling of [`QUEUE_SIDECAR_RESOURCE_PERCENTAGE_KEY`].
pub const QUEUE_SIDECAR_RESOURCE_PERCENTAGE_LEGACY_KEY: &str =
    concatcp!(QUEUE_SIDECAR_KEY_PREFIX, "resourcePercentage");
