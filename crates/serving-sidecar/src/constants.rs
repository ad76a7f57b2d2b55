//! Well-known names, ports and headers shared by the serving components.

/// Name of the queue sidecar container.
pub const QUEUE_CONTAINER_NAME: &str = "queue-proxy";

/// Identifies the queue sidecar in probe headers.
pub const QUEUE_NAME: &str = "queue";

/// Port the user container listens on when it declares none.
pub const DEFAULT_USER_PORT: i32 = 8080;

/// The port name which selects h2c for the user container.
pub const H2C_PORT_NAME: &str = "h2c";

pub const LOCAL_ADDRESS: &str = "127.0.0.1";

pub const BACKEND_HTTP_PORT: i32 = 8012;
pub const BACKEND_HTTP2_PORT: i32 = 8013;
pub const QUEUE_SERVING_PORT_NAME: &str = "queue-port";

pub const QUEUE_ADMIN_PORT: i32 = 8022;
pub const QUEUE_ADMIN_PORT_NAME: &str = "http-queueadm";

pub const AUTOSCALING_QUEUE_METRICS_PORT: i32 = 9090;
pub const AUTOSCALING_QUEUE_METRICS_PORT_NAME: &str = "http-autometric";

pub const USER_QUEUE_METRICS_PORT: i32 = 9091;
pub const USER_QUEUE_METRICS_PORT_NAME: &str = "http-usermetric";

pub const PROFILING_PORT: i32 = 8008;
pub const PROFILING_PORT_NAME: &str = "profiling-port";

/// Header set by the network components when probing the queue sidecar.
pub const NETWORK_PROBE_HEADER_NAME: &str = "K-Network-Probe";

/// Header the queue sidecar sets when it probes the user container on behalf of the kubelet.
pub const KUBELET_PROBE_HEADER_NAME: &str = "K-Kubelet-Probe";

pub const CONCURRENCY_STATE_TOKEN_PATH: &str = "/var/run/secrets/tokens/state-token";

pub const SYSTEM_NAMESPACE_ENV_KEY: &str = "SYSTEM_NAMESPACE";
pub const METRICS_DOMAIN_ENV_KEY: &str = "METRICS_DOMAIN";

/// The component name log levels are configured under.
pub const QUEUE_LOGGING_COMPONENT: &str = "queueproxy";
