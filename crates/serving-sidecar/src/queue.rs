//! Builds the queue sidecar container which is injected next to the user container of every
//! Revision.
use k8s_openapi::api::core::v1::Container;
use kube::ResourceExt as _;
use snafu::{ResultExt as _, Snafu};
use tracing::debug;

use crate::{
    builder::pod::{ContainerBuilder, ContainerPortBuilder, FieldPathEnvVar, SecurityContextBuilder},
    config::{Config, Flag},
    constants::{
        AUTOSCALING_QUEUE_METRICS_PORT, AUTOSCALING_QUEUE_METRICS_PORT_NAME, BACKEND_HTTP_PORT,
        BACKEND_HTTP2_PORT, CONCURRENCY_STATE_TOKEN_PATH, METRICS_DOMAIN_ENV_KEY, PROFILING_PORT,
        PROFILING_PORT_NAME, QUEUE_ADMIN_PORT, QUEUE_ADMIN_PORT_NAME, QUEUE_CONTAINER_NAME,
        QUEUE_LOGGING_COMPONENT, QUEUE_SERVING_PORT_NAME, SYSTEM_NAMESPACE_ENV_KEY,
        USER_QUEUE_METRICS_PORT, USER_QUEUE_METRICS_PORT_NAME,
    },
    probe::{self, TranslatedProbe, translate_readiness_probe},
    resources::create_queue_resources,
    revision::{Protocol, Revision},
};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to translate the readiness probe of revision {revision:?}"))]
    TranslateReadinessProbe {
        source: probe::Error,
        revision: String,
    },
}

/// The port the queue sidecar serves traffic on.
pub fn serving_port(protocol: Protocol) -> i32 {
    match protocol {
        Protocol::Http1 => BACKEND_HTTP_PORT,
        Protocol::H2c => BACKEND_HTTP2_PORT,
    }
}

/// Formats a float in its shortest representation, switching to a signed exponent with at least
/// two digits below `1e-4` and from `1e21` on (`0.1`, `1`, `1e-05`).
fn format_float(value: f64) -> String {
    let scientific = format!("{value:e}");
    let exponent = scientific
        .split_once('e')
        .and_then(|(mantissa, exponent)| Some((mantissa, exponent.parse::<i32>().ok()?)));

    match exponent {
        Some((mantissa, exponent)) if value != 0.0 && !(-4..21).contains(&exponent) => {
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exponent.unsigned_abs())
        }
        _ => value.to_string(),
    }
}

/// Builds the queue sidecar container for `revision`.
///
/// Fails if the readiness probe of the user container cannot be encoded, no partial container is
/// returned in that case.
pub fn make_queue_container(revision: &Revision, config: &Config) -> Result<Container> {
    let revision_name = revision.name_any();
    let serving_container = revision.serving_container();
    let user_port = revision.user_port();
    let serving_port = serving_port(revision.protocol());

    let translated_probe = translate_readiness_probe(
        serving_container.readiness_probe.as_ref(),
        user_port,
        serving_port,
    )
    .context(TranslateReadinessProbeSnafu {
        revision: &revision_name,
    })?;

    let resources = create_queue_resources(
        &config.deployment,
        revision.metadata.annotations.as_ref(),
        &serving_container,
    );

    let mut container_builder = ContainerBuilder::new(QUEUE_CONTAINER_NAME);
    container_builder
        .image(&config.deployment.queue_sidecar_image)
        .resources(resources)
        .add_container_port(QUEUE_ADMIN_PORT_NAME, QUEUE_ADMIN_PORT)
        .add_container_port(
            AUTOSCALING_QUEUE_METRICS_PORT_NAME,
            AUTOSCALING_QUEUE_METRICS_PORT,
        )
        .add_container_port(USER_QUEUE_METRICS_PORT_NAME, USER_QUEUE_METRICS_PORT);

    if config.observability.enable_profiling {
        container_builder.add_container_port(PROFILING_PORT_NAME, PROFILING_PORT);
    }

    container_builder
        .add_container_ports([ContainerPortBuilder::new(serving_port)
            .name(QUEUE_SERVING_PORT_NAME)
            .build()])
        .security_context(SecurityContextBuilder::restricted());

    let encoded_probe = match translated_probe {
        Some(TranslatedProbe { encoded, sidecar }) => {
            container_builder.readiness_probe(sidecar);
            encoded
        }
        None => {
            debug!(
                revision = %revision_name,
                "user container has no readiness probe, queue sidecar gets none either"
            );
            String::new()
        }
    };

    let logging_level = config
        .logging
        .logging_level
        .get(QUEUE_LOGGING_COMPONENT)
        .map(ToString::to_string)
        .unwrap_or_default();

    container_builder
        .add_env_var(
            "SERVING_NAMESPACE",
            revision.namespace().unwrap_or_default(),
        )
        .add_env_var(
            "SERVING_SERVICE",
            revision.service_name().unwrap_or_default(),
        )
        .add_env_var(
            "SERVING_CONFIGURATION",
            revision.configuration_name().unwrap_or_default(),
        )
        .add_env_var("SERVING_REVISION", &revision_name)
        .add_env_var("QUEUE_SERVING_PORT", serving_port.to_string())
        .add_env_var(
            "CONTAINER_CONCURRENCY",
            revision.container_concurrency().to_string(),
        )
        .add_env_var(
            "REVISION_TIMEOUT_SECONDS",
            revision
                .spec
                .timeout_seconds
                .unwrap_or_default()
                .to_string(),
        )
        .add_env_var(
            "MAX_DURATION_SECONDS",
            revision
                .spec
                .max_duration_seconds
                .unwrap_or_default()
                .to_string(),
        )
        .add_env_var_from_field_path("SERVING_POD", &FieldPathEnvVar::Name)
        .add_env_var_from_field_path("SERVING_POD_IP", &FieldPathEnvVar::PodIp)
        .add_env_var("SERVING_LOGGING_CONFIG", &config.logging.logging_config)
        .add_env_var("SERVING_LOGGING_LEVEL", logging_level)
        .add_env_var(
            "SERVING_REQUEST_LOG_TEMPLATE",
            &config.observability.request_log_template,
        )
        .add_env_var(
            "SERVING_ENABLE_REQUEST_LOG",
            config.observability.enable_request_log.to_string(),
        )
        .add_env_var(
            "SERVING_REQUEST_METRICS_BACKEND",
            &config.observability.request_metrics_backend,
        )
        .add_env_var("TRACING_CONFIG_BACKEND", config.tracing.backend.to_string())
        .add_env_var(
            "TRACING_CONFIG_ZIPKIN_ENDPOINT",
            &config.tracing.zipkin_endpoint,
        )
        .add_env_var("TRACING_CONFIG_DEBUG", config.tracing.debug.to_string())
        .add_env_var(
            "TRACING_CONFIG_SAMPLE_RATE",
            format_float(config.tracing.sample_rate),
        )
        .add_env_var("USER_PORT", user_port.to_string())
        .add_env_var(SYSTEM_NAMESPACE_ENV_KEY, &config.system_namespace)
        .add_env_var(METRICS_DOMAIN_ENV_KEY, &config.metrics_domain)
        .add_env_var("SERVING_READINESS_PROBE", encoded_probe)
        .add_env_var(
            "ENABLE_PROFILING",
            config.observability.enable_profiling.to_string(),
        )
        .add_env_var(
            "SERVING_ENABLE_PROBE_REQUEST_LOG",
            config.observability.enable_probe_request_log.to_string(),
        )
        .add_env_var(
            "METRICS_COLLECTOR_ADDRESS",
            &config.observability.metrics_collector_address,
        )
        .add_env_var(
            "CONCURRENCY_STATE_ENDPOINT",
            &config.deployment.concurrency_state_endpoint,
        )
        .add_env_var("CONCURRENCY_STATE_TOKEN_PATH", CONCURRENCY_STATE_TOKEN_PATH)
        .add_env_var_from_field_path("HOST_IP", &FieldPathEnvVar::HostIp)
        .add_env_var(
            "ENABLE_HTTP2_AUTO_DETECTION",
            (config.features.auto_detect_http2 == Flag::Enabled).to_string(),
        );

    debug!(
        revision = %revision_name,
        %user_port,
        %serving_port,
        "built queue sidecar container"
    );

    Ok(container_builder.build())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::{
        api::core::v1::{
            ContainerPort, EnvVar, ExecAction, HTTPGetAction, HTTPHeader, Probe, TCPSocketAction,
        },
        apimachinery::pkg::{
            apis::meta::v1::{ObjectMeta, OwnerReference},
            util::intstr::IntOrString,
        },
    };
    use rstest::rstest;

    use super::*;
    use crate::{
        config::{DeploymentConfig, LogLevel, TracingBackend},
        probe::decode_probe,
        revision::RevisionSpec,
    };

    fn user_container() -> Container {
        Container {
            name: "user-container".to_owned(),
            image: Some("hello:latest".to_owned()),
            ports: Some(vec![ContainerPort {
                container_port: 8888,
                ..ContainerPort::default()
            }]),
            ..Container::default()
        }
    }

    fn revision(container: Container) -> Revision {
        let mut revision = Revision::new(
            "hello-00001",
            RevisionSpec {
                containers: vec![container],
                container_concurrency: Some(5),
                timeout_seconds: Some(300),
                max_duration_seconds: None,
            },
        );
        revision.metadata = ObjectMeta {
            name: Some("hello-00001".to_owned()),
            namespace: Some("default".to_owned()),
            labels: Some(BTreeMap::from([(
                "serving.knative.dev/service".to_owned(),
                "hello".to_owned(),
            )])),
            owner_references: Some(vec![OwnerReference {
                api_version: "serving.knative.dev/v1".to_owned(),
                kind: "Configuration".to_owned(),
                name: "hello".to_owned(),
                uid: "6f1c2a9e-0000-0000-0000-000000000000".to_owned(),
                controller: Some(true),
                ..OwnerReference::default()
            }]),
            ..ObjectMeta::default()
        };
        revision
    }

    fn config() -> Config {
        Config::new(DeploymentConfig::new("queue:latest"))
    }

    fn env(container: &Container) -> BTreeMap<&str, Option<&str>> {
        container
            .env
            .iter()
            .flatten()
            .map(|var| (var.name.as_str(), var.value.as_deref()))
            .collect()
    }

    fn port_names(container: &Container) -> Vec<(&str, i32)> {
        container
            .ports
            .iter()
            .flatten()
            .map(|port| (port.name.as_deref().unwrap_or_default(), port.container_port))
            .collect()
    }

    #[rstest]
    #[case::zero(0.0, "0")]
    #[case::one(1.0, "1")]
    #[case::default(0.1, "0.1")]
    #[case::smallest_plain(0.0001, "0.0001")]
    #[case::exponent(0.00001, "1e-05")]
    #[case::exponent_with_fraction(0.000015, "1.5e-05")]
    #[case::large(1e21, "1e+21")]
    fn sample_rate_formatting(#[case] sample_rate: f64, #[case] expected: &str) {
        let mut config = config();
        config.tracing.sample_rate = sample_rate;

        let container =
            make_queue_container(&revision(user_container()), &config).expect("container builds");

        assert_eq!(format_float(sample_rate), expected);
        assert_eq!(env(&container)["TRACING_CONFIG_SAMPLE_RATE"], Some(expected));
    }

    #[test]
    fn env_from_revision_and_config() {
        let mut config = config();
        config.observability.request_log_template = "{{.Request.URL}}".to_owned();
        config.tracing.backend = TracingBackend::Zipkin;
        config.tracing.zipkin_endpoint = "http://zipkin:9411".to_owned();
        config.tracing.sample_rate = 1.0;
        config
            .logging
            .logging_level
            .insert("queueproxy".to_owned(), LogLevel::Debug);
        config.features.auto_detect_http2 = Flag::Enabled;

        let container =
            make_queue_container(&revision(user_container()), &config).expect("container builds");

        let env = env(&container);
        assert_eq!(env["SERVING_NAMESPACE"], Some("default"));
        assert_eq!(env["SERVING_SERVICE"], Some("hello"));
        assert_eq!(env["SERVING_CONFIGURATION"], Some("hello"));
        assert_eq!(env["SERVING_REVISION"], Some("hello-00001"));
        assert_eq!(env["QUEUE_SERVING_PORT"], Some("8012"));
        assert_eq!(env["CONTAINER_CONCURRENCY"], Some("5"));
        assert_eq!(env["REVISION_TIMEOUT_SECONDS"], Some("300"));
        assert_eq!(env["MAX_DURATION_SECONDS"], Some("0"));
        assert_eq!(env["SERVING_LOGGING_LEVEL"], Some("debug"));
        assert_eq!(env["SERVING_REQUEST_LOG_TEMPLATE"], Some("{{.Request.URL}}"));
        assert_eq!(env["TRACING_CONFIG_BACKEND"], Some("zipkin"));
        assert_eq!(env["TRACING_CONFIG_SAMPLE_RATE"], Some("1"));
        assert_eq!(env["USER_PORT"], Some("8888"));
        assert_eq!(env["SYSTEM_NAMESPACE"], Some("knative-serving"));
        assert_eq!(env["METRICS_DOMAIN"], Some("knative.dev/internal/serving"));
        assert_eq!(env["SERVING_READINESS_PROBE"], Some(""));
        assert_eq!(env["ENABLE_HTTP2_AUTO_DETECTION"], Some("true"));
        assert_eq!(
            env["CONCURRENCY_STATE_TOKEN_PATH"],
            Some("/var/run/secrets/tokens/state-token")
        );
        assert_eq!(env["SERVING_POD"], None);
        assert_eq!(env["HOST_IP"], None);
    }

    #[test]
    fn env_order_is_fixed() {
        let container =
            make_queue_container(&revision(user_container()), &config()).expect("container builds");

        let names: Vec<_> = container
            .env
            .iter()
            .flatten()
            .map(|var| var.name.as_str())
            .collect();

        assert_eq!(names, [
            "SERVING_NAMESPACE",
            "SERVING_SERVICE",
            "SERVING_CONFIGURATION",
            "SERVING_REVISION",
            "QUEUE_SERVING_PORT",
            "CONTAINER_CONCURRENCY",
            "REVISION_TIMEOUT_SECONDS",
            "MAX_DURATION_SECONDS",
            "SERVING_POD",
            "SERVING_POD_IP",
            "SERVING_LOGGING_CONFIG",
            "SERVING_LOGGING_LEVEL",
            "SERVING_REQUEST_LOG_TEMPLATE",
            "SERVING_ENABLE_REQUEST_LOG",
            "SERVING_REQUEST_METRICS_BACKEND",
            "TRACING_CONFIG_BACKEND",
            "TRACING_CONFIG_ZIPKIN_ENDPOINT",
            "TRACING_CONFIG_DEBUG",
            "TRACING_CONFIG_SAMPLE_RATE",
            "USER_PORT",
            "SYSTEM_NAMESPACE",
            "METRICS_DOMAIN",
            "SERVING_READINESS_PROBE",
            "ENABLE_PROFILING",
            "SERVING_ENABLE_PROBE_REQUEST_LOG",
            "METRICS_COLLECTOR_ADDRESS",
            "CONCURRENCY_STATE_ENDPOINT",
            "CONCURRENCY_STATE_TOKEN_PATH",
            "HOST_IP",
            "ENABLE_HTTP2_AUTO_DETECTION",
        ]);
    }

    #[test]
    fn env_defaults() {
        let revision = Revision::new("bare", RevisionSpec::default());
        let container = make_queue_container(&revision, &config()).expect("container builds");

        let env = env(&container);
        assert_eq!(env["SERVING_NAMESPACE"], Some(""));
        assert_eq!(env["SERVING_SERVICE"], Some(""));
        assert_eq!(env["SERVING_CONFIGURATION"], Some(""));
        assert_eq!(env["CONTAINER_CONCURRENCY"], Some("0"));
        assert_eq!(env["REVISION_TIMEOUT_SECONDS"], Some("0"));
        assert_eq!(env["SERVING_LOGGING_LEVEL"], Some(""));
        assert_eq!(env["TRACING_CONFIG_BACKEND"], Some("none"));
        assert_eq!(env["TRACING_CONFIG_SAMPLE_RATE"], Some("0.1"));
        assert_eq!(env["USER_PORT"], Some("8080"));
        assert_eq!(env["SERVING_REQUEST_METRICS_BACKEND"], Some("prometheus"));
        assert_eq!(env["ENABLE_HTTP2_AUTO_DETECTION"], Some("false"));
    }

    #[test]
    fn field_path_env_vars() {
        let container =
            make_queue_container(&revision(user_container()), &config()).expect("container builds");

        let host_ip = container
            .env
            .iter()
            .flatten()
            .find(|var| var.name == "HOST_IP")
            .and_then(|var| var.value_from.as_ref())
            .and_then(|source| source.field_ref.as_ref())
            .expect("HOST_IP is set from a field");

        assert_eq!(host_ip.api_version.as_deref(), Some("v1"));
        assert_eq!(host_ip.field_path, "status.hostIP");
    }

    #[rstest]
    #[case::http1(None, false, &[
        ("http-queueadm", 8022),
        ("http-autometric", 9090),
        ("http-usermetric", 9091),
        ("queue-port", 8012),
    ])]
    #[case::h2c(Some("h2c"), false, &[
        ("http-queueadm", 8022),
        ("http-autometric", 9090),
        ("http-usermetric", 9091),
        ("queue-port", 8013),
    ])]
    #[case::profiling(None, true, &[
        ("http-queueadm", 8022),
        ("http-autometric", 9090),
        ("http-usermetric", 9091),
        ("profiling-port", 8008),
        ("queue-port", 8012),
    ])]
    fn ports(
        #[case] port_name: Option<&str>,
        #[case] enable_profiling: bool,
        #[case] expected: &[(&str, i32)],
    ) {
        let mut user_container = user_container();
        user_container.ports = Some(vec![ContainerPort {
            name: port_name.map(ToOwned::to_owned),
            container_port: 8888,
            ..ContainerPort::default()
        }]);
        let mut config = config();
        config.observability.enable_profiling = enable_profiling;

        let container =
            make_queue_container(&revision(user_container), &config).expect("container builds");

        assert_eq!(port_names(&container), expected);

        let env = env(&container);
        assert_eq!(
            env["ENABLE_PROFILING"],
            Some(enable_profiling.to_string().as_str())
        );
    }

    #[test]
    fn readiness_probe_is_translated() {
        let mut user_container = user_container();
        user_container.readiness_probe = Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/ready".to_owned()),
                port: IntOrString::Int(8888),
                ..HTTPGetAction::default()
            }),
            period_seconds: Some(10),
            ..Probe::default()
        });

        let container =
            make_queue_container(&revision(user_container), &config()).expect("container builds");

        assert_eq!(
            container.readiness_probe,
            Some(Probe {
                http_get: Some(HTTPGetAction {
                    port: IntOrString::Int(8012),
                    http_headers: Some(vec![HTTPHeader {
                        name: "K-Network-Probe".to_owned(),
                        value: "queue".to_owned(),
                    }]),
                    ..HTTPGetAction::default()
                }),
                period_seconds: Some(10),
                ..Probe::default()
            })
        );
        assert_eq!(container.startup_probe, None);

        let encoded = env(&container)["SERVING_READINESS_PROBE"].expect("probe is encoded");
        assert_eq!(
            decode_probe(encoded).expect("probe decodes"),
            Probe {
                http_get: Some(HTTPGetAction {
                    host: Some("127.0.0.1".to_owned()),
                    path: Some("/ready".to_owned()),
                    port: IntOrString::Int(8888),
                    scheme: Some("HTTP".to_owned()),
                    http_headers: Some(vec![HTTPHeader {
                        name: "K-Kubelet-Probe".to_owned(),
                        value: "queue".to_owned(),
                    }]),
                }),
                period_seconds: Some(10),
                timeout_seconds: Some(1),
                ..Probe::default()
            }
        );
    }

    #[test]
    fn exec_readiness_probe_becomes_tcp() {
        let mut user_container = user_container();
        user_container.readiness_probe = Some(Probe {
            exec: Some(ExecAction {
                command: Some(vec!["/bin/ready".to_owned()]),
            }),
            ..Probe::default()
        });

        let container =
            make_queue_container(&revision(user_container), &config()).expect("container builds");

        let encoded = env(&container)["SERVING_READINESS_PROBE"].expect("probe is encoded");
        assert!(!encoded.contains("/bin/ready"), "{encoded}");
        assert_eq!(
            decode_probe(encoded).expect("probe decodes"),
            Probe {
                tcp_socket: Some(TCPSocketAction {
                    host: Some("127.0.0.1".to_owned()),
                    port: IntOrString::Int(8888),
                }),
                ..Probe::default()
            }
        );
        assert_eq!(
            container
                .readiness_probe
                .and_then(|probe| probe.http_get)
                .map(|action| action.port),
            Some(IntOrString::Int(8012))
        );
    }

    #[test]
    fn security_context_is_restricted() {
        let container =
            make_queue_container(&revision(user_container()), &config()).expect("container builds");

        assert_eq!(
            container.security_context,
            Some(SecurityContextBuilder::restricted())
        );
        assert_eq!(container.name, "queue-proxy");
        assert_eq!(container.image.as_deref(), Some("queue:latest"));
    }

    #[test]
    fn env_values_are_plain_strings() {
        let container =
            make_queue_container(&revision(user_container()), &config()).expect("container builds");

        let plain: Vec<&EnvVar> = container
            .env
            .iter()
            .flatten()
            .filter(|var| var.value_from.is_none())
            .collect();

        assert!(plain.iter().all(|var| var.value.is_some()));
        assert_eq!(plain.len(), 27);
    }
}
