use std::collections::BTreeMap;

use indoc::indoc;
use k8s_openapi::{
    api::core::v1::{ConfigMap, Container, ResourceRequirements},
    apimachinery::pkg::api::resource::Quantity,
};
use rstest::rstest;
use serde::Deserialize;
use serving_sidecar::{
    config::Config,
    probe::decode_probe,
    queue::make_queue_container,
    revision::Revision,
};

const CONFIG_MAPS: &str = indoc! {"
    apiVersion: v1
    kind: ConfigMap
    metadata:
      name: config-deployment
      namespace: knative-serving
    data:
      queue-sidecar-image: gcr.io/knative-releases/queue:v1
      queue-sidecar-memory-request: 64Mi
      queue-sidecar-ephemeral-storage-request: 512Mi
    ---
    apiVersion: v1
    kind: ConfigMap
    metadata:
      name: config-observability
      namespace: knative-serving
    data:
      profiling.enable: \"true\"
      logging.enable-probe-request-log: \"true\"
    ---
    apiVersion: v1
    kind: ConfigMap
    metadata:
      name: config-features
      namespace: knative-serving
    data:
      autodetect-http2: enabled
"};

const REVISION: &str = indoc! {"
    apiVersion: serving.knative.dev/v1
    kind: Revision
    metadata:
      name: hello-00001
      namespace: default
      annotations:
        queue.sidecar.serving.knative.dev/resource-percentage: \"25\"
      labels:
        serving.knative.dev/service: hello
    spec:
      containerConcurrency: 0
      timeoutSeconds: 300
      containers:
        - name: user-container
          image: hello:latest
          ports:
            - name: h2c
              containerPort: 9000
          resources:
            requests:
              cpu: 400m
              memory: 256Mi
            limits:
              cpu: \"4\"
          readinessProbe:
            periodSeconds: 5
            exec:
              command: [\"/bin/ready\"]
"};

fn config() -> Config {
    let config_maps = serde_yaml::Deserializer::from_str(CONFIG_MAPS)
        .map(ConfigMap::deserialize)
        .collect::<Result<Vec<_>, _>>()
        .expect("config maps must deserialize");

    Config::from_config_map_objects(&config_maps).expect("config must be valid")
}

fn revision(yaml: &str) -> Revision {
    serde_yaml::from_str(yaml).expect("revision must deserialize")
}

fn env_value<'a>(container: &'a Container, name: &str) -> Option<&'a str> {
    container
        .env
        .iter()
        .flatten()
        .find(|var| var.name == name)
        .and_then(|var| var.value.as_deref())
}

fn resource_list(entries: &[(&str, &str)]) -> BTreeMap<String, Quantity> {
    entries
        .iter()
        .map(|(name, quantity)| ((*name).to_owned(), Quantity((*quantity).to_owned())))
        .collect()
}

#[test]
fn queue_container_from_manifests() {
    let container =
        make_queue_container(&revision(REVISION), &config()).expect("container must build");

    assert_eq!(container.name, "queue-proxy");
    assert_eq!(
        container.image.as_deref(),
        Some("gcr.io/knative-releases/queue:v1")
    );

    // 25% of the user container, clamped into the default boundaries. The CPU limit of 1 is
    // clamped to the maximum of 500m.
    assert_eq!(
        container.resources,
        Some(ResourceRequirements {
            requests: Some(resource_list(&[
                ("cpu", "100m"),
                ("ephemeral-storage", "512Mi"),
                ("memory", "64Mi"),
            ])),
            limits: Some(resource_list(&[("cpu", "500m")])),
            ..ResourceRequirements::default()
        })
    );

    let ports: Vec<_> = container
        .ports
        .iter()
        .flatten()
        .map(|port| (port.name.as_deref(), port.container_port))
        .collect();
    assert_eq!(ports, [
        (Some("http-queueadm"), 8022),
        (Some("http-autometric"), 9090),
        (Some("http-usermetric"), 9091),
        (Some("profiling-port"), 8008),
        (Some("queue-port"), 8013),
    ]);

    assert_eq!(env_value(&container, "QUEUE_SERVING_PORT"), Some("8013"));
    assert_eq!(env_value(&container, "USER_PORT"), Some("9000"));
    assert_eq!(env_value(&container, "SERVING_SERVICE"), Some("hello"));
    assert_eq!(env_value(&container, "SERVING_CONFIGURATION"), Some(""));
    assert_eq!(env_value(&container, "ENABLE_PROFILING"), Some("true"));
    assert_eq!(
        env_value(&container, "SERVING_ENABLE_PROBE_REQUEST_LOG"),
        Some("true")
    );
    assert_eq!(
        env_value(&container, "ENABLE_HTTP2_AUTO_DETECTION"),
        Some("true")
    );
}

#[test]
fn readiness_probes_from_manifests() {
    let container =
        make_queue_container(&revision(REVISION), &config()).expect("container must build");

    let sidecar_probe = container
        .readiness_probe
        .as_ref()
        .expect("queue sidecar has a readiness probe");
    assert_eq!(sidecar_probe.period_seconds, Some(5));
    assert_eq!(sidecar_probe.exec, None);
    assert_eq!(
        serde_yaml::to_string(sidecar_probe.http_get.as_ref().expect("probe is an HTTP probe"))
            .expect("probe must serialize"),
        indoc! {"
            httpHeaders:
            - name: K-Network-Probe
              value: queue
            port: 8013
        "}
    );

    let encoded = env_value(&container, "SERVING_READINESS_PROBE").expect("probe is encoded");
    let user_probe = decode_probe(encoded).expect("probe must decode");
    assert_eq!(user_probe.exec, None);
    assert_eq!(user_probe.timeout_seconds, Some(1));
    assert_eq!(
        serde_yaml::to_string(&user_probe.tcp_socket).expect("probe must serialize"),
        indoc! {"
            host: 127.0.0.1
            port: 9000
        "}
    );
}

#[rstest]
#[case::no_annotation("{}", &[("cpu", "25m"), ("ephemeral-storage", "512Mi"), ("memory", "64Mi")])]
#[case::malformed("{queue.sidecar.serving.knative.dev/resource-percentage: abc%}", &[("cpu", "25m"), ("ephemeral-storage", "512Mi"), ("memory", "64Mi")])]
#[case::legacy_key("{queue.sidecar.serving.knative.dev/resourcePercentage: \"10\"}", &[("cpu", "40m"), ("ephemeral-storage", "512Mi"), ("memory", "50Mi")])]
fn resource_percentage_annotation(
    #[case] annotations: &str,
    #[case] expected_requests: &[(&str, &str)],
) {
    let mut revision = revision(REVISION);
    revision.metadata.annotations =
        Some(serde_yaml::from_str(annotations).expect("annotations must deserialize"));

    let container = make_queue_container(&revision, &config()).expect("container must build");

    assert_eq!(
        container.resources.and_then(|resources| resources.requests),
        Some(resource_list(expected_requests))
    );
}

#[test]
fn config_without_image_is_rejected() {
    let config_maps: Vec<ConfigMap> = vec![serde_yaml::from_str(indoc! {"
        apiVersion: v1
        kind: ConfigMap
        metadata:
          name: config-deployment
        data:
          queue-sidecar-cpu-request: 50m
    "})
    .expect("config map must deserialize")];

    let err = Config::from_config_map_objects(&config_maps).expect_err("image is required");
    assert_eq!(
        err.to_string(),
        "ConfigMap \"config-deployment\" is missing the required key \"queue-sidecar-image\""
    );
}

#[test]
fn revision_without_probe() {
    let revision = revision(indoc! {"
        metadata:
          name: bare-00001
          namespace: default
        spec:
          containers:
            - name: user-container
              image: bare:latest
    "});

    let container = make_queue_container(&revision, &config()).expect("container must build");

    assert_eq!(container.readiness_probe, None);
    assert_eq!(env_value(&container, "SERVING_READINESS_PROBE"), Some(""));
}
