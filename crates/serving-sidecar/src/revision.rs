//! The Revision custom resource, an immutable snapshot of the workload a queue sidecar fronts.
use std::borrow::Cow;

use k8s_openapi::api::core::v1::Container;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    constants::{DEFAULT_USER_PORT, H2C_PORT_NAME},
    kvp::consts::SERVICE_LABEL_KEY,
};

const CONFIGURATION_KIND: &str = "Configuration";

#[derive(CustomResource, Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "serving.knative.dev",
    version = "v1",
    kind = "Revision",
    plural = "revisions",
    crates(
        kube_core = "kube::core",
        k8s_openapi = "k8s_openapi",
        schemars = "schemars"
    ),
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RevisionSpec {
    /// The containers of the workload. Exactly one of them serves traffic.
    #[serde(default)]
    pub containers: Vec<Container>,

    /// The maximum number of requests in flight per replica, 0 means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_concurrency: Option<i64>,

    /// The maximum duration in seconds a request may take to be responded to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_seconds: Option<i64>,
}

/// The protocol the user container speaks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http1,
    H2c,
}

impl Revision {
    /// The container serving traffic.
    ///
    /// This is the only container, or the first one which declares ports. Falls back to an empty
    /// container for revisions without one, which only passes validation in tests.
    pub fn serving_container(&self) -> Cow<'_, Container> {
        let serving_container = match self.spec.containers.as_slice() {
            [container] => Some(container),
            containers => containers
                .iter()
                .find(|container| container.ports.as_ref().is_some_and(|ports| !ports.is_empty())),
        };

        serving_container.map_or_else(|| Cow::Owned(Container::default()), Cow::Borrowed)
    }

    /// The port the serving container listens on, 8080 if it doesn't declare one.
    pub fn user_port(&self) -> i32 {
        self.serving_container()
            .ports
            .as_ref()
            .and_then(|ports| ports.first())
            .map(|port| port.container_port)
            .filter(|port| *port != 0)
            .unwrap_or(DEFAULT_USER_PORT)
    }

    /// [`Protocol::H2c`] if the first port of the serving container is named `h2c`.
    pub fn protocol(&self) -> Protocol {
        let first_port_name = self
            .serving_container()
            .ports
            .as_ref()
            .and_then(|ports| ports.first())
            .and_then(|port| port.name.clone());

        if first_port_name.as_deref() == Some(H2C_PORT_NAME) {
            Protocol::H2c
        } else {
            Protocol::Http1
        }
    }

    pub fn container_concurrency(&self) -> i64 {
        self.spec.container_concurrency.unwrap_or_default()
    }

    /// The name of the Configuration controlling this revision, if any.
    pub fn configuration_name(&self) -> Option<&str> {
        self.metadata
            .owner_references
            .iter()
            .flatten()
            .find(|owner| owner.controller == Some(true))
            .filter(|owner| owner.kind == CONFIGURATION_KIND)
            .map(|owner| owner.name.as_str())
    }

    /// The name of the Service this revision belongs to, if any.
    pub fn service_name(&self) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(SERVICE_LABEL_KEY))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use kube::core::CustomResourceExt as _;
    use rstest::rstest;

    use super::*;

    fn revision(yaml: &str) -> Revision {
        serde_yaml::from_str(yaml).expect("revision must deserialize")
    }

    #[test]
    fn crd_name() {
        assert_eq!(Revision::crd_name(), "revisions.serving.knative.dev");
    }

    #[test]
    fn metadata_helpers() {
        let revision = revision(indoc! {"
            apiVersion: serving.knative.dev/v1
            kind: Revision
            metadata:
              name: hello-00001
              namespace: default
              labels:
                serving.knative.dev/service: hello
              ownerReferences:
                - apiVersion: serving.knative.dev/v1
                  kind: Configuration
                  name: hello
                  uid: 6f1c2a9e-0000-0000-0000-000000000000
                  controller: true
            spec:
              containerConcurrency: 10
              containers:
                - name: user-container
                  image: hello:latest
        "});

        assert_eq!(revision.configuration_name(), Some("hello"));
        assert_eq!(revision.service_name(), Some("hello"));
        assert_eq!(revision.container_concurrency(), 10);
        assert_eq!(revision.user_port(), 8080);
        assert_eq!(revision.protocol(), Protocol::Http1);
    }

    #[rstest]
    #[case::not_controller(indoc! {"
        metadata:
          ownerReferences:
            - apiVersion: serving.knative.dev/v1
              kind: Configuration
              name: hello
              uid: 6f1c2a9e-0000-0000-0000-000000000000
        spec: {}
    "})]
    #[case::other_kind(indoc! {"
        metadata:
          ownerReferences:
            - apiVersion: apps/v1
              kind: Deployment
              name: hello
              uid: 6f1c2a9e-0000-0000-0000-000000000000
              controller: true
        spec: {}
    "})]
    fn without_configuration(#[case] yaml: &str) {
        let revision = revision(yaml);

        assert_eq!(revision.configuration_name(), None);
        assert_eq!(revision.service_name(), None);
        assert_eq!(revision.container_concurrency(), 0);
    }

    #[test]
    fn serving_container_is_the_one_with_ports() {
        let revision = revision(indoc! {"
            metadata:
              name: hello-00001
            spec:
              containers:
                - name: sidecar
                  image: sidecar
                - name: user
                  image: hello
                  ports:
                    - name: h2c
                      containerPort: 9000
        "});

        assert_eq!(revision.serving_container().name, "user");
        assert_eq!(revision.user_port(), 9000);
        assert_eq!(revision.protocol(), Protocol::H2c);
    }

    #[rstest]
    #[case::no_containers("metadata: {}\nspec: {}", "", 8080)]
    #[case::only_container_without_ports(
        "metadata: {}\nspec:\n  containers:\n    - name: user\n",
        "user",
        8080
    )]
    #[case::port_zero(
        "metadata: {}\nspec:\n  containers:\n    - name: user\n      ports:\n        - containerPort: 0\n",
        "user",
        8080
    )]
    #[case::no_container_with_ports(
        "metadata: {}\nspec:\n  containers:\n    - name: a\n    - name: b\n",
        "",
        8080
    )]
    fn serving_container_fallbacks(
        #[case] yaml: &str,
        #[case] expected_name: &str,
        #[case] expected_port: i32,
    ) {
        let revision = revision(yaml);

        assert_eq!(revision.serving_container().name, expected_name);
        assert_eq!(revision.user_port(), expected_port);
        assert_eq!(revision.protocol(), Protocol::Http1);
    }
}
