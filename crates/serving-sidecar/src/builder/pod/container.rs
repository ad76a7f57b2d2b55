use std::fmt;

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, ObjectFieldSelector, Probe,
    ResourceRequirements, SecurityContext,
};

/// A builder to build [`Container`] objects.
///
/// Environment variables and ports keep the order in which they were added.
#[derive(Clone, Default)]
pub struct ContainerBuilder {
    container_ports: Option<Vec<ContainerPort>>,
    env: Option<Vec<EnvVar>>,
    image: Option<String>,
    name: String,
    resources: Option<ResourceRequirements>,
    readiness_probe: Option<Probe>,
    security_context: Option<SecurityContext>,
}

impl ContainerBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Self::default()
        }
    }

    pub fn image(&mut self, image: impl Into<String>) -> &mut Self {
        self.image = Some(image.into());
        self
    }

    pub fn add_env_var(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.env.get_or_insert_with(Vec::new).push(EnvVar {
            name: name.into(),
            value: Some(value.into()),
            ..EnvVar::default()
        });
        self
    }

    /// Used for pushing down attributes like the Pod's name or IP into the container.
    pub fn add_env_var_from_field_path(
        &mut self,
        name: impl Into<String>,
        field_path: &FieldPathEnvVar,
    ) -> &mut Self {
        self.env.get_or_insert_with(Vec::new).push(EnvVar {
            name: name.into(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    api_version: field_path.api_version().map(ToOwned::to_owned),
                    field_path: field_path.to_string(),
                }),
                ..EnvVarSource::default()
            }),
            ..EnvVar::default()
        });
        self
    }

    pub fn add_container_port(&mut self, name: impl Into<String>, port: i32) -> &mut Self {
        self.container_ports
            .get_or_insert_with(Vec::new)
            .push(ContainerPortBuilder::new(port).name(name).build());
        self
    }

    pub fn add_container_ports(
        &mut self,
        container_ports: impl IntoIterator<Item = ContainerPort>,
    ) -> &mut Self {
        self.container_ports
            .get_or_insert_with(Vec::new)
            .extend(container_ports);
        self
    }

    pub fn resources(&mut self, resources: ResourceRequirements) -> &mut Self {
        self.resources = Some(resources);
        self
    }

    pub fn readiness_probe(&mut self, probe: Probe) -> &mut Self {
        self.readiness_probe = Some(probe);
        self
    }

    pub fn security_context(&mut self, context: SecurityContext) -> &mut Self {
        self.security_context = Some(context);
        self
    }

    pub fn build(&self) -> Container {
        Container {
            env: self.env.clone(),
            image: self.image.clone(),
            resources: self.resources.clone(),
            name: self.name.clone(),
            ports: self.container_ports.clone(),
            readiness_probe: self.readiness_probe.clone(),
            security_context: self.security_context.clone(),
            ..Container::default()
        }
    }
}

/// A builder to build [`ContainerPort`] objects.
#[derive(Clone, Default)]
pub struct ContainerPortBuilder {
    container_port: i32,
    name: Option<String>,
}

impl ContainerPortBuilder {
    pub fn new(container_port: i32) -> Self {
        Self {
            container_port,
            ..Self::default()
        }
    }

    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    pub fn build(&self) -> ContainerPort {
        ContainerPort {
            container_port: self.container_port,
            name: self.name.clone(),
            ..ContainerPort::default()
        }
    }
}

/// Downward API capabilities available via `fieldRef`
/// See: <https://kubernetes.io/docs/tasks/inject-data-application/downward-api-volume-expose-pod-information/#capabilities-of-the-downward-api>
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldPathEnvVar {
    Name,
    PodIp,
    HostIp,
}

impl FieldPathEnvVar {
    /// The API version the field path is resolved against, if it is pinned.
    pub fn api_version(&self) -> Option<&'static str> {
        match self {
            Self::HostIp => Some("v1"),
            Self::Name | Self::PodIp => None,
        }
    }
}

impl fmt::Display for FieldPathEnvVar {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Name => write!(f, "metadata.name"),
            Self::PodIp => write!(f, "status.podIP"),
            Self::HostIp => write!(f, "status.hostIP"),
        }
    }
}
