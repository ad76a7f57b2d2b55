use k8s_openapi::api::core::v1::{Capabilities, SecurityContext};

/// A builder for [`SecurityContext`] objects (not to be confused with `PodSecurityContext`).
#[derive(Clone, Default)]
pub struct SecurityContextBuilder {
    security_context: SecurityContext,
}

impl SecurityContextBuilder {
    /// The hardened context sidecars run with: no privilege escalation, a read-only root
    /// filesystem, a non-root user and no capabilities at all.
    pub fn restricted() -> SecurityContext {
        Self::new()
            .allow_privilege_escalation(false)
            .read_only_root_filesystem(true)
            .run_as_non_root(true)
            .drop_capabilities(["all"])
            .build()
    }

    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_privilege_escalation(&mut self, value: bool) -> &mut Self {
        self.security_context.allow_privilege_escalation = Some(value);
        self
    }

    pub fn drop_capabilities(
        &mut self,
        capabilities: impl IntoIterator<Item = impl Into<String>>,
    ) -> &mut Self {
        self.security_context
            .capabilities
            .get_or_insert_with(Capabilities::default)
            .drop
            .get_or_insert_with(Vec::new)
            .extend(capabilities.into_iter().map(Into::into));
        self
    }

    pub fn read_only_root_filesystem(&mut self, value: bool) -> &mut Self {
        self.security_context.read_only_root_filesystem = Some(value);
        self
    }

    pub fn run_as_non_root(&mut self, value: bool) -> &mut Self {
        self.security_context.run_as_non_root = Some(value);
        self
    }

    pub fn build(&self) -> SecurityContext {
        self.security_context.clone()
    }
}
