//! Builders for Kubernetes objects.
pub mod pod;
