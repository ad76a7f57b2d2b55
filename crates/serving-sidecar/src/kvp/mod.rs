//! Well-known label and annotation keys and helpers to look them up on Kubernetes objects.
pub mod annotation;
pub mod consts;

pub use annotation::KeyPriority;
