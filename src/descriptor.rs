//! Logical method identity and result arity.

use std::fmt;

/// Stable identity of one logical API method: declaring interface plus
/// method name. Shared across all invocations of that method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    interface: String,
    method: String,
}

impl MethodKey {
    /// Create a method key.
    pub fn new(interface: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            method: method.into(),
        }
    }

    /// Declaring interface name.
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Method name within the interface.
    pub fn method(&self) -> &str {
        &self.method
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.interface, self.method)
    }
}

/// Declared result shape of a logical method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// At most one value: fails, or completes with exactly one item.
    Single,
    /// Zero or more values: completes or fails.
    Multi,
}

/// Build-time description of one logical method. Immutable, created once
/// per client method and shared across invocations.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    key: MethodKey,
    arity: Arity,
}

impl MethodDescriptor {
    /// Create a method descriptor.
    pub fn new(key: MethodKey, arity: Arity) -> Self {
        Self { key, arity }
    }

    /// Get the method key.
    pub fn key(&self) -> &MethodKey {
        &self.key
    }

    /// Get the declared result arity.
    pub fn arity(&self) -> Arity {
        self.arity
    }
}
