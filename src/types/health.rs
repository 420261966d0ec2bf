//! Health monitoring types

use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemHealth {
    pub healthy: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl SystemHealth {
    pub fn healthy() -> Self {
        Self { healthy: true, ..Default::default() }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Records an error and marks the system unhealthy.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.healthy = false;
        self.errors.push(message.into());
    }
}
