//! Transport type model.
//!
//! Every pipeline execution is tagged with a [`TransportType`] so that
//! middlewares and pipeline builders can branch on where they run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the transport used for calls that stay inside the process.
pub const IN_PROCESS_TRANSPORT_NAME: &str = "in-process";

/// The side of a transport a pipeline executes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportRole {
    /// The calling side, which sends the message.
    Client,
    /// The receiving side, which runs the handler.
    Server,
}

impl fmt::Display for TransportRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => f.write_str("client"),
            Self::Server => f.write_str("server"),
        }
    }
}

/// A transport name paired with the role of the current execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransportType {
    name: String,
    role: TransportRole,
}

impl TransportType {
    /// Creates a transport type.
    #[must_use]
    pub fn new(name: impl Into<String>, role: TransportRole) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }

    /// The in-process transport with the given role.
    #[must_use]
    pub fn in_process(role: TransportRole) -> Self {
        Self::new(IN_PROCESS_TRANSPORT_NAME, role)
    }

    /// Returns the transport name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the role.
    #[must_use]
    pub const fn role(&self) -> TransportRole {
        self.role
    }

    /// Returns `true` for the in-process transport.
    #[must_use]
    pub fn is_in_process(&self) -> bool {
        self.name == IN_PROCESS_TRANSPORT_NAME
    }

    /// Returns the same transport with a different role.
    #[must_use]
    pub fn with_role(&self, role: TransportRole) -> Self {
        Self::new(self.name.clone(), role)
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.role)
    }
}
