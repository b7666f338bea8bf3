use thiserror::Error;

/// Failure reported by an external collaborator (cluster, database, secret store).
///
/// `transient` marks failures worth retrying: timeouts, refused connections,
/// a service that is not ready yet.
#[derive(Debug, Clone, Error)]
#[error("{operation}: {message}")]
pub struct ClientError {
    pub operation: String,
    pub message: String,
    pub transient: bool,
}

impl ClientError {
    pub fn permanent(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            transient: false,
        }
    }

    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            transient: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("not initialized: run 'provision init'")]
    NotInitialized,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("tier '{tier}' is not defined for template '{template}' (available: {})", .available.join(", "))]
    PolicyNotFound {
        template: String,
        tier: String,
        available: Vec<String>,
    },

    #[error("tier policy '{template}/{tier}' is invalid: {reason}")]
    PolicyInvalid {
        template: String,
        tier: String,
        reason: String,
    },

    #[error("tenant '{namespace}' already exists: {reason} (use --force to re-provision)")]
    Conflict { namespace: String, reason: String },

    #[error("namespace '{0}' is locked by another provisioning run")]
    Locked(String),

    #[error("database provisioning failed: {0}")]
    Provisioning(String),

    #[error("render failed for '{document}': unresolved placeholder '{placeholder}'")]
    UnresolvedPlaceholder {
        document: String,
        placeholder: String,
    },

    #[error("render failed for '{document}': {reason}")]
    Render { document: String, reason: String },

    #[error("apply failed at manifest '{manifest}': {cause}")]
    Apply { manifest: String, cause: String },

    #[error("registration failed (deployment is live but not tracked by the ledger): {0}")]
    Registration(String),

    #[error("cancelled before {0}")]
    Cancelled(String),

    #[error("tenant registry error: {0}")]
    Registry(String),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ProvisionError {
    /// True for errors raised before anything touched the cluster.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            ProvisionError::Validation(_)
                | ProvisionError::PolicyNotFound { .. }
                | ProvisionError::PolicyInvalid { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
