use thiserror::Error;

#[derive(Debug, Error)]
pub enum WardenError {
    #[error("caller '{caller}' lacks approval capability for '{scope}'")]
    RbacDenied { caller: String, scope: String },

    #[error("decision not found: {0}")]
    DecisionNotFound(String),

    #[error("playbook run not found: {0}")]
    RunNotFound(String),

    #[error("playbook template not found: {0}")]
    TemplateNotFound(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("decision {0} was already decided")]
    AlreadyDecided(String),

    #[error("decision {0} was already executed")]
    AlreadyExecuted(String),

    #[error("denied by policy rule '{rule_id}': {reason}")]
    PolicyDenied { rule_id: String, reason: String },

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("ledger write failed: {0}")]
    LedgerWriteFailed(String),

    #[error("chain verification failed for partition '{partition}' at seq {seq}")]
    ChainVerificationFailed { partition: String, seq: u64 },

    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("invalid playbook template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WardenError>;
