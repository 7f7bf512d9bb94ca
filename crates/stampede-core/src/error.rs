use thiserror::Error;

/// Canonical error type for orchestration-level operations.
///
/// Per-iteration request failures are *not* represented here; they are
/// reported through [`crate::traits::ExecutorError`] and only ever counted.
#[derive(Debug, Error)]
pub enum StampedeError {
    /// Scenario or engine configuration is invalid. Raised before any load
    /// is generated.
    #[error("validation error: {0}")]
    Validation(String),

    /// The load pattern cannot be executed as described.
    #[error("pattern error: {0}")]
    Pattern(String),

    /// Entity was not found.
    #[error("{entity} `{id}` was not found")]
    NotFound {
        /// Entity type name (e.g. `"test execution"`).
        entity: &'static str,
        /// Identifier of the missing entity.
        id: String,
    },

    /// Entity already exists and cannot be created again.
    #[error("{entity} `{id}` already exists")]
    AlreadyExists {
        /// Entity type name.
        entity: &'static str,
        /// Identifier that conflicts.
        id: String,
    },

    /// Operation violates current state machine rules.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Human-readable explanation of the invalid state.
        message: String,
    },

    /// Unrecoverable error while running a scenario.
    #[error("execution error: {0}")]
    Execution(String),

    /// Layered configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error occurred while writing reports.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error occurred.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Tabular export failed.
    #[error("csv error: {0}")]
    Csv(String),
}

impl StampedeError {
    /// Creates a `Validation` variant.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a `NotFound` variant.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Creates an `AlreadyExists` variant.
    #[must_use]
    pub fn already_exists(entity: &'static str, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity,
            id: id.into(),
        }
    }

    /// Creates an `InvalidState` variant.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an `Execution` variant.
    #[must_use]
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    /// True for errors raised before any load was generated.
    #[must_use]
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Config(_))
    }
}

impl From<serde_json::Error> for StampedeError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_eof() || err.is_syntax() || err.is_data() {
            Self::Deserialization(err.to_string())
        } else {
            Self::Serialization(err.to_string())
        }
    }
}

/// Convenient result alias for orchestration operations.
pub type StampedeResult<T> = Result<T, StampedeError>;
