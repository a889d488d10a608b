/// Convenience result type used across the crate.
pub type GearResult<T> = Result<T, GearError>;

/// Top-level error taxonomy for recoverable failures.
///
/// Contract violations (exhausted exploration, invoking an invalid job) are not represented here;
/// those indicate a bug in plan construction and panic instead.
#[derive(thiserror::Error, Debug)]
pub enum GearError {
    /// Invalid user-provided data: segment descriptions, configuration, frame ranges.
    #[error("validation error: {0}")]
    Validation(String),

    /// Errors while deriving jobs from an execution plan.
    #[error("planning error: {0}")]
    Planning(String),

    /// Errors while handing jobs to the scheduler or running its workers.
    #[error("dispatch error: {0}")]
    Dispatch(String),

    /// Capacity exhaustion, e.g. a refused priority-queue resize.
    #[error("resource error: {0}")]
    Resource(String),

    /// Errors when serializing or deserializing data structures.
    #[error("serialization error: {0}")]
    Serde(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GearError {
    /// Build a [`GearError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`GearError::Planning`] value.
    pub fn planning(msg: impl Into<String>) -> Self {
        Self::Planning(msg.into())
    }

    /// Build a [`GearError::Dispatch`] value.
    pub fn dispatch(msg: impl Into<String>) -> Self {
        Self::Dispatch(msg.into())
    }

    /// Build a [`GearError::Resource`] value.
    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    /// Build a [`GearError::Serde`] value.
    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }
}

impl From<serde_json::Error> for GearError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serde(e.to_string())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
