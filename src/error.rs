use thiserror::Error;

/// Every way a generation job can fail. The coordinator is the only place
/// that turns a failure into one of these for the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerateError {
    #[error("background execution is not available on this host: {0}")]
    UnsupportedEnvironment(String),

    #[error("execution context failed: {0}")]
    WorkerFailure(String),

    #[error("renderer failed: {0}")]
    RenderFailure(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no terminal status within {0}s")]
    Timeout(u64),

    #[error("job cancelled")]
    Cancelled,

    #[error("delivery failed: {0}")]
    Delivery(String),
}

pub type Result<T> = std::result::Result<T, GenerateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_failure() {
        let e = GenerateError::RenderFailure("bad cell".into());
        assert_eq!(e.to_string(), "renderer failed: bad cell");
        assert_eq!(GenerateError::Timeout(5).to_string(), "no terminal status within 5s");
    }

    #[test]
    fn converts_into_anyhow() {
        let e: anyhow::Error = GenerateError::Cancelled.into();
        assert!(matches!(
            e.downcast_ref::<GenerateError>(),
            Some(GenerateError::Cancelled)
        ));
    }
}
