//! Error taxonomy for pipeline runs.

/// Pipeline controller errors.
///
/// The first five variants are the failure classes a stage can end in; the
/// rest are infrastructure problems surfaced by the executor or the config
/// loader.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("stage {stage}: `{command}` exited with code {code}")]
    ScriptExit {
        stage: String,
        command: String,
        code: i32,
    },

    #[error("stage {stage}: container image access failed: `{command}` exited with code {code}")]
    ContainerPull {
        stage: String,
        command: String,
        code: i32,
    },

    #[error("stage {stage}: container command failed: `{command}` exited with code {code}")]
    ContainerExec {
        stage: String,
        command: String,
        code: i32,
    },

    #[error("credential not available: {0}")]
    CredentialResolution(String),

    #[error("stage {stage}: publish failed: `{command}` exited with code {code}")]
    Publish {
        stage: String,
        command: String,
        code: i32,
    },

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` timed out after {secs} seconds")]
    Timeout { command: String, secs: u64 },

    #[error("invalid pipeline config: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_exit_display() {
        let err = PipelineError::ScriptExit {
            stage: "build".to_string(),
            command: "./build.sh -b 07".to_string(),
            code: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("build"));
        assert!(msg.contains("-b 07"));
        assert!(msg.contains("code 2"));
    }

    #[test]
    fn test_credential_resolution_display() {
        let err = PipelineError::CredentialResolution("PACKAGE_INDEX_TOKEN".to_string());
        assert!(err.to_string().contains("PACKAGE_INDEX_TOKEN"));
    }

    #[test]
    fn test_io_error_from() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: PipelineError = io.into();
        assert!(matches!(err, PipelineError::Io(_)));
    }
}
