use thiserror::Error;

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("audio output error: {0}")]
    Output(#[from] OutputError),
    #[error("invalid song definition: {0}")]
    Definition(#[from] serde_json::Error),
}

/// Failure to open or start a live output stream.
///
/// Never fatal: the object that asked for the stream stays usable in
/// headless mode (driven through `generate_samples`).
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("live audio output is not compiled in (enable the `device` feature)")]
    Unsupported,
    #[error("no audio output device available")]
    NoDevice,
    #[error("failed to build audio stream: {0}")]
    Build(String),
    #[error("failed to start audio stream: {0}")]
    Play(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_error_converts_into_engine_error() {
        let err: EngineError = OutputError::NoDevice.into();
        assert_eq!(
            err.to_string(),
            "audio output error: no audio output device available"
        );
    }

    #[test]
    fn json_error_is_a_definition_error() {
        let json_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: EngineError = json_err.into();
        assert!(matches!(err, EngineError::Definition(_)));
        assert!(err.to_string().starts_with("invalid song definition"));
    }
}
