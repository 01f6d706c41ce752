use thiserror::Error;

/// Errors surfaced by the fallible parts of the pipeline API.
///
/// Scheduling itself never fails: stage failures are published on the
/// error topic instead of being returned to the caller of `send`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
