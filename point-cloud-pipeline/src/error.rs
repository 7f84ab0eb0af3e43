//! Error types shared by backends, stages and the executor.
use serde::Serialize;
use std::fmt;
use std::io;
use std::path::Path;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Every failure the engine can report.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("LAS error: {0}")]
    Las(#[from] las::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Configuration error: {}", .0.join("; "))]
    Config(Vec<String>),

    #[error("Domain error: {0}")]
    Domain(String),

    #[error("Precondition error: {0}")]
    Precondition(String),

    #[error("Run aborted after {} chunk failure(s)", .0.len())]
    Aborted(Vec<ChunkError>),
}

impl PipelineError {
    pub fn io<C: ToString>(context: C, source: io::Error) -> Self {
        PipelineError::Io {
            context: context.to_string(),
            source,
        }
    }

    /// IO failure attributed to a file.
    pub fn io_at(path: &Path, source: io::Error) -> Self {
        Self::io(path.display(), source)
    }

    pub fn format<T: ToString>(msg: T) -> Self {
        PipelineError::Format(msg.to_string())
    }

    pub fn config<T: ToString>(msg: T) -> Self {
        PipelineError::Config(vec![msg.to_string()])
    }

    pub fn domain<T: ToString>(msg: T) -> Self {
        PipelineError::Domain(msg.to_string())
    }

    pub fn precondition<T: ToString>(msg: T) -> Self {
        PipelineError::Precondition(msg.to_string())
    }

    /// Short category name used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Io { .. } => "IO",
            PipelineError::Las(_) => "IO",
            PipelineError::Json(_) => "Format",
            PipelineError::Format(_) => "Format",
            PipelineError::Config(_) => "Config",
            PipelineError::Domain(_) => "Domain",
            PipelineError::Precondition(_) => "Precondition",
            PipelineError::Aborted(_) => "Aborted",
        }
    }

    /// Errors that a chunk may recover from by rewinding and reading again.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    /// API misuse stops the whole run, not only the chunk that hit it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::Precondition(_) | PipelineError::Aborted(_)
        )
    }
}

/// A failure tied to the chunk it happened in.
#[derive(Debug, Serialize)]
pub struct ChunkError {
    pub chunk_id: usize,
    pub chunk_name: String,
    pub kind: &'static str,
    #[serde(serialize_with = "serialize_display")]
    pub error: PipelineError,
}

impl ChunkError {
    pub fn new(chunk_id: usize, chunk_name: &str, error: PipelineError) -> Self {
        Self {
            chunk_id,
            chunk_name: chunk_name.to_string(),
            kind: error.kind(),
            error,
        }
    }
}

impl fmt::Display for ChunkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chunk {} ({}): {}",
            self.chunk_id, self.chunk_name, self.error
        )
    }
}

impl std::error::Error for ChunkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

fn serialize_display<S: serde::Serializer>(
    error: &PipelineError,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_interruptions_are_transient() {
        let timed_out = PipelineError::io("read", io::Error::from(io::ErrorKind::TimedOut));
        let missing = PipelineError::io("read", io::Error::from(io::ErrorKind::NotFound));

        assert!(timed_out.is_transient());
        assert!(!missing.is_transient());
        assert!(!PipelineError::domain("no").is_transient());
    }

    #[test]
    fn config_errors_are_joined() {
        let err = PipelineError::Config(vec!["a: missing".into(), "b: bad".into()]);
        assert_eq!(err.to_string(), "Configuration error: a: missing; b: bad");
    }

    #[test]
    fn chunk_error_mentions_chunk() {
        let err = ChunkError::new(3, "tile_3", PipelineError::format("bad magic"));
        assert_eq!(err.kind, "Format");
        assert!(err.to_string().starts_with("chunk 3 (tile_3)"));
    }
}
