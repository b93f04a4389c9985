//! Error type surfaced by a transcode job.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TranscodeError>;

/// Fatal conditions of a transcode job. Collaborators report `anyhow::Error`,
/// the pipeline classifies them into one of these variants.
#[derive(Error, Debug)]
pub enum TranscodeError {
    /// Packet storage failed; the caller may retry the fetch.
    #[error("source read error: {0:#}")]
    SourceRead(anyhow::Error),

    /// Decode, filter or encode failed for one stream.
    #[error("codec error in {stage} of stream {stream}: {source:#}")]
    Codec {
        stream: usize,
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// The dicer saw frames that do not match its configured layout.
    #[error("dicer invariant violated: {0}")]
    DicerInvariant(String),

    /// The container writer rejected a packet, header or trailer.
    #[error("muxer write error: {0}")]
    MuxerWrite(String),

    /// Malformed job, stream mapping or time base.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transcode cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl TranscodeError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn codec(stream: usize, stage: &'static str, source: anyhow::Error) -> Self {
        Self::Codec {
            stream,
            stage,
            source,
        }
    }

    /// Whether the caller may retry the job unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SourceRead(_))
    }
}
