//! Error classification for the extraction pipeline.
//!
//! Errors travel as `anyhow::Error` with an [`ErrorKind`] attached via
//! `Context`, so callers can separate fatal startup failures (configuration,
//! device) from per-video failures that skip the video and continue.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid or missing weights, template, paths, or bound parameters. Fatal.
    Configuration,
    /// Requested compute device unavailable. Fatal.
    Device,
    /// A video could not be opened or yielded no frames. Skips the video.
    Decode,
    /// Forward pass still anomalous after all retries (abort policy only).
    Inference,
    /// Output image could not be written. Aborts the video's remaining writes.
    Encode,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration error"),
            Self::Device => write!(f, "device error"),
            Self::Decode => write!(f, "decode error"),
            Self::Inference => write!(f, "inference error"),
            Self::Encode => write!(f, "encode error"),
        }
    }
}

impl std::error::Error for ErrorKind {}

/// Classify an error by the [`ErrorKind`] it carries, if any.
///
/// Kinds are attached with `.context(ErrorKind::…)`, which anyhow resolves
/// through `downcast_ref` across all context layers.
pub fn kind_of(error: &anyhow::Error) -> Option<ErrorKind> {
    error.downcast_ref::<ErrorKind>().copied()
}

/// True when the error must stop the whole run rather than skip one video.
pub fn is_fatal(error: &anyhow::Error) -> bool {
    matches!(
        kind_of(error),
        Some(ErrorKind::Configuration) | Some(ErrorKind::Device)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_kind_survives_context_wrapping() {
        let err = anyhow::Error::new(ErrorKind::Decode)
            .context("cannot open clip.mp4")
            .context("video 3 failed");
        assert_eq!(kind_of(&err), Some(ErrorKind::Decode));
        assert!(!is_fatal(&err));
    }

    #[test]
    fn test_configuration_and_device_are_fatal() {
        let config = anyhow::Error::new(ErrorKind::Configuration).context("bad template");
        assert!(is_fatal(&config));

        let device = anyhow::Error::new(ErrorKind::Device).context("no CUDA");
        assert!(is_fatal(&device));
    }

    #[test]
    fn test_unclassified_error_has_no_kind() {
        let err = anyhow::anyhow!("plain failure");
        assert_eq!(kind_of(&err), None);
        assert!(!is_fatal(&err));
    }
}
