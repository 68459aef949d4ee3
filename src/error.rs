//! Error types surfaced by the synthesis core.
//!
//! The core never aborts the process. Construction-time problems fail as
//! a typed `Result`; in-DSP anomalies (modulation cycles) are reported
//! through logging and substituted with silence rather than returned here.

use thiserror::Error;

/// Errors the synthesis core can report.
#[derive(Debug, Error)]
pub enum SynthError {
    /// The `Program` is structurally invalid: an out-of-range id, a
    /// non-monotonic event, or a zero sample rate. Detected at
    /// `Generator::new` and fails construction.
    #[error("bad program: {reason}")]
    BadProgram { reason: String },

    /// A sink (file or device) failed to accept a write.
    #[error("sink write failed: {0}")]
    SinkWrite(#[from] std::io::Error),

    /// The audio device backend failed to open or reported an error.
    #[error("audio device error: {0}")]
    AudioDevice(String),
}

pub type Result<T> = std::result::Result<T, SynthError>;
