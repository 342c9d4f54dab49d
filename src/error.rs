use polars::prelude::PolarsError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HaystackError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("Invalid sequence at position {position}: {message}")]
    InvalidSequence { position: usize, message: String },

    #[error("Invalid PWM: {0}")]
    InvalidPwm(String),

    #[error("Invalid file format: {0}")]
    InvalidFileFormat(String),

    #[error("Invalid parameter: {name} = {value}, {message}")]
    InvalidParameter {
        name: String,
        value: String,
        message: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Numeric degeneracy: {0}")]
    NumericDegeneracy(String),

    #[error("External tool `{command}` exited with code {code:?}: {stderr}")]
    ExternalTool {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("External tool `{command}` did not finish within {seconds}s")]
    ToolTimeout { command: String, seconds: u64 },

    #[error("Resource exhaustion: {0}")]
    ResourceExhaustion(String),

    #[error("Worker for `{job}` failed: {source}")]
    Worker {
        job: String,
        #[source]
        source: Box<HaystackError>,
    },
}

/// Type alias for Result with HaystackError
pub type Result<T> = std::result::Result<T, HaystackError>;

impl HaystackError {
    /// Create a new InvalidSequence error
    pub fn invalid_sequence(position: usize, message: impl Into<String>) -> Self {
        HaystackError::InvalidSequence {
            position,
            message: message.into(),
        }
    }

    /// Create a new InvalidPwm error
    pub fn invalid_pwm(message: impl Into<String>) -> Self {
        HaystackError::InvalidPwm(message.into())
    }

    /// Create a new InvalidParameter error
    pub fn invalid_parameter(
        name: impl Into<String>,
        value: impl ToString,
        message: impl Into<String>,
    ) -> Self {
        HaystackError::InvalidParameter {
            name: name.into(),
            value: value.to_string(),
            message: message.into(),
        }
    }

    pub fn degenerate(message: impl Into<String>) -> Self {
        HaystackError::NumericDegeneracy(message.into())
    }

    /// Wraps an error raised inside a worker job with the job's label.
    pub fn in_worker(job: impl Into<String>, source: HaystackError) -> Self {
        HaystackError::Worker {
            job: job.into(),
            source: Box::new(source),
        }
    }
}
