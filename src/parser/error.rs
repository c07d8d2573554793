// ABOUTME: Error types for job definition parsing
// ABOUTME: Covers file access, YAML decoding, and basic structural checks

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Failed to read job file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Empty job: no actions defined")]
    EmptyJob,
}

pub type Result<T> = std::result::Result<T, ParserError>;
