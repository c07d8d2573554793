// ABOUTME: Hierarchical serial formats for jobs, executions, branches, and targets
// ABOUTME: Provides parsing, strict validation, and tier auto-detection for lookup APIs

pub mod error;
pub mod sequence;

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

pub use error::{Result, SerialError};
pub use sequence::{MemorySequences, SequenceStore, SerialService};

/// Capacity of the yearly job/target sequence (5 digits).
pub const YEAR_CAPACITY: u32 = 99_999;
/// Capacity of the per-parent execution/branch sequence (4 digits).
pub const CHILD_CAPACITY: u32 = 9_999;

fn job_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^J(\d{4})(\d{5})$").unwrap())
}

fn execution_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^J(\d{4})(\d{5})\.(\d{4})$").unwrap())
}

fn branch_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^J(\d{4})(\d{5})\.(\d{4})\.(\d{4})$").unwrap())
}

fn target_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^T(\d{4})(\d{5})$").unwrap())
}

/// A job serial: `J{YYYY}{NNNNN}`, unique within the year.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobSerial {
    pub year: i32,
    pub sequence: u32,
}

/// An execution serial: `<job>.{MMMM}`, unique within the job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionSerial {
    pub job: JobSerial,
    pub sequence: u32,
}

/// A branch serial: `<execution>.{PPPP}`, unique within the execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BranchSerial {
    pub execution: ExecutionSerial,
    pub sequence: u32,
}

/// A target serial: `T{YYYY}{NNNNN}`. Referenced by branches, issued elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetSerial {
    pub year: i32,
    pub sequence: u32,
}

impl fmt::Display for JobSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "J{:04}{:05}", self.year, self.sequence)
    }
}

impl fmt::Display for ExecutionSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:04}", self.job, self.sequence)
    }
}

impl fmt::Display for BranchSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:04}", self.execution, self.sequence)
    }
}

impl fmt::Display for TargetSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{:04}{:05}", self.year, self.sequence)
    }
}

impl FromStr for JobSerial {
    type Err = SerialError;

    fn from_str(s: &str) -> Result<Self> {
        let caps = job_re().captures(s).ok_or_else(|| SerialError::InvalidFormat {
            tier: "job",
            serial: s.to_string(),
        })?;
        Ok(Self {
            year: caps[1].parse().unwrap(),
            sequence: caps[2].parse().unwrap(),
        })
    }
}

impl FromStr for ExecutionSerial {
    type Err = SerialError;

    fn from_str(s: &str) -> Result<Self> {
        let caps = execution_re()
            .captures(s)
            .ok_or_else(|| SerialError::InvalidFormat {
                tier: "execution",
                serial: s.to_string(),
            })?;
        Ok(Self {
            job: JobSerial {
                year: caps[1].parse().unwrap(),
                sequence: caps[2].parse().unwrap(),
            },
            sequence: caps[3].parse().unwrap(),
        })
    }
}

impl FromStr for BranchSerial {
    type Err = SerialError;

    fn from_str(s: &str) -> Result<Self> {
        let caps = branch_re()
            .captures(s)
            .ok_or_else(|| SerialError::InvalidFormat {
                tier: "branch",
                serial: s.to_string(),
            })?;
        Ok(Self {
            execution: ExecutionSerial {
                job: JobSerial {
                    year: caps[1].parse().unwrap(),
                    sequence: caps[2].parse().unwrap(),
                },
                sequence: caps[3].parse().unwrap(),
            },
            sequence: caps[4].parse().unwrap(),
        })
    }
}

impl FromStr for TargetSerial {
    type Err = SerialError;

    fn from_str(s: &str) -> Result<Self> {
        let caps = target_re()
            .captures(s)
            .ok_or_else(|| SerialError::InvalidFormat {
                tier: "target",
                serial: s.to_string(),
            })?;
        Ok(Self {
            year: caps[1].parse().unwrap(),
            sequence: caps[2].parse().unwrap(),
        })
    }
}

pub fn validate_job_serial(s: &str) -> bool {
    job_re().is_match(s)
}

pub fn validate_execution_serial(s: &str) -> bool {
    execution_re().is_match(s)
}

pub fn validate_branch_serial(s: &str) -> bool {
    branch_re().is_match(s)
}

pub fn validate_target_serial(s: &str) -> bool {
    target_re().is_match(s)
}

/// The tier a serial belongs to, auto-detected from its shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialTier {
    Job,
    Execution,
    Branch,
    Target,
}

impl SerialTier {
    /// Detect the tier of a serial string. Formats are mutually exclusive,
    /// so at most one tier matches.
    pub fn detect(s: &str) -> Option<Self> {
        if validate_job_serial(s) {
            Some(Self::Job)
        } else if validate_execution_serial(s) {
            Some(Self::Execution)
        } else if validate_branch_serial(s) {
            Some(Self::Branch)
        } else if validate_target_serial(s) {
            Some(Self::Target)
        } else {
            None
        }
    }
}

impl fmt::Display for SerialTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerialTier::Job => write!(f, "job"),
            SerialTier::Execution => write!(f, "execution"),
            SerialTier::Branch => write!(f, "branch"),
            SerialTier::Target => write!(f, "target"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_serial_round_trip() {
        let serial = JobSerial {
            year: 2025,
            sequence: 1,
        };
        let text = serial.to_string();
        assert_eq!(text, "J202500001");
        assert_eq!(text.parse::<JobSerial>().unwrap(), serial);
        assert!(validate_job_serial(&text));
    }

    #[test]
    fn test_execution_serial_round_trip() {
        let serial = ExecutionSerial {
            job: JobSerial {
                year: 2025,
                sequence: 1,
            },
            sequence: 1,
        };
        let text = serial.to_string();
        assert_eq!(text, "J202500001.0001");
        assert_eq!(text.parse::<ExecutionSerial>().unwrap(), serial);
    }

    #[test]
    fn test_branch_serial_round_trip() {
        let text = "J202500001.0001.0001";
        let serial: BranchSerial = text.parse().unwrap();
        assert_eq!(serial.execution.job.year, 2025);
        assert_eq!(serial.execution.sequence, 1);
        assert_eq!(serial.sequence, 1);
        assert_eq!(serial.to_string(), text);
    }

    #[test]
    fn test_branch_prefix_is_parent_execution() {
        let branch: BranchSerial = "J202500042.0007.0003".parse().unwrap();
        let execution = branch.execution.to_string();
        assert!(branch.to_string().starts_with(&execution));
        assert!(execution.starts_with(&branch.execution.job.to_string()));
    }

    #[test]
    fn test_invalid_serials_rejected() {
        // Wrong sequence widths.
        assert!(!validate_job_serial("J2025001"));
        assert!(!validate_job_serial("J20250001"));
        assert!(!validate_execution_serial("J202500001.001"));
        assert!(!validate_execution_serial("J202500001.00001"));
        assert!(!validate_branch_serial("J202500001.0001"));
        assert!(!validate_branch_serial("J202500001.0001.001"));
        // Wrong prefix letter.
        assert!(!validate_job_serial("T202500001"));
        assert!(!validate_target_serial("J202500001"));
        // Non-digit garbage.
        assert!(!validate_job_serial("J20250000a"));
        assert!("J2025001".parse::<JobSerial>().is_err());
    }

    #[test]
    fn test_tier_detection() {
        assert_eq!(SerialTier::detect("J202500001"), Some(SerialTier::Job));
        assert_eq!(
            SerialTier::detect("J202500001.0001"),
            Some(SerialTier::Execution)
        );
        assert_eq!(
            SerialTier::detect("J202500001.0001.0001"),
            Some(SerialTier::Branch)
        );
        assert_eq!(SerialTier::detect("T202500001"), Some(SerialTier::Target));
        assert_eq!(SerialTier::detect("X202500001"), None);
        assert_eq!(SerialTier::detect(""), None);
    }
}
