//! Session configuration.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::batcher::BatchConfig;
use crate::domain::{EvalError, Result};
use crate::grader::GradeOptions;
use crate::reporting::{default_output_dir, SessionFlags};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Everything an evaluation session needs besides the model client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Root holding `traj<id>/metainfo.json` and `answer.json`.
    pub textdata_root: PathBuf,
    /// Root holding `place<id>/id_<pano>_<heading>.jpg`.
    pub googledata_root: PathBuf,
    pub output_dir: PathBuf,
    pub model: String,
    pub resume: bool,
    pub use_augmentation: bool,
    pub include_thought: bool,
    pub use_batch: bool,
    pub batch_size: usize,
    pub request_delay_ms: u64,
    pub max_attempts: u32,
    pub visualize: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub augmentation_seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            textdata_root: PathBuf::from("textdata"),
            googledata_root: PathBuf::from("googledata"),
            output_dir: default_output_dir(DEFAULT_MODEL, Utc::now()),
            model: DEFAULT_MODEL.to_string(),
            resume: true,
            use_augmentation: false,
            include_thought: false,
            use_batch: true,
            batch_size: 10,
            request_delay_ms: 1000,
            max_attempts: 5,
            visualize: false,
            augmentation_seed: None,
        }
    }
}

impl SessionConfig {
    /// Reject configurations that cannot run a live session. Every error
    /// here is fatal.
    pub fn validate(&self) -> Result<()> {
        self.validate_with(true)
    }

    /// Like [`validate`](Self::validate) for sessions fed from a results
    /// file. The image root is only required when cards are rendered.
    pub fn validate_offline(&self) -> Result<()> {
        self.validate_with(self.visualize)
    }

    fn validate_with(&self, needs_images: bool) -> Result<()> {
        if !self.textdata_root.is_dir() {
            return Err(EvalError::Config(format!(
                "textdata root {:?} is not a directory",
                self.textdata_root
            )));
        }
        if needs_images && !self.googledata_root.is_dir() {
            return Err(EvalError::Config(format!(
                "googledata root {:?} is not a directory",
                self.googledata_root
            )));
        }
        if self.model.trim().is_empty() {
            return Err(EvalError::Config("model name is empty".into()));
        }
        if self.batch_size == 0 {
            return Err(EvalError::Config("batch size must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(EvalError::Config("max attempts must be at least 1".into()));
        }
        Ok(())
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn grade_options(&self) -> GradeOptions {
        GradeOptions {
            model: self.model.clone(),
            include_thought: self.include_thought,
            use_augmentation: self.use_augmentation,
            max_attempts: self.max_attempts,
            request_delay: self.request_delay(),
        }
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            batch_size: self.batch_size,
            request_delay: self.request_delay(),
            use_batch: self.use_batch,
        }
    }

    pub fn flags(&self) -> SessionFlags {
        SessionFlags {
            resume: self.resume,
            augmentation: self.use_augmentation,
            include_thought: self.include_thought,
            use_batch: self.use_batch,
            batch_size: self.batch_config().effective_batch_size(),
            request_delay_ms: self.request_delay_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid(dir: &std::path::Path) -> SessionConfig {
        SessionConfig {
            textdata_root: dir.to_path_buf(),
            googledata_root: dir.to_path_buf(),
            output_dir: dir.join("out"),
            ..SessionConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.model, DEFAULT_MODEL);
        assert!(cfg.resume);
        assert!(cfg.output_dir.starts_with("eval"));
    }

    #[test]
    fn test_validate_accepts_existing_roots() {
        let dir = tempfile::tempdir().unwrap();
        valid(dir.path()).validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let dir = tempfile::tempdir().unwrap();
        let cases = [
            SessionConfig {
                textdata_root: dir.path().join("missing"),
                ..valid(dir.path())
            },
            SessionConfig {
                googledata_root: dir.path().join("missing"),
                ..valid(dir.path())
            },
            SessionConfig {
                model: "  ".into(),
                ..valid(dir.path())
            },
            SessionConfig {
                batch_size: 0,
                ..valid(dir.path())
            },
            SessionConfig {
                max_attempts: 0,
                ..valid(dir.path())
            },
        ];
        for cfg in cases {
            assert!(cfg.validate().unwrap_err().is_fatal());
        }
    }

    #[test]
    fn test_offline_validation_only_needs_images_for_cards() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = SessionConfig {
            googledata_root: dir.path().join("missing"),
            ..valid(dir.path())
        };
        cfg.validate_offline().unwrap();
        assert!(cfg.validate().unwrap_err().is_fatal());

        let cfg = SessionConfig {
            visualize: true,
            ..cfg
        };
        assert!(cfg.validate_offline().unwrap_err().is_fatal());
    }

    #[test]
    fn test_disabled_batching_is_sequential() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = SessionConfig {
            use_batch: false,
            batch_size: 8,
            ..valid(dir.path())
        };
        assert_eq!(cfg.batch_config().effective_batch_size(), 1);
        assert_eq!(cfg.flags().batch_size, 1);
    }
}
