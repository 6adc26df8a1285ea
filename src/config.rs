//! Load configuration.
//!
//! [`LoadOptions`] carries the values the pipeline consumes. How they are discovered (files,
//! environment, CLI flags) is up to the caller; [`LoadOptions::from_json_str`] and
//! [`LoadOptions::from_json_path`] cover the common case of a JSON document.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LoadError, LoadResult};
use crate::observability::Severity;
use crate::types::BatchTag;

/// Largest accepted `batchSize`. One batch is held in memory and sent as one transaction.
pub const MAX_BATCH_SIZE: usize = 100_000;

/// Delay growth between connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetryBackoff {
    /// Same delay before every retry.
    #[default]
    Fixed,
    /// Delay doubles after every failed attempt.
    Exponential,
}

/// Options controlling a load run.
///
/// Use [`Default`] for common cases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct LoadOptions {
    /// Field delimiter (must be ASCII).
    pub delimiter: char,
    /// Whether the first record is a header row.
    pub has_header: bool,
    /// Character encoding label understood by `encoding_rs` (`utf-8`, `windows-1252`, ...).
    pub encoding: String,
    /// Skip rows whose fields are all empty instead of validating them.
    pub skip_blank_lines: bool,
    /// Maximum records per batch.
    pub batch_size: usize,
    /// Per-batch write timeout, in seconds.
    #[serde(alias = "commandTimeout")]
    pub command_timeout_secs: u64,
    /// Per-attempt connection timeout, in seconds.
    #[serde(alias = "connectTimeout")]
    pub connect_timeout_secs: u64,
    /// Retries after the first failed connection attempt.
    pub max_connection_retries: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(alias = "retryDelay")]
    pub retry_delay_ms: u64,
    pub retry_backoff: RetryBackoff,
    /// Apply domain constraints (lengths, ranges). Type parsing always applies.
    pub validate_data: bool,
    /// Batches written concurrently; `1` keeps the pipeline strictly sequential.
    pub max_concurrent_batches: usize,
    /// Compare per-tag row counts in the store against rows reported inserted.
    pub verify_after_load: bool,
    /// Externally supplied batch tag. When `None`, one is derived from the run start time.
    pub batch_tag: Option<BatchTag>,
    /// Severity at which observers receive `on_alert`.
    pub alert_at_or_above: Severity,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            has_header: true,
            encoding: "utf-8".to_string(),
            skip_blank_lines: true,
            batch_size: 1000,
            command_timeout_secs: 30,
            connect_timeout_secs: 15,
            max_connection_retries: 3,
            retry_delay_ms: 1000,
            retry_backoff: RetryBackoff::Fixed,
            validate_data: true,
            max_concurrent_batches: 1,
            verify_after_load: false,
            batch_tag: None,
            alert_at_or_above: Severity::Critical,
        }
    }
}

impl LoadOptions {
    /// Parse options from a JSON document. Missing keys take their defaults.
    pub fn from_json_str(json: &str) -> LoadResult<Self> {
        let opts: Self =
            serde_json::from_str(json).map_err(|e| LoadError::config(format!("invalid options json: {e}")))?;
        opts.validate()?;
        Ok(opts)
    }

    /// Read and parse a JSON options file.
    pub fn from_json_path(path: impl AsRef<Path>) -> LoadResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Check option values that cannot be expressed in the type system.
    pub fn validate(&self) -> LoadResult<()> {
        if self.batch_size == 0 {
            return Err(LoadError::config("batchSize must be > 0"));
        }
        if self.batch_size > MAX_BATCH_SIZE {
            return Err(LoadError::config(format!(
                "batchSize must be <= {MAX_BATCH_SIZE}, got {}",
                self.batch_size
            )));
        }
        if self.max_concurrent_batches == 0 {
            return Err(LoadError::config("maxConcurrentBatches must be > 0"));
        }
        if !self.delimiter.is_ascii() {
            return Err(LoadError::config(format!(
                "delimiter must be a single ASCII character, got {:?}",
                self.delimiter
            )));
        }
        if matches!(self.delimiter, '"' | '\n' | '\r') {
            return Err(LoadError::config(format!("delimiter {:?} is not allowed", self.delimiter)));
        }
        if encoding_rs::Encoding::for_label(self.encoding.trim().as_bytes()).is_none() {
            return Err(LoadError::config(format!("unknown encoding '{}'", self.encoding)));
        }
        Ok(())
    }

    pub fn delimiter_byte(&self) -> u8 {
        // validate() guarantees ASCII.
        self.delimiter as u8
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let opts = LoadOptions::default();
        opts.validate().unwrap();
        assert_eq!(opts.batch_size, 1000);
        assert_eq!(opts.delimiter_byte(), b',');
        assert_eq!(opts.max_concurrent_batches, 1);
    }

    #[test]
    fn json_accepts_documented_key_names() {
        let opts = LoadOptions::from_json_str(
            r#"{
                "delimiter": "|",
                "hasHeader": false,
                "encoding": "windows-1252",
                "batchSize": 250,
                "commandTimeout": 5,
                "maxConnectionRetries": 7,
                "retryDelay": 20,
                "retryBackoff": "exponential",
                "validateData": false,
                "batchTag": "NIGHTLY_01"
            }"#,
        )
        .unwrap();

        assert_eq!(opts.delimiter, '|');
        assert!(!opts.has_header);
        assert_eq!(opts.batch_size, 250);
        assert_eq!(opts.command_timeout(), Duration::from_secs(5));
        assert_eq!(opts.max_connection_retries, 7);
        assert_eq!(opts.retry_delay(), Duration::from_millis(20));
        assert_eq!(opts.retry_backoff, RetryBackoff::Exponential);
        assert!(!opts.validate_data);
        assert_eq!(opts.batch_tag, Some(BatchTag::new("NIGHTLY_01")));
        assert!(opts.skip_blank_lines);
    }

    #[test]
    fn rejects_zero_batch_size() {
        let err = LoadOptions::from_json_str(r#"{"batchSize": 0}"#).unwrap_err();
        assert!(err.to_string().contains("batchSize must be > 0"));
    }

    #[test]
    fn rejects_oversized_batch_size() {
        opts_with_batch(MAX_BATCH_SIZE).validate().unwrap();
        for size in [MAX_BATCH_SIZE + 1, 10_000_000_000, usize::MAX / 2] {
            let err = opts_with_batch(size).validate().unwrap_err();
            assert!(err.to_string().contains("batchSize must be <= 100000"), "{err}");
        }
    }

    fn opts_with_batch(batch_size: usize) -> LoadOptions {
        LoadOptions {
            batch_size,
            ..Default::default()
        }
    }

    #[test]
    fn rejects_unknown_encoding_and_delimiter() {
        let opts = LoadOptions {
            encoding: "klingon-8".to_string(),
            ..Default::default()
        };
        assert!(opts.validate().unwrap_err().to_string().contains("unknown encoding"));

        let opts = LoadOptions {
            delimiter: '§',
            ..Default::default()
        };
        assert!(opts.validate().unwrap_err().to_string().contains("ASCII"));
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(LoadOptions::from_json_str(r#"{"batchsize": 10}"#).is_err());
    }
}
