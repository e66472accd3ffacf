//! Cron expression checks.
//!
//! Plugins write standard five-field expressions (`min hour dom mon dow`);
//! the scheduler wants a leading seconds field. Expressions are normalised
//! and then parsed by the scheduler itself so a malformed one is rejected at
//! registration rather than at its first firing.

use std::fmt;

use tokio_cron_scheduler::Job;

use plexus_core::error::AppError;
use plexus_core::result::AppResult;

/// A validated cron expression in six- or seven-field form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    raw: String,
    normalized: String,
}

impl CronExpression {
    /// Normalise and validate `raw`.
    pub fn parse(raw: &str) -> AppResult<Self> {
        let fields: Vec<&str> = raw.split_whitespace().collect();
        let normalized = match fields.len() {
            5 => format!("0 {}", fields.join(" ")),
            6 | 7 => fields.join(" "),
            n => {
                return Err(AppError::validation(format!(
                    "invalid cron expression '{raw}': expected 5 to 7 fields, found {n}"
                )));
            }
        };

        Job::new_async(normalized.as_str(), |_uuid, _lock| Box::pin(async {})).map_err(|e| {
            AppError::validation(format!("invalid cron expression '{raw}': {e}"))
        })?;

        Ok(Self {
            raw: raw.trim().to_string(),
            normalized,
        })
    }

    /// The expression as the plugin wrote it.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The expression handed to the scheduler.
    pub fn normalized(&self) -> &str {
        &self.normalized
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexus_core::error::ErrorKind;

    #[tokio::test]
    async fn test_five_fields_gain_seconds() {
        let expr = CronExpression::parse("0 2 * * *").unwrap();
        assert_eq!(expr.normalized(), "0 0 2 * * *");
        assert_eq!(expr.as_str(), "0 2 * * *");
    }

    #[tokio::test]
    async fn test_six_fields_kept() {
        let expr = CronExpression::parse("*/15 * * * * *").unwrap();
        assert_eq!(expr.normalized(), "*/15 * * * * *");
    }

    #[tokio::test]
    async fn test_wrong_field_count_rejected() {
        let err = CronExpression::parse("* * *").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.message.contains("* * *"));
    }

    #[tokio::test]
    async fn test_garbage_rejected() {
        let err = CronExpression::parse("61 25 * * *").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);

        assert!(CronExpression::parse("every day at noon").is_err());
    }
}
