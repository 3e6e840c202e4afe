// Schedule parsing and due-time calculation
//
// Cron expressions are accepted with 5 fields (minute precision, as written
// by operators) or with the 6/7 fields the `cron` crate understands natively.

use crate::errors::ScheduleError;
use crate::models::ScheduleDefinition;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::str::FromStr;

/// Parse and validate a cron expression
///
/// A 5-field expression gets a leading `0` seconds field.
pub fn parse_cron_expression(expression: &str) -> Result<CronSchedule, ScheduleError> {
    let trimmed = expression.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    };

    CronSchedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Parse an IANA timezone name such as `Asia/Kolkata`
pub fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
    Tz::from_str(name).map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))
}

/// First occurrence strictly after `reference`, evaluated in `timezone`
pub fn next_occurrence(
    expression: &str,
    timezone: Tz,
    reference: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    let schedule = parse_cron_expression(expression)?;
    let reference_in_tz = reference.with_timezone(&timezone);

    Ok(schedule
        .after(&reference_in_tz)
        .next()
        .map(|next| next.with_timezone(&Utc)))
}

/// Due-time evaluation for stored schedule definitions
pub trait ScheduleTrigger {
    /// Next occurrence after the last trigger (or after creation when the
    /// schedule never fired)
    fn next_due(&self, default_timezone: Tz) -> Result<Option<DateTime<Utc>>, ScheduleError>;

    /// Whether an occurrence is due at `now`. Several missed occurrences
    /// collapse into one due occurrence.
    fn is_due(&self, now: DateTime<Utc>, default_timezone: Tz) -> Result<bool, ScheduleError> {
        Ok(self
            .next_due(default_timezone)?
            .map(|due| due <= now)
            .unwrap_or(false))
    }
}

impl ScheduleTrigger for ScheduleDefinition {
    fn next_due(&self, default_timezone: Tz) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        let timezone = match self.timezone.as_deref() {
            Some(name) if !name.is_empty() => parse_timezone(name)?,
            _ => default_timezone,
        };
        let reference = self.last_triggered_at.unwrap_or(self.created_at);
        next_occurrence(&self.time, timezone, reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn schedule(time: &str, created_at: DateTime<Utc>) -> ScheduleDefinition {
        ScheduleDefinition {
            id: Uuid::new_v4(),
            proc_name: "backup".to_string(),
            args: BTreeMap::new(),
            time: time.to_string(),
            timezone: None,
            group: "ops".to_string(),
            notify_emails: vec![],
            tags: vec![],
            user_email: "ops@example.com".to_string(),
            enabled: true,
            last_triggered_at: None,
            created_at,
        }
    }

    #[test]
    fn test_parse_six_field_expression() {
        assert!(parse_cron_expression("0 0 12 * * *").is_ok());
    }

    #[test]
    fn test_parse_five_field_expression() {
        assert!(parse_cron_expression("*/5 * * * *").is_ok());
    }

    #[test]
    fn test_parse_invalid_cron_expression() {
        let result = parse_cron_expression("invalid");
        assert!(matches!(
            result,
            Err(ScheduleError::InvalidCronExpression { .. })
        ));
    }

    #[test]
    fn test_parse_timezone() {
        assert_eq!(parse_timezone("UTC").unwrap(), chrono_tz::UTC);
        assert!(parse_timezone("Mars/Olympus").is_err());
    }

    #[test]
    fn test_next_occurrence_every_minute() {
        let reference = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 30).unwrap();
        let next = next_occurrence("* * * * *", chrono_tz::UTC, reference)
            .unwrap()
            .unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 10, 1, 0).unwrap());
    }

    #[test]
    fn test_next_occurrence_respects_timezone() {
        // 09:00 in Kolkata is 03:30 UTC
        let reference = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let next = next_occurrence("0 9 * * *", chrono_tz::Asia::Kolkata, reference)
            .unwrap()
            .unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 3, 30, 0).unwrap());
    }

    #[test]
    fn test_never_triggered_schedule_uses_created_at() {
        let created = Utc::now() - Duration::minutes(5);
        let def = schedule("* * * * *", created);
        assert!(def.is_due(Utc::now(), chrono_tz::UTC).unwrap());
    }

    #[test]
    fn test_recently_triggered_schedule_is_not_due() {
        let mut def = schedule("0 0 * * *", Utc::now() - Duration::days(3));
        def.last_triggered_at = Some(Utc::now());
        assert!(!def.is_due(Utc::now(), chrono_tz::UTC).unwrap());
    }

    #[test]
    fn test_schedule_timezone_overrides_default() {
        let mut def = schedule("* * * * *", Utc::now() - Duration::minutes(2));
        def.timezone = Some("Nowhere/Invalid".to_string());
        assert!(def.next_due(chrono_tz::UTC).is_err());
    }
}
