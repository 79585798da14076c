//! Schedule parsing and tick computation for `schedule` triggers.
//!
//! Schedules are evaluated by a polling loop rather than in-process timers,
//! so a restart never loses a trigger. Each poll asks "which cron occurrences
//! fell inside `(previous_poll, now]`" and dispatches one tick per occurrence.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use opsflow_types::workflow::WorkflowDefinition;

use super::graph::TRIGGER_NODE;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("workflow has no schedule configured")]
    Missing,
}

// ---------------------------------------------------------------------------
// Schedule forms
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalUnit {
    Second,
    Minute,
    Hour,
}

/// A trigger node's `schedule` config, parsed.
///
/// Accepted text (case-insensitive for the human forms):
/// `every N seconds|minutes|hours`, `every minute`, `every hour`, `hourly`,
/// `every day`, `daily`, `every day at HH:MM`, or a 5/6-field cron
/// expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleSpec {
    /// Cron with a leading seconds field.
    Cron(String),
    Every { count: u32, unit: IntervalUnit },
    DailyAt { hour: u32, minute: u32 },
}

impl FromStr for ScheduleSpec {
    type Err = ScheduleError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let text = input.trim();
        let lower = text.to_ascii_lowercase();

        match lower.as_str() {
            "every minute" | "minutely" => return Ok(Self::every(1, IntervalUnit::Minute)),
            "every hour" | "hourly" => return Ok(Self::every(1, IntervalUnit::Hour)),
            "every day" | "daily" => return Ok(Self::DailyAt { hour: 0, minute: 0 }),
            _ => {}
        }

        if let Some(rest) = lower.strip_prefix("every ") {
            return parse_every(rest)
                .ok_or_else(|| ScheduleError::InvalidSchedule(text.to_string()));
        }

        match text.split_whitespace().count() {
            5 => Ok(Self::Cron(format!("0 {text}"))),
            6 => Ok(Self::Cron(text.to_string())),
            _ => Err(ScheduleError::InvalidSchedule(format!(
                "unrecognized schedule format: '{text}'"
            ))),
        }
    }
}

impl ScheduleSpec {
    fn every(count: u32, unit: IntervalUnit) -> Self {
        Self::Every { count, unit }
    }

    /// Six-field cron expression for this schedule.
    pub fn cron_expression(&self) -> String {
        match self {
            Self::Cron(expr) => expr.clone(),
            Self::Every { count, unit } => {
                let step = if *count == 1 {
                    "*".to_string()
                } else {
                    format!("*/{count}")
                };
                match unit {
                    IntervalUnit::Second => format!("{step} * * * * *"),
                    IntervalUnit::Minute => format!("0 {step} * * * *"),
                    IntervalUnit::Hour => format!("0 0 {step} * * *"),
                }
            }
            Self::DailyAt { hour, minute } => format!("0 {minute} {hour} * * *"),
        }
    }
}

/// `N seconds|minutes|hours` or `day at HH:MM`, after the leading `every `.
fn parse_every(rest: &str) -> Option<ScheduleSpec> {
    if let Some(clock) = rest.strip_prefix("day at ") {
        let (hour, minute) = clock.trim().split_once(':')?;
        let hour = hour.trim().parse::<u32>().ok().filter(|h| *h < 24)?;
        let minute = minute.trim().parse::<u32>().ok().filter(|m| *m < 60)?;
        return Some(ScheduleSpec::DailyAt { hour, minute });
    }

    let mut words = rest.split_whitespace();
    let (Some(count), Some(unit), None) = (words.next(), words.next(), words.next()) else {
        return None;
    };
    let count = count.parse::<u32>().ok().filter(|n| *n > 0)?;
    let unit = match unit.trim_end_matches('s') {
        "second" => IntervalUnit::Second,
        "minute" => IntervalUnit::Minute,
        "hour" => IntervalUnit::Hour,
        _ => return None,
    };
    Some(ScheduleSpec::every(count, unit))
}

/// Parse a schedule (human or cron) into a croner pattern.
pub fn parse_schedule(input: &str) -> Result<croner::Cron, ScheduleError> {
    let expr = input.parse::<ScheduleSpec>()?.cron_expression();
    expr.parse::<croner::Cron>()
        .map_err(|e| ScheduleError::InvalidSchedule(format!("{input}: {e}")))
}

// ---------------------------------------------------------------------------
// Workflow schedule lookup
// ---------------------------------------------------------------------------

/// The schedule string of a workflow: the `schedule` config key of its
/// first `trigger` node.
pub fn schedule_of(def: &WorkflowDefinition) -> Option<(&str, &str)> {
    def.nodes
        .iter()
        .filter(|n| n.node_type == TRIGGER_NODE)
        .find_map(|n| n.config_str("schedule").map(|s| (n.id.as_str(), s)))
}

/// Occurrences of `schedule` strictly after `after` and at or before `until`.
///
/// Bounded so a long outage cannot flood the dispatcher with catch-up ticks.
pub fn due_ticks(
    schedule: &str,
    after: DateTime<Utc>,
    until: DateTime<Utc>,
    max_ticks: usize,
) -> Result<Vec<DateTime<Utc>>, ScheduleError> {
    let cron = parse_schedule(schedule)?;
    let mut ticks = Vec::new();
    for next in cron.iter_after(after) {
        if next > until || ticks.len() >= max_ticks {
            break;
        }
        ticks.push(next);
    }
    Ok(ticks)
}

/// Event id for a schedule tick. Stable across pollers, so two pollers
/// seeing the same tick produce the same idempotency key.
pub fn tick_event_id(workflow_id: &uuid::Uuid, tick: DateTime<Utc>) -> String {
    format!(
        "schedule:{workflow_id}:{}",
        tick.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cron_of(text: &str) -> String {
        text.parse::<ScheduleSpec>().unwrap().cron_expression()
    }

    #[test]
    fn human_forms_parse_to_specs() {
        assert_eq!(
            "every 5 minutes".parse::<ScheduleSpec>().unwrap(),
            ScheduleSpec::Every {
                count: 5,
                unit: IntervalUnit::Minute
            }
        );
        assert_eq!(
            "Every Day At 09:30".parse::<ScheduleSpec>().unwrap(),
            ScheduleSpec::DailyAt { hour: 9, minute: 30 }
        );
        assert_eq!(
            "daily".parse::<ScheduleSpec>().unwrap(),
            ScheduleSpec::DailyAt { hour: 0, minute: 0 }
        );
    }

    #[test]
    fn specs_render_as_six_field_cron() {
        assert_eq!(cron_of("every 5 minutes"), "0 */5 * * * *");
        assert_eq!(cron_of("every 30 seconds"), "*/30 * * * * *");
        assert_eq!(cron_of("every 2 hours"), "0 0 */2 * * *");
        assert_eq!(cron_of("every minute"), "0 * * * * *");
        assert_eq!(cron_of("Hourly"), "0 0 * * * *");
        assert_eq!(cron_of("every day at 09:30"), "0 30 9 * * *");
    }

    #[test]
    fn cron_expressions_gain_seconds_field() {
        assert_eq!(cron_of("*/15 * * * *"), "0 */15 * * * *");
        assert_eq!(cron_of("0 0 12 * * MON"), "0 0 12 * * MON");
        assert!(parse_schedule("0 0 12 * * *").is_ok());
    }

    #[test]
    fn rejects_garbage() {
        for text in [
            "whenever",
            "every 0 minutes",
            "every day at 25:00",
            "every day at noon",
            "every 3 fortnights",
            "every 5 minutes please",
        ] {
            assert!(text.parse::<ScheduleSpec>().is_err(), "{text}");
        }
    }

    #[test]
    fn due_ticks_are_half_open_window() {
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2026, 1, 1, 10, 15, 0).unwrap();
        let ticks = due_ticks("every 5 minutes", after, until, 100).unwrap();
        assert_eq!(
            ticks,
            vec![
                Utc.with_ymd_and_hms(2026, 1, 1, 10, 5, 0).unwrap(),
                Utc.with_ymd_and_hms(2026, 1, 1, 10, 10, 0).unwrap(),
                Utc.with_ymd_and_hms(2026, 1, 1, 10, 15, 0).unwrap(),
            ]
        );
    }

    #[test]
    fn due_ticks_are_capped() {
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        let ticks = due_ticks("every minute", after, until, 10).unwrap();
        assert_eq!(ticks.len(), 10);
    }

    #[test]
    fn tick_event_id_is_stable() {
        let id = uuid::Uuid::now_v7();
        let tick = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        assert_eq!(tick_event_id(&id, tick), tick_event_id(&id, tick));
        assert!(tick_event_id(&id, tick).ends_with("2026-03-01T08:00:00Z"));
    }
}
