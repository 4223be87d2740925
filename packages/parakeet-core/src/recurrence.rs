//! Recurrence rules for repeating reminders.
//!
//! Pure calendar math on naive datetimes; the scheduler owns the clock.

use std::sync::OnceLock;

use chrono::{Datelike, Duration, NaiveDateTime};
use regex::Regex;

fn time_rule_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{1,2}):(\d{2})$").expect("valid regex"))
}

/// Computes the next occurrence of a repeating reminder.
///
/// Supported rules (case-folded and trimmed before matching):
/// - `daily` / `每天`: next day, same time
/// - `weekly` / `每周`: next week
/// - `monthly` / `每月`: +30 days (approximation, accepted as-is)
/// - `weekdays` / `工作日`: next Monday-Friday day
/// - `HH:MM`: same calendar day at that clock time; rolls to the next
///   day when already past
///
/// Returns `None` for anything else; the scheduler logs and does not
/// reschedule.
pub fn next_occurrence(base: NaiveDateTime, rule: &str) -> Option<NaiveDateTime> {
    let rule = rule.trim().to_lowercase();

    match rule.as_str() {
        "daily" | "每天" => return Some(base + Duration::days(1)),
        "weekly" | "每周" => return Some(base + Duration::weeks(1)),
        "monthly" | "每月" => return Some(base + Duration::days(30)),
        "weekdays" | "工作日" => {
            let mut next = base + Duration::days(1);
            while next.weekday().num_days_from_monday() >= 5 {
                next += Duration::days(1);
            }
            return Some(next);
        }
        _ => {}
    }

    if let Some(captures) = time_rule_regex().captures(&rule) {
        let hour: u32 = captures[1].parse().ok()?;
        let minute: u32 = captures[2].parse().ok()?;
        if hour <= 23 && minute <= 59 {
            let mut next = base.date().and_hms_opt(hour, minute, 0)?;
            if next <= base {
                next += Duration::days(1);
            }
            return Some(next);
        }
    }

    log::warn!("[Recurrence] Unsupported rule: {}", rule);
    None
}

/// Extracts a recurrence rule from natural-language text, or `None` for
/// one-shot reminders.
///
/// `每天8点提醒我吃药` → `08:00`, `每天提醒我喝水` → `daily`,
/// `工作日早上提醒我` → `weekdays`.
pub fn parse_recurrence_from_text(text: &str) -> Option<String> {
    static DAILY: OnceLock<Regex> = OnceLock::new();
    static DAILY_TIME: OnceLock<Regex> = OnceLock::new();
    static WEEKLY: OnceLock<Regex> = OnceLock::new();
    static MONTHLY: OnceLock<Regex> = OnceLock::new();
    static WEEKDAYS: OnceLock<Regex> = OnceLock::new();

    let text = text.to_lowercase();

    let daily = DAILY.get_or_init(|| Regex::new(r"每天|每日|daily").expect("valid regex"));
    if daily.is_match(&text) {
        let daily_time = DAILY_TIME
            .get_or_init(|| Regex::new(r"(\d{1,2})\s*[点時时](?:\d{1,2}\s*分)?").expect("valid regex"));
        if let Some(captures) = daily_time.captures(&text) {
            if let Ok(hour) = captures[1].parse::<u32>() {
                if hour <= 23 {
                    return Some(format!("{hour:02}:00"));
                }
            }
        }
        return Some("daily".to_string());
    }

    let weekly = WEEKLY.get_or_init(|| Regex::new(r"每周|每週|每星期|weekly").expect("valid regex"));
    if weekly.is_match(&text) {
        return Some("weekly".to_string());
    }

    let monthly = MONTHLY.get_or_init(|| Regex::new(r"每月|每个月|monthly").expect("valid regex"));
    if monthly.is_match(&text) {
        return Some("monthly".to_string());
    }

    let weekdays = WEEKDAYS.get_or_init(|| Regex::new(r"工作日|weekdays?").expect("valid regex"));
    if weekdays.is_match(&text) {
        return Some("weekdays".to_string());
    }

    None
}
