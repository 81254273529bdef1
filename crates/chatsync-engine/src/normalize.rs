//! Parsing of the client's localized time labels.
//!
//! The remote client renders wall-clock times in the account's timezone at
//! minute resolution. Everything here converts to UTC with `chrono-tz`.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use regex::Regex;

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(\d{1,2}):(\d{2}), (\d{1,2})/(\d{1,2})/(\d{4})\] (.*?):\s*$").expect("valid regex")
});

static CLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2}):(\d{2})$").expect("valid regex"));

static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})$").expect("valid regex"));

/// Parse a record header such as `[17:32, 05/03/2024] Alice: ` into the UTC
/// instant and the sender name.
///
/// Returns `None` when the header does not have that shape or names a local
/// time that does not exist (DST gap). Ambiguous local times resolve to the
/// earlier instant.
pub fn parse_message_header(header: &str, tz: Tz) -> Option<(DateTime<Utc>, String)> {
    let caps = HEADER_RE.captures(header.trim_start())?;

    let hour: u32 = caps[1].parse().ok()?;
    let minute: u32 = caps[2].parse().ok()?;
    let day: u32 = caps[3].parse().ok()?;
    let month: u32 = caps[4].parse().ok()?;
    let year: i32 = caps[5].parse().ok()?;

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    let local = tz.from_local_datetime(&NaiveDateTime::new(date, time)).earliest()?;

    let sender = caps[6].trim();
    if sender.is_empty() {
        return None;
    }
    Some((local.with_timezone(&Utc), sender.to_string()))
}

/// The latest instant a conversation-list activity label can stand for.
///
/// * `HH:MM` is today at that minute.
/// * `Yesterday` / `Ontem`, a weekday name, or `dd/mm/yyyy` is 23:59 local
///   on that day. A weekday name is the most recent past day with that
///   name, a full week back when it names today.
///
/// Anything else yields `None`, which callers treat as "might be new".
pub fn latest_activity_instant(label: &str, now: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
    let label = label.trim().to_lowercase();
    let today = now.with_timezone(&tz).date_naive();

    if let Some(caps) = CLOCK_RE.captures(&label) {
        let time = NaiveTime::from_hms_opt(caps[1].parse().ok()?, caps[2].parse().ok()?, 0)?;
        return to_utc(today.and_time(time), tz);
    }

    let day = if label == "yesterday" || label == "ontem" {
        today.checked_sub_days(Days::new(1))?
    } else if let Some(weekday) = parse_weekday(&label) {
        let back = (today.weekday().num_days_from_monday() + 7 - weekday.num_days_from_monday()) % 7;
        let back = if back == 0 { 7 } else { back };
        today.checked_sub_days(Days::new(u64::from(back)))?
    } else if let Some(caps) = DATE_RE.captures(&label) {
        NaiveDate::from_ymd_opt(caps[3].parse().ok()?, caps[2].parse().ok()?, caps[1].parse().ok()?)?
    } else {
        return None;
    };

    to_utc(day.and_time(NaiveTime::from_hms_opt(23, 59, 0)?), tz)
}

fn to_utc(local: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&local)
        .latest()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_weekday(label: &str) -> Option<Weekday> {
    let name = label.strip_suffix("-feira").unwrap_or(label);
    let weekday = match name {
        "monday" | "segunda" => Weekday::Mon,
        "tuesday" | "terça" | "terca" => Weekday::Tue,
        "wednesday" | "quarta" => Weekday::Wed,
        "thursday" | "quinta" => Weekday::Thu,
        "friday" | "sexta" => Weekday::Fri,
        "saturday" | "sábado" | "sabado" => Weekday::Sat,
        "sunday" | "domingo" => Weekday::Sun,
        _ => return None,
    };
    Some(weekday)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::Sao_Paulo;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn header_is_converted_to_utc() {
        let (ts, sender) = parse_message_header("[14:32, 05/03/2024] Alice: ", Sao_Paulo).unwrap();
        // Sao Paulo is UTC-3 with no DST since 2019
        assert_eq!(ts, utc(2024, 3, 5, 17, 32));
        assert_eq!(sender, "Alice");
    }

    #[test]
    fn header_keeps_colons_inside_sender() {
        let (_, sender) = parse_message_header("[9:05, 1/2/2024] Loja: Vendas: ", Sao_Paulo).unwrap();
        assert_eq!(sender, "Loja: Vendas");
    }

    #[test]
    fn malformed_headers_are_rejected() {
        assert!(parse_message_header("14:32 Alice:", Sao_Paulo).is_none());
        assert!(parse_message_header("[25:00, 05/03/2024] Alice: ", Sao_Paulo).is_none());
        assert!(parse_message_header("[10:00, 31/02/2024] Alice: ", Sao_Paulo).is_none());
        assert!(parse_message_header("[10:00, 01/02/2024] : ", Sao_Paulo).is_none());
    }

    #[test]
    fn clock_label_is_today() {
        // 2024-03-07 15:00 local
        let now = utc(2024, 3, 7, 18, 0);
        assert_eq!(latest_activity_instant("09:15", now, Sao_Paulo), Some(utc(2024, 3, 7, 12, 15)));
    }

    #[test]
    fn day_labels_end_at_the_last_minute() {
        // Thursday 2024-03-07, local
        let now = utc(2024, 3, 7, 18, 0);
        let end_of = |d: u32| utc(2024, 3, d + 1, 2, 59);

        assert_eq!(latest_activity_instant("Yesterday", now, Sao_Paulo), Some(end_of(6)));
        assert_eq!(latest_activity_instant("Ontem", now, Sao_Paulo), Some(end_of(6)));
        assert_eq!(latest_activity_instant("Monday", now, Sao_Paulo), Some(end_of(4)));
        assert_eq!(latest_activity_instant("segunda-feira", now, Sao_Paulo), Some(end_of(4)));
        assert_eq!(latest_activity_instant("Thursday", now, Sao_Paulo), Some(utc(2024, 3, 1, 2, 59)));
        assert_eq!(latest_activity_instant("02/03/2024", now, Sao_Paulo), Some(end_of(2)));
    }

    #[test]
    fn unknown_labels_are_none() {
        let now = utc(2024, 3, 7, 18, 0);
        assert_eq!(latest_activity_instant("typing…", now, Sao_Paulo), None);
        assert_eq!(latest_activity_instant("", now, Sao_Paulo), None);
    }
}
