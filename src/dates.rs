use chrono::{
    DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc,
};
use chrono_tz::Tz;

/// Wall clock in the program's configured time zone. Offsets follow the
/// zone's daylight-saving rules for each instant.
#[derive(Debug, Clone)]
pub struct Clock {
    zone: Tz,
    frozen: Option<DateTime<Utc>>,
}

impl Clock {
    pub fn system(zone: Tz) -> Self {
        Self { zone, frozen: None }
    }

    /// A clock that always reports `at`, in `at`'s zone.
    #[cfg(test)]
    pub fn frozen(at: DateTime<Tz>) -> Self {
        Self {
            zone: at.timezone(),
            frozen: Some(at.with_timezone(&Utc)),
        }
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        let instant = self.frozen.unwrap_or_else(Utc::now);
        instant.with_timezone(&self.zone).fixed_offset()
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    /// Current instant formatted the way cells store timestamps.
    pub fn stamp(&self) -> String {
        self.now().to_rfc3339_opts(SecondsFormat::Secs, false)
    }

    /// Parse a cell as an instant, interpreting naive values as zone-local time.
    pub fn timestamp(&self, raw: &str) -> Option<DateTime<FixedOffset>> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&self.zone).fixed_offset());
        }
        for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%m/%d/%Y %H:%M:%S"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
                return self
                    .zone
                    .from_local_datetime(&naive)
                    .earliest()
                    .map(|local| local.fixed_offset());
            }
        }
        None
    }

    /// Calendar day a cell refers to in the configured zone.
    pub fn calendar_day(&self, raw: &str) -> Option<NaiveDate> {
        match self.timestamp(raw) {
            Some(instant) => Some(instant.date_naive()),
            None => parse_loose_date(raw),
        }
    }

    /// Day named by caller input, or today when the input is blank or unparseable.
    pub fn day_or_today(&self, raw: Option<&str>) -> NaiveDate {
        raw.and_then(|value| self.calendar_day(value))
            .unwrap_or_else(|| self.today())
    }
}

/// Accepts `yyyy-MM-dd`, `M/d/yyyy`, a spreadsheet day serial, or any string
/// whose first ten characters are an ISO date.
pub fn parse_loose_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%m/%d/%Y") {
        return Some(date);
    }
    if let Ok(serial) = raw.parse::<f64>() {
        if serial.is_finite() && serial > 0.0 {
            let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
            return epoch.checked_add_signed(Duration::days(serial.trunc() as i64));
        }
        return None;
    }
    raw.get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}

pub fn ymd(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use chrono_tz::America::Chicago;

    use super::*;

    #[test]
    fn loose_dates_accept_common_spellings() {
        let expected = NaiveDate::from_ymd_opt(2025, 3, 1);
        assert_eq!(parse_loose_date("2025-03-01"), expected);
        assert_eq!(parse_loose_date("3/1/2025"), expected);
        assert_eq!(parse_loose_date("03/01/2025"), expected);
        assert_eq!(parse_loose_date("45717"), expected);
        assert_eq!(parse_loose_date("2025-03-01 extra"), expected);
        assert_eq!(parse_loose_date(""), None);
        assert_eq!(parse_loose_date("soon"), None);
    }

    #[test]
    fn calendar_day_uses_configured_zone() {
        let clock = Clock::system(Chicago);
        // 02:30 UTC on March 2nd is still March 1st in Chicago
        assert_eq!(
            clock.calendar_day("2025-03-02T02:30:00Z"),
            NaiveDate::from_ymd_opt(2025, 3, 1)
        );
        assert_eq!(
            clock.calendar_day("2025-03-01 18:00:00"),
            NaiveDate::from_ymd_opt(2025, 3, 1)
        );
    }

    #[test]
    fn summer_instants_follow_daylight_time() {
        let clock = Clock::system(Chicago);
        // 05:30 UTC is 00:30 CDT, already the next day
        assert_eq!(
            clock.calendar_day("2025-07-15T05:30:00Z"),
            NaiveDate::from_ymd_opt(2025, 7, 15)
        );
        assert_eq!(
            clock.calendar_day("2025-07-15T04:30:00Z"),
            NaiveDate::from_ymd_opt(2025, 7, 14)
        );
        assert_eq!(
            clock.timestamp("2025-07-14 23:30:00").unwrap().to_rfc3339(),
            "2025-07-14T23:30:00-05:00"
        );
    }

    #[test]
    fn frozen_clock_stamps_with_the_zone_offset_of_the_day() {
        let winter = Clock::frozen(Chicago.with_ymd_and_hms(2025, 3, 1, 9, 15, 0).unwrap());
        assert_eq!(winter.stamp(), "2025-03-01T09:15:00-06:00");
        assert_eq!(winter.today(), NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        assert_eq!(winter.day_or_today(None), winter.today());
        assert_eq!(winter.day_or_today(Some("nonsense")), winter.today());

        let summer = Clock::frozen(Chicago.with_ymd_and_hms(2025, 7, 15, 0, 30, 0).unwrap());
        assert_eq!(summer.stamp(), "2025-07-15T00:30:00-05:00");
        assert_eq!(summer.today(), NaiveDate::from_ymd_opt(2025, 7, 15).unwrap());
    }
}
