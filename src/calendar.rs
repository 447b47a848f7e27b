//! Exchange trading calendar
//!
//! Daily loss limits reset on trading-day boundaries, not wall-clock
//! midnights. Weekends and configured holidays are not trading days, so a
//! Friday session runs until the following Monday's first bar.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct TradingCalendar {
    holidays: HashSet<NaiveDate>,
}

impl TradingCalendar {
    pub fn new(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        TradingCalendar {
            holidays: holidays.into_iter().collect(),
        }
    }

    /// Calendar with no holidays; weekends are still excluded.
    pub fn weekdays_only() -> Self {
        TradingCalendar {
            holidays: HashSet::new(),
        }
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    /// The trading day a timestamp belongs to. Bars stamped on a
    /// non-trading day (partial sessions, venue quirks) are attributed to
    /// the most recent prior trading day.
    pub fn trading_day_of(&self, ts: DateTime<Utc>) -> NaiveDate {
        let mut date = ts.date_naive();
        while !self.is_trading_day(date) {
            date -= Duration::days(1);
        }
        date
    }

    /// True when `current` falls on a later trading day than `previous`,
    /// i.e. the daily loss allowance must reset before processing `current`.
    pub fn is_new_trading_day(&self, previous: DateTime<Utc>, current: DateTime<Utc>) -> bool {
        self.trading_day_of(current) > self.trading_day_of(previous)
    }

    /// Next trading day strictly after `date`.
    pub fn next_trading_day(&self, date: NaiveDate) -> NaiveDate {
        let mut d = date + Duration::days(1);
        while !self.is_trading_day(d) {
            d += Duration::days(1);
        }
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn weekends_are_not_trading_days() {
        let cal = TradingCalendar::weekdays_only();
        // 2024-01-06 is a Saturday
        assert!(!cal.is_trading_day(NaiveDate::from_ymd_opt(2024, 1, 6).unwrap()));
        assert!(!cal.is_trading_day(NaiveDate::from_ymd_opt(2024, 1, 7).unwrap()));
        assert!(cal.is_trading_day(NaiveDate::from_ymd_opt(2024, 1, 8).unwrap()));
    }

    #[test]
    fn friday_to_monday_is_one_roll() {
        let cal = TradingCalendar::weekdays_only();
        let friday = ts(2024, 1, 5, 21);
        let monday = ts(2024, 1, 8, 0);
        assert!(cal.is_new_trading_day(friday, monday));
    }

    #[test]
    fn saturday_bars_belong_to_friday() {
        let cal = TradingCalendar::weekdays_only();
        let friday = ts(2024, 1, 5, 21);
        let saturday = ts(2024, 1, 6, 3);
        // A stray weekend bar does not trigger a daily reset
        assert!(!cal.is_new_trading_day(friday, saturday));
        assert_eq!(
            cal.trading_day_of(saturday),
            NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()
        );
    }

    #[test]
    fn holidays_extend_the_session() {
        // Monday 2024-01-08 declared a holiday
        let holiday = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        let cal = TradingCalendar::new([holiday]);

        let friday = ts(2024, 1, 5, 12);
        let monday = ts(2024, 1, 8, 12);
        let tuesday = ts(2024, 1, 9, 0);

        assert!(!cal.is_new_trading_day(friday, monday));
        assert!(cal.is_new_trading_day(friday, tuesday));
        assert_eq!(cal.next_trading_day(friday.date_naive()), tuesday.date_naive());
    }

    #[test]
    fn intraday_bars_share_a_trading_day() {
        let cal = TradingCalendar::weekdays_only();
        let morning = ts(2024, 1, 10, 9);
        let evening = ts(2024, 1, 10, 21);
        assert!(!cal.is_new_trading_day(morning, evening));
    }
}
