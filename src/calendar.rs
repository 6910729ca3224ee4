use chrono::{Datelike, NaiveDate, Weekday};

/// Candidate trading days in `[start, end]`, skipping Saturdays and `today`
/// (the current day is not yet final upstream). Empty when `start > end`.
pub fn trading_days(start: NaiveDate, end: NaiveDate, today: NaiveDate) -> Vec<NaiveDate> {
    if start > end {
        return Vec::new();
    }
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| d.weekday() != Weekday::Sat && *d != today)
        .collect()
}

pub fn count_trading_days(start: NaiveDate, end: NaiveDate, today: NaiveDate) -> usize {
    trading_days(start, end, today).len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn week_skips_saturday_and_today() {
        // 2024-03-04 is a Monday; 2024-03-09 is a Saturday.
        let today = d(2024, 3, 6);
        let days = trading_days(d(2024, 3, 4), d(2024, 3, 10), today);
        assert_eq!(
            days,
            vec![d(2024, 3, 4), d(2024, 3, 5), d(2024, 3, 7), d(2024, 3, 8), d(2024, 3, 10)]
        );
        assert_eq!(count_trading_days(d(2024, 3, 4), d(2024, 3, 10), today), 5);
    }

    #[test]
    fn single_day_range_is_inclusive() {
        let day = d(2024, 3, 5);
        assert_eq!(trading_days(day, day, d(2030, 1, 1)), vec![day]);
    }

    #[test]
    fn saturday_only_range_is_empty() {
        let sat = d(2024, 3, 9);
        assert!(trading_days(sat, sat, d(2030, 1, 1)).is_empty());
    }

    fn arb_date() -> impl Strategy<Value = NaiveDate> {
        (0i64..3_000).prop_map(|offset| d(2015, 1, 1) + chrono::Duration::days(offset))
    }

    proptest! {
        #[test]
        fn inverted_range_is_empty(a in arb_date(), b in arb_date(), today in arb_date()) {
            prop_assume!(a > b);
            prop_assert!(trading_days(a, b, today).is_empty());
        }

        #[test]
        fn days_are_increasing_and_exclude_saturday_and_today(
            start in arb_date(),
            len in 0i64..120,
            today in arb_date(),
        ) {
            let end = start + chrono::Duration::days(len);
            let days = trading_days(start, end, today);
            for pair in days.windows(2) {
                prop_assert!(pair[0] < pair[1]);
            }
            for day in &days {
                prop_assert!(day.weekday() != Weekday::Sat);
                prop_assert!(*day != today);
                prop_assert!(*day >= start && *day <= end);
            }
        }
    }
}
