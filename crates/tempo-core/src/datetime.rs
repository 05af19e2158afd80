use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  Utc,
  Weekday
};
use regex::Regex;

#[must_use]
pub fn at_utc(
  date: NaiveDate,
  time: NaiveTime
) -> DateTime<Utc> {
  date.and_time(time).and_utc()
}

#[must_use]
pub fn start_of_day(
  dt: DateTime<Utc>
) -> DateTime<Utc> {
  at_utc(dt.date_naive(), NaiveTime::MIN)
}

/// Last representable millisecond of
/// `date` in UTC.
#[must_use]
pub fn end_of_day(
  date: NaiveDate
) -> NaiveDateTime {
  let last = NaiveTime::from_hms_milli_opt(
    23, 59, 59, 999
  )
  .unwrap_or(NaiveTime::MIN);
  date.and_time(last)
}

#[must_use]
pub fn format_date(
  date: NaiveDate
) -> String {
  date.format("%Y-%m-%d").to_string()
}

#[must_use]
pub fn days_in_month(
  year: i32,
  month: u32
) -> u32 {
  let (next_year, next_month) =
    if month >= 12 {
      (year.saturating_add(1), 1_u32)
    } else {
      (year, month + 1)
    };
  NaiveDate::from_ymd_opt(
    next_year, next_month, 1
  )
  .and_then(|first| first.pred_opt())
  .map(|last| last.day())
  .unwrap_or(28)
}

/// Shifts `date` by `months`, clamping the
/// day to the last valid day of the target
/// month. Always computed from `date`, so a
/// 31st anchor returns to the 31st whenever
/// the target month allows it.
#[must_use]
pub fn add_months_clamped(
  date: NaiveDate,
  months: i64
) -> Option<NaiveDate> {
  let total = i64::from(date.year())
    * 12
    + i64::from(date.month0())
    + months;
  let year =
    i32::try_from(total.div_euclid(12))
      .ok()?;
  let month =
    u32::try_from(total.rem_euclid(12))
      .ok()?
      + 1;
  let day = date
    .day()
    .min(days_in_month(year, month));
  NaiveDate::from_ymd_opt(
    year, month, day
  )
}

#[must_use]
pub fn add_years_clamped(
  date: NaiveDate,
  years: i64
) -> Option<NaiveDate> {
  add_months_clamped(
    date,
    years.checked_mul(12)?
  )
}

/// Whole calendar months between the
/// month of `start` and the month of
/// `end`, ignoring days.
#[must_use]
pub fn months_between(
  start: NaiveDate,
  end: NaiveDate
) -> i64 {
  (i64::from(end.year())
    - i64::from(start.year()))
    * 12
    + (i64::from(end.month())
      - i64::from(start.month()))
}

/// Sunday that starts the week holding
/// `date`.
#[must_use]
pub fn week_start_sunday(
  date: NaiveDate
) -> NaiveDate {
  let back = i64::from(
    date.weekday().num_days_from_sunday()
  );
  date
    .checked_sub_signed(Duration::days(
      back
    ))
    .unwrap_or(date)
}

/// Parses a user supplied date expression
/// relative to `now`. All calendar
/// interpretation happens in UTC.
#[tracing::instrument(skip(now), fields(input = input))]
pub fn parse_date_expr(
  input: &str,
  now: DateTime<Utc>
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();
  let today = start_of_day(now);

  match lower.as_str() {
    | "now" => return Ok(now),
    | "today" => return Ok(today),
    | "tomorrow" => {
      return Ok(
        today + Duration::days(1)
      );
    }
    | "yesterday" => {
      return Ok(
        today - Duration::days(1)
      );
    }
    | _ => {}
  }

  if let Some(target) =
    parse_weekday_name(&lower)
  {
    let date = next_weekday_date(
      now.date_naive(),
      target
    );
    return Ok(at_utc(
      date,
      NaiveTime::MIN
    ));
  }

  if let Some(caps) =
    relative_offset_re()?.captures(token)
  {
    let num: i64 = caps["num"]
      .parse()
      .context(
        "invalid relative number"
      )?;
    let duration = match &caps["unit"]
    {
      | "d" => Duration::days(num),
      | "h" => Duration::hours(num),
      | _ => Duration::minutes(num)
    };
    return Ok(
      if &caps["sign"] == "-" {
        now - duration
      } else {
        now + duration
      }
    );
  }

  parse_instant(token)
    .map(|(instant, _)| instant)
    .ok_or_else(|| {
      anyhow!(
        "unrecognized date \
         expression: {input}"
      )
    })
    .with_context(|| {
      "supported formats: \
       now/today/tomorrow/yesterday, \
       weekday names (e.g. monday), \
       +Nd/+Nh/+Nm, RFC3339, \
       YYYY-MM-DD, YYYY-MM-DDTHH:MM, \
       YYYY-MM-DD HH:MM"
    })
}

/// Parses a stored instant string. The
/// flag is `true` when the input carried a
/// time of day; a bare date resolves to
/// UTC midnight and reports `false`.
#[must_use]
pub fn parse_instant(
  raw: &str
) -> Option<(DateTime<Utc>, bool)> {
  let token = raw.trim();

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Some((
      dt.with_timezone(&Utc),
      true
    ));
  }

  for fmt in [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y%m%dT%H%M%SZ"
  ] {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return Some((ndt.and_utc(), true));
    }
  }

  NaiveDate::parse_from_str(
    token, "%Y-%m-%d"
  )
  .ok()
  .map(|date| {
    (at_utc(date, NaiveTime::MIN), false)
  })
}

fn relative_offset_re()
-> anyhow::Result<&'static Regex> {
  static RELATIVE_OFFSET: OnceLock<
    Result<Regex, regex::Error>
  > = OnceLock::new();
  RELATIVE_OFFSET
    .get_or_init(|| {
      Regex::new(
        r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dhm])$"
      )
    })
    .as_ref()
    .map_err(|e| {
      anyhow!(
        "internal regex compile \
         failure: {e}"
      )
    })
}

pub fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = i64::from(
    from.weekday().num_days_from_monday()
  );
  let target_idx = i64::from(
    target.num_days_from_monday()
  );
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  from
    .checked_add_signed(Duration::days(
      delta
    ))
    .unwrap_or(from)
}

#[cfg(test)]
mod tests {
  use chrono::{
    NaiveDate,
    TimeZone,
    Utc
  };

  use super::{
    add_months_clamped,
    add_years_clamped,
    days_in_month,
    months_between,
    parse_date_expr,
    parse_instant,
    relative_offset_re,
    week_start_sunday
  };

  fn date(
    y: i32,
    m: u32,
    d: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d)
      .expect("valid date")
  }

  #[test]
  fn month_lengths_follow_leap_years() {
    assert_eq!(days_in_month(2024, 2), 29);
    assert_eq!(days_in_month(2023, 2), 28);
    assert_eq!(days_in_month(2023, 12), 31);
    assert_eq!(days_in_month(2023, 4), 30);
  }

  #[test]
  fn month_shift_clamps_without_drift() {
    let anchor = date(2023, 1, 31);
    assert_eq!(
      add_months_clamped(anchor, 1),
      Some(date(2023, 2, 28))
    );
    assert_eq!(
      add_months_clamped(anchor, 2),
      Some(date(2023, 3, 31))
    );
    assert_eq!(
      add_months_clamped(anchor, -2),
      Some(date(2022, 11, 30))
    );
    assert_eq!(
      add_years_clamped(
        date(2024, 2, 29),
        1
      ),
      Some(date(2025, 2, 28))
    );
  }

  #[test]
  fn months_between_ignores_days() {
    assert_eq!(
      months_between(
        date(2023, 11, 30),
        date(2024, 2, 1)
      ),
      3
    );
  }

  #[test]
  fn week_starts_on_sunday() {
    // 2024-01-03 is a Wednesday
    assert_eq!(
      week_start_sunday(date(2024, 1, 3)),
      date(2023, 12, 31)
    );
    assert_eq!(
      week_start_sunday(date(2023, 12, 31)),
      date(2023, 12, 31)
    );
  }

  #[test]
  fn bare_dates_are_all_day() {
    let (instant, timed) =
      parse_instant("2024-03-05")
        .expect("parse date");
    assert!(!timed);
    assert_eq!(
      instant,
      Utc
        .with_ymd_and_hms(
          2024, 3, 5, 0, 0, 0
        )
        .single()
        .expect("valid instant")
    );
    let (_, timed) =
      parse_instant("2024-03-05T10:30:00Z")
        .expect("parse rfc3339");
    assert!(timed);
    assert!(
      parse_instant("not a date").is_none()
    );
  }

  #[test]
  fn parses_weekday_and_relative_exprs() {
    let now = Utc
      .with_ymd_and_hms(
        2026, 2, 17, 12, 0, 0
      )
      .single()
      .expect("valid now");
    let parsed =
      parse_date_expr("wednesday", now)
        .expect("parse weekday");
    assert_eq!(
      parsed.date_naive(),
      date(2026, 2, 18)
    );
    let parsed =
      parse_date_expr("+3d", now)
        .expect("parse relative");
    assert_eq!(
      parsed.date_naive(),
      date(2026, 2, 20)
    );
    assert!(
      parse_date_expr("someday", now)
        .is_err()
    );
  }

  #[test]
  fn relative_offsets_reuse_one_pattern() {
    let first = relative_offset_re()
      .expect("compile pattern");
    let second = relative_offset_re()
      .expect("cached pattern");
    assert!(std::ptr::eq(first, second));

    let now = Utc
      .with_ymd_and_hms(
        2026, 2, 17, 12, 0, 0
      )
      .single()
      .expect("valid now");
    for _ in 0..3 {
      assert_eq!(
        parse_date_expr("-90m", now)
          .expect("parse relative"),
        now
          - chrono::Duration::minutes(
            90
          )
      );
    }
  }
}
