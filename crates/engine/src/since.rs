use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Asia::Taipei;

/// How far back the first sync reaches when no start date is given.
pub const DEFAULT_LOOKBACK_MONTHS: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum StartTimeError {
    #[error("invalid date {input:?}, expected YYYY-MM-DD")]
    InvalidDate {
        input: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("{0} has no unambiguous midnight in Asia/Taipei")]
    NoMidnight(NaiveDate),
    #[error("cannot go back {months} months from {from}")]
    OutOfRange { from: String, months: u32 },
}

/// Start of a sync run.
///
/// A `YYYY-MM-DD` date means midnight of that day in Asia/Taipei. Without
/// one, the run starts [`DEFAULT_LOOKBACK_MONTHS`] calendar months before
/// `now`, in whatever zone `now` carries. Days past the end of the earlier
/// month roll into the month after it: May 31 goes back to March 2 in a leap
/// year.
pub fn resolve_start_time<Tz: TimeZone>(
    since: Option<&str>,
    now: DateTime<Tz>,
) -> Result<DateTime<Utc>, StartTimeError> {
    match since.map(str::trim).filter(|s| !s.is_empty()) {
        Some(date) => parse_since(date),
        None => {
            months_back(&now, DEFAULT_LOOKBACK_MONTHS)
                .map(|t| t.with_timezone(&Utc))
                .ok_or_else(|| StartTimeError::OutOfRange {
                    from: now.with_timezone(&Utc).to_rfc3339(),
                    months: DEFAULT_LOOKBACK_MONTHS,
                })
        }
    }
}

/// Same day and wall-clock time `months` months earlier, with overflowing
/// days carried into the next month. A wall-clock time that falls in a DST
/// gap moves forward an hour.
fn months_back<Tz: TimeZone>(now: &DateTime<Tz>, months: u32) -> Option<DateTime<Tz>> {
    let local = now.naive_local();
    let date = local.date();
    let index = date.year() * 12 + date.month0() as i32 - i32::try_from(months).ok()?;
    let first = NaiveDate::from_ymd_opt(index.div_euclid(12), index.rem_euclid(12) as u32 + 1, 1)?;
    let naive = first
        .checked_add_days(Days::new(u64::from(date.day0())))?
        .and_time(local.time());

    let tz = now.timezone();
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
}

fn parse_since(input: &str) -> Result<DateTime<Utc>, StartTimeError> {
    let date = NaiveDate::parse_from_str(input, "%Y-%m-%d").map_err(|source| {
        StartTimeError::InvalidDate {
            input: input.to_string(),
            source,
        }
    })?;
    Taipei
        .from_local_datetime(&date.and_time(NaiveTime::MIN))
        .single()
        .map(|t| t.with_timezone(&Utc))
        .ok_or(StartTimeError::NoMidnight(date))
}
