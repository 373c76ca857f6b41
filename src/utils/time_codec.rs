use crate::error::Error;
use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::str::FromStr;

/// Wire format the device expects in `picTime`.
const DEVICE_LOCAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Converts between canonical UTC instants and the camera's local wall clock.
///
/// Every camera is assumed to run on the same fixed, named time zone.
#[derive(Debug, Clone, Copy)]
pub struct TimeCodec {
    zone: Tz,
}

impl TimeCodec {
    pub fn new(zone: Tz) -> Self {
        Self { zone }
    }

    /// Build a codec from an IANA zone name such as `Asia/Tokyo`
    pub fn from_name(name: &str) -> Result<Self, Error> {
        let zone = Tz::from_str(name)
            .map_err(|e| Error::Config(format!("Unknown time zone '{}': {}", name, e)))?;
        Ok(Self::new(zone))
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }

    /// Render an instant as a bare local timestamp (`YYYY-MM-DDTHH:mm:ss`)
    pub fn to_device_local(&self, instant: DateTime<Utc>) -> String {
        instant
            .with_timezone(&self.zone)
            .format(DEVICE_LOCAL_FORMAT)
            .to_string()
    }

    /// Decode the device's positional `captureTime` string.
    ///
    /// Layout is `YYYYMMDD?HHmmss...` where position 8 is a separator the
    /// device always emits (usually `T`); anything after position 15, such as
    /// an offset suffix, is ignored. The compact 14-digit form
    /// `YYYYMMDDHHmmss` is accepted as well.
    pub fn from_device_local(&self, digits: &str) -> Result<DateTime<Utc>, Error> {
        let malformed = || Error::MalformedTimestamp(digits.to_string());

        let compact = digits.len() == 14 && digits.bytes().all(|b| b.is_ascii_digit());
        let time_offset = if compact {
            8
        } else if digits.len() >= 15 {
            9
        } else {
            return Err(malformed());
        };

        let field = |start: usize, len: usize| -> Result<u32, Error> {
            digits
                .get(start..start + len)
                .filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|s| s.parse::<u32>().ok())
                .ok_or_else(malformed)
        };

        let year = field(0, 4)? as i32;
        let month = field(4, 2)?;
        let day = field(6, 2)?;
        let hour = field(time_offset, 2)?;
        let minute = field(time_offset + 2, 2)?;
        let second = field(time_offset + 4, 2)?;

        let naive = NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|date| date.and_hms_opt(hour, minute, second))
            .ok_or_else(malformed)?;

        self.localize(naive).ok_or_else(malformed)
    }

    /// Local midnight of the day `now` falls on, as a UTC instant
    pub fn start_of_day(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let midnight = now
            .with_timezone(&self.zone)
            .date_naive()
            .and_time(NaiveTime::MIN);

        // A few zones skip midnight on DST change days; fall back to the
        // first representable instant of that day.
        self.localize(midnight)
            .or_else(|| (1..=2).find_map(|h| self.localize(midnight + chrono::Duration::hours(h))))
            .unwrap_or(now)
    }

    /// Ambiguous local times resolve to the earlier instant; times inside a
    /// DST gap do not exist.
    fn localize(&self, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        match self.zone.from_local_datetime(&naive) {
            LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
            LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
            LocalResult::None => None,
        }
    }
}
