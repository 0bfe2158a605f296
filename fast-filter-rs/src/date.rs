use time::{OffsetDateTime, UtcOffset};

use crate::error::{FilterError, Result};

// Elements always store the raw "<seconds> <+/-hhmm>" bytes; these helpers
// exist for callbacks that want to shift or compare dates. Formatting a
// parsed date yields the original bytes for any offset fast-export emits.

fn bad(when: &[u8]) -> FilterError {
    FilterError::MalformedStream {
        kind: "date",
        line: when.to_vec(),
    }
}

/// Parse raw date bytes into an [`OffsetDateTime`] carrying the stream's
/// UTC offset.
pub fn string_to_date(when: &[u8]) -> Result<OffsetDateTime> {
    let text = std::str::from_utf8(when).map_err(|_| bad(when))?;
    let (secs, zone) = text.split_once(' ').ok_or_else(|| bad(when))?;
    let secs: i64 = secs.parse().map_err(|_| bad(when))?;

    let zone = zone.as_bytes();
    if zone.len() != 5 || (zone[0] != b'+' && zone[0] != b'-') {
        return Err(bad(when));
    }
    let digit = |b: u8| -> Result<i8> {
        if b.is_ascii_digit() {
            Ok((b - b'0') as i8)
        } else {
            Err(bad(when))
        }
    };
    let hh = digit(zone[1])? * 10 + digit(zone[2])?;
    let mm = digit(zone[3])? * 10 + digit(zone[4])?;
    let sign: i8 = if zone[0] == b'-' { -1 } else { 1 };
    let offset =
        UtcOffset::from_hms(sign * hh, sign * mm, 0).map_err(|_| bad(when))?;

    let utc = OffsetDateTime::from_unix_timestamp(secs).map_err(|_| bad(when))?;
    Ok(utc.to_offset(offset))
}

/// Format a date back into the raw byte form the stream grammar uses.
pub fn date_to_string(date: &OffsetDateTime) -> Vec<u8> {
    let offset = date.offset();
    let (hh, mm, _) = offset.as_hms();
    let sign = if offset.is_negative() { '-' } else { '+' };
    format!(
        "{} {}{:02}{:02}",
        date.unix_timestamp(),
        sign,
        hh.abs(),
        mm.abs()
    )
    .into_bytes()
}
