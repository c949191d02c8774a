//! HTTP-date formatting for the `Expires` header (RFC 7231 IMF-fixdate).

use time::macros::format_description;
use time::OffsetDateTime;

const HTTP_DATE: &[time::format_description::FormatItem] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

pub fn format_http_date(at: OffsetDateTime) -> String {
    at.to_offset(time::UtcOffset::UTC)
        .format(HTTP_DATE)
        .expect("HTTP_DATE format description is valid for any OffsetDateTime")
}
