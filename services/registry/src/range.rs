//! Byte range expressions used by blob downloads and chunked uploads.
//!
//! Downloads use the `Range: bytes=start-end` request header. Upload chunks
//! declare their position with `Content-Range: start-end` and the registry
//! reports progress as `Range: 0-<last byte>`.

/// An inclusive byte range, optionally with the total size of the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSpec {
    /// First byte offset.
    pub start: u64,
    /// Last byte offset, inclusive.
    pub end: u64,
    /// Total size, when the header carried one.
    pub total: Option<u64>,
}

impl RangeSpec {
    /// A range without a total.
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end,
            total: None,
        }
    }

    /// Number of bytes covered. Zero when `end` is before `start`.
    pub fn len(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.end - self.start + 1
        }
    }

    /// True when `end` is before `start`.
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// A range header could not be parsed or does not fit the object.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid range: {header:?}")]
pub struct InvalidRange {
    /// The header value as received.
    pub header: String,
}

impl InvalidRange {
    fn new(header: &str) -> Self {
        Self {
            header: header.to_owned(),
        }
    }
}

/// How a ranged read should be answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeStatus {
    /// The whole object, 200.
    FullContent,
    /// A proper subset of the object, 206.
    PartialContent,
    /// The range does not fit the object, 416.
    NotSatisfiable,
}

fn number(value: &str) -> Option<u64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

/// Parse a `Range: bytes=start-end` header against an object of `content_length` bytes.
///
/// `bytes=start-` runs to the end of the object, and an `end` past the end of
/// the object is clamped to it.
pub fn parse_byte_range(header: &str, content_length: u64) -> Result<RangeSpec, InvalidRange> {
    let spec = header
        .trim()
        .strip_prefix("bytes=")
        .ok_or_else(|| InvalidRange::new(header))?;
    let (start, end) = spec.split_once('-').ok_or_else(|| InvalidRange::new(header))?;

    let start = number(start).ok_or_else(|| InvalidRange::new(header))?;
    if start >= content_length {
        return Err(InvalidRange::new(header));
    }

    let last = content_length - 1;
    let end = if end.is_empty() {
        last
    } else {
        number(end).ok_or_else(|| InvalidRange::new(header))?
    };
    if end < start {
        return Err(InvalidRange::new(header));
    }

    Ok(RangeSpec {
        start,
        end: end.min(last),
        total: Some(content_length),
    })
}

/// Parse an upload `Content-Range: start-end[/total]` header.
///
/// A leading `bytes ` unit is accepted and ignored.
pub fn parse_content_range(header: &str) -> Result<RangeSpec, InvalidRange> {
    let value = header.trim();
    let value = value.strip_prefix("bytes ").unwrap_or(value).trim();

    let (range, total) = match value.split_once('/') {
        Some((range, total)) => (
            range,
            Some(number(total).ok_or_else(|| InvalidRange::new(header))?),
        ),
        None => (value, None),
    };

    let (start, end) = range.split_once('-').ok_or_else(|| InvalidRange::new(header))?;
    let start = number(start).ok_or_else(|| InvalidRange::new(header))?;
    let end = number(end).ok_or_else(|| InvalidRange::new(header))?;

    if end < start {
        return Err(InvalidRange::new(header));
    }
    if let Some(total) = total {
        if start >= total || end >= total {
            return Err(InvalidRange::new(header));
        }
    }

    Ok(RangeSpec { start, end, total })
}

/// `Content-Range` value for a ranged download: `bytes start-end/total`.
pub fn format_content_range(start: u64, end: u64, total: u64) -> String {
    format!("bytes {start}-{end}/{total}")
}

/// Progress value for upload responses: `start-end`.
pub fn format_progress_range(start: u64, end: u64) -> String {
    format!("{start}-{end}")
}

/// Progress of an upload which has received `received` bytes.
///
/// An empty upload reports `0-0`, as clients expect.
pub fn upload_progress(received: u64) -> String {
    format_progress_range(0, received.saturating_sub(1))
}

/// Classify a requested range against an object of `content_length` bytes.
///
/// No range at all is a request for the full content.
pub fn status_for(range: Option<&RangeSpec>, content_length: u64) -> RangeStatus {
    let Some(range) = range else {
        return RangeStatus::FullContent;
    };

    if range.end < range.start || range.end >= content_length {
        RangeStatus::NotSatisfiable
    } else if range.start == 0 && range.end == content_length - 1 {
        RangeStatus::FullContent
    } else {
        RangeStatus::PartialContent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverted_range_is_empty() {
        let range = RangeSpec::new(10, 3);
        assert!(range.is_empty());
        assert_eq!(range.len(), 0);

        let single = RangeSpec::new(7, 7);
        assert!(!single.is_empty());
        assert_eq!(single.len(), 1);

        let widest = RangeSpec::new(0, u64::MAX - 1);
        assert_eq!(widest.len(), u64::MAX);
    }

    #[test]
    fn byte_range_bounds() {
        let range = parse_byte_range("bytes=0-1023", 2048).unwrap();
        assert_eq!((range.start, range.end), (0, 1023));
        assert_eq!(range.len(), 1024);

        let range = parse_byte_range("bytes=1000-", 2048).unwrap();
        assert_eq!((range.start, range.end), (1000, 2047));

        let range = parse_byte_range("bytes=2000-9999", 2048).unwrap();
        assert_eq!(range.end, 2047);
    }

    #[test]
    fn byte_range_rejections() {
        for header in [
            "bytes=5000-6000",
            "bytes=2048-",
            "bytes=10-5",
            "bytes=-5",
            "bytes=a-b",
            "bytes=1-2,4-5",
            "items=0-1",
            "0-1",
        ] {
            assert!(parse_byte_range(header, 2048).is_err(), "{header}");
        }

        assert!(parse_byte_range("bytes=0-", 0).is_err());
    }

    #[test]
    fn content_range_forms() {
        assert_eq!(parse_content_range("0-99").unwrap(), RangeSpec::new(0, 99));
        assert_eq!(
            parse_content_range("100-199/200").unwrap(),
            RangeSpec {
                start: 100,
                end: 199,
                total: Some(200)
            }
        );
        assert_eq!(
            parse_content_range("bytes 5-9").unwrap(),
            RangeSpec::new(5, 9)
        );

        assert!(parse_content_range("9-5").is_err());
        assert!(parse_content_range("0-200/200").is_err());
        assert!(parse_content_range("-1-5").is_err());
        assert!(parse_content_range("").is_err());
    }

    #[test]
    fn formatting() {
        assert_eq!(format_content_range(0, 9, 100), "bytes 0-9/100");
        assert_eq!(format_progress_range(0, 9), "0-9");
        assert_eq!(upload_progress(0), "0-0");
        assert_eq!(upload_progress(10), "0-9");
    }

    #[test]
    fn status_classification() {
        let full = parse_byte_range("bytes=0-", 2048).unwrap();
        assert_eq!(status_for(Some(&full), 2048), RangeStatus::FullContent);

        let part = parse_byte_range("bytes=0-1023", 2048).unwrap();
        assert_eq!(status_for(Some(&part), 2048), RangeStatus::PartialContent);

        assert_eq!(
            status_for(Some(&RangeSpec::new(0, 4096)), 2048),
            RangeStatus::NotSatisfiable
        );
        assert_eq!(status_for(None, 2048), RangeStatus::FullContent);
    }
}
