//! Media range specifications such as `"70s-80s"` or `"100-200"`.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TranscodeError;

/// A half-open span of a stream: `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MediaRange {
    /// Seconds of presentation time.
    Time { start: f64, end: f64 },
    /// Packet positions within the stream.
    Index { start: i64, end: i64 },
}

impl MediaRange {
    /// Splits the range into consecutive windows of `secs` seconds or
    /// `packets` positions, the last one clipped to the range end.
    pub fn windows(&self, secs: f64, packets: i64) -> Vec<MediaRange> {
        let mut result = Vec::new();
        match *self {
            MediaRange::Time { start, end } => {
                let step = if secs > 0.0 { secs } else { end - start };
                let mut pos = start;
                while pos < end {
                    let next = (pos + step).min(end);
                    result.push(MediaRange::Time {
                        start: pos,
                        end: next,
                    });
                    pos = next;
                }
            }
            MediaRange::Index { start, end } => {
                let step = packets.max(1);
                let mut pos = start;
                while pos < end {
                    let next = pos.saturating_add(step).min(end);
                    result.push(MediaRange::Index {
                        start: pos,
                        end: next,
                    });
                    pos = next;
                }
            }
        }
        result
    }
}

fn parse_secs(s: &str) -> Option<f64> {
    let v: f64 = s.strip_suffix('s')?.parse().ok()?;
    v.is_finite().then_some(v)
}

impl FromStr for MediaRange {
    type Err = TranscodeError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let spec = spec.trim();
        let invalid = || TranscodeError::config(format!("invalid media range {:?}", spec));

        // a single "70s" is one second starting there
        if !spec.contains('-') || spec.starts_with('-') && !spec[1..].contains('-') {
            let start = parse_secs(spec).ok_or_else(invalid)?;
            return Ok(MediaRange::Time {
                start,
                end: start + 1.0,
            });
        }

        // split on the dash that separates the bounds, not a leading minus
        let split = spec
            .char_indices()
            .skip(1)
            .find(|(_, c)| *c == '-')
            .map(|(i, _)| i)
            .ok_or_else(invalid)?;
        let (start, end) = (spec[..split].trim(), spec[split + 1..].trim());

        let range = if start.ends_with('s') || end.ends_with('s') {
            MediaRange::Time {
                start: parse_secs(start).ok_or_else(invalid)?,
                end: parse_secs(end).ok_or_else(invalid)?,
            }
        } else {
            MediaRange::Index {
                start: start.parse().map_err(|_| invalid())?,
                end: end.parse().map_err(|_| invalid())?,
            }
        };

        let empty = match range {
            MediaRange::Time { start, end } => end <= start,
            MediaRange::Index { start, end } => end <= start,
        };
        if empty {
            return Err(TranscodeError::config(format!(
                "media range {:?} is empty",
                spec
            )));
        }
        Ok(range)
    }
}

impl TryFrom<String> for MediaRange {
    type Error = TranscodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MediaRange> for String {
    fn from(value: MediaRange) -> Self {
        value.to_string()
    }
}

impl Display for MediaRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            MediaRange::Time { start, end } => write!(f, "{}s-{}s", start, end),
            MediaRange::Index { start, end } => write!(f, "{}-{}", start, end),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::MediaRange;

    #[test]
    fn test_parse_time_range() {
        let range: MediaRange = "70s-80s".parse().unwrap();
        assert_eq!(
            range,
            MediaRange::Time {
                start: 70.0,
                end: 80.0
            }
        );
        let range: MediaRange = "1.5s-2.25s".parse().unwrap();
        assert_eq!(
            range,
            MediaRange::Time {
                start: 1.5,
                end: 2.25
            }
        );
        assert_eq!(range.to_string(), "1.5s-2.25s");
    }

    #[test]
    fn test_parse_single_second() {
        let range: MediaRange = "70s".parse().unwrap();
        assert_eq!(
            range,
            MediaRange::Time {
                start: 70.0,
                end: 71.0
            }
        );
    }

    #[test]
    fn test_parse_index_range() {
        let range: MediaRange = "100-200".parse().unwrap();
        assert_eq!(range, MediaRange::Index { start: 100, end: 200 });
        let range: MediaRange = "-5-5".parse().unwrap();
        assert_eq!(range, MediaRange::Index { start: -5, end: 5 });
    }

    #[test]
    fn test_parse_invalid_ranges() {
        for spec in ["", "abc", "80s-70s", "10-10", "10s-x", "5-", "70"] {
            assert!(spec.parse::<MediaRange>().is_err(), "{:?} should fail", spec);
        }
    }

    #[test]
    fn test_time_windows() {
        let range: MediaRange = "70s-72.5s".parse().unwrap();
        let windows = range.windows(1.0, 16);
        assert_eq!(windows.len(), 3);
        assert_eq!(
            windows[2],
            MediaRange::Time {
                start: 72.0,
                end: 72.5
            }
        );
    }

    #[test]
    fn test_index_windows() {
        let range = MediaRange::Index { start: 0, end: 40 };
        let windows = range.windows(1.0, 16);
        assert_eq!(
            windows,
            vec![
                MediaRange::Index { start: 0, end: 16 },
                MediaRange::Index { start: 16, end: 32 },
                MediaRange::Index { start: 32, end: 40 },
            ]
        );
    }

    #[test]
    fn test_range_serde() {
        let range: MediaRange = serde_json::from_str("\"70s-80s\"").unwrap();
        assert_eq!(
            range,
            MediaRange::Time {
                start: 70.0,
                end: 80.0
            }
        );
        assert_eq!(serde_json::to_string(&range).unwrap(), "\"70s-80s\"");
    }
}
