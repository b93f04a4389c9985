use std::fmt::{Display, Formatter};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::rational::{Rational, Timestamp};

#[derive(Clone, Debug)]
pub enum PacketCmd {
    Data(Packet),
    EOF,
}

/// A compressed media unit. Timestamps count ticks of `time_base`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub stream_index: usize,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    // 0 = unknown
    #[serde(default)]
    pub duration: i64,
    pub time_base: Rational,
    #[serde(default)]
    pub is_key: bool,
    #[serde(default, skip_serializing)]
    pub data: Bytes,
}

impl Packet {
    pub fn new(stream_index: usize, pts: i64, time_base: Rational, data: impl Into<Bytes>) -> Self {
        Self {
            stream_index,
            pts: Some(pts),
            dts: Some(pts),
            duration: 0,
            time_base,
            is_key: false,
            data: data.into(),
        }
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_key(mut self, is_key: bool) -> Self {
        self.is_key = is_key;
        self
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// The instant this packet is presented, falling back to its decode time.
    pub fn timestamp(&self) -> Timestamp {
        Timestamp::new(self.pts.or(self.dts).unwrap_or(0), self.time_base)
    }

    /// Rewrites the timestamps into `to` ticks.
    pub fn rescale_ts(&mut self, to: Rational) {
        let from = self.time_base;
        self.pts = self.pts.map(|pts| crate::rational::rescale(pts, from, to));
        self.dts = self.dts.map(|dts| crate::rational::rescale(dts, from, to));
        self.duration = crate::rational::rescale_duration(self.duration, from, to);
        self.time_base = to;
    }
}

impl Display for Packet {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "Packet stream: {}, pts: {:?}, dts: {:?}, duration: {}, time_base: {}, size: {}",
            self.stream_index,
            self.pts,
            self.dts,
            self.duration,
            self.time_base,
            self.data.len()
        )
    }
}
