//! Event building parameters carried in the output stream.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CodecError, Result};
use crate::ring_item::{RingItem, RingItemType};

/// Which timestamp a built event is stamped with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampPolicy {
    /// Timestamp of the first fragment.
    #[default]
    Earliest,
    /// Timestamp of the last fragment.
    Latest,
    /// Truncated mean of all fragment timestamps.
    Average,
}

impl TimestampPolicy {
    /// Code used in the glom info record.
    pub fn code(self) -> u16 {
        match self {
            TimestampPolicy::Earliest => 0,
            TimestampPolicy::Latest => 1,
            TimestampPolicy::Average => 2,
        }
    }

    /// Inverse of [`code`](Self::code).
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(TimestampPolicy::Earliest),
            1 => Some(TimestampPolicy::Latest),
            2 => Some(TimestampPolicy::Average),
            _ => None,
        }
    }
}

impl fmt::Display for TimestampPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TimestampPolicy::Earliest => "earliest",
            TimestampPolicy::Latest => "latest",
            TimestampPolicy::Average => "average",
        };
        write!(f, "{}", label)
    }
}

impl FromStr for TimestampPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "earliest" => Ok(TimestampPolicy::Earliest),
            "latest" => Ok(TimestampPolicy::Latest),
            "average" => Ok(TimestampPolicy::Average),
            _ => Err(format!(
                "Invalid timestamp policy '{}'. Must be one of: earliest, latest, average",
                s
            )),
        }
    }
}

/// Snapshot of the builder settings, emitted so the stream describes itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlomParameters {
    /// Coincidence window in ticks.
    pub coincidence_ticks: u64,
    /// False in passthrough mode.
    pub building: bool,
    /// Timestamp given to built events.
    pub policy: TimestampPolicy,
}

impl GlomParameters {
    const PAYLOAD_SIZE: usize = 12;

    /// `EVB_GLOM_INFO` item carrying these parameters.
    pub fn to_ring_item(&self) -> RingItem {
        let mut payload = BytesMut::with_capacity(Self::PAYLOAD_SIZE);
        payload.put_u64_ne(self.coincidence_ticks);
        payload.put_u16_ne(u16::from(self.building));
        payload.put_u16_ne(self.policy.code());
        RingItem::new(RingItemType::EvbGlomInfo, None, payload.freeze())
    }

    /// Parse the payload of an `EVB_GLOM_INFO` item.
    pub fn from_payload(mut payload: &[u8]) -> Result<Self> {
        if payload.len() < Self::PAYLOAD_SIZE {
            return Err(CodecError::Truncated {
                what: "glom info",
                needed: Self::PAYLOAD_SIZE,
                available: payload.len(),
            });
        }
        let coincidence_ticks = payload.get_u64_ne();
        let building = payload.get_u16_ne() != 0;
        let policy = TimestampPolicy::from_code(payload.get_u16_ne()).unwrap_or_default();
        Ok(Self {
            coincidence_ticks,
            building,
            policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parsing() {
        assert_eq!("earliest".parse(), Ok(TimestampPolicy::Earliest));
        assert_eq!("LATEST".parse(), Ok(TimestampPolicy::Latest));
        assert_eq!("Average".parse(), Ok(TimestampPolicy::Average));
        assert!("median".parse::<TimestampPolicy>().is_err());
        assert_eq!(TimestampPolicy::default(), TimestampPolicy::Earliest);
    }

    #[test]
    fn test_glom_info_payload() {
        let params = GlomParameters {
            coincidence_ticks: 250,
            building: true,
            policy: TimestampPolicy::Average,
        };
        let item = params.to_ring_item();
        assert_eq!(item.kind(), Some(RingItemType::EvbGlomInfo));
        assert_eq!(GlomParameters::from_payload(&item.payload).unwrap(), params);
    }
}
