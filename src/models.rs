//! Canonical bar model and cache identities
//!
//! Value types shared by both cache tiers: the OHLCV bar record, the
//! timeframe enumeration, composite keys, range queries, and correction
//! events.

use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported bar timeframes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1D")]
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 7] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1D",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "30m" => Ok(Timeframe::M30),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1D" | "1d" => Ok(Timeframe::D1),
            other => Err(CacheError::Config(format!("unknown timeframe: {other}"))),
        }
    }
}

/// One OHLCV observation for a symbol at a timeframe-aligned timestamp.
///
/// Equality is on content; the identity (symbol, timeframe, timestamp) lives
/// in [`BarKey`] and is supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Open boundary of the bar, epoch milliseconds UTC.
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Upstream source name.
    pub provider: String,
    /// Per-provider correction counter, strictly positive.
    pub revision: u32,
    /// When this observation was captured from its provider, epoch ms.
    pub fetched_at: i64,
}

impl Bar {
    /// Check the bar field invariants enforced at the service boundary.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.timestamp < 0 {
            return Err(CacheError::InvalidBar(format!(
                "negative timestamp: {}",
                self.timestamp
            )));
        }
        if self.revision == 0 {
            return Err(CacheError::InvalidBar("revision must be positive".into()));
        }
        for (name, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if !value.is_finite() {
                return Err(CacheError::InvalidBar(format!(
                    "non-finite {name}: {value}"
                )));
            }
        }
        if self.low > self.high {
            return Err(CacheError::InvalidBar(format!(
                "low {} above high {}",
                self.low, self.high
            )));
        }
        let min_oc = self.open.min(self.close);
        let max_oc = self.open.max(self.close);
        if self.low > min_oc || self.high < max_oc {
            return Err(CacheError::InvalidBar(format!(
                "open/close outside [low, high]: o={} h={} l={} c={}",
                self.open, self.high, self.low, self.close
            )));
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(CacheError::InvalidBar(format!(
                "invalid volume: {}",
                self.volume
            )));
        }
        if self.provider.is_empty() {
            return Err(CacheError::InvalidBar("empty provider".into()));
        }
        Ok(())
    }
}

/// Full identity of a logical bar. The memory tier stores winners under this
/// key; the durable tier may hold one observation per provider beneath it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BarKey {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub timestamp: i64,
}

impl BarKey {
    pub fn new(symbol: &str, timeframe: Timeframe, timestamp: i64) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe,
            timestamp,
        }
    }
}

/// Half-open range query over one (symbol, timeframe) series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarsQuery {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Inclusive start, epoch ms.
    pub start_ms: i64,
    /// Exclusive end, epoch ms.
    pub end_ms: i64,
}

impl BarsQuery {
    pub fn new(symbol: &str, timeframe: Timeframe, start_ms: i64, end_ms: i64) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe,
            start_ms,
            end_ms,
        }
    }
}

/// How a winner was superseded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionKind {
    /// Same provider, later correction.
    Revision,
    /// A higher-trust provider took over the identity.
    ProviderOverride,
}

impl CorrectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectionKind::Revision => "revision",
            CorrectionKind::ProviderOverride => "provider_override",
        }
    }
}

/// Notification that the winner for an identity changed from a prior
/// non-null winner to a new one. First-ever winners produce no event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionEvent {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub timestamp: i64,
    pub old_bar: Option<Bar>,
    pub new_bar: Bar,
    pub kind: CorrectionKind,
    /// Service clock reading when the change was detected, epoch ms.
    pub detected_at: i64,
}
