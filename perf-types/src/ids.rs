//! Identity types for one point of the test matrix and for workers.

use crate::error::TypesError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;
use std::sync::OnceLock;

/// Valid latency labels: `0ms`, `1ms`, `10ms`... but not `01ms`, `1 ms`, ` 20ms`.
const LATENCY_PATTERN: &str = "^(0ms|[1-9]([0-9]*)ms)$";

fn latency_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(LATENCY_PATTERN).expect("latency pattern is valid"))
}

/// Added delay applied by a fault-injection condition.
///
/// Displayed and parsed as a millisecond label such as `20ms`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Latency(u64);

impl Latency {
    /// Create a latency from whole milliseconds.
    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Milliseconds of added delay.
    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl FromStr for Latency {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !latency_regex().is_match(s) {
            return Err(TypesError::InvalidLatency(s.to_string()));
        }
        s.trim_end_matches("ms")
            .parse::<u64>()
            .map(Self)
            .map_err(|_| TypesError::InvalidLatency(s.to_string()))
    }
}

impl TryFrom<String> for Latency {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Latency> for String {
    fn from(value: Latency) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Latency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

impl fmt::Debug for Latency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Latency({}ms)", self.0)
    }
}

/// Share of requests affected by a fault-injection condition, 0–100.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Percent(u8);

impl Percent {
    /// Create a percent, rejecting values above 100.
    pub fn new(value: u8) -> Result<Self, TypesError> {
        if value > 100 {
            return Err(TypesError::InvalidPercent(value.to_string()));
        }
        Ok(Self(value))
    }

    /// The raw percent value.
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Percent {
    type Error = TypesError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .map_err(|_| TypesError::InvalidPercent(value.to_string()))
            .and_then(Self::new)
    }
}

impl From<Percent> for i64 {
    fn from(value: Percent) -> Self {
        i64::from(value.0)
    }
}

impl FromStr for Percent {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: i64 = s
            .trim()
            .parse()
            .map_err(|_| TypesError::InvalidPercent(s.to_string()))?;
        Self::try_from(value)
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Percent({})", self.0)
    }
}

/// One iteration of the test matrix: a (latency, percent) pair.
///
/// Ordered by percent first, then latency, which is the matrix traversal order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestCaseId {
    /// Added delay.
    pub latency: Latency,
    /// Affected share of requests.
    pub percent: Percent,
}

impl TestCaseId {
    /// Create a test case identity.
    pub fn new(latency: Latency, percent: Percent) -> Self {
        Self { latency, percent }
    }
}

impl PartialOrd for TestCaseId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TestCaseId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.percent
            .cmp(&other.percent)
            .then(self.latency.cmp(&other.latency))
    }
}

impl fmt::Display for TestCaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "latency={},percent={}", self.latency, self.percent)
    }
}

impl fmt::Debug for TestCaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TestCaseId({}, {}%)", self.latency, self.percent)
    }
}

/// Identity number of a simulated client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub u32);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of CRUD cycles each worker runs in one test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobCount {
    /// Run exactly this many cycles.
    Limited(NonZeroU64),
    /// Run until the run token is cancelled.
    Unbounded,
}

impl JobCount {
    const UNBOUNDED: &'static str = "unbounded";

    /// Create a bounded job count.
    pub fn limited(jobs: u64) -> Result<Self, TypesError> {
        NonZeroU64::new(jobs)
            .map(Self::Limited)
            .ok_or_else(|| TypesError::InvalidJobCount(jobs.to_string()))
    }

    /// Whether another cycle may start after `completed` cycles.
    pub fn allows(&self, completed: u64) -> bool {
        match self {
            Self::Limited(limit) => completed < limit.get(),
            Self::Unbounded => true,
        }
    }

    /// The bound, if any.
    pub fn limit(&self) -> Option<u64> {
        match self {
            Self::Limited(limit) => Some(limit.get()),
            Self::Unbounded => None,
        }
    }
}

impl FromStr for JobCount {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case(Self::UNBOUNDED) {
            return Ok(Self::Unbounded);
        }
        trimmed
            .parse::<u64>()
            .map_err(|_| TypesError::InvalidJobCount(s.to_string()))
            .and_then(Self::limited)
    }
}

impl fmt::Display for JobCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limited(limit) => write!(f, "{}", limit),
            Self::Unbounded => f.write_str(Self::UNBOUNDED),
        }
    }
}

/// Config representation: either a number or the string `"unbounded"`.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawJobCount {
    Number(u64),
    Text(String),
}

impl Serialize for JobCount {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Limited(limit) => RawJobCount::Number(limit.get()).serialize(serializer),
            Self::Unbounded => RawJobCount::Text(Self::UNBOUNDED.into()).serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for JobCount {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawJobCount::deserialize(deserializer)? {
            RawJobCount::Number(n) => Self::limited(n),
            RawJobCount::Text(s) => s.parse(),
        }
        .map_err(serde::de::Error::custom)
    }
}
