//! The closed set of OTLP signal types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Signal type of an export request. Decides the decode schema and the
/// storage partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Traces,
    Logs,
    Metrics,
}

impl SignalType {
    pub const ALL: [SignalType; 3] = [SignalType::Traces, SignalType::Logs, SignalType::Metrics];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Traces => "traces",
            SignalType::Logs => "logs",
            SignalType::Metrics => "metrics",
        }
    }

    /// OTLP/HTTP route for this signal
    pub fn path(&self) -> &'static str {
        match self {
            SignalType::Traces => "/v1/traces",
            SignalType::Logs => "/v1/logs",
            SignalType::Metrics => "/v1/metrics",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown signal type '{0}'")]
pub struct UnknownSignal(String);

impl FromStr for SignalType {
    type Err = UnknownSignal;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "traces" => Ok(SignalType::Traces),
            "logs" => Ok(SignalType::Logs),
            "metrics" => Ok(SignalType::Metrics),
            _ => Err(UnknownSignal(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_paths() {
        assert_eq!(SignalType::Traces.path(), "/v1/traces");
        assert_eq!(SignalType::Logs.path(), "/v1/logs");
        assert_eq!(SignalType::Metrics.path(), "/v1/metrics");
    }

    #[test]
    fn test_signal_from_str() {
        assert_eq!("traces".parse::<SignalType>().unwrap(), SignalType::Traces);
        assert_eq!("METRICS".parse::<SignalType>().unwrap(), SignalType::Metrics);
        assert!("profiles".parse::<SignalType>().is_err());
    }
}
