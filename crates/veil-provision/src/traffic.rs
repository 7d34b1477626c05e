//! Per-user traffic counters
//!
//! Reads the daemon's stats API through the command channel. A missing
//! counter (user with no traffic yet) makes the stats command exit nonzero;
//! that and any unparsable output count as zero rather than failing the
//! whole query.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use veil_ssh::CommandChannel;

use crate::commands;
use crate::ProvisionError;

/// Cumulative byte counts for one user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrafficTotals {
    pub up: u64,
    pub down: u64,
}

/// Read uplink/downlink totals for each username.
pub async fn fetch_traffic(
    channel: &mut dyn CommandChannel,
    usernames: &[String],
) -> Result<BTreeMap<String, TrafficTotals>, ProvisionError> {
    let mut totals = BTreeMap::new();

    for username in usernames {
        let up = read_counter(channel, username, "uplink", false).await?;
        let down = read_counter(channel, username, "downlink", false).await?;
        totals.insert(username.clone(), TrafficTotals { up, down });
    }

    Ok(totals)
}

/// Zero every user's counters.
pub async fn reset_traffic(
    channel: &mut dyn CommandChannel,
    usernames: &[String],
) -> Result<(), ProvisionError> {
    for username in usernames {
        for direction in ["uplink", "downlink"] {
            read_counter(channel, username, direction, true).await?;
        }
    }
    Ok(())
}

async fn read_counter(
    channel: &mut dyn CommandChannel,
    username: &str,
    direction: &str,
    reset: bool,
) -> Result<u64, ProvisionError> {
    let counter = format!("user>>>{username}>>>traffic>>>{direction}");
    let output = channel.exec(&commands::stat_query(&counter, reset)).await?;

    if !output.success() {
        debug!(counter, stderr = %output.stderr, "counter not found, treating as zero");
        return Ok(0);
    }

    Ok(parse_stat_value(&output.stdout))
}

/// The stats command answers `{"stat": {"name": "...", "value": N}}`;
/// some daemon versions quote the value.
fn parse_stat_value(raw: &str) -> u64 {
    let Ok(body) = serde_json::from_str::<serde_json::Value>(raw.trim()) else {
        debug!(output = raw, "unparsable stats output, treating as zero");
        return 0;
    };

    let value = &body["stat"]["value"];
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_value() {
        assert_eq!(
            parse_stat_value(r#"{"stat": {"name": "user>>>user1>>>traffic>>>uplink", "value": 123456}}"#),
            123456
        );
    }

    #[test]
    fn parses_quoted_value() {
        assert_eq!(
            parse_stat_value(r#"{"stat": {"name": "x", "value": "789"}}"#),
            789
        );
    }

    #[test]
    fn garbage_counts_as_zero() {
        assert_eq!(parse_stat_value(""), 0);
        assert_eq!(parse_stat_value("counter not found"), 0);
        assert_eq!(parse_stat_value(r#"{"stat": {}}"#), 0);
        assert_eq!(parse_stat_value(r#"{"stat": {"value": -5}}"#), 0);
    }
}
