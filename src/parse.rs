//! Parsers for the text output of `chronyc` sub-commands.
//!
//! The tool's output is whitespace-tabular and changes between versions, so
//! every parser here keeps whatever it can read and silently skips lines it
//! cannot. None of them fail.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

static SIGNED_DURATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([+-]\d+ms)").expect("valid duration pattern"));

/// Legacy names some consumers still read tracking fields under.
const TRACKING_ALIASES: &[(&str, &str)] = &[
    ("Reference ID", "ReferenceID"),
    ("Update interval", "UpdateRate"),
    ("Leap status", "LeapStatus"),
];

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Field name to value, as printed by `chronyc tracking`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackingSnapshot(BTreeMap<String, String>);

impl TrackingSnapshot {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn insert(&mut self, field: &str, value: &str) {
        self.0.insert(field.to_string(), value.to_string());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub state: String,
    pub name: String,
    pub stratum: String,
    pub poll: String,
    pub reach: String,
    pub lastrx: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<String>,
    /// The line exactly as printed, for columns not parsed above.
    pub raw: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityCounts {
    /// Sources online.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok_count: Option<String>,
    /// Sources offline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_count: Option<String>,
    /// Sources doing a burst before returning online.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bogus_count: Option<String>,
    /// Sources doing a burst before returning offline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_count: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ntp_packets: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ntp_dropped: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<String>,
    pub raw: String,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn is_separator(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && trimmed.chars().all(|c| c == '=')
}

/// Lines of a tabular listing that follow the `=====` rule under the header.
fn table_rows(output: &str) -> impl Iterator<Item = &str> {
    output
        .lines()
        .skip_while(|line| !is_separator(line))
        .skip(1)
        .filter(|line| !line.trim().is_empty() && !is_separator(line))
}

fn signed_duration(token: Option<&&str>) -> Option<String> {
    let token = token?;
    SIGNED_DURATION
        .captures(token)
        .map(|caps| caps[1].to_string())
}

// ---------------------------------------------------------------------------
// Parsers
// ---------------------------------------------------------------------------

pub fn parse_tracking(output: &str) -> TrackingSnapshot {
    let mut snapshot = TrackingSnapshot::default();

    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };

        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value.trim();

        snapshot.insert(key, value);
        if let Some((_, alias)) = TRACKING_ALIASES.iter().find(|(name, _)| *name == key) {
            snapshot.insert(alias, value);
        }
    }

    snapshot
}

pub fn parse_sources(output: &str) -> Vec<SourceRecord> {
    table_rows(output)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 6 {
                return None;
            }

            Some(SourceRecord {
                state: parts[0].to_string(),
                name: parts[1].to_string(),
                stratum: parts[2].to_string(),
                poll: parts[3].to_string(),
                reach: parts[4].to_string(),
                lastrx: parts[5].to_string(),
                offset: signed_duration(parts.get(6)),
                delay: signed_duration(parts.get(8)),
                raw: line.to_string(),
            })
        })
        .collect()
}

pub fn parse_activity(output: &str) -> ActivityCounts {
    let mut counts = ActivityCounts::default();

    for line in output.lines().filter(|line| line.contains("sources")) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 {
            continue;
        }

        let count = Some(parts[0].to_string());
        match parts[2..].join(" ").as_str() {
            "online" => counts.ok_count = count,
            "offline" => counts.failed_count = count,
            "doing burst (return to online)" => counts.bogus_count = count,
            "doing burst (return to offline)" => counts.timeout_count = count,
            _ => {}
        }
    }

    counts
}

pub fn parse_clients(output: &str) -> Vec<ClientRecord> {
    table_rows(output)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 2 {
                return None;
            }

            let field = |min_len: usize, idx: usize| {
                (parts.len() >= min_len).then(|| parts[idx].to_string())
            };

            Some(ClientRecord {
                address: parts[0].to_string(),
                ntp_packets: field(3, 1),
                ntp_dropped: field(4, 2),
                offset: field(5, 3),
                raw: line.to_string(),
            })
        })
        .collect()
}
