//! Proxy data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;

/// Country used when a source does not report one
pub const UNKNOWN_COUNTRY: &str = "unknown";

fn default_country() -> String {
    UNKNOWN_COUNTRY.to_string()
}

/// Whether a source reports the proxy as able to tunnel TLS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TlsSupport {
    Yes,
    No,
    #[default]
    Unreported,
}

impl TlsSupport {
    /// Read a listing cell such as "yes" / "no"; anything else is unreported
    pub fn from_cell(cell: &str) -> Self {
        match cell.trim().to_lowercase().as_str() {
            "yes" => TlsSupport::Yes,
            "no" => TlsSupport::No,
            _ => TlsSupport::Unreported,
        }
    }
}

impl fmt::Display for TlsSupport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsSupport::Yes => write!(f, "yes"),
            TlsSupport::No => write!(f, "no"),
            TlsSupport::Unreported => write!(f, "?"),
        }
    }
}

/// Identity of a proxy: two records with the same key are the same proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProxyKey {
    pub address: Ipv4Addr,
    pub port: u16,
}

impl fmt::Display for ProxyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// A proxy candidate together with what we know about it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub address: Ipv4Addr,
    pub port: u16,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default)]
    pub supports_tls: TlsSupport,
    /// Identifier of the source the record was harvested from
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_verified_ok: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_verification_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_probe_diagnostic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
}

impl ProxyRecord {
    /// Create an unverified record with unknown country and TLS support
    pub fn new(address: Ipv4Addr, port: u16, source: &str) -> Self {
        Self {
            address,
            port,
            country: default_country(),
            supports_tls: TlsSupport::Unreported,
            source: source.to_string(),
            last_verified_ok: None,
            last_failed_at: None,
            last_verification_error: None,
            last_probe_diagnostic: None,
            response_time_ms: None,
        }
    }

    pub fn with_country(mut self, country: &str) -> Self {
        let country = country.trim();
        self.country = if country.is_empty() {
            default_country()
        } else {
            country.to_string()
        };
        self
    }

    pub fn with_tls(mut self, supports_tls: TlsSupport) -> Self {
        self.supports_tls = supports_tls;
        self
    }

    pub fn key(&self) -> ProxyKey {
        ProxyKey {
            address: self.address,
            port: self.port,
        }
    }

    /// Get the proxy URL used to route requests through it
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }

    /// Get the proxy string in IP:PORT format
    pub fn to_simple_string(&self) -> String {
        self.key().to_string()
    }
}

impl fmt::Display for ProxyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.key(), self.country)
    }
}

/// Insertion-ordered set of proxy records, deduplicated by [`ProxyKey`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<ProxyRecord>", into = "Vec<ProxyRecord>")]
pub struct ProxySet {
    records: Vec<ProxyRecord>,
    index: HashMap<ProxyKey, usize>,
}

impl ProxySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the key is already present. Returns true if inserted.
    pub fn insert_if_absent(&mut self, record: ProxyRecord) -> bool {
        let key = record.key();
        if self.index.contains_key(&key) {
            return false;
        }
        self.index.insert(key, self.records.len());
        self.records.push(record);
        true
    }

    /// Insert or replace in place. Returns the replaced record, if any.
    pub fn upsert(&mut self, record: ProxyRecord) -> Option<ProxyRecord> {
        match self.index.get(&record.key()) {
            Some(&pos) => Some(std::mem::replace(&mut self.records[pos], record)),
            None => {
                self.insert_if_absent(record);
                None
            }
        }
    }

    pub fn remove(&mut self, key: &ProxyKey) -> Option<ProxyRecord> {
        let pos = self.index.remove(key)?;
        let removed = self.records.remove(pos);
        for slot in self.index.values_mut() {
            if *slot > pos {
                *slot -= 1;
            }
        }
        Some(removed)
    }

    pub fn contains(&self, key: &ProxyKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &ProxyKey) -> Option<&ProxyRecord> {
        self.index.get(key).map(|&pos| &self.records[pos])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ProxyRecord> {
        self.records.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = ProxyKey> + '_ {
        self.records.iter().map(ProxyRecord::key)
    }

    /// Append every record of `other` whose key is not present yet
    pub fn extend_absent<I: IntoIterator<Item = ProxyRecord>>(&mut self, other: I) {
        for record in other {
            self.insert_if_absent(record);
        }
    }

    pub fn into_vec(self) -> Vec<ProxyRecord> {
        self.records
    }
}

impl From<Vec<ProxyRecord>> for ProxySet {
    fn from(records: Vec<ProxyRecord>) -> Self {
        records.into_iter().collect()
    }
}

impl From<ProxySet> for Vec<ProxyRecord> {
    fn from(set: ProxySet) -> Self {
        set.into_vec()
    }
}

impl FromIterator<ProxyRecord> for ProxySet {
    fn from_iter<I: IntoIterator<Item = ProxyRecord>>(iter: I) -> Self {
        let mut set = ProxySet::new();
        set.extend_absent(iter);
        set
    }
}

impl IntoIterator for ProxySet {
    type Item = ProxyRecord;
    type IntoIter = std::vec::IntoIter<ProxyRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a ProxySet {
    type Item = &'a ProxyRecord;
    type IntoIter = std::slice::Iter<'a, ProxyRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Outcome of probing a proxy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckStatus {
    Working,
    Timeout { after_ms: u64 },
    Refused(String),
    BadStatus(u16),
    /// The proxy refused to open a CONNECT tunnel for an https target
    TunnelRejected { status: Option<u16> },
    Failed(String),
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStatus::Working => write!(f, "working"),
            CheckStatus::Timeout { after_ms } => write!(f, "timeout after {}ms", after_ms),
            CheckStatus::Refused(e) => write!(f, "connection refused: {}", e),
            CheckStatus::BadStatus(code) => write!(f, "status {}", code),
            CheckStatus::TunnelRejected { status: Some(code) } => {
                write!(f, "tunnel rejected with status {}", code)
            }
            CheckStatus::TunnelRejected { status: None } => write!(f, "tunnel rejected by proxy"),
            CheckStatus::Failed(e) => write!(f, "transport error: {}", e),
        }
    }
}

/// Detailed result of a proxy check
#[derive(Debug, Clone)]
pub struct ProxyCheckResult {
    pub record: ProxyRecord,
    pub status: CheckStatus,
    pub response_time_ms: Option<u64>,
    /// Body returned by the liveness endpoint, i.e. the address it saw
    pub body: Option<String>,
}

impl ProxyCheckResult {
    pub fn working(record: ProxyRecord, response_time_ms: u64, body: String) -> Self {
        Self {
            record,
            status: CheckStatus::Working,
            response_time_ms: Some(response_time_ms),
            body: Some(body),
        }
    }

    pub fn failed(record: ProxyRecord, status: CheckStatus) -> Self {
        Self {
            record,
            status,
            response_time_ms: None,
            body: None,
        }
    }

    pub fn is_working(&self) -> bool {
        matches!(self.status, CheckStatus::Working)
    }

    /// Human readable detail: the echoed body on success, the failure otherwise
    pub fn diagnostic(&self) -> String {
        match (&self.status, &self.body) {
            (CheckStatus::Working, Some(body)) if !body.trim().is_empty() => {
                body.split_whitespace().collect::<Vec<_>>().join(" ")
            }
            (status, _) => status.to_string(),
        }
    }

    /// Fold the outcome into the record, as of `now`
    pub fn into_stamped(self, now: DateTime<Utc>) -> ProxyRecord {
        let diagnostic = self.diagnostic();
        let mut record = self.record;
        if matches!(self.status, CheckStatus::Working) {
            record.last_verified_ok = Some(now);
            record.last_verification_error = None;
            record.response_time_ms = self.response_time_ms;
        } else {
            record.last_failed_at = Some(now);
            record.last_verification_error = Some(diagnostic.clone());
            record.response_time_ms = None;
        }
        record.last_probe_diagnostic = Some(diagnostic);
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ip: &str, port: u16) -> ProxyRecord {
        ProxyRecord::new(ip.parse().unwrap(), port, "test")
    }

    #[test]
    fn test_record_defaults() {
        let proxy = record("127.0.0.1", 8080);
        assert_eq!(proxy.country, UNKNOWN_COUNTRY);
        assert_eq!(proxy.supports_tls, TlsSupport::Unreported);
        assert_eq!(proxy.url(), "http://127.0.0.1:8080");
        assert_eq!(proxy.to_simple_string(), "127.0.0.1:8080");
    }

    #[test]
    fn test_blank_country_stays_unknown() {
        let proxy = record("127.0.0.1", 8080).with_country("  ");
        assert_eq!(proxy.country, UNKNOWN_COUNTRY);
        let proxy = record("127.0.0.1", 8080).with_country("Germany");
        assert_eq!(proxy.country, "Germany");
    }

    #[test]
    fn test_tls_from_cell() {
        assert_eq!(TlsSupport::from_cell("yes"), TlsSupport::Yes);
        assert_eq!(TlsSupport::from_cell(" No "), TlsSupport::No);
        assert_eq!(TlsSupport::from_cell(""), TlsSupport::Unreported);
        assert_eq!(TlsSupport::from_cell("maybe"), TlsSupport::Unreported);
    }

    #[test]
    fn test_set_deduplicates_by_key() {
        let mut set = ProxySet::new();
        assert!(set.insert_if_absent(record("1.2.3.4", 8080).with_country("US")));
        assert!(!set.insert_if_absent(record("1.2.3.4", 8080).with_country("DE")));
        assert!(set.insert_if_absent(record("1.2.3.4", 3128)));
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(&record("1.2.3.4", 8080).key()).unwrap().country, "US");
    }

    #[test]
    fn test_set_upsert_replaces_in_place() {
        let mut set: ProxySet = vec![record("1.1.1.1", 80), record("2.2.2.2", 80)].into();
        let old = set.upsert(record("1.1.1.1", 80).with_country("FR"));
        assert!(old.is_some());
        let order: Vec<_> = set.keys().map(|k| k.to_string()).collect();
        assert_eq!(order, vec!["1.1.1.1:80", "2.2.2.2:80"]);
        assert_eq!(set.iter().next().unwrap().country, "FR");
    }

    #[test]
    fn test_set_remove_keeps_index_consistent() {
        let mut set: ProxySet = vec![
            record("1.1.1.1", 80),
            record("2.2.2.2", 80),
            record("3.3.3.3", 80),
        ]
        .into();
        assert!(set.remove(&record("1.1.1.1", 80).key()).is_some());
        assert!(set.remove(&record("1.1.1.1", 80).key()).is_none());
        assert_eq!(set.get(&record("3.3.3.3", 80).key()).unwrap().address.to_string(), "3.3.3.3");
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_set_serializes_as_array() {
        let set: ProxySet = vec![record("1.2.3.4", 8080)].into();
        let json = serde_json::to_string(&set).unwrap();
        assert!(json.starts_with('['));
        assert!(json.contains("\"address\":\"1.2.3.4\""));
        let back: ProxySet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn test_check_result_stamping() {
        let now = Utc::now();
        let ok = ProxyCheckResult::working(record("1.2.3.4", 80), 120, "{\n \"origin\": \"1.2.3.4\"\n}".into())
            .into_stamped(now);
        assert_eq!(ok.last_verified_ok, Some(now));
        assert_eq!(ok.response_time_ms, Some(120));
        assert_eq!(ok.last_probe_diagnostic.as_deref(), Some("{ \"origin\": \"1.2.3.4\" }"));
        assert!(ok.last_verification_error.is_none());

        let bad = ProxyCheckResult::failed(record("1.2.3.4", 80), CheckStatus::BadStatus(503))
            .into_stamped(now);
        assert_eq!(bad.last_failed_at, Some(now));
        assert_eq!(bad.last_verification_error.as_deref(), Some("status 503"));
        assert!(bad.last_verified_ok.is_none());
    }

    #[test]
    fn test_check_status_diagnostics_are_distinct() {
        let timeout = CheckStatus::Timeout { after_ms: 6000 }.to_string();
        let refused = CheckStatus::Refused("os error 111".into()).to_string();
        let status = CheckStatus::BadStatus(403).to_string();
        assert!(timeout.starts_with("timeout"));
        assert!(refused.starts_with("connection refused"));
        assert_eq!(status, "status 403");
        assert_eq!(
            CheckStatus::TunnelRejected { status: Some(407) }.to_string(),
            "tunnel rejected with status 407"
        );
        assert_eq!(
            CheckStatus::TunnelRejected { status: None }.to_string(),
            "tunnel rejected by proxy"
        );
    }
}
