//! Core data types (§3 of the spec): requests, geo attribution, feature
//! vectors, verdicts and the persisted decision record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Case-insensitive header map. Keys are normalized to lower-case at
/// construction so every downstream read assumes normalized keys (§9).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Headers(pub BTreeMap<String, String>);

impl Headers {
    pub fn from_pairs<I: IntoIterator<Item = (String, String)>>(pairs: I) -> Self {
        let mut map = BTreeMap::new();
        for (k, v) in pairs {
            map.insert(k.to_ascii_lowercase(), v);
        }
        Headers(map)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(&key.to_ascii_lowercase()).map(|s| s.as_str())
    }

    pub fn user_agent(&self) -> &str {
        self.get("user-agent").unwrap_or("")
    }
}

/// A single inbound request, normalized for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    pub uri: String,
    #[serde(default)]
    pub query_string: String,
    pub headers: Headers,
    #[serde(default)]
    pub body: String,
    pub source_ip: String,
    pub received_at: DateTime<Utc>,
}

impl Request {
    /// `lowercase(uri + " " + query_string + " " + body)` — the combined text
    /// used by every pattern-based feature and signature rule (§4.3/§4.4).
    pub fn full_text(&self) -> String {
        format!("{} {} {}", self.uri, self.query_string, self.body).to_lowercase()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoAttribution {
    pub country_code: String,
    pub country_name: String,
    pub city: String,
    pub lat: f64,
    pub lon: f64,
    pub is_private: bool,
}

impl GeoAttribution {
    pub fn unknown() -> Self {
        GeoAttribution {
            country_code: "XX".to_string(),
            country_name: "Unknown".to_string(),
            city: "Unknown".to_string(),
            lat: 0.0,
            lon: 0.0,
            is_private: false,
        }
    }
}

impl Eq for GeoAttribution {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttackFamily {
    SqlInjection,
    Xss,
    PathTraversal,
    Lfi,
    Ssrf,
    RateLimit,
    Blacklisted,
}

impl AttackFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttackFamily::SqlInjection => "SQL_INJECTION",
            AttackFamily::Xss => "XSS",
            AttackFamily::PathTraversal => "PATH_TRAVERSAL",
            AttackFamily::Lfi => "LFI",
            AttackFamily::Ssrf => "SSRF",
            AttackFamily::RateLimit => "RATE_LIMIT",
            AttackFamily::Blacklisted => "BLACKLISTED",
        }
    }
}

impl std::fmt::Display for AttackFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ordered, fixed-schema numeric feature vector (§3, §4.3). The order of
/// `FEATURE_NAMES` is the frozen schema expected by the external inference
/// service; `FeatureVector` keeps both the ordered values and a by-name view.
pub const FEATURE_NAMES: &[&str] = &[
    "method_is_post",
    "method_is_get",
    "uri_length",
    "query_length",
    "body_length",
    "total_length",
    "path_depth",
    "has_query",
    "num_params",
    "url_encoded_chars",
    "hex_encoded_chars",
    "unicode_chars",
    "non_ascii_ratio",
    "entropy",
    "uri_entropy",
    "sql_keyword_count",
    "sql_keyword_density",
    "has_sql_comment",
    "has_union",
    "has_select",
    "has_quotes",
    "xss_pattern_count",
    "has_script_tag",
    "has_javascript",
    "has_event_handler",
    "html_tag_count",
    "has_dot_dot",
    "path_traversal_count",
    "has_file_protocol",
    "special_char_count",
    "special_char_ratio",
    "user_agent_length",
    "has_user_agent",
    "suspicious_user_agent",
    "ip_reputation",
    "geo_risk",
];

/// Serializes/deserializes as the bare `{feature_name: value, ...}` map, not
/// `{"values": {...}}` — the inference service speaks the flat shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector {
    values: BTreeMap<String, f64>,
}

impl FeatureVector {
    pub fn builder() -> FeatureVectorBuilder {
        FeatureVectorBuilder::default()
    }

    pub fn get(&self, name: &str) -> f64 {
        self.values.get(name).copied().unwrap_or(0.0)
    }

    /// Values in the frozen `FEATURE_NAMES` order — what an inference service
    /// expecting a flat numeric array would consume.
    pub fn ordered_values(&self) -> Vec<f64> {
        FEATURE_NAMES.iter().map(|n| self.get(n)).collect()
    }

    pub fn as_map(&self) -> &BTreeMap<String, f64> {
        &self.values
    }
}

#[derive(Default)]
pub struct FeatureVectorBuilder {
    values: BTreeMap<String, f64>,
}

impl FeatureVectorBuilder {
    pub fn set(mut self, name: &str, value: f64) -> Self {
        debug_assert!(
            FEATURE_NAMES.contains(&name),
            "feature '{name}' is not part of the frozen schema"
        );
        self.values.insert(name.to_string(), value);
        self
    }

    pub fn build(self) -> FeatureVector {
        FeatureVector { values: self.values }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Allowed,
    Blocked,
    Pending,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Allowed => "ALLOWED",
            Action::Blocked => "BLOCKED",
            Action::Pending => "PENDING",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecidedBy {
    Blacklist,
    RateLimiter,
    Signature,
    Ai,
    Cache,
    None,
    Failsafe,
}

impl DecidedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecidedBy::Blacklist => "BLACKLIST",
            DecidedBy::RateLimiter => "RATE_LIMITER",
            DecidedBy::Signature => "SIGNATURE",
            DecidedBy::Ai => "AI",
            DecidedBy::Cache => "CACHE",
            DecidedBy::None => "NONE",
            DecidedBy::Failsafe => "FAILSAFE",
        }
    }
}

/// The outcome of the staged classifier (§3). Construction is left to
/// `decision.rs`/`signatures.rs`/`gateway.rs`, which uphold the stated
/// invariants (ALLOWED implies decided_by=NONE, etc).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub action: Action,
    pub risk_score: f64,
    pub reason: String,
    pub attack_family: Option<AttackFamily>,
    pub decided_by: DecidedBy,
    pub from_cache: bool,
    pub features: FeatureVector,
    pub risk_factors: BTreeMap<String, String>,
    pub latency_ms: u64,
}

impl Verdict {
    pub fn blacklisted() -> Self {
        Verdict {
            action: Action::Blocked,
            risk_score: 1.0,
            reason: "IP in blacklist".to_string(),
            attack_family: Some(AttackFamily::Blacklisted),
            decided_by: DecidedBy::Blacklist,
            from_cache: false,
            features: FeatureVector::default(),
            risk_factors: BTreeMap::new(),
            latency_ms: 0,
        }
    }

    pub fn rate_limited() -> Self {
        Verdict {
            action: Action::Blocked,
            risk_score: 1.0,
            reason: "Rate limit exceeded".to_string(),
            attack_family: Some(AttackFamily::RateLimit),
            decided_by: DecidedBy::RateLimiter,
            from_cache: false,
            features: FeatureVector::default(),
            risk_factors: BTreeMap::new(),
            latency_ms: 0,
        }
    }
}

/// A persisted `Verdict` enriched with request/geo context and an assigned,
/// immutable id (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub source_ip: String,
    pub method: String,
    pub uri: String,
    pub query_string: String,
    pub headers: Headers,
    pub body: String,
    pub geo: GeoAttribution,
    pub verdict: Verdict,
    pub human_decision: Option<String>,
    pub human_reviewer: Option<String>,
    pub human_reviewed_at: Option<DateTime<Utc>>,
    pub human_notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IpReputation {
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub reputation_score: f64,
}

impl Default for IpReputation {
    fn default() -> Self {
        IpReputation {
            total_requests: 0,
            blocked_requests: 0,
            reputation_score: 0.5,
        }
    }
}

/// High-risk countries used by the feature extractor's `geo_risk` feature.
pub const HIGH_RISK_COUNTRIES: &[&str] = &["XX", "CN", "RU", "KP"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_are_case_insensitive() {
        let h = Headers::from_pairs([("User-Agent".to_string(), "curl/8".to_string())]);
        assert_eq!(h.get("user-agent"), Some("curl/8"));
        assert_eq!(h.get("USER-AGENT"), Some("curl/8"));
    }

    #[test]
    fn feature_vector_defaults_to_zero() {
        let fv = FeatureVector::builder().set("uri_length", 12.0).build();
        assert_eq!(fv.get("uri_length"), 12.0);
        assert_eq!(fv.get("body_length"), 0.0);
        assert_eq!(fv.ordered_values().len(), FEATURE_NAMES.len());
    }
}
