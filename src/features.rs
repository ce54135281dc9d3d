//! Feature Extractor (C3, §4.3).
//!
//! Translated from `examples/original_source/ai-service/model/feature_extractor.py`.
//! Produces the frozen-schema `FeatureVector` consumed by the inference
//! client and explains a risk score back into human-readable factors for
//! the decision record.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;

use crate::model::{FeatureVector, Request, HIGH_RISK_COUNTRIES};

const SQL_KEYWORDS: &[&str] = &[
    "union", "select", "insert", "update", "delete", "drop", "create", "alter", "exec",
    "execute", "script", "javascript", "eval", "expression", "from", "where", "having",
    "group", "order", "limit", "offset", "--", "/*", "*/", "xp_", "sp_", "char(", "concat",
    "waitfor",
];

const EVENT_HANDLERS: &[&str] = &["onerror", "onload", "onclick", "onmouseover", "onfocus"];

const PATH_TRAVERSAL_PATTERNS: &[&str] = &[
    "../",
    "..\\",
    "%2e%2e/",
    "%2e%2e\\",
    "..../",
    "....\\",
    "/etc/passwd",
    "/etc/shadow",
    "c:\\windows",
    "file://",
    "gopher://",
];

const SUSPICIOUS_USER_AGENTS: &[&str] = &[
    "sqlmap",
    "nikto",
    "nmap",
    "masscan",
    "burp",
    "zap",
    "python-requests",
    "curl",
    "wget",
    "bot",
    "crawler",
    "spider",
];

lazy_static! {
    static ref XSS_PATTERNS: Vec<Regex> = [
        r"(?i)<script[^>]*>",
        r"(?i)javascript:",
        r"(?i)onerror\s*=",
        r"(?i)onload\s*=",
        r"(?i)onclick\s*=",
        r"(?i)<iframe",
        r"(?i)<embed",
        r"(?i)<object",
        r"(?i)alert\(",
        r"(?i)document\.cookie",
        r"(?i)window\.location",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static XSS pattern is valid"))
    .collect();
    static ref URL_ENCODED_RE: Regex = Regex::new(r"%[0-9A-Fa-f]{2}").unwrap();
    static ref HEX_ENCODED_RE: Regex = Regex::new(r"0x[0-9A-Fa-f]+").unwrap();
    static ref UNICODE_ESCAPE_RE: Regex = Regex::new(r"\\u[0-9A-Fa-f]{4}").unwrap();
    static ref SPECIAL_CHAR_RE: Regex = Regex::new(r#"[<>'";&|$`\\]"#).unwrap();
}

pub struct FeatureExtractor;

impl FeatureExtractor {
    pub fn new() -> Self {
        FeatureExtractor
    }

    /// Builds the full frozen-schema feature vector for `request` (§4.3).
    pub fn extract(
        &self,
        request: &Request,
        geo_country: &str,
        ip_reputation: f64,
    ) -> FeatureVector {
        let full_text = request.full_text();
        let uri = &request.uri;
        let query_string = &request.query_string;
        let body = &request.body;
        let user_agent = request.headers.user_agent();

        FeatureVector::builder()
            .set("method_is_post", bool_f(request.method.eq_ignore_ascii_case("POST")))
            .set("method_is_get", bool_f(request.method.eq_ignore_ascii_case("GET")))
            .set("uri_length", uri.chars().count() as f64)
            .set("query_length", query_string.chars().count() as f64)
            .set("body_length", body.chars().count() as f64)
            .set("total_length", full_text.chars().count() as f64)
            .set("path_depth", uri.matches('/').count() as f64)
            .set("has_query", bool_f(!query_string.is_empty()))
            .set(
                "num_params",
                if query_string.is_empty() {
                    0.0
                } else {
                    query_string.matches('&').count() as f64 + 1.0
                },
            )
            .set("url_encoded_chars", URL_ENCODED_RE.find_iter(&full_text).count() as f64)
            .set("hex_encoded_chars", HEX_ENCODED_RE.find_iter(&full_text).count() as f64)
            .set("unicode_chars", UNICODE_ESCAPE_RE.find_iter(&full_text).count() as f64)
            .set("non_ascii_ratio", non_ascii_ratio(&full_text))
            .set("entropy", shannon_entropy(&full_text))
            .set("uri_entropy", shannon_entropy(uri))
            .set("sql_keyword_count", count_sql_keywords(&full_text) as f64)
            .set("sql_keyword_density", sql_keyword_density(&full_text))
            .set("has_sql_comment", bool_f(full_text.contains("--") || full_text.contains("/*")))
            .set("has_union", bool_f(full_text.contains("union")))
            .set("has_select", bool_f(full_text.contains("select")))
            .set(
                "has_quotes",
                (full_text.matches('\'').count() + full_text.matches('"').count()) as f64,
            )
            .set("xss_pattern_count", count_xss_patterns(&full_text) as f64)
            .set("has_script_tag", bool_f(full_text.contains("<script")))
            .set("has_javascript", bool_f(full_text.contains("javascript:")))
            .set("has_event_handler", bool_f(has_event_handler(&full_text)))
            .set("html_tag_count", full_text.matches('<').count() as f64)
            .set("has_dot_dot", bool_f(full_text.contains("..")))
            .set("path_traversal_count", count_path_traversal(&full_text) as f64)
            .set(
                "has_file_protocol",
                bool_f(full_text.contains("file://") || full_text.contains("gopher://")),
            )
            .set("special_char_count", count_special_chars(&full_text) as f64)
            .set("special_char_ratio", special_char_ratio(&full_text))
            .set("user_agent_length", user_agent.chars().count() as f64)
            .set("has_user_agent", bool_f(!user_agent.is_empty()))
            .set("suspicious_user_agent", bool_f(is_suspicious_user_agent(user_agent)))
            .set("ip_reputation", ip_reputation)
            .set("geo_risk", geo_risk(geo_country))
            .build()
    }

    /// Scores each attack family by weighted keyword hits and returns the
    /// argmax, ties broken by the order families are listed here, or `None`
    /// when every score is zero. Translated from `detect_attack_type`.
    pub fn detect_family(&self, request: &Request) -> Option<crate::model::AttackFamily> {
        use crate::model::AttackFamily;

        let full_text = request.full_text();
        let mut scores: [(AttackFamily, u32); 4] = [
            (AttackFamily::SqlInjection, 0),
            (AttackFamily::Xss, 0),
            (AttackFamily::PathTraversal, 0),
            (AttackFamily::Ssrf, 0),
        ];

        if ["union", "select", "insert", "--", "xp_"].iter().any(|kw| full_text.contains(kw)) {
            scores[0].1 += 3;
        }
        if full_text.contains('\'') || full_text.contains('"') {
            scores[0].1 += 1;
        }

        if full_text.contains("<script") || full_text.contains("javascript:") {
            scores[1].1 += 3;
        }
        if ["onerror", "onload", "onclick"].iter().any(|h| full_text.contains(h)) {
            scores[1].1 += 2;
        }
        if full_text.contains("alert(") {
            scores[1].1 += 2;
        }

        if full_text.contains("..") {
            scores[2].1 += 3;
        }
        if full_text.contains("/etc/passwd") || full_text.contains("c:\\windows") {
            scores[2].1 += 3;
        }

        if ["file://", "gopher://", "dict://"].iter().any(|p| full_text.contains(p)) {
            scores[3].1 += 3;
        }
        if full_text.contains("localhost") || full_text.contains("127.0.0.1") {
            scores[3].1 += 1;
        }

        let max_score = scores.iter().map(|(_, s)| *s).max().unwrap_or(0);
        if max_score == 0 {
            return None;
        }
        scores.into_iter().find(|(_, s)| *s == max_score).map(|(family, _)| family)
    }

    /// Human-readable risk factors surfaced alongside a `Verdict` (§4.3).
    pub fn explain(&self, features: &FeatureVector, risk_score: f64) -> BTreeMap<String, String> {
        let mut factors = BTreeMap::new();

        let sql_count = features.get("sql_keyword_count");
        if sql_count > 2.0 {
            factors.insert(
                "sql_keywords".to_string(),
                format!("Detected {} SQL keywords", sql_count as i64),
            );
        }

        let xss_count = features.get("xss_pattern_count");
        if xss_count > 0.0 {
            factors.insert(
                "xss_patterns".to_string(),
                format!("Detected {} XSS patterns", xss_count as i64),
            );
        }

        if features.get("path_traversal_count") > 0.0 {
            factors.insert(
                "path_traversal".to_string(),
                "Path traversal attempt detected".to_string(),
            );
        }

        let entropy = features.get("entropy");
        if entropy > 5.0 {
            factors.insert(
                "high_entropy".to_string(),
                format!("Unusually high randomness (entropy: {entropy:.2})"),
            );
        }

        let url_encoded = features.get("url_encoded_chars");
        if url_encoded > 10.0 {
            factors.insert(
                "encoding".to_string(),
                format!("Excessive URL encoding ({} chars)", url_encoded as i64),
            );
        }

        if features.get("ip_reputation") < 0.3 {
            factors.insert("ip_reputation".to_string(), "Low IP reputation score".to_string());
        }

        if features.get("suspicious_user_agent") > 0.0 {
            factors.insert("user_agent".to_string(), "Suspicious user agent detected".to_string());
        }

        let _ = risk_score;
        factors
    }
}

fn bool_f(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn non_ascii_ratio(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    let total = text.chars().count();
    let non_ascii = text.chars().filter(|c| !c.is_ascii()).count();
    non_ascii as f64 / total as f64
}

/// Shannon entropy in bits, over the character distribution of `text`.
fn shannon_entropy(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    let mut counts: BTreeMap<char, usize> = BTreeMap::new();
    for c in text.chars() {
        *counts.entry(c).or_insert(0) += 1;
    }
    let length = text.chars().count() as f64;
    -counts
        .values()
        .map(|&count| {
            let p = count as f64 / length;
            p * p.log2()
        })
        .sum::<f64>()
}

fn count_sql_keywords(text: &str) -> usize {
    SQL_KEYWORDS.iter().map(|kw| text.matches(kw).count()).sum()
}

fn sql_keyword_density(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    let word_count = text.split_whitespace().count().max(1);
    count_sql_keywords(text) as f64 / word_count as f64
}

fn count_xss_patterns(text: &str) -> usize {
    XSS_PATTERNS.iter().map(|re| re.find_iter(text).count()).sum()
}

fn has_event_handler(text: &str) -> bool {
    EVENT_HANDLERS.iter().any(|h| text.contains(h))
}

fn count_path_traversal(text: &str) -> usize {
    PATH_TRAVERSAL_PATTERNS
        .iter()
        .map(|p| text.matches(&p.to_lowercase()).count())
        .sum()
}

fn count_special_chars(text: &str) -> usize {
    SPECIAL_CHAR_RE.find_iter(text).count()
}

fn special_char_ratio(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    count_special_chars(text) as f64 / text.chars().count() as f64
}

fn is_suspicious_user_agent(user_agent: &str) -> bool {
    let ua_lower = user_agent.to_lowercase();
    SUSPICIOUS_USER_AGENTS.iter().any(|p| ua_lower.contains(p))
}

fn geo_risk(country_code: &str) -> f64 {
    if HIGH_RISK_COUNTRIES.contains(&country_code) {
        0.7
    } else {
        0.3
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Headers;
    use chrono::Utc;

    fn req(uri: &str, query: &str, body: &str) -> Request {
        Request {
            method: "GET".to_string(),
            uri: uri.to_string(),
            query_string: query.to_string(),
            headers: Headers::from_pairs([("user-agent".to_string(), "curl/8.0".to_string())]),
            body: body.to_string(),
            source_ip: "203.0.113.1".to_string(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn benign_request_has_low_signal() {
        let fx = FeatureExtractor::new();
        let f = fx.extract(&req("/api/products", "page=1", ""), "US", 0.5);
        assert_eq!(f.get("has_sql_comment"), 0.0);
        assert_eq!(f.get("xss_pattern_count"), 0.0);
        assert_eq!(f.get("path_traversal_count"), 0.0);
    }

    #[test]
    fn sql_injection_trips_keyword_and_quote_features() {
        let fx = FeatureExtractor::new();
        let f = fx.extract(&req("/login", "id=1' OR '1'='1", ""), "US", 0.5);
        assert!(f.get("sql_keyword_count") >= 1.0);
        assert!(f.get("has_quotes") >= 2.0);
    }

    #[test]
    fn xss_payload_is_detected() {
        let fx = FeatureExtractor::new();
        let f = fx.extract(&req("/comment", "text=<script>alert(1)</script>", ""), "US", 0.5);
        assert_eq!(f.get("has_script_tag"), 1.0);
        assert!(f.get("xss_pattern_count") >= 2.0);
    }

    #[test]
    fn high_risk_geo_raises_geo_risk() {
        let fx = FeatureExtractor::new();
        let f = fx.extract(&req("/", "", ""), "RU", 0.5);
        assert_eq!(f.get("geo_risk"), 0.7);
        let f2 = fx.extract(&req("/", "", ""), "US", 0.5);
        assert_eq!(f2.get("geo_risk"), 0.3);
    }

    #[test]
    fn empty_text_has_zero_entropy() {
        assert_eq!(shannon_entropy(""), 0.0);
    }

    #[test]
    fn explain_flags_high_sql_count() {
        let fx = FeatureExtractor::new();
        let f = fx.extract(
            &req("/", "union select from where group order limit offset", ""),
            "US",
            0.5,
        );
        let factors = fx.explain(&f, 0.9);
        assert!(factors.contains_key("sql_keywords"));
    }

    #[test]
    fn detect_family_picks_highest_scoring_attack() {
        let fx = FeatureExtractor::new();
        let family = fx.detect_family(&req("/search", "q=' union select 1--", ""));
        assert_eq!(family, Some(crate::model::AttackFamily::SqlInjection));
    }

    #[test]
    fn detect_family_is_none_for_benign_request() {
        let fx = FeatureExtractor::new();
        assert_eq!(fx.detect_family(&req("/home", "", "")), None);
    }
}
