//! Signature Matcher (C4, §4.4).
//!
//! Ordered fallback rules for attacks the feature-based classifier might
//! miss, translated verbatim (pattern, severity and order) from
//! `examples/original_source/waf-engine/services/decision_engine.py::_check_signatures`.
//! First match wins; `uri`, `query_string` and `body` are each checked
//! independently against every rule, in rule order, so an early rule on the
//! `uri` still wins over a later rule matching only the `body`.

use lazy_static::lazy_static;
use regex::Regex;

use crate::model::{Action, AttackFamily, DecidedBy, FeatureVector, Request, Verdict};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Severity {
    Critical,
    High,
    Medium,
}

struct Signature {
    pattern: &'static str,
    family: AttackFamily,
    severity: Severity,
}

lazy_static! {
    static ref SIGNATURES: Vec<(Regex, AttackFamily, Severity)> = RAW_SIGNATURES
        .iter()
        .map(|s| {
            let re = Regex::new(&format!("(?i){}", s.pattern))
                .unwrap_or_else(|e| panic!("invalid static signature '{}': {e}", s.pattern));
            (re, s.family, s.severity)
        })
        .collect();
}

const RAW_SIGNATURES: &[Signature] = &[
    // SSRF - Cloud Metadata Endpoints
    Signature { pattern: r"169\.254\.169\.254", family: AttackFamily::Ssrf, severity: Severity::Critical },
    Signature { pattern: r"metadata\.google\.internal", family: AttackFamily::Ssrf, severity: Severity::Critical },
    Signature { pattern: r"169\.254\.169\.253", family: AttackFamily::Ssrf, severity: Severity::Critical },
    // SSRF - Localhost/Internal Access
    Signature { pattern: r"localhost", family: AttackFamily::Ssrf, severity: Severity::High },
    Signature { pattern: r"127\.0\.0\.\d+", family: AttackFamily::Ssrf, severity: Severity::High },
    Signature { pattern: r"0\.0\.0\.0", family: AttackFamily::Ssrf, severity: Severity::High },
    Signature { pattern: r"::1", family: AttackFamily::Ssrf, severity: Severity::High },
    // SSRF - Private IP Ranges
    Signature { pattern: r"10\.\d+\.\d+\.\d+", family: AttackFamily::Ssrf, severity: Severity::High },
    Signature { pattern: r"172\.(1[6-9]|2[0-9]|3[0-1])\.\d+\.\d+", family: AttackFamily::Ssrf, severity: Severity::High },
    Signature { pattern: r"192\.168\.\d+\.\d+", family: AttackFamily::Ssrf, severity: Severity::High },
    // SSRF - Protocol-based
    Signature { pattern: r"file://", family: AttackFamily::Ssrf, severity: Severity::Critical },
    Signature { pattern: r"gopher://", family: AttackFamily::Ssrf, severity: Severity::Critical },
    Signature { pattern: r"dict://", family: AttackFamily::Ssrf, severity: Severity::Critical },
    Signature { pattern: r"ftp://", family: AttackFamily::Ssrf, severity: Severity::High },
    Signature { pattern: r"tftp://", family: AttackFamily::Ssrf, severity: Severity::High },
    // Path Traversal
    Signature { pattern: r"\.\./\.\./", family: AttackFamily::PathTraversal, severity: Severity::High },
    Signature { pattern: r"/etc/passwd", family: AttackFamily::Lfi, severity: Severity::Critical },
    Signature { pattern: r"/windows/win.ini", family: AttackFamily::Lfi, severity: Severity::Critical },
    // XSS
    Signature { pattern: r"<script>", family: AttackFamily::Xss, severity: Severity::Critical },
    Signature { pattern: r"javascript:", family: AttackFamily::Xss, severity: Severity::Critical },
    Signature { pattern: r"<img\s+[^>]*onerror", family: AttackFamily::Xss, severity: Severity::Critical },
    Signature { pattern: r"<svg\s+[^>]*onload", family: AttackFamily::Xss, severity: Severity::Critical },
    Signature { pattern: r"<iframe", family: AttackFamily::Xss, severity: Severity::High },
    Signature { pattern: r"on\w+\s*=", family: AttackFamily::Xss, severity: Severity::High },
    Signature { pattern: r"alert\(", family: AttackFamily::Xss, severity: Severity::Medium },
    Signature { pattern: r"document\.cookie", family: AttackFamily::Xss, severity: Severity::Critical },
    // SQL Injection
    Signature { pattern: r"UNION\s+SELECT", family: AttackFamily::SqlInjection, severity: Severity::Critical },
    Signature { pattern: r"UNION\s+ALL\s+SELECT", family: AttackFamily::SqlInjection, severity: Severity::Critical },
    Signature { pattern: r"DROP\s+TABLE", family: AttackFamily::SqlInjection, severity: Severity::Critical },
    Signature { pattern: r#"OR\s+['"]?[\w]+['"]?\s*=\s*['"]?[\w]+['"]?"#, family: AttackFamily::SqlInjection, severity: Severity::High },
    Signature { pattern: r"1\s*=\s*1", family: AttackFamily::SqlInjection, severity: Severity::High },
    Signature { pattern: r"--", family: AttackFamily::SqlInjection, severity: Severity::Medium },
    Signature { pattern: r";", family: AttackFamily::SqlInjection, severity: Severity::Medium },
];

pub struct SignatureMatcher;

impl SignatureMatcher {
    pub fn new() -> Self {
        SignatureMatcher
    }

    /// Checks `request.uri`, `request.query_string` and `request.body`
    /// against every rule in declared order; returns the first match.
    pub fn check(&self, request: &Request) -> Option<Verdict> {
        let targets = [
            request.uri.as_str(),
            request.query_string.as_str(),
            request.body.as_str(),
        ];

        for (re, family, severity) in SIGNATURES.iter() {
            for target in targets {
                if re.is_match(target) {
                    let risk_score = if *severity == Severity::Critical { 1.0 } else { 0.8 };
                    return Some(Verdict {
                        action: Action::Blocked,
                        risk_score,
                        reason: format!("Matched signature: {family}"),
                        attack_family: Some(*family),
                        decided_by: DecidedBy::Signature,
                        from_cache: false,
                        features: FeatureVector::default(),
                        risk_factors: [("signature_match".to_string(), "true".to_string())]
                            .into_iter()
                            .collect(),
                        latency_ms: 0,
                    });
                }
            }
        }
        None
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
            headers: Headers::default(),
            body: body.to_string(),
            source_ip: "203.0.113.1".to_string(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn matches_cloud_metadata_ssrf() {
        let m = SignatureMatcher::new();
        let v = m.check(&req("/proxy", "url=http://169.254.169.254/latest/meta-data", "")).unwrap();
        assert_eq!(v.attack_family, Some(AttackFamily::Ssrf));
        assert_eq!(v.risk_score, 1.0);
    }

    #[test]
    fn matches_script_tag_xss() {
        let m = SignatureMatcher::new();
        let v = m.check(&req("/", "", "<script>alert(1)</script>")).unwrap();
        assert_eq!(v.attack_family, Some(AttackFamily::Xss));
        assert_eq!(v.action, Action::Blocked);
    }

    #[test]
    fn benign_request_does_not_match() {
        let m = SignatureMatcher::new();
        assert!(m.check(&req("/products", "page=2", "")).is_none());
    }

    #[test]
    fn medium_severity_scores_below_one() {
        let m = SignatureMatcher::new();
        let v = m.check(&req("/search", "q=1; drop nothing", "")).unwrap();
        assert!(v.risk_score <= 0.8);
    }
}
