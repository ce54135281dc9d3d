//! Decision Engine (C6, §4.6).
//!
//! Coordinates the verdict cache, signature matcher and inference client
//! into the staged classifier result. Blacklist and rate-limit checks are
//! handled upstream by the gateway (see REDESIGN FLAGS in the design
//! document) — by the time a `Request` reaches `DecisionEngine::decide`,
//! only cache/signature/inference remain.
//!
//! Translated from
//! `examples/original_source/waf-engine/services/decision_engine.py`
//! (`analyze`, `_make_decision`, `_hash_request`).

use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::features::FeatureExtractor;
use crate::inference::InferenceClient;
use crate::model::{Action, DecidedBy, FeatureVector, Request, Verdict};
use crate::signatures::SignatureMatcher;
use crate::store::CounterStore;

pub struct DecisionEngine {
    config: Config,
    store: Arc<CounterStore>,
    signatures: SignatureMatcher,
    inference: InferenceClient,
    extractor: FeatureExtractor,
}

impl DecisionEngine {
    pub fn new(config: Config, store: Arc<CounterStore>) -> Self {
        let inference = InferenceClient::new(config.ai_service_url.clone(), config.ai_request_timeout);
        DecisionEngine {
            config,
            store,
            signatures: SignatureMatcher::new(),
            inference,
            extractor: FeatureExtractor::new(),
        }
    }

    /// Runs the cache → signature → inference pipeline (§4.6). `geo_country`
    /// and `ip_reputation` are supplied by the gateway, which has already
    /// resolved them via C1/C2.
    pub async fn decide(
        &self,
        request: &Request,
        geo_country: &str,
        ip_reputation: f64,
    ) -> Verdict {
        let started = Instant::now();
        let digest = request_digest(request);

        if let Some(cached_score) = self.store.get_verdict_cache(&digest) {
            let mut v = self.make_decision(cached_score, "Cached AI analysis".to_string(), None, None, true);
            v.latency_ms = elapsed_ms(started);
            return v;
        }

        if let Some(mut v) = self.signatures.check(request) {
            v.latency_ms = elapsed_ms(started);
            return v;
        }

        let ai_result = self
            .inference
            .analyze(request, Some(geo_country), ip_reputation)
            .await;

        let mut verdict = match ai_result {
            Some(result) => {
                self.store.set_verdict_cache(
                    &digest,
                    result.risk_score,
                    Duration::from_secs(self.config.model_cache_ttl),
                );
                let features = result.features.unwrap_or_else(|| {
                    self.extractor.extract(request, geo_country, ip_reputation)
                });
                let risk_factors = self.extractor.explain(&features, result.risk_score);
                let attack_family = result.attack_type.or_else(|| self.extractor.detect_family(request));
                let mut v = self.make_decision(
                    result.risk_score,
                    result.reason.unwrap_or_else(|| "AI analysis".to_string()),
                    attack_family,
                    None,
                    false,
                );
                v.features = features;
                v.risk_factors = risk_factors;
                v
            }
            None => {
                if self.config.fail_open {
                    Verdict {
                        action: Action::Allowed,
                        risk_score: 0.0,
                        reason: "AI service unavailable (fail-open)".to_string(),
                        attack_family: None,
                        decided_by: DecidedBy::None,
                        from_cache: false,
                        features: FeatureVector::default(),
                        risk_factors: Default::default(),
                        latency_ms: 0,
                    }
                } else {
                    Verdict {
                        action: Action::Blocked,
                        risk_score: 1.0,
                        reason: "AI service unavailable (fail-closed)".to_string(),
                        attack_family: None,
                        decided_by: DecidedBy::Failsafe,
                        from_cache: false,
                        features: FeatureVector::default(),
                        risk_factors: Default::default(),
                        latency_ms: 0,
                    }
                }
            }
        };

        verdict.latency_ms = elapsed_ms(started);
        verdict
    }

    /// Thresholds a risk score into an `Action` (§4.6):
    /// `< AI_THRESHOLD_LOW` allows, `> AI_THRESHOLD_HIGH` blocks, otherwise
    /// pending for human review. `DRY_RUN` rewrites a BLOCKED verdict to
    /// ALLOWED with the reason annotated, never suppressing PENDING.
    fn make_decision(
        &self,
        risk_score: f64,
        mut reason: String,
        attack_family: Option<crate::model::AttackFamily>,
        risk_factors: Option<std::collections::BTreeMap<String, String>>,
        from_cache: bool,
    ) -> Verdict {
        let (mut action, mut decided_by) = if risk_score < self.config.ai_threshold_low {
            (Action::Allowed, DecidedBy::None)
        } else if risk_score > self.config.ai_threshold_high {
            (Action::Blocked, DecidedBy::Ai)
        } else {
            reason.push_str(" (queued for human review)");
            (Action::Pending, DecidedBy::None)
        };

        if self.config.dry_run && action == Action::Blocked {
            action = Action::Allowed;
            decided_by = DecidedBy::None;
            reason.push_str(" (Allowed by Dry Run Mode)");
        }

        Verdict {
            action,
            risk_score,
            reason,
            attack_family,
            decided_by,
            from_cache,
            features: FeatureVector::default(),
            risk_factors: risk_factors.unwrap_or_default(),
            latency_ms: 0,
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// 128-bit digest of `method || uri || body`, used as the verdict-cache key.
/// The original hashes with MD5; this core uses SHA-256 truncated to 16
/// bytes since no dependency in this stack provides MD5 (see design notes).
fn request_digest(request: &Request) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.method.as_bytes());
    hasher.update(request.uri.as_bytes());
    hasher.update(request.body.as_bytes());
    let full = hasher.finalize();
    hex::encode(&full[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Headers;
    use chrono::Utc;

    fn req(uri: &str) -> Request {
        Request {
            method: "GET".to_string(),
            uri: uri.to_string(),
            query_string: String::new(),
            headers: Headers::default(),
            body: String::new(),
            source_ip: "203.0.113.1".to_string(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn digest_is_stable_for_same_request() {
        let a = request_digest(&req("/x"));
        let b = request_digest(&req("/x"));
        assert_eq!(a, b);
    }

    #[test]
    fn digest_differs_for_different_uri() {
        assert_ne!(request_digest(&req("/x")), request_digest(&req("/y")));
    }
}
