//! Inference Client (C5, §4.5).
//!
//! A thin `reqwest` wrapper around the external scoring service, translated
//! from `_call_ai_service` in
//! `examples/original_source/waf-engine/services/decision_engine.py`. Every
//! fault (non-2xx, timeout, transport error) is swallowed here and reported
//! as `None` — the decision engine is solely responsible for turning a
//! missing score into fail-open/fail-closed behavior (§4.6).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::model::{AttackFamily, FeatureVector, Headers, Request};

#[derive(Debug, Serialize)]
struct InferenceRequest<'a> {
    method: &'a str,
    uri: &'a str,
    query_string: &'a str,
    headers: &'a Headers,
    body: &'a str,
    source_ip: &'a str,
    geo_country: Option<&'a str>,
    ip_reputation: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceResult {
    pub risk_score: f64,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub attack_type: Option<AttackFamily>,
    #[serde(default)]
    pub features: Option<FeatureVector>,
}

pub struct InferenceClient {
    http: reqwest::Client,
    base_url: String,
}

impl InferenceClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client with a fixed timeout always builds");
        InferenceClient {
            http,
            base_url: base_url.into(),
        }
    }

    /// POSTs the request context to `{base_url}/analyze`. Returns `None` on
    /// any fault — callers never distinguish timeout from transport error
    /// from non-2xx, matching the original's blanket `except` handling.
    pub async fn analyze(
        &self,
        request: &Request,
        geo_country: Option<&str>,
        ip_reputation: f64,
    ) -> Option<InferenceResult> {
        let payload = InferenceRequest {
            method: &request.method,
            uri: &request.uri,
            query_string: &request.query_string,
            headers: &request.headers,
            body: &request.body,
            source_ip: &request.source_ip,
            geo_country,
            ip_reputation,
        };

        let url = format!("{}/analyze", self.base_url.trim_end_matches('/'));
        let response = match self.http.post(&url).json(&payload).send().await {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => {
                tracing::error!("AI service timeout");
                return None;
            }
            Err(e) => {
                tracing::error!(error = %e, "error calling AI service");
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::error!(status = %response.status(), "AI service returned non-2xx");
            return None;
        }

        match response.json::<InferenceResult>().await {
            Ok(result) => Some(result),
            Err(e) => {
                tracing::error!(error = %e, "AI service response did not decode");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_construction_does_not_panic() {
        let _ = InferenceClient::new("http://ai-service:5001", Duration::from_secs(5));
    }
}
