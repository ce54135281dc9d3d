//! Request Gateway (C9, §4.9) — the unified entry point.
//!
//! `Core` owns handles to every other component (explicit dependency
//! injection, no ambient app state — §9) and is the only type the HTTP
//! layer (`api.rs`) talks to. Translated from the orchestration implied by
//! `examples/original_source/waf-engine/main.py` plus
//! `decision_engine.py::analyze`'s blacklist/rate-limit prelude, now moved
//! here per the REDESIGN FLAGS (gateway owns the single rate-limit check).

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::broadcast::{Broadcaster, Subscriber};
use crate::config::Config;
use crate::decision::DecisionEngine;
use crate::error::CoreError;
use crate::eventlog::{
    AggregateRange, AggregateResult, EventLogStore, HighSeverityEvent, HumanDecision, ListFilter,
    TodayStatistics, TopAttackingIp,
};
use crate::geoip::GeoIpResolver;
use crate::model::{Action, DecisionRecord, IpReputation, Request, Verdict};
use crate::store::CounterStore;

pub struct Core {
    config: Config,
    geoip: GeoIpResolver,
    store: Arc<CounterStore>,
    decision: DecisionEngine,
    eventlog: Arc<EventLogStore>,
    broadcaster: Arc<Broadcaster>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub action: Action,
    pub risk_score: f64,
    pub reason: String,
    #[serde(rename = "attack_type")]
    pub attack_family: Option<String>,
    pub decision_id: i64,
    pub latency_ms: u64,
}

impl Core {
    pub fn new(config: Config) -> Result<Self, CoreError> {
        let store = Arc::new(CounterStore::new());
        let geoip = GeoIpResolver::new(config.geoip_db_path.clone());
        let eventlog = Arc::new(EventLogStore::new(&config.database_url)?);
        let decision = DecisionEngine::new(config.clone(), store.clone());
        let broadcaster = Arc::new(Broadcaster::new());

        Ok(Core {
            config,
            geoip,
            store,
            decision,
            eventlog,
            broadcaster,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Per-dependency health for `/health`: the event log is the only
    /// dependency that can actually be unreachable (a dropped sqlite
    /// connection); the counter store and GeoIP resolver are in-process and
    /// always live.
    pub fn dependency_health(&self) -> [(&'static str, bool); 3] {
        [
            ("event_log", self.eventlog.is_healthy()),
            ("counter_store", true),
            ("geoip", true),
        ]
    }

    pub fn subscribe(&self) -> Subscriber {
        self.broadcaster.subscribe()
    }

    /// Runs the full pipeline for `request`, persists the resulting record,
    /// and broadcasts it. Never returns an error: every dependency fault is
    /// resolved locally (blacklist/rate-limit/cache misses, fail-open
    /// inference, logged-but-ignored persistence/broadcast failures) — no
    /// stage below this point calls `unwrap`/`expect` on a fallible
    /// dependency result. The caller (`api::analyze_request`) additionally
    /// wraps this call so an unexpected panic still yields the documented
    /// fail-open shape rather than taking the connection down.
    pub async fn analyze_request(&self, request: Request) -> AnalyzeResponse {
        let started = Instant::now();

        let verdict = if self.store.is_blacklisted(&request.source_ip) {
            Verdict::blacklisted()
        } else if !self.store.check_rate_limit(
            &request.source_ip,
            self.config.rate_limit_requests,
            Duration::from_secs(self.config.rate_limit_window),
        ) {
            Verdict::rate_limited()
        } else {
            let geo = self.geoip.resolve(&request.source_ip);
            let reputation = self.reputation_for(&request.source_ip);
            let mut v = self
                .decision
                .decide(&request, &geo.country_code, reputation.reputation_score)
                .await;
            v.latency_ms = started.elapsed().as_millis() as u64;

            let record = DecisionRecord {
                id: 0,
                timestamp: request.received_at,
                source_ip: request.source_ip.clone(),
                method: request.method.clone(),
                uri: request.uri.clone(),
                query_string: request.query_string.clone(),
                headers: request.headers.clone(),
                body: request.body.clone(),
                geo,
                verdict: v,
                human_decision: None,
                human_reviewer: None,
                human_reviewed_at: None,
                human_notes: None,
            };

            return self.persist_and_broadcast(record, started);
        };

        let decision_id = match self.persist_verdict(&request, verdict.clone()) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(error = %e, "failed to persist decision record");
                0
            }
        };

        AnalyzeResponse {
            action: verdict.action,
            risk_score: verdict.risk_score,
            reason: verdict.reason,
            attack_family: verdict.attack_family.map(|f| f.as_str().to_string()),
            decision_id,
            latency_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn persist_and_broadcast(&self, mut record: DecisionRecord, started: Instant) -> AnalyzeResponse {
        let decision_id = match self.eventlog.store(&record) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(error = %e, source_ip = %record.source_ip, "failed to persist decision record");
                0
            }
        };
        record.id = decision_id;

        self.broadcaster.publish(json!({
            "type": "new_request",
            "data": {
                "id": record.id,
                "source_ip": record.source_ip,
                "method": record.method,
                "uri": record.uri,
                "query_string": record.query_string,
                "body": record.body,
                "headers": record.headers,
                "geo": record.geo,
                "action": record.verdict.action.as_str(),
                "risk_score": record.verdict.risk_score,
                "attack_family": record.verdict.attack_family.map(|f| f.as_str()),
            }
        }));

        AnalyzeResponse {
            action: record.verdict.action,
            risk_score: record.verdict.risk_score,
            reason: record.verdict.reason,
            attack_family: record.verdict.attack_family.map(|f| f.as_str().to_string()),
            decision_id: record.id,
            latency_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn persist_verdict(&self, request: &Request, verdict: Verdict) -> Result<i64, CoreError> {
        let geo = self.geoip.resolve(&request.source_ip);
        let record = DecisionRecord {
            id: 0,
            timestamp: request.received_at,
            source_ip: request.source_ip.clone(),
            method: request.method.clone(),
            uri: request.uri.clone(),
            query_string: request.query_string.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            geo: geo.clone(),
            verdict: verdict.clone(),
            human_decision: None,
            human_reviewer: None,
            human_reviewed_at: None,
            human_notes: None,
        };
        let id = self.eventlog.store(&record)?;
        self.broadcaster.publish(json!({
            "type": "new_request",
            "data": {
                "id": id,
                "source_ip": request.source_ip,
                "method": request.method,
                "uri": request.uri,
                "action": verdict.action.as_str(),
                "risk_score": verdict.risk_score,
                "attack_family": verdict.attack_family.map(|f| f.as_str()),
                "geo": geo,
            }
        }));
        Ok(id)
    }

    fn reputation_for(&self, ip: &str) -> IpReputation {
        if let Some(rep) = self.store.get_reputation(ip) {
            return rep;
        }
        let rep = self.eventlog.get_reputation(ip).unwrap_or_default();
        self.store.set_reputation(
            ip,
            rep,
            Duration::from_secs(self.config.ip_reputation_ttl),
        );
        rep
    }

    /// Background sweep of expired counter-store entries; intended to run
    /// on an interval from `main.rs`.
    pub fn sweep_expired(&self) {
        self.store.sweep_expired();
    }

    // --- Admin operations (§4.9), each a thin wrapper that surfaces faults
    // as typed errors rather than swallowing them. ---

    pub fn blacklist(&self, ip: &str, ttl: Duration) {
        self.store.blacklist(ip, ttl);
        tracing::info!(ip, ttl_secs = ttl.as_secs(), "IP blacklisted");
    }

    pub fn whitelist(&self, ip: &str) {
        self.store.whitelist(ip);
        tracing::info!(ip, "IP whitelisted");
    }

    pub fn list_requests(&self, filter: ListFilter) -> Result<Vec<DecisionRecord>, CoreError> {
        self.eventlog.list(filter)
    }

    pub fn list_pending(&self) -> Result<Vec<DecisionRecord>, CoreError> {
        self.eventlog.list_pending()
    }

    pub fn record_feedback(
        &self,
        decision_id: i64,
        decision: HumanDecision,
        reviewer: &str,
        notes: Option<&str>,
    ) -> Result<(), CoreError> {
        self.eventlog
            .update_human_decision(decision_id, decision, reviewer, notes)?;
        let is_malicious = decision == HumanDecision::Block;
        self.eventlog
            .promote_to_training(decision_id, is_malicious, reviewer)?;
        tracing::info!(decision_id, reviewer, "feedback recorded and promoted to training");
        Ok(())
    }

    pub fn today_statistics(&self) -> Result<TodayStatistics, CoreError> {
        self.eventlog.today_statistics()
    }

    pub fn top_attacking_ips(&self, limit: i64) -> Result<Vec<TopAttackingIp>, CoreError> {
        self.eventlog.top_attacking_ips(limit)
    }

    pub fn recent_high_severity(&self, limit: i64) -> Result<Vec<HighSeverityEvent>, CoreError> {
        self.eventlog.recent_high_severity(limit)
    }

    pub fn aggregate(&self, range: AggregateRange) -> Result<AggregateResult, CoreError> {
        self.eventlog.aggregate(range)
    }

    pub fn ip_reputation(&self, ip: &str) -> IpReputation {
        self.reputation_for(ip)
    }

    pub fn geo_for(&self, ip: &str) -> crate::model::GeoAttribution {
        self.geoip.resolve(ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Headers;
    use chrono::Utc;
    use tempfile::NamedTempFile;

    fn test_core() -> (Core, NamedTempFile) {
        let tmp = NamedTempFile::new().unwrap();
        let mut config = Config::load();
        config.database_url = tmp.path().to_str().unwrap().to_string();
        config.ai_service_url = "http://127.0.0.1:1".to_string();
        config.ai_request_timeout = Duration::from_millis(50);
        let core = Core::new(config).unwrap();
        (core, tmp)
    }

    fn req(ip: &str, uri: &str, query: &str) -> Request {
        Request {
            method: "GET".to_string(),
            uri: uri.to_string(),
            query_string: query.to_string(),
            headers: Headers::default(),
            body: String::new(),
            source_ip: ip.to_string(),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn blacklisted_ip_is_blocked_without_reaching_inference() {
        let (core, _tmp) = test_core();
        core.blacklist("6.6.6.6", Duration::from_secs(60));
        let resp = core.analyze_request(req("6.6.6.6", "/", "")).await;
        assert_eq!(resp.action, Action::Blocked);
        assert_eq!(resp.risk_score, 1.0);
    }

    #[tokio::test]
    async fn signature_match_blocks_without_inference() {
        let (core, _tmp) = test_core();
        let resp = core
            .analyze_request(req("203.0.113.5", "/fetch", "u=http://169.254.169.254/"))
            .await;
        assert_eq!(resp.action, Action::Blocked);
        assert_eq!(resp.attack_family.as_deref(), Some("SSRF"));
    }

    #[tokio::test]
    async fn rate_limit_blocks_after_threshold() {
        let (core, _tmp) = test_core();
        let mut last = None;
        for _ in 0..6 {
            last = Some(core.analyze_request(req("7.7.7.7", "/x", "")).await);
        }
        assert_eq!(last.unwrap().action, Action::Blocked);
    }
}
