//! Event Log Store (C7, §4.7).
//!
//! Durable append-only history of every decision, backed by a single
//! `rusqlite` connection behind `parking_lot::Mutex` — the embedded
//! single-writer collapse of the distilled source's pooled Postgres
//! connection (5 min / 20 max, see `database.py::connect`); `DATABASE_URL`
//! is read and logged at startup but otherwise describes a topology this
//! store does not have. Query shapes (today's stats, top attacking IPs,
//! recent high-severity events) are translated from
//! `examples/original_source/waf-engine/services/database.py` and
//! `analytics.py`. The schema/connection idiom (WAL pragmas,
//! `prepare_cached`, `Arc<Mutex<Connection>>`) is grounded on
//! `examples/cooprefr-bettersys/rust-backend/src/signals/db_storage.rs`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::CoreError;
use crate::model::{Action, AttackFamily, DecisionRecord, GeoAttribution, Headers, IpReputation, Verdict};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    epoch_seconds INTEGER NOT NULL,
    source_ip TEXT NOT NULL,
    method TEXT NOT NULL,
    uri TEXT NOT NULL,
    query_string TEXT NOT NULL DEFAULT '',
    headers_json TEXT NOT NULL,
    body TEXT NOT NULL DEFAULT '',
    geo_country TEXT,
    geo_city TEXT,
    geo_lat REAL,
    geo_lon REAL,
    risk_score REAL NOT NULL,
    risk_factors_json TEXT NOT NULL,
    features_json TEXT NOT NULL,
    action TEXT NOT NULL,
    attack_family TEXT,
    decided_by TEXT NOT NULL,
    decision_latency_ms INTEGER NOT NULL,
    human_decision TEXT,
    human_reviewer TEXT,
    human_reviewed_at TEXT,
    human_notes TEXT
);

CREATE INDEX IF NOT EXISTS idx_requests_timestamp ON requests(timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_requests_action ON requests(action);
CREATE INDEX IF NOT EXISTS idx_requests_risk_score ON requests(risk_score);
CREATE INDEX IF NOT EXISTS idx_requests_source_ip ON requests(source_ip);

CREATE TABLE IF NOT EXISTS training_data (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    request_id INTEGER NOT NULL,
    features_json TEXT NOT NULL,
    is_malicious INTEGER NOT NULL,
    attack_family TEXT,
    labeled_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(request_id, labeled_by)
);
"#;

pub struct EventLogStore {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Default)]
pub struct ListFilter {
    pub limit: i64,
    pub offset: i64,
    pub action: Option<Action>,
    pub min_risk_score: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HumanDecision {
    Allow,
    Block,
}

impl HumanDecision {
    fn as_str(&self) -> &'static str {
        match self {
            HumanDecision::Allow => "ALLOW",
            HumanDecision::Block => "BLOCK",
        }
    }

    fn resulting_action(&self) -> Action {
        match self {
            HumanDecision::Allow => Action::Allowed,
            HumanDecision::Block => Action::Blocked,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum AggregateRange {
    Minutes15,
    Hour1,
    Day1,
    Week1,
}

impl AggregateRange {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "15m" => Some(AggregateRange::Minutes15),
            "1h" => Some(AggregateRange::Hour1),
            "24h" => Some(AggregateRange::Day1),
            "7d" => Some(AggregateRange::Week1),
            _ => None,
        }
    }

    fn window_seconds(&self) -> i64 {
        match self {
            AggregateRange::Minutes15 => 15 * 60,
            AggregateRange::Hour1 => 60 * 60,
            AggregateRange::Day1 => 24 * 60 * 60,
            AggregateRange::Week1 => 7 * 24 * 60 * 60,
        }
    }

    fn bucket_seconds(&self) -> i64 {
        match self {
            AggregateRange::Minutes15 => 60,
            AggregateRange::Hour1 => 5 * 60,
            AggregateRange::Day1 => 60 * 60,
            AggregateRange::Week1 => 6 * 60 * 60,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AggregateBucket {
    pub bucket_start: i64,
    pub request_count: i64,
    pub avg_latency_ms: f64,
    pub max_latency_ms: i64,
}

#[derive(Debug, Serialize)]
pub struct AggregateSummary {
    pub total_requests: i64,
    pub unique_source_ips: i64,
    pub attack_family_distribution: BTreeMap<String, i64>,
}

#[derive(Debug, Serialize)]
pub struct AggregateResult {
    pub buckets: Vec<AggregateBucket>,
    pub summary: AggregateSummary,
}

#[derive(Debug, Serialize, Default)]
pub struct TodayStatistics {
    pub total_requests: i64,
    pub allowed_requests: i64,
    pub blocked_requests: i64,
    pub pending_requests: i64,
    pub avg_risk_score: f64,
    pub avg_latency_ms: f64,
    pub unique_ips: i64,
    pub top_attack_families: Vec<(String, i64)>,
    pub top_attacking_ips: Vec<(String, i64)>,
}

#[derive(Debug, Serialize)]
pub struct TopAttackingIp {
    pub ip: String,
    pub country_code: String,
    pub request_count: i64,
    pub threat_level: &'static str,
}

fn threat_level(count: i64) -> &'static str {
    if count > 1000 {
        "critical"
    } else if count > 100 {
        "high"
    } else if count > 50 {
        "medium"
    } else {
        "low"
    }
}

fn severity_bucket(risk_score: f64) -> &'static str {
    if risk_score >= 0.9 {
        "critical"
    } else if risk_score >= 0.7 {
        "high"
    } else if risk_score >= 0.5 {
        "medium"
    } else {
        "low"
    }
}

#[derive(Debug, Serialize)]
pub struct HighSeverityEvent {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub uri: String,
    pub attack_family: Option<String>,
    pub action: Action,
    pub risk_score: f64,
    pub severity: &'static str,
}

impl EventLogStore {
    pub fn new(database_url: &str) -> Result<Self, CoreError> {
        let path = database_url
            .strip_prefix("sqlite://")
            .unwrap_or(database_url);

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(path, flags)
            .map_err(|e| CoreError::PersistenceFailure(format!("opening {path}: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| CoreError::PersistenceFailure(format!("schema init: {e}")))?;

        tracing::info!(path, "event log store initialized");
        Ok(EventLogStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Cheap liveness probe for `/health`, mirroring `database.py`'s
    /// `is_healthy` (`SELECT 1` against the pool).
    pub fn is_healthy(&self) -> bool {
        self.conn
            .lock()
            .query_row("SELECT 1", [], |_| Ok(()))
            .is_ok()
    }

    pub fn store(&self, record: &DecisionRecord) -> Result<i64, CoreError> {
        let conn = self.conn.lock();
        let headers_json = serde_json::to_string(&record.headers)?;
        let risk_factors_json = serde_json::to_string(&record.verdict.risk_factors)?;
        let features_json = serde_json::to_string(record.verdict.features.as_map())?;

        conn.execute(
            "INSERT INTO requests (
                timestamp, epoch_seconds, source_ip, method, uri, query_string,
                headers_json, body, geo_country, geo_city, geo_lat, geo_lon,
                risk_score, risk_factors_json, features_json,
                action, attack_family, decided_by, decision_latency_ms
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)",
            params![
                record.timestamp.to_rfc3339(),
                record.timestamp.timestamp(),
                record.source_ip,
                record.method,
                record.uri,
                record.query_string,
                headers_json,
                record.body,
                record.geo.country_code,
                record.geo.city,
                record.geo.lat,
                record.geo.lon,
                record.verdict.risk_score,
                risk_factors_json,
                features_json,
                record.verdict.action.as_str(),
                record.verdict.attack_family.map(|f| f.as_str().to_string()),
                record.verdict.decided_by.as_str(),
                record.verdict.latency_ms as i64,
            ],
        )
        .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?;

        Ok(conn.last_insert_rowid())
    }

    pub fn list(&self, filter: ListFilter) -> Result<Vec<DecisionRecord>, CoreError> {
        let conn = self.conn.lock();
        let mut sql = String::from(
            "SELECT id, timestamp, source_ip, method, uri, query_string, headers_json, body,
                    geo_country, geo_city, geo_lat, geo_lon, risk_score, risk_factors_json,
                    features_json, action, attack_family, decided_by, decision_latency_ms,
                    human_decision, human_reviewer, human_reviewed_at, human_notes
             FROM requests WHERE 1=1",
        );
        if filter.action.is_some() {
            sql.push_str(" AND action = ?1");
        }
        if filter.min_risk_score.is_some() {
            sql.push_str(if filter.action.is_some() {
                " AND risk_score >= ?2"
            } else {
                " AND risk_score >= ?1"
            });
        }
        sql.push_str(" ORDER BY timestamp DESC LIMIT ? OFFSET ?");

        let mut stmt = conn
            .prepare_cached(&sql)
            .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?;

        let rows = match (filter.action, filter.min_risk_score) {
            (Some(a), Some(m)) => stmt.query_map(
                params![a.as_str(), m, filter.limit, filter.offset],
                row_to_record,
            ),
            (Some(a), None) => {
                stmt.query_map(params![a.as_str(), filter.limit, filter.offset], row_to_record)
            }
            (None, Some(m)) => {
                stmt.query_map(params![m, filter.limit, filter.offset], row_to_record)
            }
            (None, None) => stmt.query_map(params![filter.limit, filter.offset], row_to_record),
        }
        .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| CoreError::PersistenceFailure(e.to_string()))
    }

    pub fn list_pending(&self) -> Result<Vec<DecisionRecord>, CoreError> {
        self.list(ListFilter {
            limit: 50,
            offset: 0,
            action: Some(Action::Pending),
            min_risk_score: None,
        })
    }

    pub fn update_human_decision(
        &self,
        id: i64,
        decision: HumanDecision,
        reviewer: &str,
        notes: Option<&str>,
    ) -> Result<(), CoreError> {
        let conn = self.conn.lock();
        let now = Utc::now().to_rfc3339();
        let changed = conn
            .execute(
                "UPDATE requests SET human_decision = ?1, human_reviewed_at = ?2,
                        human_reviewer = ?3, human_notes = ?4, action = ?5
                 WHERE id = ?6",
                params![
                    decision.as_str(),
                    now,
                    reviewer,
                    notes,
                    decision.resulting_action().as_str(),
                    id
                ],
            )
            .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?;

        if changed == 0 {
            return Err(CoreError::ClientBadInput(format!("no request with id {id}")));
        }
        tracing::info!(decision_id = id, decision = decision.as_str(), "human decision recorded");
        Ok(())
    }

    /// Idempotent on `(request_id, labeled_by)` via `INSERT OR IGNORE`.
    pub fn promote_to_training(
        &self,
        id: i64,
        is_malicious: bool,
        labeled_by: &str,
    ) -> Result<(), CoreError> {
        let conn = self.conn.lock();
        let row: Option<(String, Option<String>)> = conn
            .query_row(
                "SELECT features_json, attack_family FROM requests WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| CoreError::ClientBadInput(format!("no request with id {id}: {e}")))?;

        conn.execute(
            "INSERT OR IGNORE INTO training_data
                (request_id, features_json, is_malicious, attack_family, labeled_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, row.0, is_malicious as i64, row.1, labeled_by, Utc::now().to_rfc3339()],
        )
        .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?;
        Ok(())
    }

    /// Historical reputation derived from the request log, used when the
    /// volatile counter store has no cached entry for `ip`.
    pub fn get_reputation(&self, ip: &str) -> Result<IpReputation, CoreError> {
        let conn = self.conn.lock();
        let (total, blocked): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COUNT(*) FILTER (WHERE action = 'BLOCKED') FROM requests WHERE source_ip = ?1",
                params![ip],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?;

        if total == 0 {
            return Ok(IpReputation::default());
        }
        let score = 1.0 - (blocked as f64 / total as f64);
        Ok(IpReputation {
            total_requests: total as u64,
            blocked_requests: blocked as u64,
            reputation_score: score.clamp(0.0, 1.0),
        })
    }

    pub fn today_statistics(&self) -> Result<TodayStatistics, CoreError> {
        let conn = self.conn.lock();
        let day_start = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always a valid time")
            .and_utc()
            .timestamp();

        let mut stats = conn
            .query_row(
                "SELECT
                    COUNT(*),
                    COUNT(*) FILTER (WHERE action = 'ALLOWED'),
                    COUNT(*) FILTER (WHERE action = 'BLOCKED'),
                    COUNT(*) FILTER (WHERE action = 'PENDING'),
                    COALESCE(AVG(risk_score), 0.0),
                    COALESCE(AVG(decision_latency_ms), 0.0),
                    COUNT(DISTINCT source_ip)
                 FROM requests WHERE epoch_seconds >= ?1",
                params![day_start],
                |row| {
                    Ok(TodayStatistics {
                        total_requests: row.get(0)?,
                        allowed_requests: row.get(1)?,
                        blocked_requests: row.get(2)?,
                        pending_requests: row.get(3)?,
                        avg_risk_score: row.get(4)?,
                        avg_latency_ms: row.get(5)?,
                        unique_ips: row.get(6)?,
                        top_attack_families: Vec::new(),
                        top_attacking_ips: Vec::new(),
                    })
                },
            )
            .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?;

        {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT attack_family, COUNT(*) as c FROM requests
                     WHERE epoch_seconds >= ?1 AND attack_family IS NOT NULL
                     GROUP BY attack_family ORDER BY c DESC LIMIT 10",
                )
                .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?;
            stats.top_attack_families = stmt
                .query_map(params![day_start], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?
                .collect::<Result<_, _>>()
                .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?;
        }

        {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT source_ip, COUNT(*) as c FROM requests
                     WHERE epoch_seconds >= ?1 AND action = 'BLOCKED'
                     GROUP BY source_ip ORDER BY c DESC LIMIT 10",
                )
                .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?;
            stats.top_attacking_ips = stmt
                .query_map(params![day_start], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?
                .collect::<Result<_, _>>()
                .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?;
        }

        Ok(stats)
    }

    pub fn top_attacking_ips(&self, limit: i64) -> Result<Vec<TopAttackingIp>, CoreError> {
        let conn = self.conn.lock();
        let since = (Utc::now() - ChronoDuration::hours(24)).timestamp();
        let mut stmt = conn
            .prepare_cached(
                "SELECT source_ip, COALESCE(geo_country, 'XX'), COUNT(*) as c
                 FROM requests
                 WHERE action = 'BLOCKED' AND epoch_seconds >= ?1
                 GROUP BY source_ip, geo_country
                 ORDER BY c DESC LIMIT ?2",
            )
            .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?;

        stmt.query_map(params![since, limit], |row| {
            let count: i64 = row.get(2)?;
            Ok(TopAttackingIp {
                ip: row.get(0)?,
                country_code: row.get(1)?,
                request_count: count,
                threat_level: threat_level(count),
            })
        })
        .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?
        .collect::<Result<_, _>>()
        .map_err(|e| CoreError::PersistenceFailure(e.to_string()))
    }

    pub fn recent_high_severity(&self, limit: i64) -> Result<Vec<HighSeverityEvent>, CoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT id, timestamp, method, uri, attack_family, action, risk_score
                 FROM requests WHERE risk_score >= 0.5
                 ORDER BY timestamp DESC LIMIT ?1",
            )
            .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?;

        stmt.query_map(params![limit], |row| {
            let timestamp: String = row.get(1)?;
            let action_str: String = row.get(5)?;
            let risk_score: f64 = row.get(6)?;
            Ok(HighSeverityEvent {
                id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp)
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                method: row.get(2)?,
                uri: row.get(3)?,
                attack_family: row.get(4)?,
                action: parse_action(&action_str),
                risk_score,
                severity: severity_bucket(risk_score),
            })
        })
        .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?
        .collect::<Result<_, _>>()
        .map_err(|e| CoreError::PersistenceFailure(e.to_string()))
    }

    pub fn aggregate(&self, range: AggregateRange) -> Result<AggregateResult, CoreError> {
        let conn = self.conn.lock();
        let since = Utc::now().timestamp() - range.window_seconds();
        let bucket_width = range.bucket_seconds();

        let mut stmt = conn
            .prepare_cached(
                "SELECT (epoch_seconds / ?1) * ?1 as bucket, COUNT(*),
                        COALESCE(AVG(decision_latency_ms), 0.0), COALESCE(MAX(decision_latency_ms), 0)
                 FROM requests WHERE epoch_seconds >= ?2
                 GROUP BY bucket ORDER BY bucket ASC",
            )
            .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?;

        let buckets = stmt
            .query_map(params![bucket_width, since], |row| {
                Ok(AggregateBucket {
                    bucket_start: row.get(0)?,
                    request_count: row.get(1)?,
                    avg_latency_ms: row.get(2)?,
                    max_latency_ms: row.get(3)?,
                })
            })
            .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?;

        let (total_requests, unique_source_ips): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COUNT(DISTINCT source_ip) FROM requests WHERE epoch_seconds >= ?1",
                params![since],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?;

        let mut distribution = BTreeMap::new();
        {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT attack_family, COUNT(*) FROM requests
                     WHERE epoch_seconds >= ?1 AND attack_family IS NOT NULL
                     GROUP BY attack_family",
                )
                .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?;
            let rows = stmt
                .query_map(params![since], |row| {
                    let family: String = row.get(0)?;
                    let count: i64 = row.get(1)?;
                    Ok((family, count))
                })
                .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?;
            for row in rows {
                let (family, count) = row.map_err(|e| CoreError::PersistenceFailure(e.to_string()))?;
                distribution.insert(family, count);
            }
        }

        Ok(AggregateResult {
            buckets,
            summary: AggregateSummary {
                total_requests,
                unique_source_ips,
                attack_family_distribution: distribution,
            },
        })
    }
}

fn parse_action(s: &str) -> Action {
    match s {
        "BLOCKED" => Action::Blocked,
        "PENDING" => Action::Pending,
        _ => Action::Allowed,
    }
}

fn parse_decided_by(s: &str) -> crate::model::DecidedBy {
    use crate::model::DecidedBy;
    match s {
        "BLACKLIST" => DecidedBy::Blacklist,
        "RATE_LIMITER" => DecidedBy::RateLimiter,
        "SIGNATURE" => DecidedBy::Signature,
        "AI" => DecidedBy::Ai,
        "CACHE" => DecidedBy::Cache,
        "FAILSAFE" => DecidedBy::Failsafe,
        _ => DecidedBy::None,
    }
}

fn parse_attack_family(s: &str) -> Option<AttackFamily> {
    match s {
        "SQL_INJECTION" => Some(AttackFamily::SqlInjection),
        "XSS" => Some(AttackFamily::Xss),
        "PATH_TRAVERSAL" => Some(AttackFamily::PathTraversal),
        "LFI" => Some(AttackFamily::Lfi),
        "SSRF" => Some(AttackFamily::Ssrf),
        "RATE_LIMIT" => Some(AttackFamily::RateLimit),
        "BLACKLISTED" => Some(AttackFamily::Blacklisted),
        _ => None,
    }
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<DecisionRecord> {
    let headers_json: String = row.get(6)?;
    let risk_factors_json: String = row.get(13)?;
    let features_json: String = row.get(14)?;
    let timestamp: String = row.get(1)?;
    let action_str: String = row.get(15)?;
    let attack_family_str: Option<String> = row.get(16)?;
    let decided_by_str: String = row.get(17)?;
    let human_reviewed_at: Option<String> = row.get(21)?;

    let headers: Headers = serde_json::from_str(&headers_json).unwrap_or_default();
    let risk_factors: BTreeMap<String, String> =
        serde_json::from_str(&risk_factors_json).unwrap_or_default();
    let feature_map: BTreeMap<String, f64> =
        serde_json::from_str(&features_json).unwrap_or_default();
    let features = feature_map
        .into_iter()
        .fold(crate::model::FeatureVector::builder(), |b, (k, v)| {
            if crate::model::FEATURE_NAMES.contains(&k.as_str()) {
                b.set(&k, v)
            } else {
                b
            }
        })
        .build();

    Ok(DecisionRecord {
        id: row.get(0)?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        source_ip: row.get(2)?,
        method: row.get(3)?,
        uri: row.get(4)?,
        query_string: row.get(5)?,
        headers,
        body: row.get(7)?,
        geo: GeoAttribution {
            country_code: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
            country_name: String::new(),
            city: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
            lat: row.get::<_, Option<f64>>(10)?.unwrap_or_default(),
            lon: row.get::<_, Option<f64>>(11)?.unwrap_or_default(),
            is_private: false,
        },
        verdict: Verdict {
            action: parse_action(&action_str),
            risk_score: row.get(12)?,
            reason: String::new(),
            attack_family: attack_family_str.as_deref().and_then(parse_attack_family),
            decided_by: parse_decided_by(&decided_by_str),
            from_cache: false,
            features,
            risk_factors,
            latency_ms: row.get::<_, i64>(18)? as u64,
        },
        human_decision: row.get(19)?,
        human_reviewer: row.get(20)?,
        human_reviewed_at: human_reviewed_at.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|d| d.with_timezone(&Utc))
        }),
        human_notes: row.get(22)?,
    })
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Internal(format!("serialization error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DecidedBy, FeatureVector, Headers};
    use tempfile::NamedTempFile;

    fn record(ip: &str, action: Action, risk_score: f64) -> DecisionRecord {
        DecisionRecord {
            id: 0,
            timestamp: Utc::now(),
            source_ip: ip.to_string(),
            method: "GET".to_string(),
            uri: "/x".to_string(),
            query_string: String::new(),
            headers: Headers::default(),
            body: String::new(),
            geo: GeoAttribution::unknown(),
            verdict: Verdict {
                action,
                risk_score,
                reason: "test".to_string(),
                attack_family: None,
                decided_by: DecidedBy::None,
                from_cache: false,
                features: FeatureVector::default(),
                risk_factors: BTreeMap::new(),
                latency_ms: 1,
            },
            human_decision: None,
            human_reviewer: None,
            human_reviewed_at: None,
            human_notes: None,
        }
    }

    #[test]
    fn store_then_list_round_trips() {
        let tmp = NamedTempFile::new().unwrap();
        let store = EventLogStore::new(tmp.path().to_str().unwrap()).unwrap();
        let id = store.store(&record("1.1.1.1", Action::Allowed, 0.1)).unwrap();
        assert!(id > 0);

        let listed = store
            .list(ListFilter {
                limit: 10,
                offset: 0,
                action: None,
                min_risk_score: None,
            })
            .unwrap();
        assert_eq!(listed.len(), 1);
        pretty_assertions::assert_eq!(listed[0].source_ip, "1.1.1.1");
        pretty_assertions::assert_eq!(listed[0].verdict.action, Action::Allowed);
    }

    #[test]
    fn update_human_decision_rewrites_action() {
        let tmp = NamedTempFile::new().unwrap();
        let store = EventLogStore::new(tmp.path().to_str().unwrap()).unwrap();
        let id = store.store(&record("2.2.2.2", Action::Pending, 0.5)).unwrap();
        store
            .update_human_decision(id, HumanDecision::Block, "alice", Some("confirmed"))
            .unwrap();

        let listed = store
            .list(ListFilter { limit: 10, offset: 0, action: Some(Action::Blocked), min_risk_score: None })
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].human_decision.as_deref(), Some("BLOCK"));
    }

    #[test]
    fn reputation_defaults_for_unknown_ip() {
        let tmp = NamedTempFile::new().unwrap();
        let store = EventLogStore::new(tmp.path().to_str().unwrap()).unwrap();
        let rep = store.get_reputation("9.9.9.9").unwrap();
        assert_eq!(rep, IpReputation::default());
    }

    #[test]
    fn promote_to_training_is_idempotent() {
        let tmp = NamedTempFile::new().unwrap();
        let store = EventLogStore::new(tmp.path().to_str().unwrap()).unwrap();
        let id = store.store(&record("3.3.3.3", Action::Blocked, 1.0)).unwrap();
        store.promote_to_training(id, true, "alice").unwrap();
        store.promote_to_training(id, true, "alice").unwrap();
    }
}
