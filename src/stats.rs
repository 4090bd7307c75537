//! Usage statistics behind the admin dashboard
//!
//! One aggregate document under [`keys::USAGE_STATISTICS`], updated once per
//! settled analysis or chat exchange.

use crate::storage::{keys, KeyValueStore, StorageResult, TypedStoreExt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Entries kept in [`UsageStatistics::recent_requests`], oldest dropped first.
pub const RECENT_REQUESTS_CAPACITY: usize = 50;

/// Which feature issued a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestKind {
    Chat,
    Analysis,
    /// Analysis of a selection handed over by a host integration
    ContextMenu,
}

impl RequestKind {
    pub const ALL: [RequestKind; 3] = [Self::Chat, Self::Analysis, Self::ContextMenu];

    pub fn label(self) -> &'static str {
        match self {
            Self::Chat => "Чат",
            Self::Analysis => "Анализ",
            Self::ContextMenu => "Контекстное меню",
        }
    }
}

/// Counters for one calendar day (UTC).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    pub requests: u64,
    pub tokens: u64,
    pub errors: u64,
}

/// Successful requests of one kind. Failures only show up in the error counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionStats {
    pub count: u64,
    pub tokens: u64,
    pub total_time_ms: u64,
}

impl FunctionStats {
    pub fn average_time_ms(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_time_ms / self.count
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionStatsTable {
    pub chat: FunctionStats,
    pub analysis: FunctionStats,
    pub context_menu: FunctionStats,
}

impl FunctionStatsTable {
    pub fn get(&self, kind: RequestKind) -> &FunctionStats {
        match kind {
            RequestKind::Chat => &self.chat,
            RequestKind::Analysis => &self.analysis,
            RequestKind::ContextMenu => &self.context_menu,
        }
    }

    fn get_mut(&mut self, kind: RequestKind) -> &mut FunctionStats {
        match kind {
            RequestKind::Chat => &mut self.chat,
            RequestKind::Analysis => &mut self.analysis,
            RequestKind::ContextMenu => &mut self.context_menu,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (RequestKind, &FunctionStats)> {
        RequestKind::ALL.into_iter().map(move |kind| (kind, self.get(kind)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentRequest {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: RequestKind,
    pub tokens: u64,
    pub status: RequestStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStatistics {
    pub total_requests: u64,
    pub total_tokens: u64,
    pub error_count: u64,
    pub cancelled_count: u64,
    pub start_date: String,
    /// Keyed by `YYYY-MM-DD`
    pub daily_stats: BTreeMap<String, DailyStats>,
    #[serde(default)]
    pub function_stats: FunctionStatsTable,
    /// Oldest first, at most [`RECENT_REQUESTS_CAPACITY`]
    #[serde(default)]
    pub recent_requests: Vec<RecentRequest>,
    /// Mean cross-verification score of completed analyses, 0 to 10
    pub cross_check_score: f64,
    /// Scores folded into `cross_check_score`
    #[serde(default)]
    pub cross_check_samples: u64,
    pub last_update: DateTime<Utc>,
}

impl UsageStatistics {
    pub fn empty(at: DateTime<Utc>) -> Self {
        Self {
            total_requests: 0,
            total_tokens: 0,
            error_count: 0,
            cancelled_count: 0,
            start_date: day_key(at),
            daily_stats: BTreeMap::new(),
            function_stats: FunctionStatsTable::default(),
            recent_requests: Vec::new(),
            cross_check_score: 0.0,
            cross_check_samples: 0,
            last_update: at,
        }
    }

    /// Failed share of all requests, in percent.
    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.error_count as f64 / self.total_requests as f64 * 100.0
    }

    pub fn day(&self, at: DateTime<Utc>) -> DailyStats {
        self.daily_stats.get(&day_key(at)).cloned().unwrap_or_default()
    }

    /// The newest `limit` requests, newest first.
    pub fn recent(&self, limit: usize) -> impl Iterator<Item = &RecentRequest> {
        self.recent_requests.iter().rev().take(limit)
    }

    fn push_recent(&mut self, request: RecentRequest) {
        self.recent_requests.push(request);
        let overflow = self
            .recent_requests
            .len()
            .saturating_sub(RECENT_REQUESTS_CAPACITY);
        self.recent_requests.drain(..overflow);
    }

    fn fold_cross_check(&mut self, score: f64) {
        if !self.cross_check_score.is_finite() {
            self.cross_check_score = 0.0;
            self.cross_check_samples = 0;
        }
        if !score.is_finite() {
            return;
        }
        self.cross_check_samples += 1;
        let n = self.cross_check_samples as f64;
        self.cross_check_score += (score - self.cross_check_score) / n;
    }
}

/// How one request ended, as far as statistics care.
#[derive(Debug, Clone, PartialEq)]
pub enum UsageRecord {
    Completed {
        kind: RequestKind,
        tokens: u64,
        elapsed: Duration,
        /// Only analyses carry a score
        cross_check_score: Option<f64>,
    },
    Failed {
        kind: RequestKind,
    },
    Cancelled,
}

fn day_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

/// Headline numbers of an export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    pub total_requests: u64,
    pub total_tokens: u64,
    /// Percent, one decimal
    pub error_rate: f64,
    /// `start - end` as `YYYY-MM-DD` dates
    pub period: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsExport {
    pub export_date: DateTime<Utc>,
    pub statistics: UsageStatistics,
    pub summary: StatsSummary,
}

impl StatsExport {
    pub fn new(statistics: UsageStatistics, at: DateTime<Utc>) -> Self {
        let summary = StatsSummary {
            total_requests: statistics.total_requests,
            total_tokens: statistics.total_tokens,
            error_rate: (statistics.error_rate() * 10.0).round() / 10.0,
            period: format!("{} - {}", statistics.start_date, day_key(at)),
        };
        Self {
            export_date: at,
            statistics,
            summary,
        }
    }

    /// Summary rows, a blank separator, then one row per request kind.
    pub fn to_csv(&self) -> String {
        let summary = &self.summary;
        let mut rows: Vec<Vec<String>> = vec![
            vec!["Показатель".into(), "Значение".into()],
            vec!["Всего запросов".into(), summary.total_requests.to_string()],
            vec!["Всего токенов".into(), summary.total_tokens.to_string()],
            vec!["Уровень ошибок".into(), format!("{:.1}%", summary.error_rate)],
            vec!["Период".into(), summary.period.clone()],
            vec![String::new(), String::new()],
            vec![
                "Функция".into(),
                "Запросы".into(),
                "Токены".into(),
                "Среднее время (мс)".into(),
            ],
        ];
        for (kind, stats) in self.statistics.function_stats.iter() {
            rows.push(vec![
                kind.label().to_string(),
                stats.count.to_string(),
                stats.tokens.to_string(),
                stats.average_time_ms().to_string(),
            ]);
        }

        rows.iter()
            .map(|row| {
                row.iter()
                    .map(|cell| format!("\"{}\"", cell.replace('"', "\"\"")))
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Clone)]
pub struct UsageLog {
    store: Arc<dyn KeyValueStore>,
    write_lock: Arc<Mutex<()>>,
}

impl UsageLog {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Current statistics; empty ones dated `at` if none are stored.
    pub fn load(&self, at: DateTime<Utc>) -> StorageResult<UsageStatistics> {
        let stats: Option<UsageStatistics> = self.store.load(keys::USAGE_STATISTICS)?;
        Ok(stats.unwrap_or_else(|| UsageStatistics::empty(at)))
    }

    pub fn record(&self, record: UsageRecord, at: DateTime<Utc>) -> StorageResult<UsageStatistics> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut stats = self.load(at)?;
        stats.last_update = at;

        match record {
            UsageRecord::Completed {
                kind,
                tokens,
                elapsed,
                cross_check_score,
            } => {
                stats.total_requests += 1;
                stats.total_tokens += tokens;
                let day = stats.daily_stats.entry(day_key(at)).or_default();
                day.requests += 1;
                day.tokens += tokens;

                let bucket = stats.function_stats.get_mut(kind);
                bucket.count += 1;
                bucket.tokens += tokens;
                bucket.total_time_ms += u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

                if let Some(score) = cross_check_score {
                    stats.fold_cross_check(score);
                }
                stats.push_recent(RecentRequest {
                    timestamp: at,
                    kind,
                    tokens,
                    status: RequestStatus::Success,
                });
            }
            UsageRecord::Failed { kind } => {
                stats.total_requests += 1;
                stats.error_count += 1;
                let day = stats.daily_stats.entry(day_key(at)).or_default();
                day.requests += 1;
                day.errors += 1;
                stats.push_recent(RecentRequest {
                    timestamp: at,
                    kind,
                    tokens: 0,
                    status: RequestStatus::Error,
                });
            }
            UsageRecord::Cancelled => {
                stats.cancelled_count += 1;
            }
        }

        self.store.save(keys::USAGE_STATISTICS, &stats)?;
        Ok(stats)
    }

    pub fn reset(&self, at: DateTime<Utc>) -> StorageResult<UsageStatistics> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let stats = UsageStatistics::empty(at);
        self.store.save(keys::USAGE_STATISTICS, &stats)?;
        Ok(stats)
    }

    pub fn export(&self, at: DateTime<Utc>) -> StorageResult<StatsExport> {
        Ok(StatsExport::new(self.load(at)?, at))
    }
}
