//! 트래픽/인시던트 영속화 sink
//!
//! - [`MemorySink`]: ID 기준 LRU 보관, 테스트와 기본 설정용
//! - [`JsonLinesSink`]: 추가 전용 JSON lines 파일
//! - [`ConfiguredSink`]: `[sink]` 설정으로 선택되는 sink
//!
//! 모든 sink는 같은 ID의 재기록을 에러 없이 무시합니다.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use flowguard_core::config::SinkConfig;
use flowguard_core::error::FlowguardError;
use flowguard_core::pipeline::TrafficSink;
use flowguard_core::types::{Incident, TrafficRecord};
use lru::LruCache;
use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::CorrelatorError;

/// JSON lines 레코드 종류 키
pub const KIND_KEY: &str = "kind";

/// JSON lines sink가 기억하는 최근 ID 수
const RECENT_ID_CAPACITY: usize = 65_536;

fn non_zero(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}

// =============================================================================
// MemorySink
// =============================================================================

#[derive(Debug)]
struct MemoryInner {
    traffic: LruCache<String, TrafficRecord>,
    incidents: LruCache<String, Incident>,
}

/// 메모리 sink
///
/// 트래픽과 인시던트를 각각 `capacity`개까지 보관하며 가장 오래된 것부터
/// 버립니다. 복제하면 같은 저장소를 공유합니다.
#[derive(Debug, Clone)]
pub struct MemorySink {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryInner {
                traffic: LruCache::new(non_zero(capacity)),
                incidents: LruCache::new(non_zero(capacity)),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn traffic_count(&self) -> usize {
        self.lock().traffic.len()
    }

    pub fn incident_count(&self) -> usize {
        self.lock().incidents.len()
    }

    pub fn traffic(&self, id: &str) -> Option<TrafficRecord> {
        self.lock().traffic.peek(id).cloned()
    }

    /// 보관 중인 인시던트 (최근 순)
    pub fn incidents(&self) -> Vec<Incident> {
        self.lock()
            .incidents
            .iter()
            .map(|(_, incident)| incident.clone())
            .collect()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(SinkConfig::default().memory_capacity)
    }
}

impl TrafficSink for MemorySink {
    async fn write_traffic(&self, record: &TrafficRecord) -> Result<(), FlowguardError> {
        let mut inner = self.lock();
        if !inner.traffic.contains(record.id()) {
            inner.traffic.put(record.id().to_owned(), record.clone());
        }
        Ok(())
    }

    async fn write_incident(&self, incident: &Incident) -> Result<(), FlowguardError> {
        let mut inner = self.lock();
        if !inner.incidents.contains(&incident.id) {
            inner.incidents.put(incident.id.clone(), incident.clone());
        }
        Ok(())
    }
}

// =============================================================================
// JsonLinesSink
// =============================================================================

#[derive(Debug)]
struct JsonLinesInner {
    file: tokio::fs::File,
    recent: LruCache<String, ()>,
}

/// JSON lines 파일 sink
///
/// 한 줄에 레코드 하나를 쓰며 `kind` 필드(`traffic`, `incident`)로 구분합니다.
/// 중복 검사는 최근 ID 캐시로만 수행하므로 프로세스 재시작 이전의 ID는
/// 기억하지 않습니다.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    inner: tokio::sync::Mutex<JsonLinesInner>,
}

impl JsonLinesSink {
    /// 파일을 추가 모드로 엽니다 (없으면 생성).
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, CorrelatorError> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| CorrelatorError::Sink(format!("{}: {e}", path.display())))?;

        info!(path = %path.display(), "opened json lines sink");
        Ok(Self {
            path,
            inner: tokio::sync::Mutex::new(JsonLinesInner {
                file,
                recent: LruCache::new(non_zero(RECENT_ID_CAPACITY)),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append<T: Serialize>(
        &self,
        kind: &str,
        id: &str,
        value: &T,
    ) -> Result<(), CorrelatorError> {
        let mut value = serde_json::to_value(value)?;
        if let Value::Object(map) = &mut value {
            map.insert(KIND_KEY.to_owned(), Value::String(kind.to_owned()));
        }
        let mut line = value.to_string();
        line.push('\n');

        let key = format!("{kind}:{id}");
        let mut inner = self.inner.lock().await;
        if inner.recent.contains(&key) {
            debug!(kind, id, "duplicate id ignored");
            return Ok(());
        }
        inner
            .file
            .write_all(line.as_bytes())
            .await
            .map_err(|e| CorrelatorError::Sink(format!("{}: {e}", self.path.display())))?;
        inner
            .file
            .flush()
            .await
            .map_err(|e| CorrelatorError::Sink(format!("{}: {e}", self.path.display())))?;
        inner.recent.put(key, ());
        Ok(())
    }
}

impl TrafficSink for JsonLinesSink {
    async fn write_traffic(&self, record: &TrafficRecord) -> Result<(), FlowguardError> {
        self.append("traffic", record.id(), record).await?;
        Ok(())
    }

    async fn write_incident(&self, incident: &Incident) -> Result<(), FlowguardError> {
        self.append("incident", &incident.id, incident).await?;
        Ok(())
    }
}

// =============================================================================
// ConfiguredSink
// =============================================================================

/// 설정으로 선택되는 sink
#[derive(Debug)]
pub enum ConfiguredSink {
    Memory(MemorySink),
    JsonLines(JsonLinesSink),
}

impl ConfiguredSink {
    /// `[sink]` 설정에서 sink를 생성합니다.
    pub async fn from_config(config: &SinkConfig) -> Result<Self, CorrelatorError> {
        match config.kind.as_str() {
            "memory" => Ok(Self::Memory(MemorySink::new(config.memory_capacity))),
            "jsonl" => Ok(Self::JsonLines(JsonLinesSink::open(&config.path).await?)),
            other => Err(CorrelatorError::Config {
                field: "sink.kind".to_owned(),
                reason: format!("unsupported sink kind '{other}'"),
            }),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::JsonLines(_) => "jsonl",
        }
    }
}

impl TrafficSink for ConfiguredSink {
    async fn write_traffic(&self, record: &TrafficRecord) -> Result<(), FlowguardError> {
        match self {
            Self::Memory(sink) => sink.write_traffic(record).await,
            Self::JsonLines(sink) => sink.write_traffic(record).await,
        }
    }

    async fn write_incident(&self, incident: &Incident) -> Result<(), FlowguardError> {
        match self {
            Self::Memory(sink) => sink.write_incident(incident).await,
            Self::JsonLines(sink) => sink.write_incident(incident).await,
        }
    }
}
