//! 라이브 피드 -- 표현 계층으로 나가는 JSON 스트림
//!
//! 전달된 레코드마다 평탄한 JSON 객체 하나를 broadcast합니다. 인시던트
//! 객체에는 `"_type": "incident"`가 추가되어 같은 스트림에서 트래픽과
//! 구분됩니다. 구독자가 없으면 메시지는 버려지며 에러가 아닙니다.

use flowguard_core::types::{Incident, TrafficRecord};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::CorrelatorError;

/// 인시던트 객체 구분 키
pub const TYPE_KEY: &str = "_type";
/// 인시던트 객체 구분 값
pub const INCIDENT_TYPE: &str = "incident";

/// 라이브 피드 송신측
///
/// 복제하면 같은 채널을 공유합니다. 느린 구독자는 `Lagged`로 메시지를
/// 건너뛰며 송신측을 막지 않습니다.
#[derive(Debug, Clone)]
pub struct LiveFeed {
    tx: broadcast::Sender<String>,
}

impl LiveFeed {
    /// `capacity`는 구독자별 버퍼 크기입니다 (0이면 1로 보정).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// 트래픽 레코드를 게시합니다. 수신한 구독자 수를 반환합니다.
    pub fn publish_traffic(&self, record: &TrafficRecord) -> Result<usize, CorrelatorError> {
        let json = serde_json::to_string(record)?;
        Ok(self.send(json))
    }

    /// 인시던트를 `_type` 태그와 함께 게시합니다.
    pub fn publish_incident(&self, incident: &Incident) -> Result<usize, CorrelatorError> {
        let mut value = serde_json::to_value(incident)?;
        if let Value::Object(map) = &mut value {
            map.insert(TYPE_KEY.to_owned(), Value::String(INCIDENT_TYPE.to_owned()));
        }
        Ok(self.send(value.to_string()))
    }

    fn send(&self, json: String) -> usize {
        self.tx.send(json).unwrap_or(0)
    }
}

impl Default for LiveFeed {
    fn default() -> Self {
        Self::new(256)
    }
}
