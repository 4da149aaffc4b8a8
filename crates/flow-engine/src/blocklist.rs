//! 차단 규칙 -- IP/포트/프로토콜 조합으로 트래픽을 `Blocked`로 표시
//!
//! 매칭된 패킷도 분류기는 그대로 실행되며, 트래픽 상태만 `Blocked`가 됩니다.
//!
//! # 규칙 파일 예시 (TOML)
//! ```toml
//! [[rules]]
//! id = "block-scanner"
//! src_ip = "10.0.0.50"
//! description = "Known port scanner"
//!
//! [[rules]]
//! id = "block-telnet"
//! dst_port = 23
//! protocol = "TCP"
//! description = "No telnet inbound"
//! ```

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use flowguard_core::types::Protocol;

use crate::error::FlowEngineError;
use crate::packet::ParsedPacket;

const INLINE_ORIGIN: &str = "<inline>";

/// 차단 규칙
///
/// `None` 필드는 와일드카드이며, 설정된 필드가 모두 일치해야 매칭됩니다.
/// 적어도 하나의 조건이 있어야 합니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    /// 규칙 고유 ID
    pub id: String,
    #[serde(default)]
    pub src_ip: Option<IpAddr>,
    #[serde(default)]
    pub dst_ip: Option<IpAddr>,
    #[serde(default)]
    pub dst_port: Option<u16>,
    /// `TCP`, `UDP`, `IP`
    #[serde(default)]
    pub protocol: Option<Protocol>,
    #[serde(default)]
    pub description: String,
}

impl FilterRule {
    pub fn matches(&self, packet: &ParsedPacket) -> bool {
        self.src_ip.is_none_or(|ip| ip == packet.source_ip)
            && self.dst_ip.is_none_or(|ip| ip == packet.destination_ip)
            && self
                .dst_port
                .is_none_or(|port| Some(port) == packet.destination_port)
            && self.protocol.is_none_or(|p| p == packet.protocol)
    }

    fn has_criteria(&self) -> bool {
        self.src_ip.is_some()
            || self.dst_ip.is_some()
            || self.dst_port.is_some()
            || self.protocol.is_some()
    }
}

/// TOML 규칙 파일의 최상위 구조
#[derive(Debug, Deserialize)]
struct RulesFile {
    #[serde(default)]
    rules: Vec<FilterRule>,
}

/// 차단 규칙 집합
#[derive(Debug, Clone, Default)]
pub struct Blocklist {
    rules: Vec<FilterRule>,
}

impl Blocklist {
    /// 규칙을 검증한 뒤 집합을 만듭니다.
    pub fn new(rules: Vec<FilterRule>) -> Result<Self, FlowEngineError> {
        Self::validated(rules, INLINE_ORIGIN)
    }

    fn validated(rules: Vec<FilterRule>, origin: &str) -> Result<Self, FlowEngineError> {
        let invalid = |reason: String| FlowEngineError::Blocklist {
            path: origin.to_owned(),
            reason,
        };

        let mut seen = HashSet::with_capacity(rules.len());
        for rule in &rules {
            if rule.id.trim().is_empty() {
                return Err(invalid("rule id must not be empty".to_owned()));
            }
            if !seen.insert(rule.id.as_str()) {
                return Err(invalid(format!("duplicate rule id '{}'", rule.id)));
            }
            if !rule.has_criteria() {
                return Err(invalid(format!(
                    "rule '{}' has no match criteria",
                    rule.id
                )));
            }
        }
        drop(seen);
        Ok(Self { rules })
    }

    /// TOML 문자열에서 규칙을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, FlowEngineError> {
        Self::parse_from(toml_str, INLINE_ORIGIN)
    }

    fn parse_from(toml_str: &str, origin: &str) -> Result<Self, FlowEngineError> {
        let file: RulesFile = toml::from_str(toml_str).map_err(|e| FlowEngineError::Blocklist {
            path: origin.to_owned(),
            reason: e.to_string(),
        })?;
        Self::validated(file.rules, origin)
    }

    /// 규칙 파일을 로드합니다.
    ///
    /// 경로가 비어 있거나 파일이 없으면 빈 집합을 반환합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, FlowEngineError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Ok(Self::default());
        }
        let origin = path.display().to_string();

        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %origin, "blocklist file not found, no rules loaded");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        let blocklist = Self::parse_from(&content, &origin)?;
        info!(path = %origin, rules = blocklist.len(), "loaded blocklist");
        Ok(blocklist)
    }

    /// 패킷에 처음 매칭되는 규칙
    pub fn matching_rule(&self, packet: &ParsedPacket) -> Option<&FilterRule> {
        self.rules.iter().find(|r| r.matches(packet))
    }

    /// 규칙을 추가합니다. 같은 ID가 있으면 교체합니다.
    pub fn add_rule(&mut self, rule: FilterRule) -> Result<(), FlowEngineError> {
        if !rule.has_criteria() {
            return Err(FlowEngineError::Blocklist {
                path: INLINE_ORIGIN.to_owned(),
                reason: format!("rule '{}' has no match criteria", rule.id),
            });
        }
        self.rules.retain(|r| r.id != rule.id);
        self.rules.push(rule);
        Ok(())
    }

    /// 제거되면 `true`
    pub fn remove_rule(&mut self, rule_id: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.id != rule_id);
        self.rules.len() < before
    }

    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
