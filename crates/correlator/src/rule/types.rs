//! 대응 규칙 데이터 타입
//!
//! YAML 규칙 파일에서 역직렬화되는 [`ResponseRule`]과 규칙 발동 이력
//! [`ActionLogEntry`]를 정의합니다.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CorrelatorError;

use super::condition::{Condition, ConditionError};

/// 규칙 ID 최대 길이
const MAX_RULE_ID_LEN: usize = 256;

/// 액션이 비어 있을 때 기록하는 기본 액션 이름
pub const DEFAULT_ACTION: &str = "rule_trigger";

/// 대응 규칙
///
/// # YAML 스키마
/// ```yaml
/// id: critical-active
/// name: Page on-call for critical incidents
/// condition: severity=critical,status=active
/// action: notify_oncall
/// active: true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRule {
    /// 규칙 고유 ID
    pub id: String,
    /// 이력에 표시되는 이름
    pub name: String,
    /// `key=value[,key=value...]` 조건식
    pub condition: String,
    /// 발동 시 기록할 액션 이름 (비어 있으면 `rule_trigger`)
    #[serde(default)]
    pub action: String,
    #[serde(default = "default_active", alias = "is_active")]
    pub active: bool,
    /// 누적 발동 횟수
    #[serde(default)]
    pub triggered_count: u64,
}

fn default_active() -> bool {
    true
}

impl ResponseRule {
    /// 활성 규칙을 생성합니다.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        condition: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            condition: condition.into(),
            action: action.into(),
            active: true,
            triggered_count: 0,
        }
    }

    /// ID와 이름을 검증합니다. 조건식은 평가 시점에 파싱합니다.
    pub fn validate(&self) -> Result<(), CorrelatorError> {
        if self.id.trim().is_empty() {
            return Err(CorrelatorError::RuleValidation {
                rule_id: "(empty)".to_owned(),
                reason: "rule id must not be empty".to_owned(),
            });
        }
        if self.id.len() > MAX_RULE_ID_LEN {
            return Err(CorrelatorError::RuleValidation {
                rule_id: self.id.clone(),
                reason: format!("rule id must not exceed {MAX_RULE_ID_LEN} characters"),
            });
        }
        if self.name.trim().is_empty() {
            return Err(CorrelatorError::RuleValidation {
                rule_id: self.id.clone(),
                reason: "rule name must not be empty".to_owned(),
            });
        }
        Ok(())
    }

    pub fn parsed_condition(&self) -> Result<Condition, ConditionError> {
        Condition::parse(&self.condition)
    }

    /// 이력에 기록할 액션 이름
    pub fn action_name(&self) -> &str {
        let action = self.action.trim();
        if action.is_empty() {
            DEFAULT_ACTION
        } else {
            action
        }
    }
}

/// 액션 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionResult {
    #[default]
    Success,
    Failed,
}

impl fmt::Display for ActionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "Success"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// 이력 레코드의 로그 레벨
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    #[default]
    Info,
    Warning,
    Error,
}

/// 규칙 발동 이력 한 건
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    /// 대상 인시던트 ID
    pub target: String,
    pub result: ActionResult,
    pub details: String,
    pub severity: LogLevel,
}

impl ActionLogEntry {
    /// 규칙이 인시던트에 대해 발동했음을 나타내는 이력
    pub fn rule_triggered(rule: &ResponseRule, incident_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            action: rule.action_name().to_owned(),
            target: incident_id.to_owned(),
            result: ActionResult::Success,
            details: format!("Rule '{}' triggered for incident {}", rule.name, incident_id),
            severity: LogLevel::Info,
        }
    }
}
