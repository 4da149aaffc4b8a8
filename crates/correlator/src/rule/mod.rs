//! 대응 규칙 엔진 -- 인시던트 조건 매칭 및 발동 기록
//!
//! 인시던트가 생성될 때마다 모든 활성 규칙을 평가합니다.
//!
//! # 규칙 형식
//! ```yaml
//! rules:
//!   - id: critical-active
//!     name: Page on-call for critical incidents
//!     condition: severity=critical,status=active
//!     action: notify_oncall
//! ```
//!
//! # 아키텍처
//! - [`ResponseEngine`]: 규칙 평가 코디네이터
//! - [`condition`]: `key=value` 조건식 파서
//! - [`loader`]: YAML 파일 로딩 및 유효성 검증
//! - [`store`]: 규칙/발동 이력 저장소
//! - [`types`]: 규칙 데이터 구조 정의

pub mod condition;
pub mod loader;
pub mod store;
pub mod types;

pub use condition::{Clause, Condition, ConditionError, IncidentField};
pub use loader::RuleLoader;
pub use store::{InMemoryRuleStore, RuleStore};
pub use types::{ActionLogEntry, ActionResult, DEFAULT_ACTION, LogLevel, ResponseRule};

use std::sync::Arc;

use flowguard_core::metrics as m;
use flowguard_core::types::Incident;
use tracing::{debug, info, warn};

/// 인시던트 하나에 대한 평가 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationSummary {
    /// 조건이 일치한 규칙 ID
    pub matched: Vec<String>,
    /// 발동 기록까지 성공한 규칙 수
    pub triggered: usize,
    /// 조건을 파싱하지 못한 규칙 수
    pub parse_errors: usize,
}

/// 대응 규칙 엔진
///
/// 규칙 하나의 실패(조건 파싱, 발동 기록)는 로그만 남기고 나머지 규칙
/// 평가를 계속합니다.
#[derive(Clone)]
pub struct ResponseEngine {
    store: Arc<dyn RuleStore>,
}

impl ResponseEngine {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn RuleStore> {
        &self.store
    }

    /// 인시던트에 대해 모든 활성 규칙을 평가합니다.
    pub fn evaluate(&self, incident: &Incident) -> EvaluationSummary {
        let mut summary = EvaluationSummary::default();

        for rule in self.store.active_rules() {
            let condition = match rule.parsed_condition() {
                Ok(condition) => condition,
                Err(e) => {
                    warn!(rule_id = %rule.id, error = %e, "skipping rule with invalid condition");
                    metrics::counter!(m::CORRELATOR_RULE_PARSE_ERRORS_TOTAL).increment(1);
                    summary.parse_errors += 1;
                    continue;
                }
            };

            if !condition.matches(incident) {
                continue;
            }
            summary.matched.push(rule.id.clone());

            let entry = ActionLogEntry::rule_triggered(&rule, &incident.id);
            match self.store.record_trigger(&rule.id, entry) {
                Ok(count) => {
                    info!(
                        rule_id = %rule.id,
                        action = rule.action_name(),
                        incident_id = %incident.id,
                        triggered_count = count,
                        "response rule triggered"
                    );
                    metrics::counter!(m::CORRELATOR_RULES_TRIGGERED_TOTAL, m::LABEL_RULE => rule.id.clone())
                        .increment(1);
                    summary.triggered += 1;
                }
                Err(e) => {
                    warn!(
                        rule_id = %rule.id,
                        incident_id = %incident.id,
                        error = %e,
                        "failed to record rule trigger"
                    );
                }
            }
        }

        debug!(
            incident_id = %incident.id,
            matched = summary.matched.len(),
            triggered = summary.triggered,
            "response rules evaluated"
        );
        summary
    }
}

impl std::fmt::Debug for ResponseEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseEngine")
            .field("active_rules", &self.store.active_rules().len())
            .finish()
    }
}
