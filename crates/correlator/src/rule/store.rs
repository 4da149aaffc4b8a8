//! 대응 규칙 저장소
//!
//! [`RuleStore`]는 상관 분석 시점의 활성 규칙 조회와 발동 기록을 담당합니다.
//! 발동 기록은 이력 추가와 카운터 증가가 함께 성공하거나 함께 실패해야 합니다.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::CorrelatorError;

use super::types::{ActionLogEntry, ResponseRule};

/// 기본 이력 보관 개수
const DEFAULT_LOG_CAPACITY: usize = 1_000;

/// 대응 규칙 저장소
pub trait RuleStore: Send + Sync {
    /// 현재 활성 규칙 목록
    fn active_rules(&self) -> Vec<ResponseRule>;

    /// 규칙 발동을 기록합니다. 이력을 추가한 뒤 카운터를 1 증가시키고
    /// 증가된 카운터를 반환합니다. 이력 추가에 실패하면 카운터는 그대로입니다.
    fn record_trigger(&self, rule_id: &str, entry: ActionLogEntry) -> Result<u64, CorrelatorError>;
}

#[derive(Debug)]
struct StoreInner {
    rules: Vec<ResponseRule>,
    log: VecDeque<ActionLogEntry>,
}

/// 메모리 규칙 저장소
///
/// 이력은 `log_capacity`개까지 보관하며 가장 오래된 것부터 버립니다.
#[derive(Debug)]
pub struct InMemoryRuleStore {
    inner: Mutex<StoreInner>,
    log_capacity: usize,
}

impl InMemoryRuleStore {
    /// 규칙 목록으로 저장소를 만듭니다. 규칙 검증과 ID 중복 검사를 수행합니다.
    pub fn new(rules: Vec<ResponseRule>) -> Result<Self, CorrelatorError> {
        for (i, rule) in rules.iter().enumerate() {
            rule.validate()?;
            if rules[..i].iter().any(|r| r.id == rule.id) {
                return Err(CorrelatorError::RuleValidation {
                    rule_id: rule.id.clone(),
                    reason: "duplicate rule id".to_owned(),
                });
            }
        }
        Ok(Self {
            inner: Mutex::new(StoreInner {
                rules,
                log: VecDeque::new(),
            }),
            log_capacity: DEFAULT_LOG_CAPACITY,
        })
    }

    /// 이력 보관 개수를 지정합니다 (최소 1).
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 규칙을 추가합니다. 같은 ID가 있으면 교체하되 발동 횟수는 유지합니다.
    pub fn upsert_rule(&self, mut rule: ResponseRule) -> Result<(), CorrelatorError> {
        rule.validate()?;
        let mut inner = self.lock();
        match inner.rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => {
                rule.triggered_count = existing.triggered_count;
                *existing = rule;
            }
            None => inner.rules.push(rule),
        }
        Ok(())
    }

    /// 제거되면 `true`
    pub fn remove_rule(&self, rule_id: &str) -> bool {
        let mut inner = self.lock();
        let before = inner.rules.len();
        inner.rules.retain(|r| r.id != rule_id);
        inner.rules.len() < before
    }

    pub fn set_active(&self, rule_id: &str, active: bool) -> Result<(), CorrelatorError> {
        let mut inner = self.lock();
        let rule = inner
            .rules
            .iter_mut()
            .find(|r| r.id == rule_id)
            .ok_or_else(|| CorrelatorError::RuleNotFound(rule_id.to_owned()))?;
        rule.active = active;
        Ok(())
    }

    /// 전체 규칙 (비활성 포함)
    pub fn rules(&self) -> Vec<ResponseRule> {
        self.lock().rules.clone()
    }

    pub fn rule(&self, rule_id: &str) -> Option<ResponseRule> {
        self.lock().rules.iter().find(|r| r.id == rule_id).cloned()
    }

    pub fn triggered_count(&self, rule_id: &str) -> Option<u64> {
        self.rule(rule_id).map(|r| r.triggered_count)
    }

    /// 보관 중인 이력 (오래된 순)
    pub fn action_log(&self) -> Vec<ActionLogEntry> {
        self.lock().log.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().rules.is_empty()
    }
}

impl Default for InMemoryRuleStore {
    fn default() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                rules: Vec::new(),
                log: VecDeque::new(),
            }),
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

impl RuleStore for InMemoryRuleStore {
    fn active_rules(&self) -> Vec<ResponseRule> {
        self.lock()
            .rules
            .iter()
            .filter(|r| r.active)
            .cloned()
            .collect()
    }

    fn record_trigger(&self, rule_id: &str, entry: ActionLogEntry) -> Result<u64, CorrelatorError> {
        let mut inner = self.lock();
        let index = inner
            .rules
            .iter()
            .position(|r| r.id == rule_id)
            .ok_or_else(|| CorrelatorError::RuleNotFound(rule_id.to_owned()))?;

        if inner.log.len() >= self.log_capacity {
            inner.log.pop_front();
        }
        inner.log.push_back(entry);

        let rule = &mut inner.rules[index];
        rule.triggered_count += 1;
        Ok(rule.triggered_count)
    }
}
