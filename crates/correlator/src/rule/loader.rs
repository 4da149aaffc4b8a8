//! 대응 규칙 파일 로더
//!
//! 하나의 YAML 파일에 `rules:` 목록으로 규칙을 정의합니다. ID/이름 검증과
//! ID 중복 검사는 로드 시점에 실패로 처리하고, 파싱되지 않는 조건식은 경고만
//! 남깁니다 (해당 규칙은 발동하지 않습니다).

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::CorrelatorError;

use super::types::ResponseRule;

const MAX_RULE_FILE_SIZE: u64 = 10 * 1024 * 1024; // 10MB
const MAX_RULES_COUNT: usize = 10_000;

#[derive(Debug, Deserialize)]
struct RulesFile {
    #[serde(default)]
    rules: Vec<ResponseRule>,
}

/// 대응 규칙 로더
pub struct RuleLoader;

impl RuleLoader {
    /// 규칙 파일을 로드합니다.
    ///
    /// 경로가 비어 있거나 파일이 없으면 빈 목록을 반환합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Vec<ResponseRule>, CorrelatorError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Ok(Vec::new());
        }
        let source = path.display().to_string();

        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %source, "response rule file not found, no rules loaded");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(CorrelatorError::RuleLoad {
                    path: source,
                    reason: format!("failed to read file metadata: {e}"),
                });
            }
        };
        if metadata.len() > MAX_RULE_FILE_SIZE {
            return Err(CorrelatorError::RuleLoad {
                path: source,
                reason: format!(
                    "file too large: {} bytes (max: {MAX_RULE_FILE_SIZE})",
                    metadata.len()
                ),
            });
        }

        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| CorrelatorError::RuleLoad {
                    path: source.clone(),
                    reason: format!("failed to read file: {e}"),
                })?;

        let rules = Self::parse_yaml(&content, &source)?;
        info!(path = %source, count = rules.len(), "loaded response rules");
        Ok(rules)
    }

    /// YAML 문자열에서 규칙 목록을 파싱하고 검증합니다.
    pub fn parse_yaml(yaml_str: &str, source: &str) -> Result<Vec<ResponseRule>, CorrelatorError> {
        let file: RulesFile =
            serde_yaml::from_str(yaml_str).map_err(|e| CorrelatorError::RuleLoad {
                path: source.to_owned(),
                reason: format!("YAML parse error: {e}"),
            })?;

        if file.rules.len() > MAX_RULES_COUNT {
            return Err(CorrelatorError::RuleLoad {
                path: source.to_owned(),
                reason: format!("too many rules: max {MAX_RULES_COUNT}"),
            });
        }

        let mut seen = HashSet::with_capacity(file.rules.len());
        for rule in &file.rules {
            rule.validate()?;
            if !seen.insert(rule.id.as_str()) {
                return Err(CorrelatorError::RuleValidation {
                    rule_id: rule.id.clone(),
                    reason: "duplicate rule id".to_owned(),
                });
            }
            if let Err(e) = rule.parsed_condition() {
                warn!(
                    rule_id = %rule.id,
                    path = source,
                    error = %e,
                    "response rule condition does not parse, rule will never fire"
                );
            }
        }
        drop(seen);

        Ok(file.rules)
    }
}
