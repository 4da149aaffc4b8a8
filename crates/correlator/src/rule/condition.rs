//! 대응 규칙 조건식
//!
//! # 문법
//! ```text
//! condition := clause ("," clause)*
//! clause    := field "=" value
//! field     := id | timestamp | source_ip | destination_ip | threat_type
//!            | severity | status | confidence | description
//! ```
//!
//! 필드 이름과 값은 앞뒤 공백을 제거하고 대소문자를 구분하지 않습니다.
//! 값에는 `=`가 포함될 수 있지만 `,`는 절 구분자이므로 포함될 수 없습니다.

use std::fmt;
use std::str::FromStr;

use flowguard_core::types::Incident;

/// 조건식 파싱 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConditionError {
    #[error("condition is empty")]
    Empty,

    #[error("clause {position} is empty")]
    EmptyClause { position: usize },

    #[error("clause '{clause}' is missing '='")]
    MissingEquals { clause: String },

    #[error("clause '{clause}' has an empty field name")]
    EmptyField { clause: String },

    #[error("clause '{clause}' has an empty value")]
    EmptyValue { clause: String },

    #[error("unknown incident field '{field}'")]
    UnknownField { field: String },
}

/// 조건에서 참조할 수 있는 인시던트 필드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IncidentField {
    Id,
    Timestamp,
    SourceIp,
    DestinationIp,
    ThreatType,
    Severity,
    Status,
    Confidence,
    Description,
}

impl IncidentField {
    pub const ALL: [Self; 9] = [
        Self::Id,
        Self::Timestamp,
        Self::SourceIp,
        Self::DestinationIp,
        Self::ThreatType,
        Self::Severity,
        Self::Status,
        Self::Confidence,
        Self::Description,
    ];

    /// 필드 이름 (대소문자 무시)
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|field| field.as_str().eq_ignore_ascii_case(name))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Timestamp => "timestamp",
            Self::SourceIp => "source_ip",
            Self::DestinationIp => "destination_ip",
            Self::ThreatType => "threat_type",
            Self::Severity => "severity",
            Self::Status => "status",
            Self::Confidence => "confidence",
            Self::Description => "description",
        }
    }

    /// 인시던트에서 이 필드의 문자열 표현을 꺼냅니다.
    pub fn value_of(&self, incident: &Incident) -> String {
        match self {
            Self::Id => incident.id.clone(),
            Self::Timestamp => incident.timestamp.to_rfc3339(),
            Self::SourceIp => incident.source_ip.to_string(),
            Self::DestinationIp => incident.destination_ip.to_string(),
            Self::ThreatType => incident.threat_type.to_string(),
            Self::Severity => incident.severity.to_string(),
            Self::Status => incident.status.to_string(),
            Self::Confidence => incident.confidence.to_string(),
            Self::Description => incident.description.clone(),
        }
    }
}

impl fmt::Display for IncidentField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `field=value` 절 하나
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub field: IncidentField,
    /// 공백 제거 후 소문자로 정규화된 값
    pub value: String,
}

impl Clause {
    pub fn matches(&self, incident: &Incident) -> bool {
        self.field.value_of(incident).trim().to_lowercase() == self.value
    }
}

/// 파싱된 조건식. 모든 절이 일치해야 참입니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    clauses: Vec<Clause>,
}

impl Condition {
    pub fn parse(input: &str) -> Result<Self, ConditionError> {
        if input.trim().is_empty() {
            return Err(ConditionError::Empty);
        }

        let clauses = input
            .split(',')
            .enumerate()
            .map(|(i, raw)| parse_clause(raw, i + 1))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { clauses })
    }

    pub fn matches(&self, incident: &Incident) -> bool {
        self.clauses.iter().all(|clause| clause.matches(incident))
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }
}

fn parse_clause(raw: &str, position: usize) -> Result<Clause, ConditionError> {
    let clause = raw.trim();
    if clause.is_empty() {
        return Err(ConditionError::EmptyClause { position });
    }

    let Some((field, value)) = clause.split_once('=') else {
        return Err(ConditionError::MissingEquals {
            clause: clause.to_owned(),
        });
    };
    let (field, value) = (field.trim(), value.trim());
    if field.is_empty() {
        return Err(ConditionError::EmptyField {
            clause: clause.to_owned(),
        });
    }
    if value.is_empty() {
        return Err(ConditionError::EmptyValue {
            clause: clause.to_owned(),
        });
    }

    let field = IncidentField::from_name(field).ok_or_else(|| ConditionError::UnknownField {
        field: field.to_owned(),
    })?;
    Ok(Clause {
        field,
        value: value.to_lowercase(),
    })
}

impl FromStr for Condition {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", clause.field, clause.value)?;
        }
        Ok(())
    }
}
