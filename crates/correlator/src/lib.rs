#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//! - [`delivery`]: 속도 제한 전달 루프와 전달 통계
//! - [`incident`]: 트래픽 레코드 → 인시던트 판정
//! - [`rule`]: 대응 규칙 조건식, 저장소, 로더, 평가 엔진
//! - [`feed`]: 라이브 JSON 피드 (broadcast)
//! - [`sink`]: 메모리 / JSON lines sink
//! - [`pipeline`]: CorrelationPipeline -- Pipeline trait 구현

pub mod config;
pub mod delivery;
pub mod error;
pub mod feed;
pub mod incident;
pub mod pipeline;
pub mod rule;
pub mod sink;

// --- 주요 타입 re-export ---

// 파이프라인
pub use pipeline::{CorrelationPipeline, CorrelationPipelineBuilder};

// 설정
pub use config::CorrelationConfig;

// 에러
pub use error::CorrelatorError;

// 전달
pub use delivery::{Delivery, DeliveryOutcome, DeliveryStats, DeliveryStatsSnapshot, run_delivery};

// 상관 분석 / 대응
pub use incident::{Assessment, IncidentCorrelator};
pub use rule::{
    ActionLogEntry, Condition, ConditionError, EvaluationSummary, InMemoryRuleStore,
    ResponseEngine, ResponseRule, RuleLoader, RuleStore,
};

// 출력
pub use feed::LiveFeed;
pub use sink::{ConfiguredSink, JsonLinesSink, MemorySink};
