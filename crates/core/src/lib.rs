#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod pipeline;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{
    CaptureError, ConfigError, FlowguardError, ParseError, PipelineError, StorageError,
};

// 설정
pub use config::FlowguardConfig;

// 이벤트
pub use event::{Event, EventMetadata, IncidentEvent, TrafficEvent};

// 파이프라인 trait
pub use pipeline::{Classifier, DynPipeline, HealthStatus, Pipeline, TrafficSink};

// 도메인 타입
pub use types::{
    ClassLabel, ClassProbabilities, Classification, ConnState, FeatureRecord, FlowMetrics,
    Incident, IncidentStatus, Protocol, RollingCounters, Service, Severity, ThreatType,
    TrafficRecord, TrafficStatus,
};
