#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//! - [`packet`]: L2/L3/L4 헤더 파싱 (pnet)
//! - [`flow`]: 방향 무관 플로우 키와 LRU + idle timeout 플로우 테이블
//! - [`window`]: 최근 이벤트 윈도우 (rolling count 피처용)
//! - [`features`]: 패킷 + 플로우 상태 + 윈도우 → [`FeatureRecord`](flowguard_core::FeatureRecord)
//! - [`classifier`]: kNN 분류기, fail-closed 래퍼
//! - [`blocklist`]: IP/포트/프로토콜 차단 규칙
//! - [`source`]: 라이브 캡처 / 재생 소스
//! - [`capture`]: 캡처 세션과 blocking 캡처 루프
//! - [`engine`]: FlowEngine -- Pipeline trait 구현

pub mod blocklist;
pub mod capture;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod features;
pub mod flow;
pub mod live;
pub mod packet;
pub mod source;
pub mod stats;
pub mod window;

// --- 주요 타입 re-export ---

// 엔진
pub use engine::{FlowEngine, FlowEngineBuilder};

// 설정
pub use config::EngineConfig;

// 에러
pub use error::FlowEngineError;

// 캡처
pub use capture::{CaptureSession, run_capture};
pub use packet::{LinkType, ParsedPacket};
pub use source::{LiveCapture, PacketSource, ReplayFrame, ReplaySource, SourceEvent};

// 플로우 / 피처
pub use features::FeatureBuilder;
pub use flow::{FlowKey, FlowState, FlowTable};
pub use window::{RollingEventWindow, WindowEvent};

// 분류 / 차단
pub use blocklist::{Blocklist, FilterRule};
pub use classifier::{FailClosed, KnnClassifier, KnnModel, NullClassifier};

// 조회
pub use live::LiveBuffer;
pub use stats::{CaptureStats, CaptureStatsSnapshot};
