//! 파이프라인 trait -- 모듈 확장 포인트 정의
//!
//! - [`Pipeline`]: 장기 실행 모듈(flow-engine, correlator)의 생명주기
//! - [`DynPipeline`]: 데몬이 `Box<dyn DynPipeline>`으로 보관하기 위한 어댑터
//! - [`Classifier`]: 피처 레코드를 분류하는 동기 capability
//! - [`TrafficSink`]: 트래픽/인시던트 영속화 계약

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;

use crate::error::FlowguardError;
use crate::types::{Classification, FeatureRecord, Incident, TrafficRecord};

/// `Send` boxed future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 모듈 건강 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum HealthStatus {
    /// 정상 동작
    Healthy,
    /// 동작하지만 성능 저하 또는 일부 기능 제한
    Degraded(String),
    /// 동작 불가
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

/// 장기 실행 모듈의 생명주기 trait
///
/// ```text
/// Initialized → start() → Running → stop() → Stopped → start() → Running
/// ```
pub trait Pipeline: Send + Sync {
    /// 모듈을 시작합니다. 이미 실행 중이면 `PipelineError::AlreadyRunning`.
    fn start(&mut self) -> impl Future<Output = Result<(), FlowguardError>> + Send;

    /// 모듈을 정지합니다. 실행 중이 아니면 `PipelineError::NotRunning`.
    fn stop(&mut self) -> impl Future<Output = Result<(), FlowguardError>> + Send;

    /// 모듈의 건강 상태를 확인합니다.
    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}

/// dyn-compatible 파이프라인 trait
///
/// `Pipeline`은 RPITIT를 사용하므로 `dyn Pipeline`이 불가합니다.
pub trait DynPipeline: Send + Sync {
    fn start(&mut self) -> BoxFuture<'_, Result<(), FlowguardError>>;

    fn stop(&mut self) -> BoxFuture<'_, Result<(), FlowguardError>>;

    fn health_check(&self) -> BoxFuture<'_, HealthStatus>;
}

impl<T: Pipeline> DynPipeline for T {
    fn start(&mut self) -> BoxFuture<'_, Result<(), FlowguardError>> {
        Box::pin(Pipeline::start(self))
    }

    fn stop(&mut self) -> BoxFuture<'_, Result<(), FlowguardError>> {
        Box::pin(Pipeline::stop(self))
    }

    fn health_check(&self) -> BoxFuture<'_, HealthStatus> {
        Box::pin(Pipeline::health_check(self))
    }
}

/// 피처 레코드 분류기
///
/// 캡처 루프 안에서 동기적으로 호출됩니다. 구현체는 빠르게 반환해야 하며
/// 패닉 대신 에러를 반환해야 합니다. 호출자는 에러를
/// [`Classification::fail_closed`]로 대체합니다.
pub trait Classifier: Send + Sync {
    /// 분류기 이름
    fn name(&self) -> &str;

    /// 피처 레코드를 분류합니다.
    fn classify(&self, features: &FeatureRecord) -> Result<Classification, FlowguardError>;
}

/// 트래픽/인시던트 영속화 대상
///
/// 레코드는 미리 할당된 고유 ID를 가지며, 같은 ID를 다시 쓰는 것은
/// 에러 없이 무시되어야 합니다.
pub trait TrafficSink: Send + Sync {
    /// 트래픽 레코드를 저장합니다.
    fn write_traffic(
        &self,
        record: &TrafficRecord,
    ) -> impl Future<Output = Result<(), FlowguardError>> + Send;

    /// 인시던트를 저장합니다.
    fn write_incident(
        &self,
        incident: &Incident,
    ) -> impl Future<Output = Result<(), FlowguardError>> + Send;
}
