//! 분류기 구현
//!
//! - [`NullClassifier`]: 모델이 없을 때 사용, 항상 `Normal`
//! - [`KnnClassifier`]: 오프라인에서 학습한 k-NN 모델 아티팩트(JSON)로 추론
//! - [`FailClosed`]: 분류기 에러를 `Normal` / 신뢰도 0으로 대체
//!
//! # 모델 아티팩트 형식
//! ```json
//! {
//!   "selected_features": ["sbytes", "rate", "sttl"],
//!   "scaler": { "mean": [..], "scale": [..] },
//!   "k": 5,
//!   "samples": [[..], ..],
//!   "labels": [0, 1, ..]
//! }
//! ```
//! `samples`는 전처리와 표준화를 마친 학습 벡터입니다.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use flowguard_core::config::ClassifierConfig;
use flowguard_core::error::{CaptureError, FlowguardError};
use flowguard_core::metrics as m;
use flowguard_core::pipeline::Classifier;
use flowguard_core::types::{ClassLabel, ClassProbabilities, Classification, FeatureRecord};

use crate::error::FlowEngineError;

/// log 변환 없이 그대로 쓰는 피처
const NON_LOG_FEATURES: &[&str] = &[
    "sttl",
    "dttl",
    "swin",
    "dwin",
    "trans_depth",
    "ct_state_ttl",
    "ct_flw_http_mthd",
];

/// 이진 플래그 피처
const BINARY_FEATURES: &[&str] = &["is_sm_ips_ports", "is_ftp_login"];

// =============================================================================
// NullClassifier
// =============================================================================

/// 모델이 설정되지 않았을 때의 분류기
#[derive(Debug, Clone, Copy, Default)]
pub struct NullClassifier;

impl Classifier for NullClassifier {
    fn name(&self) -> &str {
        "none"
    }

    fn classify(&self, _features: &FeatureRecord) -> Result<Classification, FlowguardError> {
        Ok(Classification::fail_closed())
    }
}

// =============================================================================
// KnnClassifier
// =============================================================================

/// 표준화 파라미터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

/// k-NN 모델 아티팩트
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnnModel {
    pub selected_features: Vec<String>,
    pub scaler: Scaler,
    pub k: usize,
    pub samples: Vec<Vec<f64>>,
    /// 0 normal, 1 anomalous
    pub labels: Vec<u8>,
}

impl KnnModel {
    /// 아티팩트 일관성을 검사합니다.
    pub fn validate(&self) -> Result<(), String> {
        let dims = self.selected_features.len();
        if dims == 0 {
            return Err("selected_features must not be empty".to_owned());
        }
        if self.scaler.mean.len() != dims || self.scaler.scale.len() != dims {
            return Err(format!(
                "scaler has {} means and {} scales for {} features",
                self.scaler.mean.len(),
                self.scaler.scale.len(),
                dims
            ));
        }
        if self.samples.is_empty() {
            return Err("samples must not be empty".to_owned());
        }
        if self.labels.len() != self.samples.len() {
            return Err(format!(
                "{} labels for {} samples",
                self.labels.len(),
                self.samples.len()
            ));
        }
        if self.k == 0 || self.k > self.samples.len() {
            return Err(format!(
                "k must be between 1 and {}, got {}",
                self.samples.len(),
                self.k
            ));
        }
        if let Some(i) = self.samples.iter().position(|s| s.len() != dims) {
            return Err(format!("sample {} does not have {} dimensions", i, dims));
        }
        if let Some(label) = self.labels.iter().find(|l| **l > 1) {
            return Err(format!("label must be 0 or 1, got {}", label));
        }
        Ok(())
    }
}

/// k-NN 추론기
///
/// 전처리: 일부 피처를 제외하고 `log10(x + 1)`, 이후 `(x - mean) / scale`.
/// 유클리드 거리 기준 k개 이웃의 투표 비율이 클래스 확률입니다.
#[derive(Debug, Clone)]
pub struct KnnClassifier {
    model: KnnModel,
}

impl KnnClassifier {
    pub fn from_model(model: KnnModel) -> Result<Self, FlowEngineError> {
        model.validate().map_err(|reason| FlowEngineError::ModelLoad {
            path: "<inline>".to_owned(),
            reason,
        })?;
        Ok(Self { model })
    }

    pub fn from_json(json: &str) -> Result<Self, FlowEngineError> {
        let model: KnnModel =
            serde_json::from_str(json).map_err(|e| FlowEngineError::ModelLoad {
                path: "<inline>".to_owned(),
                reason: e.to_string(),
            })?;
        Self::from_model(model)
    }

    /// JSON 모델 파일을 로드합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, FlowEngineError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| FlowEngineError::ModelLoad {
                path: display.clone(),
                reason: e.to_string(),
            })?;
        Self::from_json(&json).map_err(|e| match e {
            FlowEngineError::ModelLoad { reason, .. } => FlowEngineError::ModelLoad {
                path: display.clone(),
                reason,
            },
            other => other,
        })
    }

    pub fn model(&self) -> &KnnModel {
        &self.model
    }

    /// 피처 레코드를 표준화된 벡터로 변환합니다.
    fn vectorize(&self, features: &FeatureRecord) -> Result<Vec<f64>, FlowEngineError> {
        let scaler = &self.model.scaler;
        self.model
            .selected_features
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let raw = preprocess(name, features.feature_value(name));
                let scale = if scaler.scale[i] == 0.0 {
                    1.0
                } else {
                    scaler.scale[i]
                };
                let value = (raw - scaler.mean[i]) / scale;
                if value.is_finite() {
                    Ok(value)
                } else {
                    Err(FlowEngineError::Classify(format!(
                        "feature '{}' is not finite after scaling",
                        name
                    )))
                }
            })
            .collect()
    }

    fn predict(&self, features: &FeatureRecord) -> Result<Classification, FlowEngineError> {
        let query = self.vectorize(features)?;

        // (거리, 샘플 순번, 라벨). 같은 거리는 앞선 샘플이 이웃이 됩니다.
        let mut neighbours: Vec<(f64, usize, u8)> = self
            .model
            .samples
            .iter()
            .zip(&self.model.labels)
            .enumerate()
            .map(|(i, (sample, label))| (squared_distance(&query, sample), i, *label))
            .collect();

        // 전체 정렬 없이 가장 가까운 k개만 앞으로 모읍니다.
        let k = self.model.k;
        neighbours.select_nth_unstable_by(k - 1, |a, b| {
            a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
        });
        let anomalous_votes = neighbours[..k].iter().filter(|(_, _, l)| *l == 1).count();
        let anomalous = anomalous_votes as f64 / k as f64;
        let normal = 1.0 - anomalous;

        let (prediction, label) = if anomalous > normal {
            (1, ClassLabel::Anomalous)
        } else {
            (0, ClassLabel::Normal)
        };

        Ok(Classification {
            prediction,
            label,
            confidence: normal.max(anomalous),
            probabilities: Some(ClassProbabilities { normal, anomalous }),
        })
    }
}

impl Classifier for KnnClassifier {
    fn name(&self) -> &str {
        "knn"
    }

    fn classify(&self, features: &FeatureRecord) -> Result<Classification, FlowguardError> {
        self.predict(features).map_err(FlowguardError::from)
    }
}

fn preprocess(name: &str, value: f64) -> f64 {
    if NON_LOG_FEATURES.contains(&name) || BINARY_FEATURES.contains(&name) {
        value
    } else {
        (value.max(0.0) + 1.0).log10()
    }
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

// =============================================================================
// FailClosed
// =============================================================================

/// 분류기 에러를 `Normal` / 신뢰도 0으로 바꾸는 래퍼
#[derive(Clone)]
pub struct FailClosed {
    inner: Arc<dyn Classifier>,
}

impl FailClosed {
    pub fn new(inner: Arc<dyn Classifier>) -> Self {
        Self { inner }
    }

    /// 항상 결과를 반환합니다. 에러는 경고 로그와 메트릭으로만 남습니다.
    pub fn verdict(&self, features: &FeatureRecord) -> Classification {
        match self.inner.classify(features) {
            Ok(classification) => classification,
            Err(e) => {
                warn!(
                    classifier = self.inner.name(),
                    record = %features,
                    error = %e,
                    "classifier failed, falling back to Normal"
                );
                metrics::counter!(m::CLASSIFIER_FAILURES_TOTAL).increment(1);
                Classification::fail_closed()
            }
        }
    }
}

impl Classifier for FailClosed {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn classify(&self, features: &FeatureRecord) -> Result<Classification, FlowguardError> {
        Ok(self.verdict(features))
    }
}

/// 설정에 맞는 분류기를 생성합니다.
pub async fn from_config(config: &ClassifierConfig) -> Result<Arc<dyn Classifier>, FlowguardError> {
    match config.kind.as_str() {
        "none" => Ok(Arc::new(NullClassifier)),
        "knn" => {
            let knn = KnnClassifier::load(&config.model_path).await?;
            info!(
                path = %config.model_path,
                features = knn.model().selected_features.len(),
                samples = knn.model().samples.len(),
                k = knn.model().k,
                "loaded knn classifier"
            );
            Ok(Arc::new(knn))
        }
        other => Err(CaptureError::Classifier(format!("unknown classifier kind: {}", other)).into()),
    }
}
