//! 에러 타입 -- 도메인별 에러 정의

/// Flowguard 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum FlowguardError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파이프라인 처리 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 패킷 캡처 / 분류기 에러
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    /// 파싱 에러
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// 스토리지(sink) 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 파이프라인 처리 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 채널 전송 실패
    #[error("channel send failed: {0}")]
    ChannelSend(String),

    /// 채널 수신 실패
    #[error("channel receive failed: {0}")]
    ChannelRecv(String),

    /// 파이프라인 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    /// 이미 실행 중
    #[error("pipeline already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("pipeline not running")]
    NotRunning,
}

/// 패킷 캡처 에러
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// 인터페이스를 찾을 수 없음
    #[error("interface not found: {0}")]
    InterfaceNotFound(String),

    /// datalink 채널 열기 실패
    #[error("failed to open capture channel: {0}")]
    ChannelOpen(String),

    /// 분류기 실패
    #[error("classifier error: {0}")]
    Classifier(String),
}

/// 파싱 에러
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// 지원하지 않는 형식
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// 파싱 실패
    #[error("parse failed at offset {offset}: {reason}")]
    Failed { offset: usize, reason: String },

    /// 입력 데이터 초과
    #[error("input too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },
}

/// 스토리지 에러
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// 연결 실패
    #[error("connection failed: {0}")]
    Connection(String),

    /// 쿼리 실패
    #[error("query failed: {0}")]
    Query(String),

    /// 중복 ID
    #[error("duplicate id: {0}")]
    Duplicate(String),
}
