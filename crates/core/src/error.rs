//! 에러 타입 — 도메인별 에러 정의

/// logtail 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum LogtailError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 싱크(Transfer) 에러
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// 엔진 내부 에러 (워커, 라우터, 서버)
    #[error("engine error: {0}")]
    Engine(String),

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

/// 싱크(Transfer) 에러
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// 디렉토리/세그먼트/매핑 생성 실패 (start 시 동기적으로 반환)
    #[error("transfer setup failed in {dir}: {reason}")]
    Setup { dir: String, reason: String },

    /// 아직 시작되지 않았거나 이미 시작된 싱크
    #[error("transfer state error: {0}")]
    State(String),

    /// I/O 에러
    #[error("transfer io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_error_display() {
        let err = TransferError::Setup {
            dir: "/var/log/logtail".to_owned(),
            reason: "permission denied".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/var/log/logtail"));
        assert!(msg.contains("permission denied"));
    }

    #[test]
    fn transfer_error_converts_to_logtail_error() {
        let err = TransferError::State("already started".to_owned());
        let top: LogtailError = err.into();
        assert!(matches!(top, LogtailError::Transfer(_)));
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::InvalidValue {
            field: "engine.transfer_file_size".to_owned(),
            reason: "must be greater than 0".to_owned(),
        };
        assert!(err.to_string().contains("engine.transfer_file_size"));
    }
}
