//! 엔진 에러 타입
//!
//! [`EngineError`]는 워커, 필터, 라우터, 서버에서 발생하는 에러를 표현합니다.
//! `From<EngineError> for LogtailError` 변환이 구현되어 있어
//! 데몬에서 `?` 연산자로 전파할 수 있습니다.

use logtail_core::error::{LogtailError, TransferError};

/// 엔진 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// 셸 명령 실행 실패
    #[error("failed to spawn command '{command}': {reason}")]
    Spawn {
        /// 실행하려던 명령
        command: String,
        /// 실패 사유
        reason: String,
    },

    /// 명령이 실패 상태로 종료됨
    #[error("worker [{worker_id}] command failed: {status}")]
    CommandFailed {
        /// 워커 ID
        worker_id: String,
        /// 종료 상태
        status: String,
    },

    /// 동적 명령이 정상 종료됨 (동적 워커는 재시작하지 않으므로 서버에 보고)
    #[error("worker command stopped: worker [{worker_id}]")]
    CommandStopped {
        /// 워커 ID
        worker_id: String,
    },

    /// 매처 설정 오류 (정규식 컴파일 실패 등)
    #[error("invalid matcher for router '{router}': {reason}")]
    InvalidMatcher {
        /// 라우터 이름
        router: String,
        /// 실패 사유
        reason: String,
    },

    /// 이미 존재하는 워커/라우터
    #[error("{kind} '{id}' already exists")]
    Duplicate {
        /// 대상 종류 (worker, router)
        kind: &'static str,
        /// 대상 ID
        id: String,
    },

    /// 존재하지 않는 워커/라우터
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// 대상 종류 (worker, router)
        kind: &'static str,
        /// 대상 ID
        id: String,
    },

    /// 이미 정지된 서버에 대한 요청
    #[error("server '{0}' is stopped")]
    Stopped(String),

    /// 설정 값 오류
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 싱크 에러
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<EngineError> for LogtailError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Transfer(e) => LogtailError::Transfer(e),
            EngineError::Io(e) => LogtailError::Io(e),
            other => LogtailError::Engine(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failed_display() {
        let err = EngineError::CommandFailed {
            worker_id: "app-0".to_owned(),
            status: "exit status: 3".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("app-0"));
        assert!(msg.contains("exit status: 3"));
    }

    #[test]
    fn command_stopped_display() {
        let err = EngineError::CommandStopped {
            worker_id: "app-2".to_owned(),
        };
        assert_eq!(err.to_string(), "worker command stopped: worker [app-2]");
    }

    #[test]
    fn transfer_error_keeps_category() {
        let err = EngineError::from(TransferError::State("not started".to_owned()));
        let top: LogtailError = err.into();
        assert!(matches!(top, LogtailError::Transfer(_)));
    }

    #[test]
    fn other_errors_convert_to_engine() {
        let err = EngineError::NotFound {
            kind: "router",
            id: "errors".to_owned(),
        };
        let top: LogtailError = err.into();
        assert!(matches!(top, LogtailError::Engine(ref msg) if msg.contains("errors")));
    }
}
