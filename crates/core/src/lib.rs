//! logtail 공통 크레이트
//!
//! 엔진과 데몬이 함께 사용하는 기반 타입을 제공합니다.
//!
//! - [`stopper`]: 계층형 취소 신호 ([`Stopper`])
//! - [`transfer`]: 라우팅된 라인을 저장하는 싱크 추상화 ([`Transfer`])
//! - [`config`]: `logtail.toml` 파싱 및 검증
//! - [`error`]: 도메인 에러 타입
//! - [`metrics`]: 메트릭 이름 상수

pub mod config;
pub mod error;
pub mod metrics;
pub mod stopper;
pub mod transfer;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, LogtailError, TransferError};

// 설정
pub use config::LogtailConfig;

// 취소 신호
pub use stopper::Stopper;

// 싱크 trait
pub use transfer::{BoxFuture, Transfer, TransferBinding, TransferKind, TransferTask};
