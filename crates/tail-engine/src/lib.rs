//! logtail 엔진
//!
//! 자식 프로세스를 감시하며 출력을 수집하고, 라인 단위로 매칭하여
//! 라우터별 싱크(Transfer)에 기록합니다.
//!
//! # 모듈 구성
//!
//! - [`worker`]: 셸 명령 감시 루프, 출력 복제
//! - [`process`]: 셸 프로세스 실행, 프로세스 그룹 종료, 출력 펌프
//! - [`filter`]: (워커, 라우터) 쌍 단위 라인 선택 및 전달
//! - [`matcher`]: 라우터 매칭 정책
//! - [`router`]: 싱크와 취소 스코프를 소유하는 목적지
//! - [`transfer`]: 메모리 매핑 회전 파일 싱크
//! - [`server`]: 워커/라우터 토폴로지 관리
//! - [`config`]: 엔진 설정 (core 설정 확장)
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! process stdout -> Worker::write -+-> Filter (router A) -> Router A -> FileTransfer -> segment
//!                                  +-> Filter (router B) -> Router B -> FileTransfer -> segment
//!                                  +-> Server::subscribe (broadcast)
//! ```

pub mod config;
pub mod error;
pub mod filter;
pub mod matcher;
pub mod process;
pub mod router;
pub mod server;
pub mod transfer;
pub mod worker;

// --- 주요 타입 re-export ---

// 설정
pub use config::{EngineConfig, EngineConfigBuilder};

// 에러
pub use error::EngineError;

// 토폴로지
pub use filter::Filter;
pub use matcher::{LineMatcher, MatchPolicy};
pub use router::Router;
pub use server::{Server, WorkerReport};
pub use worker::{Worker, WorkerEvent};

// 싱크
pub use transfer::file::FileTransfer;
pub use transfer::segment::{BatchOutcome, SegmentWriter};
