//! 싱크 trait — 라우팅된 라인을 저장하는 확장 포인트
//!
//! [`Transfer`]는 라우터가 소유하는 목적지 추상화입니다.
//! 파일 기반 구현은 `logtail-engine`에 있으며, 네트워크/오브젝트 스토리지 등
//! 다른 백엔드도 같은 계약으로 추가할 수 있습니다.
//!
//! # 계약
//! - `start`는 라우터 당 정확히 한 번 호출되며, 설정 에러는 시작 결과로 반환합니다.
//! - `trans`는 호출자를 절대 블로킹하지 않습니다. 내부 큐가 가득 차면 배치를 버립니다.
//! - 라우터 스코프가 정지되면 싱크는 열린 리소스를 정리하고 `TransferTask`를 완료합니다.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, TransferError};
use crate::stopper::Stopper;

/// `dyn Transfer`에서 사용할 수 있는 박싱된 Future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 싱크의 비동기 기록 루프 핸들
///
/// 싱크가 마지막 정리(세그먼트 제출 등)를 끝내면 완료됩니다.
pub type TransferTask = tokio::task::JoinHandle<()>;

/// 사용 가능한 싱크 종류
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    /// 메모리 매핑된 회전 파일
    #[default]
    File,
}

impl TransferKind {
    /// 지원하는 모든 싱크 종류
    pub const ALL: &'static [TransferKind] = &[TransferKind::File];

    /// 설정 파일에서 사용하는 이름을 반환합니다.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "transfers.type".to_owned(),
                reason: format!("unknown transfer type '{s}'"),
            })
    }
}

/// 싱크가 라우터에 바인딩될 때 전달받는 정보
#[derive(Debug, Clone)]
pub struct TransferBinding {
    /// 라우터 이름 (파일 싱크에서는 파일명 접두어로 사용)
    pub router_name: String,
    /// 라우터 스코프. 정지되면 싱크는 정리 후 종료합니다.
    pub stopper: Stopper,
}

/// 라우팅된 데이터를 저장하는 싱크 trait
///
/// 라우터는 `Box<dyn Transfer>`로 싱크를 소유하며, 여러 필터가 동시에
/// `trans`를 호출합니다.
pub trait Transfer: Send + Sync {
    /// 싱크 종류를 반환합니다.
    fn kind(&self) -> TransferKind;

    /// 라우터에 바인딩하고 기록 루프를 시작합니다.
    ///
    /// 디렉토리 생성처럼 블로킹되는 준비 작업은 런타임 밖에서 수행하고,
    /// 그 실패는 반환값으로 돌려줍니다.
    fn start(
        &mut self,
        binding: TransferBinding,
    ) -> BoxFuture<'_, Result<TransferTask, TransferError>>;

    /// 한 배치의 라인을 비동기 저장 큐에 넣습니다.
    ///
    /// 큐가 가득 차면 배치를 조용히 버리고 `Ok(())`를 반환합니다.
    /// 라우터가 이미 닫혔으면 아무 것도 하지 않습니다.
    fn trans(&self, server_id: &str, batch: Vec<Bytes>) -> Result<(), TransferError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_known_names() {
        assert_eq!("file".parse::<TransferKind>().unwrap(), TransferKind::File);
    }

    #[test]
    fn kind_rejects_unknown_names() {
        let err = "kafka".parse::<TransferKind>().unwrap_err();
        assert!(err.to_string().contains("kafka"));
    }

    #[test]
    fn all_kinds_round_trip_through_display() {
        for kind in TransferKind::ALL {
            assert_eq!(kind.to_string().parse::<TransferKind>().unwrap(), *kind);
        }
    }
}
