//! 싱크 구현
//!
//! - [`file`]: 메모리 매핑 회전 파일 싱크
//! - [`segment`]: 세그먼트 파일 기록기
//!
//! [`build`]는 설정의 `type` 값에 맞는 싱크를 생성합니다.

pub mod file;
pub mod segment;

use logtail_core::config::TransferConfig;
use logtail_core::transfer::{Transfer, TransferKind};

use crate::config::EngineConfig;
use crate::error::EngineError;
use file::FileTransfer;

/// 설정에 맞는 싱크를 생성합니다. 아직 시작되지 않은 상태입니다.
pub fn build(
    config: &TransferConfig,
    engine: &EngineConfig,
) -> Result<Box<dyn Transfer>, EngineError> {
    match config.kind {
        TransferKind::File => {
            if config.dir.is_empty() {
                return Err(EngineError::Config {
                    field: "transfers.dir".to_owned(),
                    reason: format!("file transfer '{}' requires a directory", config.name),
                });
            }
            Ok(Box::new(FileTransfer::new(
                &config.dir,
                engine.transfer_file_size,
                engine.channel_buffer_size,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_file_transfer() {
        let config = TransferConfig {
            name: "local".to_owned(),
            kind: TransferKind::File,
            dir: "/tmp/logtail".to_owned(),
        };
        let transfer = build(&config, &EngineConfig::default()).unwrap();
        assert_eq!(transfer.kind(), TransferKind::File);
    }

    #[test]
    fn file_transfer_requires_dir() {
        let config = TransferConfig {
            name: "local".to_owned(),
            kind: TransferKind::File,
            dir: String::new(),
        };
        assert!(build(&config, &EngineConfig::default()).is_err());
    }
}
