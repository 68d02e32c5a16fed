//! 엔진 설정
//!
//! [`EngineConfig`]는 core의 [`EngineSection`](logtail_core::config::EngineSection)을
//! 기반으로 엔진 내부에서 사용하는 설정을 제공합니다.
//!
//! # 사용 예시
//! ```ignore
//! use logtail_core::config::LogtailConfig;
//! use logtail_engine::config::EngineConfig;
//!
//! let core_config = LogtailConfig::default();
//! let config = EngineConfig::from_core(&core_config.engine);
//! ```

use std::time::Duration;

use logtail_core::config::EngineSection;

use crate::error::EngineError;

/// 서버 출력 broadcast 채널 기본 용량
const DEFAULT_OUTPUT_BUFFER_SIZE: usize = 256;

/// 엔진 설정
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 세그먼트 파일 고정 용량 (바이트)
    pub transfer_file_size: usize,
    /// 싱크 입력 큐 깊이
    pub channel_buffer_size: usize,
    /// 워커 → 필터 큐 깊이
    pub filter_buffer_size: usize,
    /// 정적 명령 실패 후 재시작 대기 시간
    pub command_fail_retry: Duration,
    /// 정적 명령 정상 종료 시 재시작 여부
    pub restart_on_clean_exit: bool,

    // --- 확장 설정 (core에 없는 추가 필드) ---
    /// 서버 출력 구독 채널 용량 (느린 구독자는 오래된 청크를 놓침)
    pub output_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_core(&EngineSection::default())
    }
}

impl EngineConfig {
    /// core 설정에서 엔진 설정을 생성합니다.
    pub fn from_core(core: &EngineSection) -> Self {
        Self {
            transfer_file_size: core.transfer_file_size,
            channel_buffer_size: core.channel_buffer_size,
            filter_buffer_size: core.filter_buffer_size,
            command_fail_retry: Duration::from_secs(core.command_fail_retry_secs),
            restart_on_clean_exit: core.restart_on_clean_exit,
            output_buffer_size: DEFAULT_OUTPUT_BUFFER_SIZE,
        }
    }

    /// 설정 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.transfer_file_size == 0 {
            return Err(config_error("transfer_file_size", "must be greater than 0"));
        }
        if self.channel_buffer_size == 0 {
            return Err(config_error("channel_buffer_size", "must be greater than 0"));
        }
        if self.filter_buffer_size == 0 {
            return Err(config_error("filter_buffer_size", "must be greater than 0"));
        }
        if self.output_buffer_size == 0 {
            return Err(config_error("output_buffer_size", "must be greater than 0"));
        }
        Ok(())
    }
}

fn config_error(field: &str, reason: &str) -> EngineError {
    EngineError::Config {
        field: field.to_owned(),
        reason: reason.to_owned(),
    }
}

/// 엔진 설정 빌더
#[derive(Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 세그먼트 용량을 설정합니다.
    pub fn transfer_file_size(mut self, size: usize) -> Self {
        self.config.transfer_file_size = size;
        self
    }

    /// 싱크 큐 깊이를 설정합니다.
    pub fn channel_buffer_size(mut self, size: usize) -> Self {
        self.config.channel_buffer_size = size;
        self
    }

    /// 필터 큐 깊이를 설정합니다.
    pub fn filter_buffer_size(mut self, size: usize) -> Self {
        self.config.filter_buffer_size = size;
        self
    }

    /// 재시작 대기 시간을 설정합니다.
    pub fn command_fail_retry(mut self, retry: Duration) -> Self {
        self.config.command_fail_retry = retry;
        self
    }

    /// 정상 종료 시 재시작 여부를 설정합니다.
    pub fn restart_on_clean_exit(mut self, restart: bool) -> Self {
        self.config.restart_on_clean_exit = restart;
        self
    }

    /// 출력 구독 채널 용량을 설정합니다.
    pub fn output_buffer_size(mut self, size: usize) -> Self {
        self.config.output_buffer_size = size;
        self
    }

    /// 설정을 검증하고 `EngineConfig`를 생성합니다.
    pub fn build(self) -> Result<EngineConfig, EngineError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn from_core_preserves_values() {
        let core = EngineSection {
            transfer_file_size: 4096,
            channel_buffer_size: 4,
            filter_buffer_size: 8,
            command_fail_retry_secs: 3,
            restart_on_clean_exit: true,
        };
        let config = EngineConfig::from_core(&core);
        assert_eq!(config.transfer_file_size, 4096);
        assert_eq!(config.channel_buffer_size, 4);
        assert_eq!(config.filter_buffer_size, 8);
        assert_eq!(config.command_fail_retry, Duration::from_secs(3));
        assert!(config.restart_on_clean_exit);
    }

    #[test]
    fn builder_creates_valid_config() {
        let config = EngineConfigBuilder::new()
            .transfer_file_size(1024)
            .command_fail_retry(Duration::from_millis(50))
            .build()
            .unwrap();
        assert_eq!(config.transfer_file_size, 1024);
        assert_eq!(config.command_fail_retry, Duration::from_millis(50));
    }

    #[test]
    fn builder_rejects_invalid_config() {
        let result = EngineConfigBuilder::new().channel_buffer_size(0).build();
        assert!(result.is_err());
    }
}
