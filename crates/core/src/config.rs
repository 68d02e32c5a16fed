//! 설정 관리 — logtail.toml 파싱 및 런타임 설정
//!
//! [`LogtailConfig`]는 모든 컴포넌트의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선, 데몬에서 적용)
//! 2. 환경변수 (`LOGTAIL_GENERAL_LOG_LEVEL=debug` 형식)
//! 3. 설정 파일 (`logtail.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), logtail_core::error::LogtailError> {
//! use logtail_core::config::LogtailConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = LogtailConfig::load("logtail.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = LogtailConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, LogtailError};
use crate::transfer::TransferKind;

/// logtail 통합 설정
///
/// `logtail.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogtailConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 엔진 공통 설정 (세그먼트 크기, 큐 깊이, 재시도 간격)
    #[serde(default)]
    pub engine: EngineSection,
    /// 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// 싱크 목록
    #[serde(default)]
    pub transfers: Vec<TransferConfig>,
    /// 라우터 목록
    #[serde(default)]
    pub routers: Vec<RouterConfig>,
    /// 서버 목록
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

impl LogtailConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, LogtailError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, LogtailError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LogtailError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                LogtailError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, LogtailError> {
        toml::from_str(toml_str).map_err(|e| {
            LogtailError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `LOGTAIL_{SECTION}_{FIELD}`
    /// 예: `LOGTAIL_ENGINE_TRANSFER_FILE_SIZE=1048576`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "LOGTAIL_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "LOGTAIL_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.pid_file, "LOGTAIL_GENERAL_PID_FILE");

        // Engine
        override_usize(
            &mut self.engine.transfer_file_size,
            "LOGTAIL_ENGINE_TRANSFER_FILE_SIZE",
        );
        override_usize(
            &mut self.engine.channel_buffer_size,
            "LOGTAIL_ENGINE_CHANNEL_BUFFER_SIZE",
        );
        override_usize(
            &mut self.engine.filter_buffer_size,
            "LOGTAIL_ENGINE_FILTER_BUFFER_SIZE",
        );
        override_u64(
            &mut self.engine.command_fail_retry_secs,
            "LOGTAIL_ENGINE_COMMAND_FAIL_RETRY_SECS",
        );
        override_bool(
            &mut self.engine.restart_on_clean_exit,
            "LOGTAIL_ENGINE_RESTART_ON_CLEAN_EXIT",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "LOGTAIL_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "LOGTAIL_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "LOGTAIL_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), LogtailError> {
        // log_level 검증
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        // log_format 검증
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        self.engine.validate()?;

        // 싱크 이름 중복 및 필수 값
        let mut transfer_names = HashSet::new();
        for transfer in &self.transfers {
            if transfer.name.is_empty() {
                return Err(invalid("transfers.name", "must not be empty"));
            }
            if !transfer_names.insert(transfer.name.as_str()) {
                return Err(invalid(
                    "transfers.name",
                    format!("duplicate transfer '{}'", transfer.name),
                ));
            }
            if transfer.kind == TransferKind::File && transfer.dir.is_empty() {
                return Err(invalid(
                    "transfers.dir",
                    format!("file transfer '{}' requires a directory", transfer.name),
                ));
            }
        }

        // 라우터 → 싱크 참조, 정규식
        let mut router_names = HashSet::new();
        for router in &self.routers {
            validate_router_name(&router.name)?;
            if !router_names.insert(router.name.as_str()) {
                return Err(invalid(
                    "routers.name",
                    format!("duplicate router '{}'", router.name),
                ));
            }
            if !transfer_names.contains(router.transfer.as_str()) {
                return Err(invalid(
                    "routers.transfer",
                    format!(
                        "router '{}' references unknown transfer '{}'",
                        router.name, router.transfer
                    ),
                ));
            }
            for matcher in &router.matchers {
                if let Some(pattern) = &matcher.regex {
                    regex::Regex::new(pattern).map_err(|e| {
                        invalid(
                            "routers.matchers.regex",
                            format!("router '{}': {e}", router.name),
                        )
                    })?;
                }
            }
        }

        // 서버 → 라우터 참조. 라우터 하나는 최대 한 서버에만 연결됩니다.
        let mut server_ids = HashSet::new();
        let mut attached_routers = HashSet::new();
        for server in &self.servers {
            if server.id.is_empty() {
                return Err(invalid("servers.id", "must not be empty"));
            }
            if !server_ids.insert(server.id.as_str()) {
                return Err(invalid(
                    "servers.id",
                    format!("duplicate server '{}'", server.id),
                ));
            }
            for router in &server.routers {
                if !router_names.contains(router.as_str()) {
                    return Err(invalid(
                        "servers.routers",
                        format!("server '{}' references unknown router '{router}'", server.id),
                    ));
                }
                if !attached_routers.insert(router.as_str()) {
                    return Err(invalid(
                        "servers.routers",
                        format!("router '{router}' is attached to more than one server"),
                    ));
                }
            }
        }

        Ok(())
    }

    /// 이름으로 싱크 설정을 찾습니다.
    pub fn transfer(&self, name: &str) -> Option<&TransferConfig> {
        self.transfers.iter().find(|t| t.name == name)
    }

    /// 이름으로 라우터 설정을 찾습니다.
    pub fn router(&self, name: &str) -> Option<&RouterConfig> {
        self.routers.iter().find(|r| r.name == name)
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// PID 파일 경로. 비어 있으면 중복 실행 검사를 하지 않습니다.
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            pid_file: "/var/run/logtail.pid".to_owned(),
        }
    }
}

/// 엔진 공통 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// 세그먼트 파일 고정 용량 (바이트)
    pub transfer_file_size: usize,
    /// 싱크 입력 큐 깊이 (배치 개수)
    pub channel_buffer_size: usize,
    /// 워커 → 필터 큐 깊이 (출력 청크 개수)
    pub filter_buffer_size: usize,
    /// 정적 명령 실패 후 재시작 대기 시간 (초)
    pub command_fail_retry_secs: u64,
    /// 정적 명령이 정상 종료했을 때 다시 실행할지 여부
    pub restart_on_clean_exit: bool,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            transfer_file_size: 32 * 1024 * 1024, // 32MB
            channel_buffer_size: 16,
            filter_buffer_size: 1024,
            command_fail_retry_secs: 10,
            restart_on_clean_exit: false,
        }
    }
}

impl EngineSection {
    fn validate(&self) -> Result<(), LogtailError> {
        const MAX_TRANSFER_FILE_SIZE: usize = 1024 * 1024 * 1024; // 1GB

        if self.transfer_file_size == 0 || self.transfer_file_size > MAX_TRANSFER_FILE_SIZE {
            return Err(invalid(
                "engine.transfer_file_size",
                format!("must be 1-{MAX_TRANSFER_FILE_SIZE}"),
            ));
        }
        if self.channel_buffer_size == 0 {
            return Err(invalid(
                "engine.channel_buffer_size",
                "must be greater than 0",
            ));
        }
        if self.filter_buffer_size == 0 {
            return Err(invalid("engine.filter_buffer_size", "must be greater than 0"));
        }
        Ok(())
    }
}

/// 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus 엔드포인트 활성화 여부
    pub enabled: bool,
    /// 바인드 주소
    pub listen_addr: String,
    /// 바인드 포트
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9101,
        }
    }
}

/// 싱크 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferConfig {
    /// 싱크 이름 (라우터에서 참조)
    pub name: String,
    /// 싱크 종류
    #[serde(rename = "type", default)]
    pub kind: TransferKind,
    /// 파일 싱크의 세그먼트 디렉토리
    #[serde(default)]
    pub dir: String,
}

/// 라우터 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterConfig {
    /// 라우터 이름 (세그먼트 파일명 접두어)
    pub name: String,
    /// 사용할 싱크 이름
    pub transfer: String,
    /// 매칭 조건. 비어 있으면 모든 라인을 통과시킵니다.
    #[serde(default)]
    pub matchers: Vec<MatcherConfig>,
}

/// 라인 매칭 조건
///
/// 한 매처 안의 조건은 AND 결합입니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// 모두 포함해야 하는 문자열
    pub contains: Vec<String>,
    /// 하나도 포함하면 안 되는 문자열
    pub not_contains: Vec<String>,
    /// 매칭되어야 하는 정규식
    pub regex: Option<String>,
}

/// 서버 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 서버 ID (워커 ID 접두어)
    pub id: String,
    /// 정적 명령 목록. 명령 하나당 워커 하나가 생성됩니다.
    #[serde(default)]
    pub commands: Vec<String>,
    /// 동적 명령 생성기. 출력 라인 하나당 동적 워커 하나가 생성됩니다.
    #[serde(default)]
    pub command_gen: String,
    /// 연결할 라우터 이름 목록
    #[serde(default)]
    pub routers: Vec<String>,
}

fn validate_router_name(name: &str) -> Result<(), LogtailError> {
    if name.is_empty() {
        return Err(invalid("routers.name", "must not be empty"));
    }
    // 파일명 접두어로 사용되므로 경로 구분자를 허용하지 않습니다.
    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(invalid(
            "routers.name",
            format!("router name '{name}' must not contain path separators"),
        ));
    }
    Ok(())
}

fn invalid(field: &str, reason: impl Into<String>) -> LogtailError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}
