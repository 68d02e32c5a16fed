//! 라우터 매칭 정책 -- 바이트 단위 라인 선택
//!
//! [`MatchPolicy`]는 라우터에 붙는 매처 목록입니다. 모든 매처가 라인을 수락해야
//! 라인이 전달되며 (AND), 매처가 없으면 모든 라인을 통과시킵니다.
//! 정규식과 부분 문자열 검색기는 라우터 생성 시 한 번만 만듭니다.

use logtail_core::config::MatcherConfig;
use memchr::memmem::Finder;
use regex::bytes::Regex;

use crate::error::EngineError;

/// 단일 라인 매처
///
/// `contains`는 모두 포함, `not_contains`는 하나도 포함하지 않음,
/// `regex`는 매칭되어야 함. 세 조건은 AND 결합입니다.
#[derive(Debug, Clone)]
pub struct LineMatcher {
    contains: Vec<Finder<'static>>,
    not_contains: Vec<Finder<'static>>,
    regex: Option<Regex>,
}

impl LineMatcher {
    /// 설정에서 매처를 생성합니다. 정규식 컴파일 실패 시 에러를 반환합니다.
    pub fn from_config(router: &str, config: &MatcherConfig) -> Result<Self, EngineError> {
        let regex = config
            .regex
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| EngineError::InvalidMatcher {
                router: router.to_owned(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            contains: finders(&config.contains),
            not_contains: finders(&config.not_contains),
            regex,
        })
    }

    /// 라인이 이 매처의 모든 조건을 만족하는지 평가합니다.
    pub fn matches(&self, line: &[u8]) -> bool {
        if !self.contains.iter().all(|f| f.find(line).is_some()) {
            return false;
        }
        if self.not_contains.iter().any(|f| f.find(line).is_some()) {
            return false;
        }
        self.regex.as_ref().is_none_or(|re| re.is_match(line))
    }
}

/// 라우터 매칭 정책
#[derive(Debug, Clone, Default)]
pub struct MatchPolicy {
    matchers: Vec<LineMatcher>,
}

impl MatchPolicy {
    /// 모든 라인을 통과시키는 정책
    pub fn pass_through() -> Self {
        Self::default()
    }

    /// 매처 목록으로 정책을 생성합니다.
    pub fn new(matchers: Vec<LineMatcher>) -> Self {
        Self { matchers }
    }

    /// 라우터 설정의 매처 목록에서 정책을 생성합니다.
    pub fn from_config(router: &str, configs: &[MatcherConfig]) -> Result<Self, EngineError> {
        let matchers = configs
            .iter()
            .map(|c| LineMatcher::from_config(router, c))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { matchers })
    }

    /// 매처가 없으면 true
    pub fn is_pass_through(&self) -> bool {
        self.matchers.is_empty()
    }

    /// 라인을 수락하는지 평가합니다.
    pub fn matches(&self, line: &[u8]) -> bool {
        self.matchers.iter().all(|m| m.matches(line))
    }
}

fn finders(needles: &[String]) -> Vec<Finder<'static>> {
    needles
        .iter()
        .map(|needle| Finder::new(needle.as_bytes()).into_owned())
        .collect()
}
