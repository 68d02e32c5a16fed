//! 계층형 취소 신호
//!
//! [`Stopper`]는 서버 → 워커 → 필터, 서버 → 라우터 로 이어지는 스코프 트리를
//! 표현합니다. 부모의 정지는 모든 자식에게 전파되지만 자식의 정지는 부모로
//! 전파되지 않습니다.
//!
//! 내부적으로 `tokio_util`의 [`CancellationToken`]을 사용하므로
//! 정지는 멱등이며, 임의 개수의 태스크가 동시에 [`Stopper::stopped`]를
//! 기다릴 수 있습니다.
//!
//! ```text
//! server ─┬─ worker ── filter
//!         └─ router
//! ```

use tokio_util::sync::CancellationToken;

/// 계층형 취소 신호 노드
///
/// 값 없이 신호만 전달합니다. 한 번 정지된 노드는 다시 열리지 않습니다.
#[derive(Debug, Clone, Default)]
pub struct Stopper {
    token: CancellationToken,
}

impl Stopper {
    /// 부모가 없는 루트 노드를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 자식 노드를 생성합니다.
    ///
    /// 부모가 정지되면 자식도 자동으로 정지됩니다.
    /// 이미 정지된 부모에서 만든 자식은 생성 즉시 정지 상태입니다.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// 이 노드와 모든 하위 노드를 정지합니다. 두 번 호출해도 에러가 아닙니다.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// 정지 여부를 반환합니다.
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 정지될 때까지 대기합니다.
    pub async fn stopped(&self) {
        self.token.cancelled().await;
    }

    /// 내부 토큰을 반환합니다. `tokio::select!` 밖에서 소유 future가 필요할 때 사용합니다.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}
