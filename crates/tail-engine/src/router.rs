//! 라우터 — 이름 있는 목적지
//!
//! [`Router`]는 싱크 하나와 취소 스코프 하나를 소유합니다. 여러 워커의 필터가
//! 같은 라우터에 동시에 기록할 수 있으며, 싱크는 정확히 한 번 시작되고
//! 정확히 한 번 정리됩니다.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{info, warn};

use logtail_core::error::TransferError;
use logtail_core::stopper::Stopper;
use logtail_core::transfer::{Transfer, TransferBinding, TransferTask};

use crate::error::EngineError;
use crate::matcher::MatchPolicy;

/// 이름 있는 목적지
pub struct Router {
    name: String,
    policy: Arc<MatchPolicy>,
    transfer: Box<dyn Transfer>,
    stopper: Stopper,
    task: Mutex<Option<TransferTask>>,
}

impl Router {
    /// 라우터를 만들고 싱크를 시작합니다.
    ///
    /// 라우터 스코프는 `parent`의 자식입니다. 싱크 시작 실패(디렉토리, 세그먼트,
    /// 매핑)는 그대로 반환됩니다. 싱크 준비는 블로킹 스레드에서 진행되므로
    /// 호출자는 잠금을 쥔 채 기다리지 않아야 합니다.
    pub async fn start(
        name: impl Into<String>,
        policy: MatchPolicy,
        mut transfer: Box<dyn Transfer>,
        parent: &Stopper,
    ) -> Result<Arc<Self>, EngineError> {
        let name = name.into();
        let stopper = parent.child();

        let task = transfer.start(TransferBinding {
            router_name: name.clone(),
            stopper: stopper.clone(),
        })
            .await?;

        info!(router = %name, kind = %transfer.kind(), "router started");

        Ok(Arc::new(Self {
            name,
            policy: Arc::new(policy),
            transfer,
            stopper,
            task: Mutex::new(Some(task)),
        }))
    }

    /// 라우터 이름
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 매칭 정책
    pub fn policy(&self) -> &Arc<MatchPolicy> {
        &self.policy
    }

    /// 라우터 스코프
    pub fn stopper(&self) -> &Stopper {
        &self.stopper
    }

    /// 배치를 싱크로 넘깁니다. 라우터가 닫혔으면 아무 것도 하지 않습니다.
    pub fn trans(&self, server_id: &str, batch: Vec<Bytes>) -> Result<(), TransferError> {
        if self.stopper.is_stopped() {
            return Ok(());
        }
        self.transfer.trans(server_id, batch)
    }

    /// 라우터 스코프를 정지합니다. 연결된 필터와 싱크가 함께 정지됩니다.
    pub fn stop(&self) {
        self.stopper.stop();
    }

    /// 싱크가 마지막 세그먼트를 제출할 때까지 대기합니다.
    ///
    /// 여러 번 호출해도 싱크 태스크는 한 번만 기다립니다.
    pub async fn wait(&self) {
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(router = %self.name, error = %e, "transfer task ended abnormally");
            }
        }
    }

    /// 정지 후 싱크 정리를 기다립니다.
    pub async fn shutdown(&self) {
        self.stop();
        self.wait().await;
        info!(router = %self.name, "router stopped");
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("name", &self.name)
            .field("kind", &self.transfer.kind())
            .field("stopped", &self.stopper.is_stopped())
            .finish()
    }
}
