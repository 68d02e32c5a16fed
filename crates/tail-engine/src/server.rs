//! 서버 — 워커/라우터 토폴로지 관리
//!
//! [`Server`]는 워커 집합과 라우터 집합을 소유합니다. 새 워커는 기존 모든 라우터에,
//! 새 라우터는 기존 모든 워커에 연결됩니다. 두 집합은 하나의 락으로 보호되므로
//! 동시에 추가되는 워커와 라우터도 빠짐없이 연결됩니다.
//!
//! # 동적 명령 생성
//! `command_gen`이 설정된 서버는 생성 명령의 출력 라인마다 동적 워커를 만듭니다.
//! 동적 워커가 종료를 보고하면 재시도 간격만큼 기다린 뒤 모든 동적 워커를 제거하고
//! 다시 생성합니다.
//!
//! # 사용 예시
//! ```ignore
//! let server = Server::new("app", config, &root, None)?;
//! server.add_router("errors", policy, transfer).await?;
//! server.start(&commands).await?;
//! let mut output = server.subscribe();
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use logtail_core::stopper::Stopper;
use logtail_core::transfer::Transfer;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::matcher::MatchPolicy;
use crate::process;
use crate::router::Router;
use crate::worker::{Worker, WorkerEvent};

/// 워커 에러 보고 채널 용량
const REPORT_BUFFER_SIZE: usize = 64;

/// 동적 워커가 보고한 종료 사유
#[derive(Debug, Clone)]
pub struct WorkerReport {
    /// 워커 ID
    pub worker_id: String,
    /// 종료 사유
    pub error: Arc<EngineError>,
}

struct WorkerSlot {
    worker: Arc<Worker>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Topology {
    workers: HashMap<String, WorkerSlot>,
    routers: HashMap<String, Arc<Router>>,
}

/// 워커/라우터 오케스트레이터
pub struct Server {
    id: String,
    config: Arc<EngineConfig>,
    stopper: Stopper,
    command_gen: Option<String>,
    topology: Mutex<Topology>,
    next_ordinal: AtomicUsize,
    output: broadcast::Sender<Bytes>,
    reports: broadcast::Sender<WorkerReport>,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl Server {
    /// 서버를 만들고 워커 이벤트 처리 루프를 시작합니다.
    ///
    /// 워커는 [`Server::start`]에서 만들어지므로, 그 전에 라우터를 추가하면
    /// 명령의 첫 출력부터 라우팅됩니다. `command_gen`이 있으면 시작 시 생성 명령의
    /// 출력으로 동적 워커를 만듭니다.
    pub fn new(
        id: impl Into<String>,
        config: Arc<EngineConfig>,
        parent: &Stopper,
        command_gen: Option<String>,
    ) -> Result<Arc<Self>, EngineError> {
        config.validate()?;

        let (output, _) = broadcast::channel(config.output_buffer_size);
        let (reports, _) = broadcast::channel(REPORT_BUFFER_SIZE);
        let (events, events_rx) = mpsc::unbounded_channel();

        let server = Arc::new(Self {
            id: id.into(),
            config,
            stopper: parent.child(),
            command_gen: command_gen.filter(|c| !c.trim().is_empty()),
            topology: Mutex::new(Topology::default()),
            next_ordinal: AtomicUsize::new(0),
            output,
            reports,
            events,
        });

        tokio::spawn(handle_events(
            Arc::downgrade(&server),
            server.stopper.clone(),
            events_rx,
        ));

        Ok(server)
    }

    /// 초기 워커를 시작합니다.
    ///
    /// - 명령마다 정적 워커를 하나씩 만듭니다.
    /// - 생성 명령이 있으면 백그라운드에서 동적 워커를 만듭니다.
    /// - 둘 다 없으면 `<id>-default` 중계 워커 하나를 만듭니다.
    pub async fn start(self: &Arc<Self>, commands: &[String]) -> Result<(), EngineError> {
        let commands: Vec<&String> = commands.iter().filter(|c| !c.trim().is_empty()).collect();
        for command in &commands {
            self.add_worker(command, false).await?;
        }

        if let Some(command_gen) = self.command_gen.clone() {
            let generator = Arc::clone(self);
            tokio::spawn(async move { generator.generate(&command_gen).await });
        } else if commands.is_empty() {
            self.add_worker("", false).await?;
        }

        info!(server = %self.id, workers = commands.len(), "server started");
        Ok(())
    }

    /// 서버 ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 서버 스코프
    pub fn stopper(&self) -> &Stopper {
        &self.stopper
    }

    /// 모든 워커 출력을 구독합니다. 느린 구독자는 오래된 청크를 놓칩니다.
    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.output.subscribe()
    }

    /// 동적 워커 종료 보고를 구독합니다.
    pub fn reports(&self) -> broadcast::Receiver<WorkerReport> {
        self.reports.subscribe()
    }

    /// 워커 ID 목록 (정렬됨)
    pub async fn worker_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.topology.lock().await.workers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 라우터 이름 목록 (정렬됨)
    pub async fn router_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topology.lock().await.routers.keys().cloned().collect();
        names.sort();
        names
    }

    /// ID로 워커를 찾습니다.
    pub async fn worker(&self, worker_id: &str) -> Option<Arc<Worker>> {
        self.topology
            .lock()
            .await
            .workers
            .get(worker_id)
            .map(|slot| Arc::clone(&slot.worker))
    }

    /// 이름으로 라우터를 찾습니다.
    pub async fn router(&self, name: &str) -> Option<Arc<Router>> {
        self.topology.lock().await.routers.get(name).cloned()
    }

    /// 워커를 추가하고 기존 모든 라우터에 연결한 뒤 시작합니다.
    ///
    /// 빈 명령은 `<id>-default` 중계 워커가 되며 서버당 하나만 존재할 수 있습니다.
    pub async fn add_worker(
        &self,
        command: &str,
        dynamic: bool,
    ) -> Result<Arc<Worker>, EngineError> {
        let mut topology = self.topology.lock().await;
        if self.stopper.is_stopped() {
            return Err(EngineError::Stopped(self.id.clone()));
        }

        let worker_id = if command.is_empty() {
            format!("{}-default", self.id)
        } else {
            format!(
                "{}-{}",
                self.id,
                self.next_ordinal.fetch_add(1, Ordering::Relaxed)
            )
        };

        if topology.workers.contains_key(&worker_id) {
            return Err(EngineError::Duplicate {
                kind: "worker",
                id: worker_id,
            });
        }

        let worker = Worker::new(
            worker_id.clone(),
            command,
            dynamic,
            Arc::clone(&self.config),
            &self.stopper,
            self.output.clone(),
            self.events.clone(),
        );

        for router in topology.routers.values() {
            worker.start_router_filter(router).await;
        }

        let task = worker.start();
        topology.workers.insert(
            worker_id,
            WorkerSlot {
                worker: Arc::clone(&worker),
                task,
            },
        );

        Ok(worker)
    }

    /// 워커를 제거합니다. 워커 스코프를 정지하고 감시 루프 종료를 기다립니다.
    pub async fn remove_worker(&self, worker_id: &str) -> Result<(), EngineError> {
        let slot = self
            .topology
            .lock()
            .await
            .workers
            .remove(worker_id)
            .ok_or_else(|| EngineError::NotFound {
                kind: "worker",
                id: worker_id.to_owned(),
            })?;

        slot.worker.stopper().stop();
        if let Err(e) = slot.task.await {
            warn!(server = %self.id, worker = %worker_id, error = %e, "worker task ended abnormally");
        }

        info!(server = %self.id, worker = %worker_id, "worker removed");
        Ok(())
    }

    /// 라우터를 추가하고 싱크를 시작한 뒤 기존 모든 워커에 연결합니다.
    pub async fn add_router(
        &self,
        name: &str,
        policy: MatchPolicy,
        transfer: Box<dyn Transfer>,
    ) -> Result<Arc<Router>, EngineError> {
        self.check_router_slot(&*self.topology.lock().await, name)?;

        // 싱크 준비는 파일 I/O를 하므로 토폴로지 잠금 밖에서 시작합니다.
        let router = Router::start(name, policy, transfer, &self.stopper).await?;

        let mut topology = self.topology.lock().await;
        if let Err(e) = self.check_router_slot(&topology, name) {
            drop(topology);
            router.shutdown().await;
            return Err(e);
        }

        for slot in topology.workers.values() {
            slot.worker.start_router_filter(&router).await;
        }

        topology
            .routers
            .insert(name.to_owned(), Arc::clone(&router));

        Ok(router)
    }

    fn check_router_slot(&self, topology: &Topology, name: &str) -> Result<(), EngineError> {
        if self.stopper.is_stopped() {
            return Err(EngineError::Stopped(self.id.clone()));
        }
        if topology.routers.contains_key(name) {
            return Err(EngineError::Duplicate {
                kind: "router",
                id: name.to_owned(),
            });
        }
        Ok(())
    }

    /// 라우터를 제거합니다. 연결된 필터를 정지하고 싱크의 마지막 세그먼트 제출을 기다립니다.
    pub async fn remove_router(&self, name: &str) -> Result<(), EngineError> {
        let (router, workers) = {
            let mut topology = self.topology.lock().await;
            let router = topology
                .routers
                .remove(name)
                .ok_or_else(|| EngineError::NotFound {
                    kind: "router",
                    id: name.to_owned(),
                })?;
            let workers: Vec<Arc<Worker>> = topology
                .workers
                .values()
                .map(|slot| Arc::clone(&slot.worker))
                .collect();
            (router, workers)
        };

        router.stop();
        for worker in workers {
            worker.remove_router_filter(name).await;
        }
        router.shutdown().await;

        Ok(())
    }

    /// 서버 스코프를 정지합니다. 모든 워커, 필터, 라우터가 함께 정지됩니다.
    pub fn stop(&self) {
        self.stopper.stop();
    }

    /// 정지 후 모든 워커 감시 루프와 싱크 정리를 기다립니다.
    pub async fn shutdown(&self) {
        self.stop();

        let topology = std::mem::take(&mut *self.topology.lock().await);
        for (worker_id, slot) in topology.workers {
            if let Err(e) = slot.task.await {
                warn!(server = %self.id, worker = %worker_id, error = %e, "worker task ended abnormally");
            }
        }
        for router in topology.routers.values() {
            router.shutdown().await;
        }

        info!(server = %self.id, "server stopped");
    }

    async fn contains_worker(&self, worker_id: &str) -> bool {
        self.topology.lock().await.workers.contains_key(worker_id)
    }

    async fn handle_event(&self, event: WorkerEvent) {
        match event {
            WorkerEvent::ShutdownRequested { worker_id } => {
                if let Err(e) = self.remove_worker(&worker_id).await {
                    debug!(server = %self.id, error = %e, "shutdown request for unknown worker");
                }
            }
            WorkerEvent::Exited { worker_id, error } => {
                // 재생성으로 이미 제거된 워커의 보고
                if !self.contains_worker(&worker_id).await {
                    debug!(server = %self.id, worker = %worker_id, "stale worker report ignored");
                    return;
                }

                warn!(server = %self.id, worker = %worker_id, error = %error, "worker reported error");
                let _ = self.reports.send(WorkerReport {
                    worker_id: worker_id.clone(),
                    error: Arc::new(error),
                });

                match self.command_gen.clone() {
                    Some(command_gen) => {
                        tokio::select! {
                            _ = self.stopper.stopped() => return,
                            _ = tokio::time::sleep(self.config.command_fail_retry) => {}
                        }
                        self.remove_dynamic_workers().await;
                        self.generate(&command_gen).await;
                    }
                    None => {
                        if let Err(e) = self.remove_worker(&worker_id).await {
                            debug!(server = %self.id, error = %e, "dynamic worker already removed");
                        }
                    }
                }
            }
        }
    }

    async fn remove_dynamic_workers(&self) {
        let dynamic: Vec<String> = self
            .topology
            .lock()
            .await
            .workers
            .values()
            .filter(|slot| slot.worker.is_dynamic())
            .map(|slot| slot.worker.id().to_owned())
            .collect();

        for worker_id in dynamic {
            if let Err(e) = self.remove_worker(&worker_id).await {
                debug!(server = %self.id, error = %e, "dynamic worker already removed");
            }
        }
    }

    /// 생성 명령을 실행해 출력 라인마다 동적 워커를 만듭니다.
    ///
    /// 생성 명령이 실패하면 재시도 간격 후 다시 실행합니다.
    async fn generate(&self, command_gen: &str) {
        loop {
            if self.stopper.is_stopped() {
                return;
            }

            match process::capture_lines(command_gen).await {
                Ok(commands) => {
                    if commands.is_empty() {
                        warn!(server = %self.id, command_gen = %command_gen, "command generator produced no commands");
                    }
                    for command in commands {
                        if let Err(e) = self.add_worker(&command, true).await {
                            error!(server = %self.id, command = %command, error = %e, "failed to add dynamic worker");
                        }
                    }
                    return;
                }
                Err(e) => {
                    error!(server = %self.id, command_gen = %command_gen, error = %e, "command generator failed");
                }
            }

            tokio::select! {
                _ = self.stopper.stopped() => return,
                _ = tokio::time::sleep(self.config.command_fail_retry) => {}
            }
        }
    }
}

/// 워커 이벤트 처리 루프
///
/// 서버가 해제되면 송신측이 사라지므로 루프도 종료됩니다.
async fn handle_events(
    server: Weak<Server>,
    stopper: Stopper,
    mut events: mpsc::UnboundedReceiver<WorkerEvent>,
) {
    loop {
        tokio::select! {
            biased;

            _ = stopper.stopped() => break,

            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                let Some(server) = server.upgrade() else {
                    break;
                };
                server.handle_event(event).await;
            }
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("id", &self.id)
            .field("command_gen", &self.command_gen)
            .field("stopped", &self.stopper.is_stopped())
            .finish()
    }
}
