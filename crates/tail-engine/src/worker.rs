//! 워커 — 셸 명령 하나의 수명 관리 및 출력 복제
//!
//! [`Worker`]는 명령을 실행하고 stdout을 읽어 연결된 모든 필터와 서버 출력 채널로
//! 복제합니다. 명령이 비어 있으면 프로세스 없이 주입된 기록만 중계합니다.
//!
//! # 감시 루프
//! - 워커 스코프가 정지되면 종료
//! - 동적 워커: 종료 결과(실패 또는 정상 종료)를 서버에 한 번 보고하고 종료
//! - 정적 워커: 실패 시 재시도 간격 후 재실행, 정상 종료 시
//!   `restart_on_clean_exit` 정책에 따라 재실행 또는 종료
//!
//! 프로세스 핸들은 감시 루프만 소유합니다. [`Worker::stop`]은 현재 실행에
//! 신호만 보내고, 실제 종료(프로세스 그룹 SIGKILL)는 루프가 수행합니다.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use logtail_core::metrics as m;
use logtail_core::stopper::Stopper;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::filter::Filter;
use crate::process;
use crate::router::Router;

/// 워커가 서버로 보내는 이벤트
#[derive(Debug)]
pub enum WorkerEvent {
    /// 동적 워커가 종료됨 (재시작하지 않음)
    Exited {
        /// 워커 ID
        worker_id: String,
        /// 종료 사유. 정상 종료는 [`EngineError::CommandStopped`]
        error: EngineError,
    },
    /// 워커가 영구 제거를 요청함
    ShutdownRequested {
        /// 워커 ID
        worker_id: String,
    },
}

/// 셸 명령 감시자
pub struct Worker {
    id: String,
    command: String,
    dynamic: bool,
    config: Arc<EngineConfig>,
    stopper: Stopper,
    filters: Mutex<HashMap<String, Arc<Filter>>>,
    current_run: Mutex<Option<Stopper>>,
    output: broadcast::Sender<Bytes>,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl Worker {
    /// 워커를 생성합니다. 감시 루프는 [`Worker::start`]로 시작합니다.
    ///
    /// 워커 스코프는 `parent`의 자식입니다.
    pub fn new(
        id: impl Into<String>,
        command: impl Into<String>,
        dynamic: bool,
        config: Arc<EngineConfig>,
        parent: &Stopper,
        output: broadcast::Sender<Bytes>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            command: command.into(),
            dynamic,
            config,
            stopper: parent.child(),
            filters: Mutex::new(HashMap::new()),
            current_run: Mutex::new(None),
            output,
            events,
        })
    }

    /// 워커 ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 실행 명령. 비어 있으면 중계 전용 워커
    pub fn command(&self) -> &str {
        &self.command
    }

    /// 동적 워커 여부
    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    /// 워커 스코프
    pub fn stopper(&self) -> &Stopper {
        &self.stopper
    }

    /// 연결된 라우터 이름 목록
    pub async fn router_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.filters.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// 감시 루프를 시작하고 즉시 반환합니다.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).supervise())
    }

    /// 출력을 기록합니다.
    ///
    /// 버퍼를 복사한 뒤 연결된 모든 필터와 서버 출력 채널로 전달합니다.
    /// 느린 필터 때문에 블로킹되지 않습니다.
    pub async fn write(&self, data: &[u8]) -> usize {
        self.publish(Bytes::copy_from_slice(data)).await;
        data.len()
    }

    async fn publish(&self, chunk: Bytes) {
        // 기록 중에는 락을 잡지 않도록 스냅샷을 떠서 전달합니다.
        let filters: Vec<Arc<Filter>> = self.filters.lock().await.values().cloned().collect();
        for filter in &filters {
            filter.receive(chunk.clone()).await;
        }

        // 구독자가 없으면 에러지만 무시합니다.
        let _ = self.output.send(chunk);
    }

    /// 라우터에 대한 필터를 연결합니다.
    ///
    /// 같은 라우터에 이미 살아 있는 필터가 있거나 워커가 정지 중이면 아무 것도 하지 않습니다.
    pub async fn start_router_filter(&self, router: &Arc<Router>) {
        let mut filters = self.filters.lock().await;
        if self.stopper.is_stopped() || router.stopper().is_stopped() {
            return;
        }

        if filters
            .get(router.name())
            .is_some_and(|existing| !existing.is_done())
        {
            return;
        }

        let filter = Filter::start(
            self.id.clone(),
            Arc::clone(router),
            &self.stopper,
            self.config.filter_buffer_size,
        );
        filters.insert(router.name().to_owned(), filter);
    }

    /// 라우터 필터를 분리하고 정지합니다.
    pub async fn remove_router_filter(&self, router_name: &str) {
        let removed = self.filters.lock().await.remove(router_name);
        if let Some(filter) = removed {
            filter.stop();
            filter.done().await;
        }
    }

    /// 현재 프로세스를 종료하고 연결된 모든 필터를 닫습니다.
    ///
    /// 워커 스코프는 정지하지 않으므로 감시 루프는 이후 다시 명령을 실행할 수 있습니다.
    /// 필터는 큐에 남은 출력을 처리한 뒤 종료합니다.
    pub async fn stop(&self) {
        if let Some(run) = self.current_run.lock().await.take() {
            info!(worker = %self.id, command = %self.command, "worker command stopping");
            run.stop();
        }

        let filters: Vec<Arc<Filter>> = self
            .filters
            .lock()
            .await
            .drain()
            .map(|(_, filter)| filter)
            .collect();

        for filter in &filters {
            filter.close().await;
        }
        for filter in &filters {
            filter.done().await;
        }
    }

    /// 서버에 이 워커의 영구 제거를 요청합니다.
    ///
    /// 워커 스코프 정지는 서버가 수행합니다.
    pub fn shutdown(&self) {
        let _ = self.events.send(WorkerEvent::ShutdownRequested {
            worker_id: self.id.clone(),
        });
    }

    async fn supervise(self: Arc<Self>) {
        info!(worker = %self.id, command = %self.command, dynamic = self.dynamic, "worker started");

        if self.command.is_empty() {
            self.stopper.stopped().await;
        } else {
            self.run_loop().await;
        }

        let worker = Arc::clone(&self);
        contain_teardown(&self.id, async move { worker.stop().await }).await;

        info!(worker = %self.id, "worker stopped");
    }

    async fn run_loop(&self) {
        loop {
            if self.stopper.is_stopped() {
                return;
            }

            let result = self.run_once().await;

            if self.stopper.is_stopped() {
                return;
            }

            match result {
                Err(err) => {
                    counter!(m::WORKER_FAILURES_TOTAL, m::LABEL_WORKER => self.id.clone())
                        .increment(1);
                    error!(worker = %self.id, command = %self.command, error = %err, "worker command error");

                    // 동적 명령은 스스로 재시작하지 않고 서버에 보고합니다.
                    if self.dynamic {
                        self.report(err);
                        return;
                    }

                    warn!(
                        worker = %self.id,
                        retry_after = ?self.config.command_fail_retry,
                        "worker failed, retrying"
                    );
                }
                Ok(()) => {
                    if self.dynamic {
                        self.report(EngineError::CommandStopped {
                            worker_id: self.id.clone(),
                        });
                        return;
                    }

                    if !self.config.restart_on_clean_exit {
                        info!(worker = %self.id, "worker command completed");
                        return;
                    }

                    debug!(worker = %self.id, "worker command exited, restarting");
                }
            }

            tokio::select! {
                _ = self.stopper.stopped() => return,
                _ = tokio::time::sleep(self.config.command_fail_retry) => {}
            }
        }
    }

    async fn run_once(&self) -> Result<(), EngineError> {
        info!(worker = %self.id, command = %self.command, "worker command starting");
        counter!(m::WORKER_LAUNCHES_TOTAL, m::LABEL_WORKER => self.id.clone()).increment(1);

        let run = self.stopper.child();
        *self.current_run.lock().await = Some(run.clone());

        let mut child = process::spawn_shell(&self.command)?;
        let stdout = child.stdout.take();

        let exited = {
            let pump = async {
                if let Some(stdout) = stdout {
                    process::pump_output(stdout, |chunk| self.publish(Bytes::from(chunk))).await;
                }
            };
            let wait = async {
                let (status, ()) = tokio::join!(child.wait(), pump);
                status
            };

            tokio::select! {
                biased;
                _ = run.stopped() => None,
                status = wait => Some(status),
            }
        };

        self.current_run.lock().await.take();

        match exited {
            Some(status) => {
                let status = status?;
                if status.success() {
                    Ok(())
                } else {
                    Err(EngineError::CommandFailed {
                        worker_id: self.id.clone(),
                        status: status.to_string(),
                    })
                }
            }
            None => {
                process::kill_group(&child);
                if let Err(e) = child.wait().await {
                    warn!(worker = %self.id, error = %e, "kill command error");
                }
                Err(EngineError::CommandFailed {
                    worker_id: self.id.clone(),
                    status: "killed".to_owned(),
                })
            }
        }
    }

    fn report(&self, error: EngineError) {
        let _ = self.events.send(WorkerEvent::Exited {
            worker_id: self.id.clone(),
            error,
        });
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("command", &self.command)
            .field("dynamic", &self.dynamic)
            .field("stopped", &self.stopper.is_stopped())
            .finish()
    }
}

/// 정리 작업을 별도 태스크에서 실행해 panic을 호출자 밖으로 전파하지 않습니다.
///
/// 정리가 끝까지 실행되면 true, panic 또는 취소로 끝나면 경고를 남기고 false를 반환합니다.
async fn contain_teardown<F>(worker_id: &str, teardown: F) -> bool
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::spawn(teardown).await {
        Ok(()) => true,
        Err(e) => {
            warn!(worker = %worker_id, error = %e, "worker close error");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    use crate::config::EngineConfigBuilder;
    use crate::matcher::MatchPolicy;
    use crate::transfer::file::FileTransfer;

    struct Harness {
        server: Stopper,
        config: Arc<EngineConfig>,
        output: broadcast::Sender<Bytes>,
        events_tx: mpsc::UnboundedSender<WorkerEvent>,
        events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    }

    impl Harness {
        fn new(retry: Duration) -> Self {
            let config = EngineConfigBuilder::new()
                .command_fail_retry(retry)
                .build()
                .unwrap();
            let (output, _) = broadcast::channel(64);
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            Self {
                server: Stopper::new(),
                config: Arc::new(config),
                output,
                events_tx,
                events_rx,
            }
        }

        fn worker(&self, command: &str, dynamic: bool) -> Arc<Worker> {
            Worker::new(
                "test-0",
                command,
                dynamic,
                Arc::clone(&self.config),
                &self.server,
                self.output.clone(),
                self.events_tx.clone(),
            )
        }

        async fn router(&self, name: &str, dir: &Path) -> Arc<Router> {
            Router::start(
                name,
                MatchPolicy::pass_through(),
                Box::new(FileTransfer::new(dir, 1024, 16)),
                &self.server,
            )
            .await
            .unwrap()
        }
    }

    fn segment_contents(dir: &Path) -> Vec<u8> {
        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        paths.sort();
        paths
            .iter()
            .flat_map(|p| std::fs::read(p).unwrap())
            .collect()
    }

    async fn wait_for_content(dir: &Path, expected: &[u8]) -> bool {
        for _ in 0..200 {
            if segment_contents(dir).starts_with(expected) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn passive_worker_relays_writes_to_every_filter() {
        let harness = Harness::new(Duration::from_millis(10));
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let router_a = harness.router("a", dir_a.path()).await;
        let router_b = harness.router("b", dir_b.path()).await;

        let worker = harness.worker("", false);
        worker.start_router_filter(&router_a).await;
        worker.start_router_filter(&router_b).await;
        worker.start_router_filter(&router_a).await;
        assert_eq!(worker.router_names().await, vec!["a", "b"]);

        let handle = worker.start();
        let mut output = harness.output.subscribe();

        assert_eq!(worker.write(b"x\ny\n").await, 4);
        assert_eq!(output.recv().await.unwrap(), Bytes::from_static(b"x\ny\n"));

        // 필터를 닫아 큐를 비운 뒤 싱크 기록을 기다립니다.
        worker.stop().await;
        assert!(wait_for_content(dir_a.path(), b"x\ny\n").await);
        assert!(wait_for_content(dir_b.path(), b"x\ny\n").await);

        worker.stopper().stop();
        handle.await.unwrap();
        router_a.shutdown().await;
        router_b.shutdown().await;

        assert_eq!(segment_contents(dir_a.path()), b"x\ny\n");
        assert_eq!(segment_contents(dir_b.path()), b"x\ny\n");
    }

    #[tokio::test]
    async fn write_copies_caller_buffer() {
        let harness = Harness::new(Duration::from_millis(10));
        let worker = harness.worker("", false);
        let mut output = harness.output.subscribe();

        let mut buf = b"abc".to_vec();
        worker.write(&buf).await;
        buf[0] = b'z';

        assert_eq!(output.recv().await.unwrap(), Bytes::from_static(b"abc"));
    }

    #[tokio::test]
    async fn static_clean_exit_ends_supervision_by_default() {
        let harness = Harness::new(Duration::from_millis(10));
        let worker = harness.worker("echo hello", false);
        let mut output = harness.output.subscribe();

        let handle = worker.start();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("one-shot worker should finish")
            .unwrap();

        assert_eq!(output.recv().await.unwrap(), Bytes::from_static(b"hello\n"));
        assert!(output.try_recv().is_err());
    }

    #[tokio::test]
    async fn dynamic_failure_reports_once_without_retry() {
        let mut harness = Harness::new(Duration::from_millis(10));
        let worker = harness.worker("exit 7", true);

        let handle = worker.start();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("dynamic worker should finish")
            .unwrap();

        match harness.events_rx.try_recv().unwrap() {
            WorkerEvent::Exited { worker_id, error } => {
                assert_eq!(worker_id, "test-0");
                assert!(matches!(error, EngineError::CommandFailed { .. }));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(harness.events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dynamic_clean_exit_reports_command_stopped() {
        let mut harness = Harness::new(Duration::from_millis(10));
        let worker = harness.worker("true", true);

        worker.start().await.unwrap();

        assert!(matches!(
            harness.events_rx.try_recv().unwrap(),
            WorkerEvent::Exited {
                error: EngineError::CommandStopped { .. },
                ..
            }
        ));
        assert!(harness.events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn static_failure_is_retried_until_stopped() {
        let harness = Harness::new(Duration::from_millis(20));
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("runs");
        let command = format!("echo run >> {}; exit 1", counter.display());
        let worker = harness.worker(&command, false);

        let handle = worker.start();
        let mut runs = 0;
        for _ in 0..250 {
            runs = std::fs::read_to_string(&counter)
                .map(|s| s.lines().count())
                .unwrap_or(0);
            if runs >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(runs >= 3, "expected relaunches, got {runs}");

        worker.stopper().stop();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn clean_exit_is_relaunched_when_policy_allows() {
        let mut harness = Harness::new(Duration::from_millis(10));
        harness.config = Arc::new(
            EngineConfigBuilder::new()
                .command_fail_retry(Duration::from_millis(10))
                .restart_on_clean_exit(true)
                .build()
                .unwrap(),
        );
        let worker = harness.worker("echo again", false);
        let mut output = harness.output.subscribe();

        let handle = worker.start();
        for _ in 0..2 {
            let chunk = tokio::time::timeout(Duration::from_secs(5), output.recv())
                .await
                .expect("command should run again")
                .unwrap();
            assert_eq!(chunk, Bytes::from_static(b"again\n"));
        }

        worker.stopper().stop();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker should stop")
            .unwrap();
        assert!(harness.events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn panicking_teardown_is_contained() {
        let completed = contain_teardown("app-0", async {
            panic!("filter close exploded");
        })
        .await;
        assert!(!completed);

        // 호출 태스크는 계속 진행되고 다음 정리도 정상 동작합니다.
        let (tx, rx) = tokio::sync::oneshot::channel();
        let completed = contain_teardown("app-0", async move {
            let _ = tx.send(());
        })
        .await;
        assert!(completed);
        rx.await.unwrap();
    }

    #[tokio::test]
    async fn stopping_scope_kills_long_running_command() {
        let harness = Harness::new(Duration::from_millis(10));
        let worker = harness.worker("sleep 30", false);

        let handle = worker.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        harness.server.stop();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker should stop promptly")
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_sends_request_to_server() {
        let mut harness = Harness::new(Duration::from_millis(10));
        let worker = harness.worker("", false);
        worker.shutdown();

        assert!(matches!(
            harness.events_rx.try_recv().unwrap(),
            WorkerEvent::ShutdownRequested { ref worker_id } if worker_id == "test-0"
        ));
        // 스코프 정지는 서버 몫
        assert!(!worker.stopper().is_stopped());
    }

    #[tokio::test]
    async fn no_filter_attached_after_stop() {
        let harness = Harness::new(Duration::from_millis(10));
        let dir = tempfile::tempdir().unwrap();
        let router = harness.router("late", dir.path()).await;
        let worker = harness.worker("", false);

        worker.stopper().stop();
        worker.start_router_filter(&router).await;
        assert!(worker.router_names().await.is_empty());
        router.shutdown().await;
    }
}
