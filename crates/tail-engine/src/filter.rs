//! 필터 — (워커, 라우터) 쌍 단위 라인 선택
//!
//! [`Filter`]는 워커가 밀어 넣는 출력 청크를 자체 큐로 받아 라인으로 자르고,
//! 라우터의 [`MatchPolicy`]를 적용한 뒤 수락된 라인을 라우터 싱크로 넘깁니다.
//!
//! # 종료
//! - 워커 스코프나 라우터 스코프 중 먼저 정지되는 쪽을 따라 즉시 종료
//! - [`Filter::close`]: 송신측을 닫아 남은 청크와 미완성 라인까지 처리한 뒤 종료
//! - [`Filter::stop`]: 큐를 버리고 즉시 종료. 여러 번 호출해도 안전
//!
//! # 버림과 재동기화
//! 큐가 가득 차 청크를 버리면 다음으로 큐에 들어가는 청크에 표시를 남깁니다.
//! 루프는 표시된 청크를 만나면 미완성 라인을 버리고 다음 줄바꿈까지 건너뜁니다.
//! 버림 앞뒤의 조각이 한 라인으로 이어 붙지 않습니다.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use metrics::counter;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use logtail_core::metrics as m;
use logtail_core::stopper::Stopper;

use crate::matcher::MatchPolicy;
use crate::router::Router;

/// 줄바꿈 없이 이 크기를 넘긴 출력은 한 라인으로 잘라 처리
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// 큐 항목
struct Chunk {
    bytes: Bytes,
    /// 이 청크 앞에서 다른 청크가 버려짐
    after_gap: bool,
}

/// 입력측 상태
struct Inlet {
    sender: mpsc::Sender<Chunk>,
    gap: bool,
}

/// (워커, 라우터) 쌍 단위 필터
pub struct Filter {
    worker_id: String,
    router_name: String,
    inlet: Mutex<Option<Inlet>>,
    stopper: Stopper,
    done: Stopper,
}

impl Filter {
    /// 필터를 만들고 처리 루프를 시작합니다.
    ///
    /// 필터 스코프는 `worker_stopper`의 자식이며, 루프는 라우터 스코프도 함께 감시합니다.
    pub fn start(
        worker_id: impl Into<String>,
        router: Arc<Router>,
        worker_stopper: &Stopper,
        buffer_size: usize,
    ) -> Arc<Self> {
        let worker_id = worker_id.into();
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        let filter = Arc::new(Self {
            worker_id: worker_id.clone(),
            router_name: router.name().to_owned(),
            inlet: Mutex::new(Some(Inlet { sender, gap: false })),
            stopper: worker_stopper.child(),
            done: Stopper::new(),
        });

        tokio::spawn(run(
            worker_id,
            router,
            receiver,
            filter.stopper.clone(),
            filter.done.clone(),
        ));

        debug!(worker = %filter.worker_id, router = %filter.router_name, "filter started");
        filter
    }

    /// 연결된 라우터 이름
    pub fn router_name(&self) -> &str {
        &self.router_name
    }

    /// 워커 출력 청크를 받습니다. 큐가 가득 차면 청크를 버리며 블로킹하지 않습니다.
    pub async fn receive(&self, chunk: Bytes) {
        let mut guard = self.inlet.lock().await;
        let Some(inlet) = guard.as_mut() else {
            return;
        };

        let chunk = Chunk {
            bytes: chunk,
            after_gap: inlet.gap,
        };
        match inlet.sender.try_send(chunk) {
            Ok(()) => inlet.gap = false,
            Err(mpsc::error::TrySendError::Full(_)) => {
                inlet.gap = true;
                counter!(m::FILTER_CHUNKS_DROPPED_TOTAL, m::LABEL_ROUTER => self.router_name.clone())
                    .increment(1);
                debug!(
                    worker = %self.worker_id,
                    router = %self.router_name,
                    "filter queue full, chunk dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// 입력을 닫습니다. 루프는 큐에 남은 청크를 처리한 뒤 종료합니다.
    pub async fn close(&self) {
        self.inlet.lock().await.take();
    }

    /// 루프를 즉시 정지합니다.
    pub fn stop(&self) {
        self.stopper.stop();
    }

    /// 루프 종료 여부
    pub fn is_done(&self) -> bool {
        self.done.is_stopped()
    }

    /// 루프가 종료될 때까지 대기합니다.
    pub async fn done(&self) {
        self.done.stopped().await;
    }
}

async fn run(
    worker_id: String,
    router: Arc<Router>,
    mut receiver: mpsc::Receiver<Chunk>,
    stopper: Stopper,
    done: Stopper,
) {
    let mut selector = LineSelector::new(Arc::clone(router.policy()));

    loop {
        tokio::select! {
            biased;

            _ = stopper.stopped() => break,
            _ = router.stopper().stopped() => break,

            chunk = receiver.recv() => match chunk {
                Some(chunk) => {
                    if chunk.after_gap {
                        selector.resync();
                    }
                    let lines = selector.push(&chunk.bytes);
                    forward(&worker_id, &router, lines);
                }
                None => {
                    // 입력이 닫힘: 미완성 라인까지 내보내고 종료
                    let lines = selector.finish();
                    forward(&worker_id, &router, lines);
                    break;
                }
            },
        }
    }

    debug!(worker = %worker_id, router = %router.name(), "filter stopped");
    done.stop();
}

fn forward(worker_id: &str, router: &Router, lines: Vec<Bytes>) {
    if lines.is_empty() {
        return;
    }

    let count = lines.len() as u64;
    match router.trans(worker_id, lines) {
        Ok(()) => {
            counter!(m::FILTER_LINES_FORWARDED_TOTAL, m::LABEL_ROUTER => router.name().to_owned())
                .increment(count);
        }
        Err(e) => warn!(worker = %worker_id, router = %router.name(), error = %e, "transfer rejected batch"),
    }
}

/// 청크 스트림을 라인으로 자르고 매칭 정책을 적용합니다.
///
/// 공백이나 탭으로 시작하는 라인은 직전 레코드의 일부(스택 트레이스 등)로 보고
/// 직전 헤드 라인의 판정을 따릅니다.
pub struct LineSelector {
    policy: Arc<MatchPolicy>,
    pending: BytesMut,
    following: bool,
    skipping: bool,
}

impl LineSelector {
    /// 새 선택기를 생성합니다.
    pub fn new(policy: Arc<MatchPolicy>) -> Self {
        let following = policy.is_pass_through();
        Self {
            policy,
            pending: BytesMut::new(),
            following,
            skipping: false,
        }
    }

    /// 청크를 추가하고 완성된 라인 중 수락된 것을 반환합니다. 줄바꿈은 제거됩니다.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        let mut accepted = Vec::new();

        let chunk = if self.skipping {
            match memchr::memchr(b'\n', chunk) {
                Some(pos) => {
                    self.skipping = false;
                    &chunk[pos + 1..]
                }
                None => return accepted,
            }
        } else {
            chunk
        };

        // pending에는 줄바꿈이 없으므로 새로 붙인 바이트만 검색합니다.
        let mut scanned = self.pending.len();
        self.pending.extend_from_slice(chunk);
        while let Some(offset) = memchr::memchr(b'\n', &self.pending[scanned..]) {
            let pos = scanned + offset;
            let mut line = self.pending.split_to(pos + 1);
            line.truncate(pos);
            self.select(line.freeze(), &mut accepted);
            scanned = 0;
        }

        if self.pending.len() > MAX_LINE_BYTES {
            let line = self.pending.split().freeze();
            self.select(line, &mut accepted);
        }

        accepted
    }

    /// 입력이 끊긴 뒤 상태를 되돌립니다.
    ///
    /// 미완성 라인을 버리고, 다음 청크는 첫 줄바꿈까지 건너뜁니다. 연속 라인
    /// 판정도 초기값으로 돌아갑니다.
    pub fn resync(&mut self) {
        self.pending.clear();
        self.skipping = true;
        self.following = self.policy.is_pass_through();
    }

    /// 남은 미완성 라인을 내보냅니다.
    pub fn finish(&mut self) -> Vec<Bytes> {
        let mut accepted = Vec::new();
        if !self.pending.is_empty() {
            let line = self.pending.split().freeze();
            self.select(line, &mut accepted);
        }
        accepted
    }

    fn select(&mut self, line: Bytes, accepted: &mut Vec<Bytes>) {
        let is_continuation = matches!(line.first(), Some(b' ' | b'\t'));
        if !is_continuation {
            self.following = self.policy.matches(&line);
        }
        if self.following {
            accepted.push(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use logtail_core::config::MatcherConfig;

    use crate::transfer::file::FileTransfer;

    fn errors_policy() -> Arc<MatchPolicy> {
        Arc::new(
            MatchPolicy::from_config(
                "errors",
                &[MatcherConfig {
                    contains: vec!["ERROR".to_owned()],
                    ..Default::default()
                }],
            )
            .unwrap(),
        )
    }

    fn as_strings(lines: Vec<Bytes>) -> Vec<String> {
        lines
            .into_iter()
            .map(|l| String::from_utf8(l.to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn pass_through_keeps_every_line() {
        let mut selector = LineSelector::new(Arc::new(MatchPolicy::pass_through()));
        let lines = selector.push(b"a\n  b\nc\n");
        assert_eq!(as_strings(lines), vec!["a", "  b", "c"]);
    }

    #[test]
    fn partial_line_is_carried_to_next_chunk() {
        let mut selector = LineSelector::new(Arc::new(MatchPolicy::pass_through()));
        assert_eq!(as_strings(selector.push(b"hel")), Vec::<String>::new());
        assert_eq!(as_strings(selector.push(b"lo\nwor")), vec!["hello"]);
        assert_eq!(as_strings(selector.finish()), vec!["wor"]);
        assert!(selector.finish().is_empty());
    }

    #[test]
    fn continuation_lines_follow_their_head() {
        let mut selector = LineSelector::new(errors_policy());
        let lines = selector.push(
            b"INFO ok\n\tat skipped\nERROR boom\n\tat Foo.bar\n  at Baz.qux\nINFO done\n",
        );
        assert_eq!(
            as_strings(lines),
            vec!["ERROR boom", "\tat Foo.bar", "  at Baz.qux"]
        );
    }

    #[test]
    fn leading_continuation_without_head_is_rejected_by_matchers() {
        let mut selector = LineSelector::new(errors_policy());
        assert!(selector.push(b"  orphan ERROR\n").is_empty());
    }

    #[test]
    fn oversized_pending_is_flushed_as_a_line() {
        let mut selector = LineSelector::new(Arc::new(MatchPolicy::pass_through()));
        let chunk = vec![b'x'; MAX_LINE_BYTES + 1];
        let lines = selector.push(&chunk);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), MAX_LINE_BYTES + 1);
    }

    #[test]
    fn resync_drops_partial_line_and_skips_to_next_newline() {
        let mut selector = LineSelector::new(Arc::new(MatchPolicy::pass_through()));
        assert!(selector.push(b"abc").is_empty());

        selector.resync();
        assert!(selector.push(b"jkl").is_empty());
        assert_eq!(as_strings(selector.push(b"\nmno\npq")), vec!["mno"]);
        assert_eq!(as_strings(selector.finish()), vec!["pq"]);
    }

    #[test]
    fn resync_forgets_matched_head() {
        let mut selector = LineSelector::new(errors_policy());
        assert_eq!(as_strings(selector.push(b"ERROR boom\n")), vec!["ERROR boom"]);

        selector.resync();
        assert!(selector.push(b"x\n\tat after.gap\n").is_empty());
    }

    #[test]
    fn long_line_split_into_small_chunks() {
        let mut selector = LineSelector::new(Arc::new(MatchPolicy::pass_through()));
        for _ in 0..1000 {
            assert!(selector.push(b"0123456789").is_empty());
        }
        let lines = selector.push(b"\nnext\n");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), 10_000);
        assert_eq!(&lines[1][..], b"next");
    }

    async fn wait_for(dir: &std::path::Path, expected: &[u8]) -> bool {
        for _ in 0..200 {
            let found = std::fs::read_dir(dir)
                .unwrap()
                .map(|e| std::fs::read(e.unwrap().path()).unwrap())
                .any(|c| c.starts_with(expected));
            if found {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn close_drains_queue_and_partial_line() {
        let dir = tempfile::tempdir().unwrap();
        let router = Router::start(
            "errors",
            MatchPolicy::pass_through(),
            Box::new(FileTransfer::new(dir.path(), 1024, 16)),
            &Stopper::new(),
        )
        .await
        .unwrap();
        let worker = Stopper::new();
        let filter = Filter::start("app-0", Arc::clone(&router), &worker, 16);

        filter.receive(Bytes::from_static(b"first\nsec")).await;
        filter.receive(Bytes::from_static(b"ond")).await;
        filter.close().await;
        filter.done().await;

        assert!(wait_for(dir.path(), b"first\nsecond\n").await);
        router.shutdown().await;
    }

    #[tokio::test]
    async fn dropped_chunk_does_not_glue_partial_lines() {
        let dir = tempfile::tempdir().unwrap();
        let router = Router::start(
            "errors",
            MatchPolicy::pass_through(),
            Box::new(FileTransfer::new(dir.path(), 1024, 16)),
            &Stopper::new(),
        )
        .await
        .unwrap();
        let worker = Stopper::new();
        let filter = Filter::start("app-0", Arc::clone(&router), &worker, 1);

        // 큐 깊이 1: 두 번째 청크는 루프가 돌기 전에 버려집니다.
        filter.receive(Bytes::from_static(b"abc")).await;
        filter.receive(Bytes::from_static(b"def\nghi\n")).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        filter.receive(Bytes::from_static(b"jkl\n")).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        filter.receive(Bytes::from_static(b"mno\n")).await;
        filter.close().await;
        filter.done().await;

        assert!(wait_for(dir.path(), b"mno\n").await);
        router.shutdown().await;

        let written: Vec<u8> = std::fs::read_dir(dir.path())
            .unwrap()
            .flat_map(|e| std::fs::read(e.unwrap().path()).unwrap())
            .collect();
        assert_eq!(written, b"mno\n");
    }

    #[tokio::test]
    async fn router_stop_ends_filter() {
        let dir = tempfile::tempdir().unwrap();
        let router = Router::start(
            "errors",
            MatchPolicy::pass_through(),
            Box::new(FileTransfer::new(dir.path(), 1024, 16)),
            &Stopper::new(),
        )
        .await
        .unwrap();
        let worker = Stopper::new();
        let filter = Filter::start("app-0", Arc::clone(&router), &worker, 16);

        router.shutdown().await;
        tokio::time::timeout(Duration::from_secs(1), filter.done())
            .await
            .expect("filter should follow router stop");
        assert!(!worker.is_stopped());
    }

    #[tokio::test]
    async fn worker_stop_ends_filter_and_stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let router = Router::start(
            "errors",
            MatchPolicy::pass_through(),
            Box::new(FileTransfer::new(dir.path(), 1024, 16)),
            &Stopper::new(),
        )
        .await
        .unwrap();
        let worker = Stopper::new();
        let filter = Filter::start("app-0", Arc::clone(&router), &worker, 16);

        worker.stop();
        filter.stop();
        filter.stop();
        tokio::time::timeout(Duration::from_secs(1), filter.done())
            .await
            .expect("filter should follow worker stop");
        assert!(filter.is_done());
        assert!(!router.stopper().is_stopped());
        router.shutdown().await;
    }

    #[tokio::test]
    async fn receive_after_close_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let router = Router::start(
            "errors",
            MatchPolicy::pass_through(),
            Box::new(FileTransfer::new(dir.path(), 1024, 16)),
            &Stopper::new(),
        )
        .await
        .unwrap();
        let filter = Filter::start("app-0", Arc::clone(&router), &Stopper::new(), 16);

        filter.close().await;
        filter.receive(Bytes::from_static(b"late\n")).await;
        filter.done().await;
        router.shutdown().await;

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
