//! 파일 싱크 — 메모리 매핑 회전 세그먼트
//!
//! [`FileTransfer`]는 [`Transfer`] trait의 파일 구현입니다.
//! `trans`는 배치를 bounded 큐에 넣기만 하고, 블로킹 스레드의 기록 루프 하나가
//! 큐를 읽어 [`SegmentWriter`]로 기록합니다. 매핑된 기록 창은 이 루프만 만집니다.
//!
//! # 백프레셔
//! 큐가 가득 차면 배치를 버립니다 (신선도 우선). 버림은 예상된 동작이므로
//! debug 레벨로만 기록합니다.

use std::path::PathBuf;

use bytes::Bytes;
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use logtail_core::error::TransferError;
use logtail_core::metrics as m;
use logtail_core::stopper::Stopper;
use logtail_core::transfer::{BoxFuture, Transfer, TransferBinding, TransferKind, TransferTask};

use super::segment::{BatchOutcome, SegmentWriter};

/// 큐에 들어가는 한 배치
struct Batch {
    server_id: String,
    lines: Vec<Bytes>,
}

/// 시작 후 생기는 상태
struct Bound {
    sender: mpsc::Sender<Batch>,
    stopper: Stopper,
    router_name: String,
}

/// 메모리 매핑 회전 파일 싱크
pub struct FileTransfer {
    dir: PathBuf,
    capacity: usize,
    queue_size: usize,
    bound: Option<Bound>,
}

impl FileTransfer {
    /// 새 파일 싱크를 생성합니다. 디렉토리는 `start` 시점에 만듭니다.
    pub fn new(dir: impl Into<PathBuf>, capacity: usize, queue_size: usize) -> Self {
        Self {
            dir: dir.into(),
            capacity,
            queue_size: queue_size.max(1),
            bound: None,
        }
    }

    /// 세그먼트 디렉토리
    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }
}

impl Transfer for FileTransfer {
    fn kind(&self) -> TransferKind {
        TransferKind::File
    }

    fn start(
        &mut self,
        binding: TransferBinding,
    ) -> BoxFuture<'_, Result<TransferTask, TransferError>> {
        Box::pin(async move {
            if self.bound.is_some() {
                return Err(TransferError::State(format!(
                    "file transfer in {} already started",
                    self.dir.display()
                )));
            }

            // 디렉토리 생성, 파일 선할당, 매핑은 블로킹 스레드에서 수행합니다.
            let writer = {
                let dir = self.dir.clone();
                let prefix = binding.router_name.clone();
                let capacity = self.capacity;
                tokio::task::spawn_blocking(move || SegmentWriter::open(dir, prefix, capacity))
                    .await
                    .map_err(|e| TransferError::Setup {
                        dir: self.dir.display().to_string(),
                        reason: format!("segment setup task failed: {e}"),
                    })??
            };
            let (sender, receiver) = mpsc::channel(self.queue_size);

            info!(
                router = %binding.router_name,
                dir = %self.dir.display(),
                capacity = self.capacity,
                "file transfer started"
            );

            self.bound = Some(Bound {
                sender,
                stopper: binding.stopper.clone(),
                router_name: binding.router_name.clone(),
            });

            // 기록 루프는 매핑을 단독 소유하며 블로킹 스레드에서 실행됩니다.
            let handle = tokio::runtime::Handle::current();
            Ok(tokio::task::spawn_blocking(move || {
                handle.block_on(write_loop(writer, receiver, binding))
            }))
        })
    }

    fn trans(&self, server_id: &str, batch: Vec<Bytes>) -> Result<(), TransferError> {
        let Some(bound) = &self.bound else {
            return Err(TransferError::State(
                "file transfer not started".to_owned(),
            ));
        };

        if bound.stopper.is_stopped() || batch.is_empty() {
            return Ok(());
        }

        let batch = Batch {
            server_id: server_id.to_owned(),
            lines: batch,
        };

        match bound.sender.try_send(batch) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                counter!(m::TRANSFER_BATCHES_DROPPED_TOTAL, m::LABEL_ROUTER => bound.router_name.clone())
                    .increment(1);
                debug!(
                    router = %bound.router_name,
                    server_id = %dropped.server_id,
                    lines = dropped.lines.len(),
                    "transfer queue full, batch dropped"
                );
            }
            // 기록 태스크가 이미 끝남 (라우터 종료)
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }

        Ok(())
    }
}

/// 큐를 읽어 세그먼트에 기록하는 태스크
///
/// 라우터 스코프가 정지되면 남은 배치를 더 읽지 않고 현재 세그먼트를 제출한 뒤 종료합니다.
async fn write_loop(
    mut writer: SegmentWriter,
    mut receiver: mpsc::Receiver<Batch>,
    binding: TransferBinding,
) {
    let TransferBinding {
        router_name,
        stopper,
    } = binding;

    loop {
        tokio::select! {
            biased;

            _ = stopper.stopped() => {
                debug!(router = %router_name, "transfer stop signal received");
                break;
            }

            batch = receiver.recv() => {
                let Some(batch) = batch else {
                    // 모든 송신자가 사라짐
                    break;
                };
                write_batch(&mut writer, &router_name, batch);
            }
        }
    }

    receiver.close();
    match writer.finalize() {
        Ok(Some(path)) => {
            counter!(m::TRANSFER_SEGMENTS_SUBMITTED_TOTAL, m::LABEL_ROUTER => router_name.clone())
                .increment(1);
            info!(router = %router_name, path = %path.display(), "file transfer stopped");
        }
        Ok(None) => info!(router = %router_name, "file transfer stopped"),
        Err(e) => warn!(router = %router_name, error = %e, "failed to submit final segment"),
    }
}

fn write_batch(writer: &mut SegmentWriter, router_name: &str, batch: Batch) {
    match writer.write_batch(&batch.lines) {
        Ok(BatchOutcome::Written { bytes, rotated }) => {
            counter!(m::TRANSFER_BYTES_WRITTEN_TOTAL, m::LABEL_ROUTER => router_name.to_owned())
                .increment(bytes as u64);
            if rotated {
                counter!(m::TRANSFER_SEGMENTS_SUBMITTED_TOTAL, m::LABEL_ROUTER => router_name.to_owned())
                    .increment(1);
            }
        }
        Ok(BatchOutcome::Oversized { bytes }) => {
            warn!(
                router = %router_name,
                server_id = %batch.server_id,
                bytes,
                capacity = writer.capacity(),
                "batch larger than a segment, dropped"
            );
        }
        Err(e) => {
            error!(router = %router_name, error = %e, "segment write failed");
        }
    }
}
