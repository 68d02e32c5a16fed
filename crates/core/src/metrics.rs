//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 엔진은 이 상수를 사용하여 `metrics::counter!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `logtail_`
//! - 컴포넌트: `worker_`, `filter_`, `transfer_`
//! - 접미어: `_total` (counter)

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 워커 ID 레이블 키
pub const LABEL_WORKER: &str = "worker";

/// 라우터 이름 레이블 키
pub const LABEL_ROUTER: &str = "router";

// ─── Worker 메트릭 ─────────────────────────────────────────────────

/// Worker: 명령 실행 횟수 (counter, label: worker)
pub const WORKER_LAUNCHES_TOTAL: &str = "logtail_worker_launches_total";

/// Worker: 실패한 명령 실행 수 (counter, label: worker)
pub const WORKER_FAILURES_TOTAL: &str = "logtail_worker_failures_total";

// ─── Filter 메트릭 ─────────────────────────────────────────────────

/// Filter: 라우터로 전달된 라인 수 (counter, label: router)
pub const FILTER_LINES_FORWARDED_TOTAL: &str = "logtail_filter_lines_forwarded_total";

/// Filter: 큐가 가득 차서 버려진 출력 청크 수 (counter, label: router)
pub const FILTER_CHUNKS_DROPPED_TOTAL: &str = "logtail_filter_chunks_dropped_total";

// ─── Transfer 메트릭 ───────────────────────────────────────────────

/// Transfer: 큐가 가득 차서 버려진 배치 수 (counter, label: router)
pub const TRANSFER_BATCHES_DROPPED_TOTAL: &str = "logtail_transfer_batches_dropped_total";

/// Transfer: 세그먼트에 기록된 바이트 수 (counter, label: router)
pub const TRANSFER_BYTES_WRITTEN_TOTAL: &str = "logtail_transfer_bytes_written_total";

/// Transfer: 제출(finalize)된 세그먼트 수 (counter, label: router)
pub const TRANSFER_SEGMENTS_SUBMITTED_TOTAL: &str = "logtail_transfer_segments_submitted_total";

/// 모든 메트릭의 설명을 등록합니다.
///
/// 레코더 설치 직후 한 번 호출합니다.
pub fn describe_all() {
    use metrics::describe_counter;

    describe_counter!(WORKER_LAUNCHES_TOTAL, "Number of worker command launches");
    describe_counter!(WORKER_FAILURES_TOTAL, "Number of failed worker command runs");
    describe_counter!(
        FILTER_LINES_FORWARDED_TOTAL,
        "Number of lines forwarded from filters to routers"
    );
    describe_counter!(
        FILTER_CHUNKS_DROPPED_TOTAL,
        "Number of output chunks dropped because a filter queue was full"
    );
    describe_counter!(
        TRANSFER_BATCHES_DROPPED_TOTAL,
        "Number of batches dropped because a transfer queue was full"
    );
    describe_counter!(
        TRANSFER_BYTES_WRITTEN_TOTAL,
        "Number of bytes written into segment files"
    );
    describe_counter!(
        TRANSFER_SEGMENTS_SUBMITTED_TOTAL,
        "Number of segment files finalized"
    );
}
