//! 메모리 매핑 세그먼트 기록기
//!
//! [`SegmentWriter`]는 고정 용량 세그먼트 파일을 만들고 mmap으로 매핑한 뒤
//! 배치 단위로 라인을 복사합니다. 동기 구조체이며 파일 싱크의 기록 태스크 하나만
//! 소유합니다.
//!
//! # 세그먼트 수명
//! 1. `<prefix>-<YYYYMMDDHHMMSS>.log` 파일을 만들고 용량만큼 늘린 뒤 공유 매핑
//! 2. 배치 전체 길이(라인 길이 + 구분자 1바이트의 합)가 남은 용량보다 크면 회전
//! 3. 제출 시 매핑 해제 → 실제 기록 크기로 truncate → 닫기.
//!    한 바이트도 기록되지 않았으면 파일을 삭제
//!
//! 기록 후 fsync는 하지 않습니다. 데이터는 매핑을 통해 즉시 페이지 캐시에 반영되고
//! 디스크 반영은 OS write-back에 맡깁니다.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use memmap2::{MmapMut, MmapOptions};
use tracing::{debug, info, warn};

use logtail_core::error::TransferError;

/// 같은 초에 생성된 세그먼트 이름 충돌 시 시도할 최대 접미어
const MAX_NAME_SUFFIX: u32 = 1000;

/// 라인 구분자
const LINE_TERMINATOR: u8 = b'\n';

/// 배치 기록 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// 기록 완료
    Written {
        /// 기록한 바이트 수 (구분자 포함)
        bytes: usize,
        /// 기록 전에 세그먼트를 회전했는지 여부
        rotated: bool,
    },
    /// 배치가 세그먼트 전체 용량보다 커서 버림
    Oversized {
        /// 배치 전체 길이
        bytes: usize,
    },
}

/// 열린 세그먼트
struct Segment {
    path: PathBuf,
    file: File,
    mmap: MmapMut,
    written: usize,
}

/// 회전 세그먼트 기록기
pub struct SegmentWriter {
    dir: PathBuf,
    prefix: String,
    capacity: usize,
    current: Option<Segment>,
}

impl SegmentWriter {
    /// 디렉토리를 준비하고 첫 세그먼트를 엽니다.
    ///
    /// 디렉토리 생성, 파일 생성, 매핑 중 하나라도 실패하면
    /// [`TransferError::Setup`]을 반환합니다.
    pub fn open(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        capacity: usize,
    ) -> Result<Self, TransferError> {
        let mut writer = Self {
            dir: dir.into(),
            prefix: prefix.into(),
            capacity,
            current: None,
        };

        if capacity == 0 {
            return Err(writer.setup_error("segment capacity must be greater than 0"));
        }

        std::fs::create_dir_all(&writer.dir)
            .map_err(|e| writer.setup_error(format!("create directory: {e}")))?;

        let segment = writer
            .create_segment()
            .map_err(|e| writer.setup_error(format!("open segment: {e}")))?;
        writer.current = Some(segment);

        Ok(writer)
    }

    /// 세그먼트 고정 용량
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 현재 열린 세그먼트 경로
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|s| s.path.as_path())
    }

    /// 현재 세그먼트에 기록된 바이트 수
    pub fn written(&self) -> usize {
        self.current.as_ref().map_or(0, |s| s.written)
    }

    /// 배치 하나를 현재 세그먼트에 기록합니다.
    ///
    /// 배치는 두 세그먼트로 나뉘지 않습니다. 남은 용량이 부족하면 현재 세그먼트를
    /// 제출하고 새 세그먼트를 연 뒤 기록합니다.
    pub fn write_batch(&mut self, batch: &[Bytes]) -> Result<BatchOutcome, TransferError> {
        let length: usize = batch.iter().map(|line| line.len() + 1).sum();

        if length > self.capacity {
            return Ok(BatchOutcome::Oversized { bytes: length });
        }

        let mut rotated = false;
        let needs_rotation = self
            .current
            .as_ref()
            .is_some_and(|segment| self.capacity - segment.written < length);
        if needs_rotation {
            // 제출 실패는 새 세그먼트 기록을 막지 않습니다.
            if let Err(e) = self.finalize() {
                warn!(prefix = %self.prefix, error = %e, "failed to submit segment");
            }
            rotated = true;
        }

        if self.current.is_none() {
            self.current = Some(self.create_segment()?);
        }

        let Some(segment) = self.current.as_mut() else {
            return Err(TransferError::State("no open segment".to_owned()));
        };

        for line in batch {
            let start = segment.written;
            let end = start + line.len();
            segment.mmap[start..end].copy_from_slice(line);
            segment.mmap[end] = LINE_TERMINATOR;
            segment.written = end + 1;
        }

        Ok(BatchOutcome::Written {
            bytes: length,
            rotated,
        })
    }

    /// 현재 세그먼트를 제출합니다.
    ///
    /// 매핑 해제 후 실제 기록 크기로 잘라내고 닫습니다. 기록된 바이트가 없으면
    /// 파일을 삭제하고 `None`을 반환합니다. 열린 세그먼트가 없으면 아무 것도 하지
    /// 않으므로 여러 번 호출해도 안전합니다.
    pub fn finalize(&mut self) -> Result<Option<PathBuf>, TransferError> {
        let Some(segment) = self.current.take() else {
            return Ok(None);
        };

        let Segment {
            path,
            file,
            mmap,
            written,
        } = segment;

        // truncate 전에 매핑을 먼저 해제합니다.
        drop(mmap);
        file.set_len(written as u64)?;
        drop(file);

        if written == 0 {
            std::fs::remove_file(&path)?;
            debug!(path = %path.display(), "removed empty segment");
            return Ok(None);
        }

        info!(path = %path.display(), bytes = written, "segment submitted");
        Ok(Some(path))
    }

    fn create_segment(&self) -> Result<Segment, TransferError> {
        let timestamp = chrono::Local::now().format("%Y%m%d%H%M%S").to_string();
        let (path, file) = self.create_unique_file(&timestamp)?;

        file.set_len(self.capacity as u64)?;

        // SAFETY: 파일은 create_new로 방금 만들어졌고 이 기록기만 핸들을 가집니다.
        // 매핑 길이는 위에서 늘린 파일 길이와 같으며, finalize에서 truncate 전에 해제합니다.
        let mmap = unsafe { MmapOptions::new().len(self.capacity).map_mut(&file)? };

        debug!(path = %path.display(), capacity = self.capacity, "segment opened");
        Ok(Segment {
            path,
            file,
            mmap,
            written: 0,
        })
    }

    fn create_unique_file(&self, timestamp: &str) -> Result<(PathBuf, File), TransferError> {
        for suffix in 0..MAX_NAME_SUFFIX {
            let name = segment_file_name(&self.prefix, timestamp, suffix);
            let path = self.dir.join(name);
            match OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(TransferError::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!(
                "no free segment name for prefix '{}' at {timestamp}",
                self.prefix
            ),
        )))
    }

    fn setup_error(&self, reason: impl Into<String>) -> TransferError {
        TransferError::Setup {
            dir: self.dir.display().to_string(),
            reason: reason.into(),
        }
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            warn!(prefix = %self.prefix, error = %e, "failed to submit segment on drop");
        }
    }
}

/// 세그먼트 파일 이름을 만듭니다.
///
/// 접미어 0은 `<prefix>-<timestamp>.log`, 그 외는 `<prefix>-<timestamp>-<n>.log`.
pub fn segment_file_name(prefix: &str, timestamp: &str, suffix: u32) -> String {
    if suffix == 0 {
        format!("{prefix}-{timestamp}.log")
    } else {
        format!("{prefix}-{timestamp}-{suffix}.log")
    }
}
