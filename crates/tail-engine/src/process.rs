//! 셸 프로세스 실행
//!
//! 명령은 `/bin/sh -c` 로 실행하여 파이프, 리다이렉션 같은 셸 문법을 그대로 지원합니다.
//! 각 명령은 자체 프로세스 그룹에서 실행되며, 종료 시 그룹 전체에 SIGKILL을 보내
//! 셸 파이프라인이 고아 프로세스를 남기지 않게 합니다.

use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::EngineError;

/// 출력 읽기 버퍼 크기
const READ_BUFFER_SIZE: usize = 4096;

/// 셸 경로
const SHELL: &str = "/bin/sh";

fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new(SHELL);
    cmd.arg("-c").arg(command).process_group(0);
    cmd
}

/// 명령을 실행합니다. stdout은 파이프로, stderr는 부모의 stderr로 연결됩니다.
pub fn spawn_shell(command: &str) -> Result<Child, EngineError> {
    shell_command(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| EngineError::Spawn {
            command: command.to_owned(),
            reason: e.to_string(),
        })
}

/// 자식 프로세스의 프로세스 그룹 전체를 강제 종료합니다.
///
/// 이미 회수된 프로세스면 아무 것도 하지 않습니다.
pub fn kill_group(child: &Child) {
    let Some(pid) = child.id() else {
        return;
    };

    // SAFETY: libc::kill은 메모리를 건드리지 않는 시스템 콜입니다.
    // 음수 pid는 spawn_shell에서 process_group(0)으로 만든 그룹을 가리킵니다.
    let result = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
    if result != 0 {
        let err = std::io::Error::last_os_error();
        // 그룹이 이미 사라진 경우
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pid, error = %err, "failed to kill process group");
        }
    } else {
        debug!(pid, "process group killed");
    }
}

/// 리더를 EOF까지 읽으며 청크마다 `sink`를 호출합니다.
///
/// 읽기 버퍼는 재사용되므로 `sink`에는 청크마다 새로 할당한 버퍼를 넘깁니다.
pub async fn pump_output<R, F, Fut>(mut reader: R, mut sink: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(Vec<u8>) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => sink(buf[..n].to_vec()).await,
            Err(e) => {
                debug!(error = %e, "output read ended");
                break;
            }
        }
    }
}

/// 명령을 실행하고 stdout의 비어 있지 않은 라인 목록을 반환합니다.
///
/// 동적 명령 생성기에 사용합니다. 0이 아닌 종료 코드는 에러입니다.
pub async fn capture_lines(command: &str) -> Result<Vec<String>, EngineError> {
    let output = shell_command(command)
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| EngineError::Spawn {
            command: command.to_owned(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(EngineError::Spawn {
            command: command.to_owned(),
            reason: output.status.to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect())
}
