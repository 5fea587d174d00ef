use anyhow::{Context, Result};
use std::io::Read;
use std::process::{Command, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const CHILD_POLL: Duration = Duration::from_millis(50);

pub fn now_epoch_secs() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Lossy text of captured process output, control characters dropped and cut at `max_chars`.
pub fn excerpt(raw: &[u8], max_chars: usize) -> String {
    let clean = String::from_utf8_lossy(raw)
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>();
    if clean.chars().count() <= max_chars {
        return clean;
    }
    let mut cut = clean.chars().take(max_chars).collect::<String>();
    cut.push('…');
    cut
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// Runs `cmd` with piped output, killing it once `limit` elapses.
/// Both pipes are drained while waiting so a chatty child never stalls on a full buffer.
pub fn run_with_deadline(cmd: &mut Command, limit: Duration) -> Result<Output> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd.spawn().context("failed to spawn child process")?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if started.elapsed() >= limit {
            let _ = child.kill();
            let _ = child.wait();
            anyhow::bail!("command timed out after {}s", limit.as_secs());
        }
        thread::sleep(CHILD_POLL);
    };

    Ok(Output {
        status,
        stdout: stdout
            .join()
            .map_err(|_| anyhow::anyhow!("stdout reader panicked"))?,
        stderr: stderr
            .join()
            .map_err(|_| anyhow::anyhow!("stderr reader panicked"))?,
    })
}
