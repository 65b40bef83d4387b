use std::io::Write;
use std::process::{ExitStatus, Stdio};

use anyhow::{Context, Result};
use nix::pty::openpty;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::asyncfile::FdStream;
use crate::journal::Journal;
use crate::termios;

/// Outcome of one shell cycle.
#[derive(Debug)]
pub enum RunEnd {
    /// The shell exited on its own (user typed `exit`, crash, ...).
    Exited(ExitStatus),
    /// The cancellation token flipped; the shell was killed.
    Cancelled,
}

/// One respawn cycle: spawns the shell under a fresh pty, proxies I/O with
/// stdin in raw mode, journals every keystroke, and tracks window resizes.
/// Raw mode is restored on every exit path.
pub async fn run<W: Write + Send>(
    cancel: &CancellationToken,
    journal: &Journal<W>,
    shell: &str,
    args: &[String],
) -> Result<RunEnd> {
    // size the pty from the operator's terminal when there is one
    let winsize = termios::stdin_winsize();
    let pty = openpty(winsize.as_ref(), None).context("open pty")?;

    let mut cmd = Command::new(shell);
    cmd.args(args)
        .stdin(Stdio::from(pty.slave.try_clone().context("clone pty slave")?))
        .stdout(Stdio::from(pty.slave.try_clone().context("clone pty slave")?))
        .stderr(Stdio::from(pty.slave))
        .kill_on_drop(true);
    unsafe {
        cmd.pre_exec(|| {
            // fresh session with the pty slave as controlling terminal
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            if libc::ioctl(0, libc::TIOCSCTTY, 0) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
    let mut child = cmd.spawn().context("start shell on pty")?;

    // raw mode for the duration of the cycle; skipped when stdin is not a tty
    let saved_termios = termios::set_raw_stdin().ok();
    let _restore = saved_termios.map(|saved| {
        scopeguard::guard(saved, |saved| {
            termios::restore_stdin(&saved);
        })
    });

    // resync the pty on window changes
    let resize_fd = pty.master.try_clone().context("clone pty master")?;
    let mut winch = signal(SignalKind::window_change()).context("install resize handler")?;
    let resizer = tokio::spawn(async move {
        while winch.recv().await.is_some() {
            if let Some(ws) = termios::stdin_winsize() {
                let _ = termios::set_winsize(&resize_fd, &ws);
            }
        }
    });
    let _stop_resizer = scopeguard::guard((), |_| resizer.abort());

    let mut master_r = FdStream::from_owned(pty.master).context("wrap pty master")?;
    let mut master_w = master_r.try_clone().context("split pty master")?;
    let mut stdin = FdStream::dup_raw(libc::STDIN_FILENO).context("wrap stdin")?;
    let mut stdout = tokio::io::stdout();

    let mut input_buf = [0u8; 4096];
    let mut output_buf = [0u8; 4096];
    let mut input_open = true;
    let mut output_open = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // seal signal: tear the shell down hard and report
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Ok(RunEnd::Cancelled);
            }

            status = child.wait() => {
                let status = status.context("wait for shell")?;
                debug!(?status, "shell exited");
                return Ok(RunEnd::Exited(status));
            }

            read = stdin.read(&mut input_buf), if input_open => {
                let n = read.context("read operator input")?;
                if n == 0 {
                    input_open = false;
                    continue;
                }
                // deliver and journal this chunk before reading further input
                master_w
                    .write_all(&input_buf[..n])
                    .await
                    .context("forward input to pty")?;
                journal
                    .write_all(&input_buf[..n])
                    .context("journal operator input")?;
            }

            read = master_r.read(&mut output_buf), if output_open => {
                match read {
                    // shell output is proxied, never journaled
                    Ok(0) => output_open = false,
                    Ok(n) => {
                        stdout
                            .write_all(&output_buf[..n])
                            .await
                            .context("forward pty output")?;
                        stdout.flush().await.context("flush stdout")?;
                    }
                    // EIO: slave side fully closed, the wait arm finishes up
                    Err(e) if e.raw_os_error() == Some(libc::EIO) => output_open = false,
                    Err(e) => return Err(e).context("read pty output"),
                }
            }
        }
    }
}

/// The safety loop: keeps respawning the shell until the cancellation token
/// flips. A user typing `exit` or Ctrl-D must never end the recorded session;
/// the only way out is the seal signal.
pub async fn supervise<W: Write + Send>(
    cancel: &CancellationToken,
    journal: &Journal<W>,
    shell: &str,
    args: &[String],
) {
    while !cancel.is_cancelled() {
        match run(cancel, journal, shell, args).await {
            Ok(RunEnd::Cancelled) => break,
            Ok(RunEnd::Exited(status)) => {
                debug!(?status, "respawning shell");
            }
            Err(e) => {
                warn!("shell cycle failed: {e:#}");
            }
        }

        println!("\n[N-Audit] Session is protected. Run 'n-audit' to seal and close.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct NullSink;

    impl Write for NullSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn reports_shell_exit_status() {
        let cancel = CancellationToken::new();
        let journal = Journal::new(NullSink);

        let end = run(&cancel, &journal, "/bin/sh", &["-c".to_string(), "exit 7".to_string()])
            .await
            .unwrap();
        match end {
            RunEnd::Exited(status) => assert_eq!(status.code(), Some(7)),
            RunEnd::Cancelled => panic!("unexpected cancellation"),
        }
    }

    #[tokio::test]
    async fn cancellation_kills_the_shell() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let journal = Journal::new(NullSink);

        let end = run(
            &cancel,
            &journal,
            "/bin/sh",
            &["-c".to_string(), "sleep 60".to_string()],
        )
        .await
        .unwrap();
        assert!(matches!(end, RunEnd::Cancelled));
    }

    #[tokio::test]
    async fn supervise_returns_on_cancelled_token() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let journal = Journal::new(NullSink);

        // must not spawn anything with a pre-flipped token
        supervise(&cancel, &journal, "/bin/false", &[]).await;
    }

    #[tokio::test]
    async fn shell_output_reaches_pty_master() {
        // drive the pty plumbing directly: spawn a command whose stdout is a
        // pty slave and read it back from the master
        let pty = openpty(None, None).unwrap();
        let mut cmd = Command::new("/bin/echo");
        cmd.arg("through-the-pty")
            .stdin(Stdio::null())
            .stdout(Stdio::from(pty.slave.try_clone().unwrap()))
            .stderr(Stdio::from(pty.slave));
        let mut child = cmd.spawn().unwrap();

        let mut master = FdStream::from_owned(pty.master).unwrap();
        let mut collected = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            match master.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => collected.extend_from_slice(&buf[..n]),
                Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
                Err(e) => panic!("master read: {e}"),
            }
            if collected.windows(4).any(|w| w == b"-pty") {
                break;
            }
        }
        child.wait().await.unwrap();

        let text = String::from_utf8_lossy(&collected);
        assert!(text.contains("through-the-pty"));
    }

    // journal failures must abort the cycle rather than let keystrokes flow
    // unrecorded; exercised via the writer directly since driving a real
    // terminal needs a tty
    #[test]
    fn failing_journal_surfaces_the_error() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("disk gone"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let journal = Journal::new(Broken);
        assert!(journal.write_all(b"id\n").is_err());
    }
}
