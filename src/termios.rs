use std::os::fd::{AsRawFd, BorrowedFd};

use nix::errno::Errno;
use nix::pty::Winsize;
use nix::sys::termios::{cfmakeraw, tcgetattr, tcsetattr, SetArg, Termios};
use nix::unistd::isatty;

fn stdin_fd() -> BorrowedFd<'static> {
    // fd 0 outlives the process
    unsafe { BorrowedFd::borrow_raw(libc::STDIN_FILENO) }
}

pub fn stdin_is_tty() -> bool {
    isatty(stdin_fd()).unwrap_or(false)
}

/// Switches stdin to raw mode and returns the prior settings for restore.
/// Fails with ENOTTY when stdin is not a terminal.
pub fn set_raw_stdin() -> nix::Result<Termios> {
    let saved = tcgetattr(stdin_fd())?;
    let mut raw = saved.clone();
    cfmakeraw(&mut raw);
    tcsetattr(stdin_fd(), SetArg::TCSANOW, &raw)?;
    Ok(saved)
}

/// Restores stdin to previously saved settings. Errors are swallowed: this
/// runs on every exit path, including unwinds, where there is no caller to
/// report to.
pub fn restore_stdin(saved: &Termios) {
    let _ = tcsetattr(stdin_fd(), SetArg::TCSANOW, saved);
}

/// Current window size of stdin, or None when stdin is not a terminal.
pub fn stdin_winsize() -> Option<Winsize> {
    if !stdin_is_tty() {
        return None;
    }
    let mut ws = Winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let ret = unsafe { libc::ioctl(libc::STDIN_FILENO, libc::TIOCGWINSZ, &mut ws) };
    if ret == -1 {
        return None;
    }
    Some(ws)
}

/// Pushes a window size onto a pty master so the slave side sees the resize.
pub fn set_winsize<Fd: AsRawFd>(fd: &Fd, ws: &Winsize) -> nix::Result<()> {
    let ret = unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCSWINSZ, ws) };
    if ret == -1 {
        return Err(Errno::last());
    }
    Ok(())
}
