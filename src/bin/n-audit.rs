use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

// The supervisor wraps the working shell as the container's init, so the
// shell itself can never cancel it; this companion delivers the seal signal
// from inside the session.
fn main() {
    match kill(Pid::from_raw(1), Signal::SIGUSR1) {
        Ok(()) => {
            println!("[n-audit] Seal signal (SIGUSR1) sent to PID 1. The session will now terminate.");
        }
        Err(e) => {
            eprintln!("[n-audit] Error: failed to signal PID 1: {e}");
            eprintln!("[n-audit] Hint: run this inside the sentinel container; signalling init needs permission.");
            std::process::exit(1);
        }
    }
}
