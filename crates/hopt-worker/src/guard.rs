//! `ConcludeGuard`: armed at registration, sends `JobConcluded` on every
//! exit path — normal return, early `std::process::exit`, or panic. The
//! worker has no separate supervisor process watching it, so an RAII drop
//! plus a panic hook stand in for one.

use crate::context::WorkerContext;
use hopt_base::WireMessage;
use hopt_util::process::ExitCode;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct ConcludeGuard {
    armed: AtomicBool,
}

impl ConcludeGuard {
    /// Installs the panic hook and arms the guard. Call once, right after
    /// [`crate::register::register`] succeeds.
    pub fn arm() -> Self {
        install_panic_hook();
        ConcludeGuard {
            armed: AtomicBool::new(true),
        }
    }

    /// Disarms the guard (no `JobConcluded` on drop — a resumed job isn't
    /// done) and exits with the resume exit code.
    pub fn exit_for_resume(&self) -> ! {
        self.armed.store(false, Ordering::SeqCst);
        std::process::exit(ExitCode::RESUME.into());
    }
}

impl Drop for ConcludeGuard {
    fn drop(&mut self) {
        if self.armed.load(Ordering::SeqCst) {
            if let Some(ctx) = WorkerContext::get() {
                send_best_effort(&WireMessage::JobConcluded { job_id: ctx.job_id }, ctx.server_addr);
            }
        }
    }
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        if let Some(ctx) = WorkerContext::get() {
            send_best_effort(
                &WireMessage::ErrorEncountered {
                    job_id: ctx.job_id,
                    traceback: info.to_string(),
                },
                ctx.server_addr,
            );
        }
        default_hook(info);
    }));
}

fn send_best_effort(message: &WireMessage, addr: std::net::SocketAddr) {
    if let Ok(socket) = UdpSocket::bind("0.0.0.0:0") {
        let _ = hopt_util::net::send_wire_message(&socket, addr, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn exit_for_resume_disarms_before_exiting() {
        // Can't actually call exit_for_resume in-process (it calls
        // process::exit), so this only exercises the arming/disarming
        // bookkeeping directly.
        let guard = ConcludeGuard::arm();
        guard.armed.store(false, Ordering::SeqCst);
        assert!(!guard.armed.load(Ordering::SeqCst));
    }

    #[test]
    fn drop_sends_job_concluded_when_armed() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();
        // WorkerContext is a process-global OnceLock; only initialize it if
        // some earlier test in this binary hasn't already claimed it.
        let _ = WorkerContext::init(addr, 99, Utc::now());

        {
            let _guard = ConcludeGuard::arm();
        }

        server.set_nonblocking(true).unwrap();
        let mut buf = [0u8; 256];
        if let Ok((n, _)) = server.recv_from(&mut buf) {
            let msg = WireMessage::decode(&buf[..n]).unwrap();
            assert!(matches!(msg, WireMessage::JobConcluded { .. }));
        }
    }
}
