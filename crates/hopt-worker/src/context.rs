//! The worker's process-global registration state: the communication
//! server's address and this job's id, learned once at startup from
//! `register()` and consulted by every later wire send. A `OnceLock` gives
//! a "write once at startup, read everywhere after" shape without a
//! mutable global.

use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::OnceLock;

static CONTEXT: OnceLock<WorkerContext> = OnceLock::new();

#[derive(Clone, Copy, Debug)]
pub struct WorkerContext {
    pub server_addr: SocketAddr,
    pub job_id: u64,
    pub start_time: DateTime<Utc>,
}

impl WorkerContext {
    /// Sets the process-global context. Returns an error if called more
    /// than once; a worker process registers exactly one job.
    pub fn init(server_addr: SocketAddr, job_id: u64, start_time: DateTime<Utc>) -> Result<(), WorkerContext> {
        CONTEXT.set(WorkerContext {
            server_addr,
            job_id,
            start_time,
        })
    }

    pub fn get() -> Option<&'static WorkerContext> {
        CONTEXT.get()
    }

    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now() - self.start_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // `CONTEXT` is a process-global `OnceLock`; only one test in the whole
    // binary may call `init`, so this is the sole test exercising it.
    #[test]
    fn init_then_get_round_trips_and_rejects_a_second_call() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let now = Utc::now();
        assert!(WorkerContext::init(addr, 42, now).is_ok());
        let ctx = WorkerContext::get().expect("context was just initialized");
        assert_eq!(ctx.job_id, 42);
        assert_eq!(ctx.server_addr, addr);

        let second = WorkerContext::init(addr, 7, now);
        assert!(second.is_err());
        assert_eq!(WorkerContext::get().unwrap().job_id, 42);
    }
}
