//! The UDP communication server: binds an ephemeral port on the host's own
//! outward-facing IP, runs a dedicated receiver thread, and forwards
//! decoded messages to the control loop over a channel instead of sharing a
//! mutex. The receiver thread never touches `Job` state directly — it only
//! decodes and hands off, so the control loop is the sole mutator of the
//! job table.

use hopt_base::wire::WireDecodeError;
use hopt_base::WireMessage;
use hopt_util::net::{discover_own_ip, recv_wire_message};
use std::net::{SocketAddr, UdpSocket};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// A message the receiver thread forwards to the control loop, or a note
/// that a datagram didn't decode — a protocol violation: logged and
/// dropped, no state change. The control loop does the logging since it
/// holds the logger.
pub enum Inbound {
    Message(WireMessage),
    Undecodable(WireDecodeError),
}

/// Connection info handed to every submitted job so it can find this
/// server.
#[derive(Clone, Copy, Debug)]
pub struct ConnectionInfo {
    pub addr: SocketAddr,
}

pub struct CommServer {
    connection_info: ConnectionInfo,
    receiver: Receiver<Inbound>,
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
}

impl CommServer {
    /// Binds the socket, spawns the receiver thread, and returns once the
    /// socket is live (so `connection_info` is always valid on return).
    pub fn start() -> std::io::Result<Self> {
        let ip = discover_own_ip();
        let socket = UdpSocket::bind((ip, 0))?;
        socket.set_read_timeout(Some(Duration::from_millis(200)))?;
        let addr = socket.local_addr()?;

        let (tx, rx) = mpsc::channel();
        let shutdown = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let thread_shutdown = shutdown.clone();
        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 65536];
            while !thread_shutdown.load(std::sync::atomic::Ordering::Relaxed) {
                match recv_wire_message(&socket, &mut buf) {
                    Ok((_from, Ok(msg))) => {
                        if tx.send(Inbound::Message(msg)).is_err() {
                            break;
                        }
                    }
                    Ok((_from, Err(e))) => {
                        if tx.send(Inbound::Undecodable(e)).is_err() {
                            break;
                        }
                    }
                    Err(e)
                        if e.kind() == std::io::ErrorKind::WouldBlock
                            || e.kind() == std::io::ErrorKind::TimedOut => {}
                    Err(_) => break,
                }
            }
        });

        Ok(CommServer {
            connection_info: ConnectionInfo { addr },
            receiver: rx,
            handle: Some(handle),
            shutdown,
        })
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        self.connection_info
    }

    /// Drains every message queued since the last call, non-blocking. Each
    /// control-loop tick calls this once; the loop never blocks on the comm
    /// server.
    pub fn drain(&self) -> Vec<Inbound> {
        let mut out = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(msg) => out.push(msg),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }

    /// Clears the comm server's view of prior jobs at an iteration
    /// boundary. Since this server holds no per-job state of its own (the
    /// control loop owns the job table), this only drains any messages
    /// still queued for jobs already retired this iteration.
    pub fn clear_job_table(&self) {
        let _ = self.drain();
    }
}

impl Drop for CommServer {
    fn drop(&mut self) {
        self.shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopt_util::net::send_wire_message;

    #[test]
    fn start_binds_a_live_socket_and_publishes_connection_info() {
        let server = CommServer::start().unwrap();
        assert!(server.connection_info().addr.port() > 0);
    }

    #[test]
    fn drain_forwards_a_sent_message() {
        let server = CommServer::start().unwrap();
        let addr = server.connection_info().addr;
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        send_wire_message(&client, addr, &WireMessage::JobStarted { job_id: 3 }).unwrap();

        let mut seen = Vec::new();
        for _ in 0..25 {
            for inbound in server.drain() {
                if let Inbound::Message(msg) = inbound {
                    seen.push(msg);
                }
            }
            if !seen.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(seen.len(), 1);
        assert!(matches!(seen[0], WireMessage::JobStarted { job_id: 3 }));
    }

    #[test]
    fn drain_reports_undecodable_datagrams_without_state_change() {
        let server = CommServer::start().unwrap();
        let addr = server.connection_info().addr;
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.send_to(&[99u8, 1, 2, 3], addr).unwrap();

        let mut saw_undecodable = false;
        for _ in 0..25 {
            for inbound in server.drain() {
                if matches!(inbound, Inbound::Undecodable(_)) {
                    saw_undecodable = true;
                }
            }
            if saw_undecodable {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(saw_undecodable);
    }
}
