// Copyright 2025-2026 CEMAXECUTER LLC

//! UDP datagram sink and source for 512-byte block datagrams.
//!
//! The sink paces: it sleeps the configured delay after every datagram and
//! never retries; datagram loss is the erasure code's problem. The source
//! runs its own reader thread so the worker can poll with a bounded wait
//! and still observe the stop flag promptly.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, TrySendError};

use iql_protocol::BLOCK_BYTES;

/// Paced datagram sender.
pub struct UdpSink {
    socket: UdpSocket,
    dest: SocketAddr,
}

impl UdpSink {
    pub fn connect(address: &str, port: u16) -> Result<Self, String> {
        let dest = (address, port)
            .to_socket_addrs()
            .map_err(|e| format!("cannot resolve {}:{}: {}", address, port, e))?
            .next()
            .ok_or_else(|| format!("cannot resolve {}:{}", address, port))?;
        let socket = UdpSocket::bind("0.0.0.0:0")
            .map_err(|e| format!("cannot create UDP socket: {}", e))?;
        Ok(Self { socket, dest })
    }

    /// Send each datagram and sleep `tx_delay_us` after it. The delay is a
    /// floor; the OS may stretch it.
    pub fn write(&self, datagrams: &[Vec<u8>], tx_delay_us: u32) -> io::Result<()> {
        for dgram in datagrams {
            self.socket.send_to(dgram, self.dest)?;
            if tx_delay_us > 0 {
                std::thread::sleep(Duration::from_micros(tx_delay_us as u64));
            }
        }
        Ok(())
    }
}

/// Receiving side: binds the data port and hands out exact-size datagrams.
pub struct UdpSource {
    rx: Receiver<Vec<u8>>,
    port: u16,
    rejected: Arc<AtomicU64>,
    overrun: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl UdpSource {
    /// Bind and start the reader thread. Datagrams whose length is not
    /// exactly 512 bytes are dropped with a counter increment.
    pub fn bind(address: &str, port: u16, stop: Arc<AtomicBool>) -> Result<Self, String> {
        let socket = UdpSocket::bind((address, port))
            .map_err(|e| format!("cannot bind {}:{}: {}", address, port, e))?;
        let bound_port = socket
            .local_addr()
            .map_err(|e| format!("local_addr: {}", e))?
            .port();
        socket
            .set_read_timeout(Some(Duration::from_millis(100)))
            .map_err(|e| format!("set_read_timeout: {}", e))?;

        let (tx, rx) = bounded::<Vec<u8>>(1024);
        let rejected = Arc::new(AtomicU64::new(0));
        let overrun = Arc::new(AtomicU64::new(0));
        let rejected_w = rejected.clone();
        let overrun_w = overrun.clone();

        let worker = std::thread::spawn(move || {
            let mut buf = [0u8; 2 * BLOCK_BYTES];
            while !stop.load(Ordering::SeqCst) {
                match socket.recv_from(&mut buf) {
                    Ok((len, _)) if len == BLOCK_BYTES => {
                        match tx.try_send(buf[..len].to_vec()) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                // consumer is behind; the datagram is lost to
                                // the same fate as network loss
                                overrun_w.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(TrySendError::Disconnected(_)) => break,
                        }
                    }
                    Ok(_) => {
                        rejected_w.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e)
                        if e.kind() == io::ErrorKind::WouldBlock
                            || e.kind() == io::ErrorKind::TimedOut => {}
                    Err(e) => {
                        log::error!("UDP receive error: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            rx,
            port: bound_port,
            rejected,
            overrun,
            worker: Some(worker),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait up to `timeout` for the next datagram. None on timeout or once
    /// the reader has shut down.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        match self.rx.recv_timeout(timeout) {
            Ok(dgram) => Some(dgram),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Datagrams dropped for having the wrong length.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Datagrams dropped because the worker fell behind.
    pub fn overrun(&self) -> u64 {
        self.overrun.load(Ordering::Relaxed)
    }

    pub fn join(mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_sink_to_source_roundtrip() {
        let stop = Arc::new(AtomicBool::new(false));
        let source = UdpSource::bind("127.0.0.1", 0, stop.clone()).unwrap();
        let sink = UdpSink::connect("127.0.0.1", source.port()).unwrap();

        let mut dgram = vec![0u8; BLOCK_BYTES];
        dgram[0] = 42;
        sink.write(&[dgram.clone()], 0).unwrap();

        let got = source
            .recv_timeout(Duration::from_secs(2))
            .expect("datagram not delivered");
        assert_eq!(got, dgram);
        stop.store(true, Ordering::SeqCst);
        source.join();
    }

    #[test]
    fn test_source_rejects_wrong_length() {
        let stop = Arc::new(AtomicBool::new(false));
        let source = UdpSource::bind("127.0.0.1", 0, stop.clone()).unwrap();
        let sink = UdpSink::connect("127.0.0.1", source.port()).unwrap();

        sink.write(&[vec![0u8; 100]], 0).unwrap();
        let mut good = vec![0u8; BLOCK_BYTES];
        good[1] = 7;
        sink.write(&[good.clone()], 0).unwrap();

        // only the valid datagram comes through
        let got = source.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(got, good);
        assert_eq!(source.rejected(), 1);
        stop.store(true, Ordering::SeqCst);
        source.join();
    }

    #[test]
    fn test_sink_pacing_floor() {
        let stop = Arc::new(AtomicBool::new(false));
        let source = UdpSource::bind("127.0.0.1", 0, stop.clone()).unwrap();
        let sink = UdpSink::connect("127.0.0.1", source.port()).unwrap();

        let datagrams: Vec<Vec<u8>> = (0..5).map(|_| vec![0u8; BLOCK_BYTES]).collect();
        let begin = Instant::now();
        sink.write(&datagrams, 2000).unwrap();
        // 5 sends with a 2 ms floor each
        assert!(begin.elapsed() >= Duration::from_millis(10));
        stop.store(true, Ordering::SeqCst);
        source.join();
    }
}
