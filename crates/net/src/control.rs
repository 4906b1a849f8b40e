// Copyright 2025-2026 CEMAXECUTER LLC

//! Control channel: a paired message socket accepting configuration
//! strings.
//!
//! zmq PAIR over TCP gives exactly the contract: one peer per endpoint,
//! full duplex, message boundaries preserved. Each received message is a
//! UTF-8 configuration string; the reply carries the per-key outcomes in
//! request order. The receive loop polls with a 100 ms timeout so the stop
//! flag is observed with bounded latency.

use std::sync::atomic::{AtomicBool, Ordering};

/// Messages larger than this are rejected without parsing.
pub const MAX_MESSAGE_BYTES: usize = 4096;

pub struct ControlServer {
    socket: zmq::Socket,
    _ctx: zmq::Context,
}

impl ControlServer {
    /// Bind the control endpoint on all interfaces.
    pub fn bind(port: u16) -> Result<Self, String> {
        Self::bind_endpoint(&format!("tcp://*:{}", port))
    }

    pub fn bind_endpoint(endpoint: &str) -> Result<Self, String> {
        let ctx = zmq::Context::new();
        let socket = ctx
            .socket(zmq::PAIR)
            .map_err(|e| format!("zmq PAIR socket: {}", e))?;
        socket
            .bind(endpoint)
            .map_err(|e| format!("zmq bind {}: {}", endpoint, e))?;
        log::info!("control channel listening on {}", endpoint);
        Ok(Self { socket, _ctx: ctx })
    }

    /// Endpoint actually bound (useful with wildcard ports).
    pub fn endpoint(&self) -> Option<String> {
        self.socket.get_last_endpoint().ok().and_then(|e| e.ok())
    }

    /// Serve until `running` drops. `handler` maps each configuration
    /// string to its reply. Call from a dedicated thread.
    pub fn run(&self, running: &AtomicBool, mut handler: impl FnMut(&str) -> String) {
        while running.load(Ordering::SeqCst) {
            match self.socket.poll(zmq::POLLIN, 100) {
                Ok(0) => continue,
                Ok(_) => {}
                Err(e) => {
                    log::error!("control channel poll: {}", e);
                    break;
                }
            }
            let msg = match self.socket.recv_bytes(0) {
                Ok(msg) => msg,
                Err(e) => {
                    log::error!("control channel receive: {}", e);
                    continue;
                }
            };

            let reply = if msg.len() > MAX_MESSAGE_BYTES {
                log::warn!("control message of {} bytes rejected", msg.len());
                "error=rejected:oversize".to_string()
            } else {
                match std::str::from_utf8(&msg) {
                    Ok(text) => handler(text.trim()),
                    Err(_) => {
                        log::warn!("control message is not UTF-8");
                        "error=rejected:utf8".to_string()
                    }
                }
            };

            if let Err(e) = self.socket.send(&reply, 0) {
                log::error!("control channel reply: {}", e);
            }
        }
    }
}
