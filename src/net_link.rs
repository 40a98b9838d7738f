//! Network side of the client: the audio channel (jitter buffer, connection
//! state, addressing) and the UDP transport that moves its packets.
//!
//! Datagram layout: `[timestamp_idx: u8][samples: i16 LE ...]`, one mono
//! network block per datagram.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::config::CONNECTION_TIMEOUT_BLOCKS;

/// Packets queued between the audio thread and the socket task.
const SEND_QUEUE_LEN: usize = 64;

/// Per-block view of the connection to the server, as used by the audio loop.
///
/// All calls return immediately; `get_data` never waits for the network.
pub trait NetworkChannel: Send + Sync {
    fn set_address(&self, addr: SocketAddr);

    /// Server address, `None` until one is configured.
    fn address(&self) -> Option<SocketAddr>;

    fn is_connected(&self) -> bool;

    /// Next value of the per-channel packet timestamp counter.
    fn timestamp_idx(&self) -> u8;

    /// Encode one mono network block.
    fn prep_send_packet(&self, block: &[i16]) -> Bytes;

    /// Take the next received block. Returns `false` when nothing is
    /// buffered, in which case `out` is left as it was.
    fn get_data(&self, out: &mut [f64]) -> bool;
}

/// Fire-and-forget packet output.
pub trait PacketSender: Send + Sync {
    fn send_packet(&self, packet: Bytes, addr: SocketAddr, timestamp_idx: u8);
}

struct ChannelState {
    address: Option<SocketAddr>,
    jitter_buffer: VecDeque<Vec<i16>>,
    con_timeout: u32,
}

/// The client's audio channel to the server.
pub struct Channel {
    state: Mutex<ChannelState>,
    block_size: usize,
    capacity: usize,
    timestamp: AtomicU8,
}

impl Channel {
    /// `block_size` samples per network block, at most `capacity` blocks buffered.
    pub fn new(block_size: usize, capacity: usize) -> Self {
        Self {
            state: Mutex::new(ChannelState {
                address: None,
                jitter_buffer: VecDeque::with_capacity(capacity),
                con_timeout: 0,
            }),
            block_size,
            capacity: capacity.max(1),
            timestamp: AtomicU8::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        // a panic while holding the lock leaves plain data behind, keep going
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Feed one received datagram. Returns whether it was accepted.
    ///
    /// Datagrams from anything but the server, or of the wrong size, are dropped.
    pub fn put_data(&self, datagram: &[u8], from: SocketAddr) -> bool {
        let Some(samples) = parse_datagram(datagram, self.block_size) else {
            log::trace!("Dropping malformed datagram of {} bytes from {}", datagram.len(), from);
            return false;
        };

        let mut state = self.lock();
        if state.address != Some(from) {
            log::trace!("Dropping datagram from unknown peer {}", from);
            return false;
        }
        if state.jitter_buffer.len() >= self.capacity {
            state.jitter_buffer.pop_front();
        }
        state.jitter_buffer.push_back(samples);
        state.con_timeout = CONNECTION_TIMEOUT_BLOCKS;
        true
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

impl NetworkChannel for Channel {
    fn set_address(&self, addr: SocketAddr) {
        let mut state = self.lock();
        if state.address != Some(addr) {
            // blocks from the previous server are stale
            state.jitter_buffer.clear();
            state.con_timeout = 0;
        }
        state.address = Some(addr);
    }

    fn address(&self) -> Option<SocketAddr> {
        self.lock().address
    }

    fn is_connected(&self) -> bool {
        self.lock().con_timeout > 0
    }

    fn timestamp_idx(&self) -> u8 {
        self.timestamp.fetch_add(1, Ordering::Relaxed)
    }

    fn prep_send_packet(&self, block: &[i16]) -> Bytes {
        let mut buf = BytesMut::with_capacity(block.len() * 2);
        for &s in block {
            buf.put_i16_le(s);
        }
        buf.freeze()
    }

    fn get_data(&self, out: &mut [f64]) -> bool {
        let mut state = self.lock();
        state.con_timeout = state.con_timeout.saturating_sub(1);

        match state.jitter_buffer.pop_front() {
            Some(block) => {
                for (dst, &s) in out.iter_mut().zip(&block) {
                    *dst = s as f64;
                }
                true
            }
            None => false,
        }
    }
}

/// Prefix an encoded block with its timestamp index.
pub fn frame_datagram(packet: &[u8], timestamp_idx: u8) -> Bytes {
    let mut buf = BytesMut::with_capacity(packet.len() + 1);
    buf.put_u8(timestamp_idx);
    buf.put_slice(packet);
    buf.freeze()
}

fn parse_datagram(datagram: &[u8], block_size: usize) -> Option<Vec<i16>> {
    if datagram.len() != 1 + block_size * 2 {
        return None;
    }
    let mut buf = &datagram[1..];
    let mut samples = Vec::with_capacity(block_size);
    while buf.has_remaining() {
        samples.push(buf.get_i16_le());
    }
    Some(samples)
}

/// Audio-thread side of the UDP transport.
///
/// Packets are handed to the socket task with `try_send`; if the queue is
/// full the packet is dropped rather than stalling the audio thread.
pub struct UdpSender {
    tx: mpsc::Sender<(Bytes, SocketAddr)>,
}

impl PacketSender for UdpSender {
    fn send_packet(&self, packet: Bytes, addr: SocketAddr, timestamp_idx: u8) {
        let datagram = frame_datagram(&packet, timestamp_idx);
        if let Err(e) = self.tx.try_send((datagram, addr)) {
            log::trace!("Dropping outgoing packet: {}", e);
        }
    }
}

/// Socket task: sends queued packets and feeds received ones into the channel.
pub struct NetLink {
    socket: UdpSocket,
    channel: Arc<Channel>,
    rx: mpsc::Receiver<(Bytes, SocketAddr)>,
}

impl NetLink {
    /// Bind the client socket (`local_port` 0 picks an ephemeral port).
    pub async fn bind(local_port: u16, channel: Arc<Channel>) -> Result<(Self, UdpSender)> {
        let socket = UdpSocket::bind(("0.0.0.0", local_port))
            .await
            .with_context(|| format!("Failed to bind audio socket on port {}", local_port))?;

        let (tx, rx) = mpsc::channel(SEND_QUEUE_LEN);
        Ok((
            Self {
                socket,
                channel,
                rx,
            },
            UdpSender { tx },
        ))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Run until every [`UdpSender`] has been dropped.
    pub async fn run(mut self) {
        let mut buf = vec![0u8; 1 + self.channel.block_size() * 2 + 64];
        loop {
            tokio::select! {
                res = self.socket.recv_from(&mut buf) => {
                    match res {
                        Ok((len, from)) => {
                            self.channel.put_data(&buf[..len], from);
                        }
                        // ICMP port unreachable and friends while the server is down
                        Err(e) => log::debug!("Audio socket receive error: {}", e),
                    }
                }
                cmd = self.rx.recv() => {
                    match cmd {
                        Some((datagram, addr)) => {
                            if let Err(e) = self.socket.send_to(&datagram, addr).await {
                                log::debug!("Audio socket send error: {}", e);
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        log::info!("Audio socket closed");
    }
}
