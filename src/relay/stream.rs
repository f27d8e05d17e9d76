//! Per-stream lifecycle: dial, pumps, credit, close
//!
//! A stream moves through DIALING -> OPEN -> CLOSED, with CLOSED also
//! reachable straight from DIALING on policy rejection or dial failure.
//! Three tasks cooperate per stream: the dial task (runs once), the
//! inbound pump draining the bounded queue into the egress socket, and
//! the read pump feeding egress bytes back to the carrier through a
//! serializer task.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use super::connection::ConnectionCore;
use super::packet::{CloseReason, ConnectRequest, StreamKind};
use crate::transport::{self, EgressReader, EgressWriter};

pub(crate) struct Stream {
    id: u32,
    core: Arc<ConnectionCore>,
    /// False once the stream has begun closing. Guarded separately from
    /// the connection's table lock; the two are never held together.
    open: RwLock<bool>,
    /// Signalled exactly once, when the dial attempt concludes either way.
    dial_done: watch::Sender<bool>,
    /// Signalled on close to promptly unblock both pumps.
    closed: watch::Sender<bool>,
    /// Producer side of the inbound queue; dropped on close so the pump
    /// drains out.
    queue_tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    /// Consumer side, taken once by the inbound pump.
    queue_rx: Mutex<Option<mpsc::Receiver<Bytes>>>,
    /// Egress write half, deposited by the dial task for the inbound pump.
    writer: Mutex<Option<EgressWriter>>,
}

impl Stream {
    pub(crate) fn new(id: u32, core: Arc<ConnectionCore>) -> Arc<Self> {
        let capacity = core.config.buffer_remaining_length.max(1) as usize;
        let (queue_tx, queue_rx) = mpsc::channel(capacity);
        let (dial_done, _) = watch::channel(false);
        let (closed, _) = watch::channel(false);

        Arc::new(Self {
            id,
            core,
            open: RwLock::new(true),
            dial_done,
            closed,
            queue_tx: Mutex::new(Some(queue_tx)),
            queue_rx: Mutex::new(Some(queue_rx)),
            writer: Mutex::new(None),
        })
    }

    /// Launch the dial task and the inbound pump. The pump starts right
    /// away but writes nothing until the dial concludes.
    pub(crate) fn start(self: &Arc<Self>, request: ConnectRequest) {
        tokio::spawn(self.clone().run_dial(request));
        tokio::spawn(self.clone().run_inbound_pump());
    }

    /// Enqueue an inbound DATA payload for the egress socket.
    ///
    /// Never blocks: a full queue means the peer overran its credit, and
    /// the payload is dropped rather than stalling the demux task.
    pub(crate) fn enqueue(&self, payload: Bytes) {
        let open = self.open.read();
        if !*open {
            return;
        }
        if let Some(tx) = self.queue_tx.lock().as_ref() {
            if tx.try_send(payload).is_err() {
                trace!(stream_id = self.id, "inbound queue full, dropping payload");
            }
        }
    }

    /// The single idempotent terminator.
    ///
    /// Table removal precedes socket and queue teardown so no new DATA
    /// can be routed at a socket that is about to disappear.
    pub(crate) async fn close(&self, reason: CloseReason) {
        {
            let mut open = self.open.write();
            if !*open {
                return;
            }
            *open = false;
        }

        self.dial_done.send_replace(true);
        self.core.remove_stream(self.id);
        self.closed.send_replace(true);
        *self.queue_tx.lock() = None;

        debug!(stream_id = self.id, ?reason, "stream closed");
        self.core.send_close(self.id, reason).await;
    }

    async fn run_dial(self: Arc<Self>, request: ConnectRequest) {
        match self.dial(&request).await {
            Ok((reader, writer)) => {
                *self.writer.lock() = Some(writer);
                self.dial_done.send_replace(true);
                debug!(
                    stream_id = self.id,
                    destination = %request.destination(),
                    "stream open"
                );
                tokio::spawn(self.clone().run_read_pump(reader));
            }
            Err(reason) => {
                debug!(stream_id = self.id, ?reason, "dial rejected");
                self.close(reason).await;
            }
        }
    }

    /// Policy checks, optional DNS override, then the transport dial.
    ///
    /// The override resolution only gates the stream: the dial below
    /// always targets the original hostname so SNI and virtual hosting
    /// keep working at the egress.
    async fn dial(
        &self,
        request: &ConnectRequest,
    ) -> Result<(EgressReader, EgressWriter), CloseReason> {
        let policy = &self.core.policy;
        let hostname = request.hostname.as_str();

        if policy.is_blacklisted(hostname) {
            return Err(CloseReason::Blocked);
        }

        if let Some(server) = policy.dns_override() {
            if !policy.is_whitelisted(hostname) {
                let resolved = match transport::resolve(server, hostname).await {
                    Ok(ips) => ips[0],
                    Err(e) => {
                        debug!(stream_id = self.id, hostname, error = %e, "resolution failed");
                        return Err(CloseReason::Unreachable);
                    }
                };
                if resolved.is_unspecified() {
                    return Err(CloseReason::Blocked);
                }
            }
        }

        let destination = request.destination();
        let no_delay = self.core.config.tcp_no_delay;

        match StreamKind::try_from(request.kind) {
            Ok(StreamKind::Tcp) => {
                if let Some(proxy) = policy.socks_proxy() {
                    let stream = transport::socks5_connect(proxy, hostname, request.port)
                        .await
                        .map_err(|e| {
                            debug!(stream_id = self.id, error = %e, "proxy dial failed");
                            CloseReason::NetworkError
                        })?;
                    let _ = stream.set_nodelay(no_delay);
                    Ok(transport::split_tcp(stream))
                } else {
                    transport::dial_tcp(&destination, no_delay).await.map_err(|e| {
                        debug!(stream_id = self.id, error = %e, "tcp dial failed");
                        CloseReason::NetworkError
                    })
                }
            }
            Ok(StreamKind::Udp) => {
                if !policy.udp_allowed() {
                    return Err(CloseReason::Blocked);
                }
                transport::dial_udp(&destination).await.map_err(|e| {
                    debug!(stream_id = self.id, error = %e, "udp dial failed");
                    CloseReason::NetworkError
                })
            }
            Err(_) => Err(CloseReason::InvalidInfo),
        }
    }

    /// Drain the inbound queue into the egress socket.
    ///
    /// For TCP every write consumes one credit; when credits run out a
    /// CONTINUE refresh is emitted before the next queue item is taken.
    async fn run_inbound_pump(self: Arc<Self>) {
        let mut dial_done = self.dial_done.subscribe();
        if dial_done.wait_for(|done| *done).await.is_err() {
            return;
        }
        if !*self.open.read() {
            return;
        }

        let mut queue = match self.queue_rx.lock().take() {
            Some(rx) => rx,
            None => return,
        };
        let mut writer = match self.writer.lock().take() {
            Some(writer) => writer,
            None => return,
        };

        let mut closed = self.closed.subscribe();
        let refresh = self.core.config.buffer_remaining_length;
        let mut credit = refresh;

        loop {
            let data = tokio::select! {
                _ = closed.wait_for(|c| *c) => break,
                item = queue.recv() => match item {
                    Some(data) => data,
                    None => break,
                },
            };

            let written = tokio::select! {
                _ = closed.wait_for(|c| *c) => break,
                result = writer.write_all(&data) => result,
            };
            if let Err(e) = written {
                debug!(stream_id = self.id, error = %e, "egress write failed");
                self.close(CloseReason::NetworkError).await;
                return;
            }

            if writer.is_stream() && refresh > 0 {
                credit -= 1;
                if credit == 0 {
                    credit = refresh;
                    self.core.send_continue(self.id, credit).await;
                }
            }
        }
    }

    /// Read egress bytes and emit them as DATA frames.
    ///
    /// Two owned buffers recycle through the serializer so the next read
    /// can start while the previous slice is still being framed; at most
    /// two slices are ever in flight and emission is strictly FIFO.
    async fn run_read_pump(self: Arc<Self>, mut reader: EgressReader) {
        let buffer_size = self.core.config.tcp_buffer_size.max(1);

        let (filled_tx, filled_rx) = mpsc::channel::<(Vec<u8>, usize)>(2);
        let (recycle_tx, mut recycle_rx) = mpsc::channel::<Vec<u8>>(2);
        for _ in 0..2 {
            let _ = recycle_tx.try_send(vec![0u8; buffer_size]);
        }
        let serializer = tokio::spawn(self.clone().run_serializer(filled_rx, recycle_tx));

        let mut closed = self.closed.subscribe();
        let mut reason = None;

        loop {
            let mut buf = tokio::select! {
                _ = closed.wait_for(|c| *c) => break,
                slab = recycle_rx.recv() => match slab {
                    Some(buf) => buf,
                    None => break,
                },
            };

            let read = tokio::select! {
                _ = closed.wait_for(|c| *c) => break,
                result = reader.read(&mut buf) => result,
            };

            match read {
                // zero bytes is EOF on TCP; on UDP it is an empty datagram
                Ok(0) if reader.is_stream() => {
                    reason = Some(CloseReason::Voluntary);
                    break;
                }
                Ok(n) => {
                    if filled_tx.send((buf, n)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(stream_id = self.id, error = %e, "egress read failed");
                    reason = Some(CloseReason::NetworkError);
                    break;
                }
            }
        }

        // drain the serializer first so no DATA trails the CLOSE frame
        drop(filled_tx);
        let _ = serializer.await;

        if let Some(reason) = reason {
            self.close(reason).await;
        }
    }

    async fn run_serializer(
        self: Arc<Self>,
        mut filled: mpsc::Receiver<(Vec<u8>, usize)>,
        recycle: mpsc::Sender<Vec<u8>>,
    ) {
        while let Some((buf, n)) = filled.recv().await {
            let open = *self.open.read();
            if open {
                self.core.send_data(self.id, &buf[..n]).await;
            }
            if recycle.send(buf).await.is_err() {
                break;
            }
        }
    }
}
