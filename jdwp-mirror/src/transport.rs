// JDWP transaction channel
//
// Frames outgoing command packets, matches incoming reply packets to pending
// requests by request id, and forwards event packets. Concurrent callers may
// have multiple requests in flight; replies are demultiplexed by id, not by
// call order. On connection loss every pending and future request fails with
// a channel error - the remote VM is assumed gone, no retry is attempted.

use crate::events::{parse_event_packet, EventSet};
use crate::protocol::{CommandPacket, JdwpError, JdwpResult, ReplyPacket, HEADER_SIZE, REPLY_FLAG};
use bytes::BytesMut;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Maximum allowed JDWP packet size (10MB)
/// This prevents memory exhaustion from malicious or buggy VMs
const MAX_PACKET_SIZE: usize = 10 * 1024 * 1024;

/// Connection tunables.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    pub handshake_timeout: Duration,
    pub command_channel_size: usize,
    pub event_channel_size: usize,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            command_channel_size: 32,
            // Larger buffer for events to avoid loss under load
            event_channel_size: 256,
        }
    }
}

/// Request to send a command and get a reply
pub(crate) struct CommandRequest {
    pub packet: CommandPacket,
    pub reply_tx: oneshot::Sender<JdwpResult<ReplyPacket>>,
}

/// Handle to the transport task for sending commands and receiving events
#[derive(Clone, Debug)]
pub(crate) struct TransportHandle {
    command_tx: mpsc::Sender<CommandRequest>,
    event_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<EventSet>>>,
}

impl TransportHandle {
    /// Send a command and wait for the matching reply.
    pub async fn send_command(&self, packet: CommandPacket) -> JdwpResult<ReplyPacket> {
        let (reply_tx, reply_rx) = oneshot::channel();

        let request = CommandRequest { packet, reply_tx };

        self.command_tx
            .send(request)
            .await
            .map_err(|_| JdwpError::ConnectionClosed)?;

        reply_rx.await.map_err(|_| JdwpError::ConnectionClosed)?
    }

    /// Try to receive an event (non-blocking)
    pub async fn try_recv_event(&self) -> Option<EventSet> {
        let mut rx = self.event_rx.lock().await;
        rx.try_recv().ok()
    }

    /// Wait for the next event
    pub async fn recv_event(&self) -> Option<EventSet> {
        let mut rx = self.event_rx.lock().await;
        rx.recv().await
    }
}

/// Start the transport task over a split byte stream.
pub(crate) fn spawn_transport<R, W>(reader: R, writer: W, config: &ConnectConfig) -> TransportHandle
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (command_tx, command_rx) = mpsc::channel(config.command_channel_size);
    let (event_tx, event_rx) = mpsc::channel(config.event_channel_size);

    tokio::spawn(transport_task(reader, writer, command_rx, event_tx));

    TransportHandle {
        command_tx,
        event_rx: Arc::new(tokio::sync::Mutex::new(event_rx)),
    }
}

async fn transport_task<R, W>(
    mut reader: R,
    mut writer: W,
    mut command_rx: mpsc::Receiver<CommandRequest>,
    event_tx: mpsc::Sender<EventSet>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    debug!("Transport task started");

    let mut pending_replies: HashMap<u32, oneshot::Sender<JdwpResult<ReplyPacket>>> =
        HashMap::new();

    loop {
        tokio::select! {
            // Handle outgoing commands
            request = command_rx.recv() => {
                let Some(cmd) = request else {
                    // All senders dropped: the connection handle is gone.
                    break;
                };
                let packet_id = cmd.packet.id;
                debug!("Sending command id={}", packet_id);

                let encoded = cmd.packet.encode();
                if let Err(e) = write_all_flush(&mut writer, &encoded).await {
                    error!("Failed to write command: {}", e);
                    cmd.reply_tx.send(Err(JdwpError::Io(e))).ok();
                    break;
                }

                pending_replies.insert(packet_id, cmd.reply_tx);
            }

            // Handle incoming packets
            result = read_packet(&mut reader) => {
                match result {
                    Ok((is_reply, packet_id, data)) => {
                        if is_reply {
                            debug!("Received reply id={}", packet_id);

                            if let Some(tx) = pending_replies.remove(&packet_id) {
                                match ReplyPacket::decode(&data) {
                                    Ok(reply) => {
                                        tx.send(Ok(reply)).ok();
                                    }
                                    Err(e) => {
                                        warn!("Failed to decode reply: {}", e);
                                        tx.send(Err(e)).ok();
                                    }
                                }
                            } else {
                                warn!("Received reply for unknown command id={}", packet_id);
                            }
                        } else {
                            // Event packet: data starts after the 11-byte header
                            let event_data = &data[HEADER_SIZE..];

                            match parse_event_packet(event_data) {
                                Ok(event_set) => {
                                    match event_tx.try_send(event_set) {
                                        Ok(()) => {}
                                        Err(mpsc::error::TrySendError::Full(set)) => {
                                            error!(
                                                "Event channel full, dropping event set with {} events",
                                                set.events.len()
                                            );
                                        }
                                        Err(mpsc::error::TrySendError::Closed(_)) => {
                                            debug!("Event receiver dropped, discarding event");
                                        }
                                    }
                                }
                                Err(e) => {
                                    warn!("Failed to parse event: {}", e);
                                }
                            }
                        }
                    }
                    Err(e) => {
                        info!("Connection lost: {}", e);
                        break;
                    }
                }
            }
        }
    }

    // Connection is gone: fail everything still waiting for a reply.
    for (_, tx) in pending_replies.drain() {
        tx.send(Err(JdwpError::ConnectionClosed)).ok();
    }
    command_rx.close();
    while let Ok(cmd) = command_rx.try_recv() {
        cmd.reply_tx.send(Err(JdwpError::ConnectionClosed)).ok();
    }

    debug!("Transport task shut down");
}

async fn write_all_flush<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// Read a packet from the stream and determine if it's a reply or event
async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> JdwpResult<(bool, u32, Vec<u8>)> {
    // Read header
    let mut header = BytesMut::with_capacity(HEADER_SIZE);
    header.resize(HEADER_SIZE, 0);

    reader.read_exact(&mut header).await.map_err(JdwpError::Io)?;

    // Parse header
    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let packet_id = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    let flags = header[8];

    if length < HEADER_SIZE {
        return Err(JdwpError::Protocol(format!(
            "Invalid packet length: {}",
            length
        )));
    }

    if length > MAX_PACKET_SIZE {
        return Err(JdwpError::Protocol(format!(
            "Packet too large: {} bytes (max: {} bytes)",
            length, MAX_PACKET_SIZE
        )));
    }

    // Read rest of packet
    let data_len = length - HEADER_SIZE;
    let mut full_packet = header.to_vec();

    if data_len > 0 {
        let mut data = vec![0u8; data_len];
        reader.read_exact(&mut data).await.map_err(JdwpError::Io)?;
        full_packet.extend_from_slice(&data);
    }

    let is_reply = flags == REPLY_FLAG;

    Ok((is_reply, packet_id, full_packet))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn reply_bytes(id: u32, error_code: u16, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u32((HEADER_SIZE + payload.len()) as u32);
        buf.put_u32(id);
        buf.put_u8(REPLY_FLAG);
        buf.put_u16(error_code);
        buf.extend_from_slice(payload);
        buf
    }

    #[tokio::test]
    async fn test_replies_matched_by_id_not_order() {
        let (client, server) = tokio::io::duplex(4096);
        let (read_half, write_half) = tokio::io::split(client);
        let handle = spawn_transport(read_half, write_half, &ConnectConfig::default());

        let (mut server_read, mut server_write) = tokio::io::split(server);

        let first = handle.send_command(CommandPacket::new(1, 1, 1));
        let second = handle.send_command(CommandPacket::new(2, 1, 1));

        let pump = async move {
            let mut buf = vec![0u8; HEADER_SIZE * 2];
            server_read.read_exact(&mut buf).await.unwrap();
            // Answer the second request first.
            server_write.write_all(&reply_bytes(2, 0, b"two")).await.unwrap();
            server_write.write_all(&reply_bytes(1, 0, b"one")).await.unwrap();
        };

        let (first, second, _) = tokio::join!(first, second, pump);
        assert_eq!(first.unwrap().data(), b"one");
        assert_eq!(second.unwrap().data(), b"two");
    }

    #[tokio::test]
    async fn test_connection_loss_fails_pending_and_future_sends() {
        let (client, server) = tokio::io::duplex(4096);
        let (read_half, write_half) = tokio::io::split(client);
        let handle = spawn_transport(read_half, write_half, &ConnectConfig::default());

        let pending = handle.send_command(CommandPacket::new(1, 1, 1));
        let close = async move {
            // Give the command time to land in the pending map, then hang up.
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(server);
        };

        let (pending, ()) = tokio::join!(pending, close);
        assert!(matches!(pending, Err(JdwpError::ConnectionClosed)));

        let later = handle.send_command(CommandPacket::new(2, 1, 1)).await;
        assert!(matches!(later, Err(JdwpError::ConnectionClosed)));
    }
}
