//! # Modbus TCP Transport
//!
//! MBAP framing over a single `TcpStream`: transaction id management,
//! response validation, per-request timeouts and traffic statistics.
//!
//! The transport knows nothing about reconnect policy. Any I/O fault, timeout
//! or malformed frame is reported as [`ModbusError::UndefinedException`]
//! (after logging the detail), which the engine treats as a reason to drop
//! and re-establish the session.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::constants::{MAX_MBAP_LENGTH, MBAP_HEADER_LEN, MODBUS_FRAME_BUFFER_SIZE};
use crate::error::{ModbusError, ModbusResult};
use crate::pdu::ModbusPdu;

/// Traffic counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Modbus TCP transport.
#[derive(Debug)]
pub struct TcpTransport {
    stream: Option<TcpStream>,
    host: String,
    port: u16,
    unit_id: u8,
    response_timeout: Duration,
    transaction_id: u16,
    rx_buffer: Vec<u8>,
    stats: TransportStats,
    packet_logging: bool,
}

impl TcpTransport {
    /// Create a closed transport. The receive buffer is reserved up front.
    pub fn new(host: &str, port: u16, unit_id: u8, response_timeout: Duration) -> ModbusResult<Self> {
        let mut rx_buffer = Vec::new();
        rx_buffer
            .try_reserve_exact(MODBUS_FRAME_BUFFER_SIZE)
            .map_err(|_| ModbusError::NoEnoughMemory)?;

        Ok(Self {
            stream: None,
            host: host.to_string(),
            port,
            unit_id,
            response_timeout,
            transaction_id: 0,
            rx_buffer,
            stats: TransportStats::default(),
            packet_logging: false,
        })
    }

    /// Enable or disable hex dumps of every frame at debug level
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    pub fn stats(&self) -> TransportStats {
        self.stats
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Socket address when the host is an IPv4 or IPv6 literal.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        let ip: IpAddr = self.host.parse().ok()?;
        Some(SocketAddr::from((ip, self.port)))
    }

    fn peer(&self) -> String {
        match self.socket_addr() {
            Some(addr) => addr.to_string(),
            None => format!("{}:{}", self.host, self.port),
        }
    }

    /// Open the TCP session, bounded by `connect_timeout`.
    ///
    /// Hosts that are not IP literals go through name resolution.
    pub async fn open(&mut self, connect_timeout: Duration) -> ModbusResult<()> {
        let address = self.peer();
        let connect = async {
            match self.socket_addr() {
                Some(addr) => TcpStream::connect(addr).await,
                None => TcpStream::connect((self.host.as_str(), self.port)).await,
            }
        };
        let result = timeout(connect_timeout, connect).await;
        let stream = match result {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!("Failed to connect to {}: {}", address, e);
                return Err(ModbusError::ConnectionFailed);
            }
            Err(_) => {
                warn!(
                    "Connect to {} timed out after {}ms",
                    address,
                    connect_timeout.as_millis()
                );
                self.stats.timeouts += 1;
                return Err(ModbusError::ConnectionFailed);
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY on {}: {}", address, e);
        }

        info!("Connected to {}", address);
        self.stream = Some(stream);
        Ok(())
    }

    /// Close the session. Safe to call when already closed.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Shutdown of {} failed: {}", self.peer(), e);
            }
            info!("Disconnected from {}", self.peer());
        }
    }

    /// Drop any bytes already received but not consumed, such as the tail
    /// of a response that arrived after its request timed out.
    pub fn discard_pending(&mut self) -> usize {
        let Some(stream) = self.stream.as_ref() else {
            return 0;
        };

        let mut scratch = [0u8; 256];
        let mut discarded = 0;
        loop {
            match stream.try_read(&mut scratch) {
                Ok(0) => break,
                Ok(n) => discarded += n,
                Err(_) => break,
            }
        }

        if discarded > 0 {
            debug!("Discarded {} stale bytes from {}", discarded, self.peer());
        }
        discarded
    }

    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        self.transaction_id
    }

    fn encode_frame(&mut self, pdu: &ModbusPdu) -> BytesMut {
        let transaction_id = self.next_transaction_id();
        let mut frame = BytesMut::with_capacity(MBAP_HEADER_LEN + 1 + pdu.len());

        frame.put_u16(transaction_id);
        frame.put_u16(0);
        frame.put_u16((pdu.len() + 1) as u16);
        frame.put_u8(self.unit_id);
        frame.put_slice(pdu.as_slice());
        frame
    }

    /// Send one request PDU and wait for its response PDU.
    pub async fn request(&mut self, pdu: &ModbusPdu) -> ModbusResult<ModbusPdu> {
        let frame = self.encode_frame(pdu);
        let expected_tid = self.transaction_id;
        let response_timeout = self.response_timeout;

        if self.packet_logging {
            log_packet("send", &frame, self.unit_id);
        }

        let Some(stream) = self.stream.as_mut() else {
            warn!("Request on closed session {}", self.peer());
            return Err(ModbusError::UndefinedException);
        };

        match timeout(response_timeout, stream.write_all(&frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Send failed: {}", e);
                return Err(record_failure(&mut self.stats, response_timeout, "send", false));
            }
            Err(_) => return Err(record_failure(&mut self.stats, response_timeout, "send", true)),
        }
        self.stats.requests_sent += 1;
        self.stats.bytes_sent += frame.len() as u64;

        // MBAP header plus unit id
        let mut header = [0u8; MBAP_HEADER_LEN + 1];
        match timeout(response_timeout, stream.read_exact(&mut header)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!("Reading response header failed: {}", e);
                return Err(record_failure(&mut self.stats, response_timeout, "read header", false));
            }
            Err(_) => return Err(record_failure(&mut self.stats, response_timeout, "read header", true)),
        }

        let transaction_id = u16::from_be_bytes([header[0], header[1]]);
        let protocol_id = u16::from_be_bytes([header[2], header[3]]);
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        let unit_id = header[6];

        if protocol_id != 0 || length < 2 || length > MAX_MBAP_LENGTH {
            warn!(
                "Invalid MBAP header: protocol_id={}, length={}",
                protocol_id, length
            );
            self.stats.errors += 1;
            return Err(ModbusError::UndefinedException);
        }

        self.rx_buffer.clear();
        self.rx_buffer.resize(length - 1, 0);
        match timeout(response_timeout, stream.read_exact(&mut self.rx_buffer)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!("Reading response body failed: {}", e);
                return Err(record_failure(&mut self.stats, response_timeout, "read body", false));
            }
            Err(_) => return Err(record_failure(&mut self.stats, response_timeout, "read body", true)),
        }

        self.stats.bytes_received += (header.len() + self.rx_buffer.len()) as u64;

        if self.packet_logging {
            let mut whole = header.to_vec();
            whole.extend_from_slice(&self.rx_buffer);
            log_packet("recv", &whole, unit_id);
        }

        if transaction_id != expected_tid || unit_id != self.unit_id {
            warn!(
                "Response mismatch: tid={} unit={}, expected tid={} unit={}",
                transaction_id, unit_id, expected_tid, self.unit_id
            );
            self.stats.errors += 1;
            return Err(ModbusError::UndefinedException);
        }

        self.stats.responses_received += 1;
        ModbusPdu::from_slice(&self.rx_buffer)
    }
}

fn record_failure(
    stats: &mut TransportStats,
    response_timeout: Duration,
    what: &str,
    timed_out: bool,
) -> ModbusError {
    stats.errors += 1;
    if timed_out {
        stats.timeouts += 1;
        warn!("{} timed out after {}ms", what, response_timeout.as_millis());
    }
    ModbusError::UndefinedException
}

fn log_packet(direction: &str, data: &[u8], unit_id: u8) {
    let hex: Vec<String> = data.iter().map(|b| format!("{:02X}", b)).collect();
    debug!("[TCP] {} unit={} len={}: {}", direction, unit_id, data.len(), hex.join(" "));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::PduBuilder;
    use tokio::net::TcpListener;

    async fn one_shot_server(response: Vec<u8>) -> (u16, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 12];
            socket.read_exact(&mut request).await.unwrap();
            socket.write_all(&response).await.unwrap();
            request.to_vec()
        });
        (port, handle)
    }

    #[test]
    fn test_frame_encoding() {
        let mut transport =
            TcpTransport::new("127.0.0.1", 502, 0x11, Duration::from_secs(1)).unwrap();
        let pdu = PduBuilder::build_read_holding_registers(0x006B, 3).unwrap();

        let frame = transport.encode_frame(&pdu);
        assert_eq!(
            &frame[..],
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x11, 0x03, 0x00, 0x6B, 0x00, 0x03]
        );

        let frame = transport.encode_frame(&pdu);
        assert_eq!(&frame[..2], &[0x00, 0x02]);
    }

    #[test]
    fn test_socket_addr_brackets_ipv6() {
        let v6 = TcpTransport::new("fe80::10", 502, 1, Duration::from_secs(1)).unwrap();
        let addr = v6.socket_addr().unwrap();
        assert!(addr.is_ipv6());
        assert_eq!(addr.port(), 502);
        assert_eq!(v6.peer(), "[fe80::10]:502");

        let v4 = TcpTransport::new("10.0.0.5", 1502, 1, Duration::from_secs(1)).unwrap();
        assert_eq!(v4.peer(), "10.0.0.5:1502");

        let named = TcpTransport::new("plc.local", 502, 1, Duration::from_secs(1)).unwrap();
        assert_eq!(named.socket_addr(), None);
        assert_eq!(named.peer(), "plc.local:502");
    }

    #[tokio::test]
    async fn test_request_response() {
        let response = vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0x00, 0x0A, 0x00, 0x0B];
        let (port, server) = one_shot_server(response).await;

        let mut transport = TcpTransport::new("127.0.0.1", port, 1, Duration::from_secs(1)).unwrap();
        transport.open(Duration::from_secs(1)).await.unwrap();

        let pdu = PduBuilder::build_read_holding_registers(0, 2).unwrap();
        let reply = transport.request(&pdu).await.unwrap();
        assert_eq!(reply.parse_read_registers(2).unwrap(), vec![10, 11]);

        let sent = server.await.unwrap();
        assert_eq!(&sent[6..], &[0x01, 0x03, 0x00, 0x00, 0x00, 0x02]);

        let stats = transport.stats();
        assert_eq!(stats.requests_sent, 1);
        assert_eq!(stats.responses_received, 1);
        assert_eq!(stats.bytes_sent, 12);
        assert_eq!(stats.bytes_received, 13);
    }

    #[tokio::test]
    async fn test_transaction_id_mismatch() {
        let response = vec![0x00, 0x09, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x00, 0x0A];
        let (port, _server) = one_shot_server(response).await;

        let mut transport = TcpTransport::new("127.0.0.1", port, 1, Duration::from_secs(1)).unwrap();
        transport.open(Duration::from_secs(1)).await.unwrap();

        let pdu = PduBuilder::build_read_holding_registers(0, 1).unwrap();
        assert_eq!(
            transport.request(&pdu).await.unwrap_err(),
            ModbusError::UndefinedException
        );
        assert_eq!(transport.stats().errors, 1);
    }

    #[tokio::test]
    async fn test_request_when_closed() {
        let mut transport =
            TcpTransport::new("127.0.0.1", 502, 1, Duration::from_millis(100)).unwrap();
        let pdu = PduBuilder::build_read_holding_registers(0, 1).unwrap();
        assert_eq!(
            transport.request(&pdu).await.unwrap_err(),
            ModbusError::UndefinedException
        );
        assert_eq!(transport.stats().requests_sent, 0);
    }

    #[tokio::test]
    async fn test_open_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut transport = TcpTransport::new("127.0.0.1", port, 1, Duration::from_secs(1)).unwrap();
        assert_eq!(
            transport.open(Duration::from_secs(1)).await.unwrap_err(),
            ModbusError::ConnectionFailed
        );
        assert!(!transport.is_open());
    }
}
