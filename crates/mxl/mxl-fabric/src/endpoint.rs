//! An active, connection-oriented communication handle. Driven
//! cooperatively: no internal thread is spawned, forward progress is
//! the caller's responsibility via `read_queues`/`read_queues_blocking`.
//!
//! Backed by a software `tcp` provider: a loopback/LAN TCP stream
//! carrying a small length-prefixed header (destination rkey, offset,
//! length, optional imm-data) followed by the write's payload bytes,
//! in place of a hardware RMA engine.

use std::cell::RefCell;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::rc::Rc;
use std::time::{Duration, Instant};

use mxl_status::{MxlError, Result, StatusCode};
use serde::{Deserialize, Serialize};

use crate::address::FabricAddress;
use crate::av::AddressVector;
use crate::queue::{Completion, CompletionQueue, Event, EventQueue};
use crate::region::{LocalRegion, MemoryRegistry, RemoteRegion};

/// Stable id embedded as context on every posted operation, so
/// completions and events carry their originating endpoint's identity
/// even after the `Endpoint` object itself has been dropped.
pub type EndpointId = u64;

/// The interval at which the event queue is probed non-blocking during
/// a combined blocking read of both queues.
const EQ_READ_INTERVAL: Duration = Duration::from_millis(100);

pub(crate) fn random_endpoint_id() -> EndpointId {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or(1);
    let seed = nanos ^ (std::process::id() as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    xorshift64(seed | 1)
}

fn xorshift64(mut x: u64) -> u64 {
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Created,
    Enabled,
    Connected,
    Shutdown,
}

#[derive(Serialize, Deserialize)]
struct WireHeader {
    rkey: u64,
    offset: u64,
    len: u64,
    imm_data: Option<u64>,
}

pub struct Endpoint {
    id: EndpointId,
    state: EndpointState,
    listener: TcpListener,
    stream: Option<TcpStream>,
    cq: Option<Rc<RefCell<CompletionQueue>>>,
    eq: Option<Rc<RefCell<EventQueue>>>,
    av: Option<Rc<RefCell<AddressVector>>>,
    recv_buf: Vec<u8>,
}

impl Endpoint {
    /// Allocates a new endpoint, binding an ephemeral local TCP port
    /// whose address becomes `local_address()`. A random id is chosen
    /// to identify the endpoint in completions and events.
    pub fn create() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            id: random_endpoint_id(),
            state: EndpointState::Created,
            listener,
            stream: None,
            cq: None,
            eq: None,
            av: None,
            recv_buf: Vec::new(),
        })
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn state(&self) -> EndpointState {
        self.state
    }

    pub fn local_address(&self) -> Result<FabricAddress> {
        let addr = self.listener.local_addr()?;
        Ok(FabricAddress::new(addr.to_string().into_bytes()))
    }

    /// The endpoint can be bound to an event queue only once.
    pub fn bind_eq(&mut self, eq: Rc<RefCell<EventQueue>>) {
        self.eq = Some(eq);
    }

    /// The endpoint can be bound to a completion queue only once.
    pub fn bind_cq(&mut self, cq: Rc<RefCell<CompletionQueue>>) {
        self.cq = Some(cq);
    }

    /// The endpoint can be bound to an address vector only once. Used by
    /// unconnected (datagram) endpoints to resolve short addresses into
    /// destinations; the connection-oriented tcp provider never reads
    /// this back, it is accepted for API parity with the state machine.
    pub fn bind_av(&mut self, av: Rc<RefCell<AddressVector>>) {
        self.av = Some(av);
    }

    /// Transitions the endpoint into an enabled state. Must happen
    /// before accept/connect.
    pub fn enable(&mut self) -> Result<()> {
        if self.state != EndpointState::Created {
            return Err(MxlError::new(StatusCode::InvalidState, "endpoint already enabled"));
        }
        self.state = EndpointState::Enabled;
        Ok(())
    }

    /// Accepts one pending incoming connection. Non-blocking; returns
    /// `NotReady` if no connection request has arrived yet.
    pub fn accept(&mut self) -> Result<()> {
        if self.state != EndpointState::Enabled {
            return Err(MxlError::new(StatusCode::InvalidState, "endpoint not enabled"));
        }
        match self.listener.accept() {
            Ok((stream, _peer)) => {
                stream.set_nonblocking(true)?;
                self.stream = Some(stream);
                self.state = EndpointState::Connected;
                tracing::debug!(endpoint = self.id, "accepted connection");
                if let Some(eq) = &self.eq {
                    eq.borrow_mut().push(Event::Connected { endpoint: self.id });
                }
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                Err(MxlError::new(StatusCode::NotReady, "no pending connection"))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Initiates a connection to a remote passive endpoint. May only be
    /// called once in the lifetime of an endpoint.
    pub fn connect(&mut self, addr: &FabricAddress) -> Result<()> {
        if self.state != EndpointState::Enabled {
            return Err(MxlError::new(StatusCode::InvalidState, "endpoint not enabled"));
        }
        let text = std::str::from_utf8(addr.as_bytes())
            .map_err(|_| MxlError::new(StatusCode::InvalidArg, "malformed fabric address"))?;
        let socket_addr: SocketAddr =
            text.parse().map_err(|_| MxlError::new(StatusCode::InvalidArg, "malformed fabric address"))?;
        let stream = TcpStream::connect(socket_addr)?;
        stream.set_nonblocking(true)?;
        self.stream = Some(stream);
        self.state = EndpointState::Connected;
        if let Some(eq) = &self.eq {
            eq.borrow_mut().push(Event::Connected { endpoint: self.id });
        }
        Ok(())
    }

    /// Initiates a graceful shutdown. Posts a `Shutdown` event to the
    /// bound event queue.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.state != EndpointState::Connected {
            return Err(MxlError::new(StatusCode::InvalidState, "endpoint not connected"));
        }
        if let Some(stream) = &self.stream {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        self.state = EndpointState::Shutdown;
        if let Some(eq) = &self.eq {
            eq.borrow_mut().push(Event::Shutdown { endpoint: self.id });
        }
        Ok(())
    }

    /// Posts a one-sided write of `payload` to `remote`, sourced from
    /// `local`. When the write reaches the peer a `Completion::Data`
    /// with `remote_write: true` appears on the peer's bound queue;
    /// this call immediately enqueues the local (sender-side) completion.
    pub fn write(
        &mut self,
        local: &LocalRegion,
        payload: &[u8],
        remote: &RemoteRegion,
        imm_data: Option<u64>,
    ) -> Result<()> {
        if self.state != EndpointState::Connected {
            return Err(MxlError::new(StatusCode::InvalidState, "endpoint not connected"));
        }
        if payload.len() != local.len {
            return Err(MxlError::new(StatusCode::InvalidArg, "payload length does not match local region"));
        }
        let header = WireHeader { rkey: remote.rkey, offset: remote.addr, len: local.len as u64, imm_data };
        let encoded = bincode::serialize(&header)
            .map_err(|e| MxlError::with_source(StatusCode::Internal, "encode write header", e))?;
        let stream = self.stream.as_mut().expect("connected endpoint has a stream");
        stream.write_all(&(encoded.len() as u32).to_le_bytes())?;
        stream.write_all(&encoded)?;
        stream.write_all(payload)?;
        if let Some(cq) = &self.cq {
            cq.borrow_mut().push(Completion::Data { endpoint: self.id, remote_write: false, imm_data });
        }
        Ok(())
    }

    /// Drains any complete wire messages off the socket, copying each
    /// one's payload into the region `registry` maps its header's rkey
    /// to, and pushing a remote-write completion carrying the header's
    /// imm-data.
    fn poll_recv(&mut self, registry: &MemoryRegistry) -> Result<()> {
        if self.state != EndpointState::Connected {
            return Ok(());
        }
        let stream = self.stream.as_mut().expect("connected endpoint has a stream");
        let mut chunk = [0u8; 4096];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => self.recv_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }

        loop {
            if self.recv_buf.len() < 4 {
                break;
            }
            let header_len = u32::from_le_bytes(self.recv_buf[..4].try_into().unwrap()) as usize;
            if self.recv_buf.len() < 4 + header_len {
                break;
            }
            let header: WireHeader = bincode::deserialize(&self.recv_buf[4..4 + header_len])
                .map_err(|e| MxlError::with_source(StatusCode::Internal, "decode write header", e))?;
            let body_start = 4 + header_len;
            let body_end = body_start + header.len as usize;
            if self.recv_buf.len() < body_end {
                break;
            }

            if let Some((base, size)) = registry.resolve(header.rkey) {
                let offset = header.offset as usize;
                if offset + header.len as usize <= size {
                    unsafe {
                        let dst = (base as *mut u8).add(offset);
                        std::ptr::copy_nonoverlapping(
                            self.recv_buf[body_start..body_end].as_ptr(),
                            dst,
                            header.len as usize,
                        );
                    }
                }
            }
            if let Some(cq) = &self.cq {
                cq.borrow_mut().push(Completion::Data {
                    endpoint: self.id,
                    remote_write: true,
                    imm_data: header.imm_data,
                });
            }
            self.recv_buf.drain(..body_end);
        }
        Ok(())
    }

    /// Non-blocking drain of both bound queues, polling the underlying
    /// socket first so newly arrived writes are reflected.
    pub fn read_queues(&mut self, registry: &MemoryRegistry) -> Result<(Option<Completion>, Option<Event>)> {
        self.poll_recv(registry)?;
        let completion = self.cq.as_ref().and_then(|cq| cq.borrow_mut().read());
        let event = self.eq.as_ref().and_then(|eq| eq.borrow_mut().read());
        Ok((completion, event))
    }

    /// Combined blocking read of both queues. The event queue is probed
    /// non-blocking at an interval no larger than 100 ms; the rest of
    /// the timeout is spent polling the completion path. Returns as
    /// soon as either queue yields an item, or at the deadline.
    pub fn read_queues_blocking(
        &mut self,
        timeout: Duration,
        registry: &MemoryRegistry,
    ) -> Result<(Option<Completion>, Option<Event>)> {
        let deadline = Instant::now() + timeout;
        loop {
            let (completion, event) = self.read_queues(registry)?;
            if completion.is_some() || event.is_some() {
                return Ok((completion, event));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok((None, None));
            }
            std::thread::sleep(remaining.min(EQ_READ_INTERVAL).min(Duration::from_millis(2)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_differ_across_calls() {
        let a = random_endpoint_id();
        let b = random_endpoint_id();
        assert_ne!(a, b);
    }

    #[test]
    fn operations_before_enable_are_rejected() {
        let mut ep = Endpoint::create().unwrap();
        let addr = ep.local_address().unwrap();
        assert_eq!(ep.connect(&addr).unwrap_err().code, StatusCode::InvalidState);
    }

    #[test]
    fn loopback_connect_and_accept_reach_connected_state() {
        let mut passive = Endpoint::create().unwrap();
        let passive_addr = passive.local_address().unwrap();
        passive.enable().unwrap();

        let mut active = Endpoint::create().unwrap();
        active.enable().unwrap();
        active.connect(&passive_addr).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match passive.accept() {
                Ok(()) => break,
                Err(_) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(5)),
                Err(e) => panic!("accept failed: {e}"),
            }
        }
        assert_eq!(passive.state(), EndpointState::Connected);
        assert_eq!(active.state(), EndpointState::Connected);
    }
}
