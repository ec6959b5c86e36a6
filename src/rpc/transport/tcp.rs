//! Length prefixed bencode messages over TCP, one request per connection.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use flume::{Receiver, Sender};
use tracing::{debug, error, trace};

use crate::common::{Message, RequestSpecific, ResponseSpecific};
use crate::server::RequestHandler;
use crate::{Error, Result};

use super::{
    dispatch, interpret_reply, request_message, Endpoint, Listener, Transport,
    MAX_THREAD_BLOCK_DURATION,
};

pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Frames larger than this are rejected before reading them.
pub const MAX_FRAME_SIZE: usize = 1 << 20;

/// Real [Transport] dialing a new TCP connection per call.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    host: String,
}

impl TcpTransport {
    /// Bind endpoints on `host`, which is also the host advertised to peers.
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_HOST)
    }
}

impl Transport for TcpTransport {
    fn bind(&self, port: Option<u16>) -> Result<Box<dyn Endpoint>> {
        let listener = TcpListener::bind((self.host.as_str(), port.unwrap_or(0)))?;
        listener.set_nonblocking(true)?;

        let local_addr = listener.local_addr()?.to_string();

        Ok(Box::new(TcpEndpoint {
            listener,
            local_addr,
        }))
    }

    fn call(
        &self,
        address: &str,
        request: &RequestSpecific,
        timeout: Duration,
    ) -> Result<ResponseSpecific> {
        let socket_addr = resolve(address).map_err(|error| Error::unreachable(address, error))?;

        let mut stream = TcpStream::connect_timeout(&socket_addr, timeout)
            .map_err(|error| Error::unreachable(address, error))?;

        let bytes = request_message(request).to_bytes()?;

        let reply = exchange(&mut stream, &bytes, timeout)
            .map_err(|error| Error::unreachable(address, error))?;

        let reply = Message::from_bytes(reply)?;
        trace!(context = "tcp_message_receiving", ?reply, address);

        interpret_reply(request, reply)
    }
}

#[derive(Debug)]
pub struct TcpEndpoint {
    listener: TcpListener,
    local_addr: String,
}

impl Endpoint for TcpEndpoint {
    fn local_addr(&self) -> &str {
        &self.local_addr
    }

    fn serve(
        self: Box<Self>,
        handler: Arc<dyn RequestHandler>,
        request_timeout: Duration,
    ) -> Result<Listener> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();

        let handle = thread::Builder::new()
            .name(format!("kadnode tcp {}", self.local_addr))
            .spawn(move || accept_loop(*self, handler, request_timeout, flag))?;

        Ok(Listener { shutdown, handle })
    }
}

fn accept_loop(
    endpoint: TcpEndpoint,
    handler: Arc<dyn RequestHandler>,
    request_timeout: Duration,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let (fatal_sender, fatal_receiver): (Sender<Error>, Receiver<Error>) = flume::unbounded();

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!(local_addr = %endpoint.local_addr, "Shutting down");
            return Ok(());
        }

        if let Ok(error) = fatal_receiver.try_recv() {
            error!(?error, local_addr = %endpoint.local_addr, "Stopped serving");
            return Err(error);
        }

        match endpoint.listener.accept() {
            Ok((stream, from)) => {
                let handler = handler.clone();
                let fatal_sender = fatal_sender.clone();

                thread::spawn(move || {
                    let answered =
                        handle_connection(stream, handler.as_ref(), request_timeout, &fatal_sender);

                    if let Err(error) = answered {
                        debug!(?error, ?from, "Failed to answer request");
                    }
                });
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(MAX_THREAD_BLOCK_DURATION);
            }
            Err(error) => {
                debug!(?error, "Failed to accept connection");
                thread::sleep(MAX_THREAD_BLOCK_DURATION);
            }
        }
    }
}

fn handle_connection(
    mut stream: TcpStream,
    handler: &dyn RequestHandler,
    request_timeout: Duration,
    fatal_sender: &Sender<Error>,
) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(request_timeout))?;
    stream.set_write_timeout(Some(request_timeout))?;

    let request = read_frame(&mut stream)?;

    let (reply, fatal) = dispatch(handler, &request);
    trace!(context = "tcp_message_sending", ?reply);

    let bytes = reply
        .to_bytes()
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))?;
    let written = write_frame(&mut stream, &bytes);

    if let Some(error) = fatal {
        let _ = fatal_sender.send(error);
    }

    written
}

fn resolve(address: &str) -> io::Result<SocketAddr> {
    address.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("{address} resolved to no address"),
        )
    })
}

fn exchange(stream: &mut TcpStream, bytes: &[u8], timeout: Duration) -> io::Result<Vec<u8>> {
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    write_frame(stream, bytes)?;
    read_frame(stream)
}

fn write_frame<W: Write>(writer: &mut W, bytes: &[u8]) -> io::Result<()> {
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame of {} bytes is too large", bytes.len()),
        ));
    }

    writer.write_all(&(bytes.len() as u32).to_be_bytes())?;
    writer.write_all(bytes)?;
    writer.flush()
}

fn read_frame<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut length = [0_u8; 4];
    reader.read_exact(&mut length)?;

    let length = u32::from_be_bytes(length) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {length} bytes is too large"),
        ));
    }

    let mut buf = vec![0_u8; length];
    reader.read_exact(&mut buf)?;

    Ok(buf)
}

#[cfg(test)]
mod test {
    use std::io::Cursor;
    use std::sync::Mutex;

    use super::*;
    use crate::common::{Contact, Header, Id, RequestTypeSpecific, ResponseTypeSpecific};

    #[derive(Debug, Default)]
    struct Echo(Mutex<Vec<Contact>>);

    impl RequestHandler for Echo {
        fn handle_request(&self, request: RequestSpecific) -> Result<ResponseSpecific> {
            self.0.lock().unwrap().push(request.header.sender.clone());

            Ok(ResponseSpecific {
                header: request.header,
                response_type: ResponseTypeSpecific::Ping,
            })
        }
    }

    fn ping() -> RequestSpecific {
        RequestSpecific {
            header: Header {
                sender: Contact::new(Id::random(), "127.0.0.1:1"),
                network_id: "kademlia".to_string(),
            },
            request_type: RequestTypeSpecific::Ping,
        }
    }

    #[test]
    fn frames() {
        let mut buf = vec![];
        write_frame(&mut buf, b"hello").unwrap();

        assert_eq!(&buf[..4], &[0, 0, 0, 5]);
        assert_eq!(read_frame(&mut Cursor::new(buf)).unwrap(), b"hello");
    }

    #[test]
    fn reject_oversized_frames() {
        let buf = ((MAX_FRAME_SIZE + 1) as u32).to_be_bytes().to_vec();

        let error = read_frame(&mut Cursor::new(buf)).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn call_and_shutdown() {
        let transport = TcpTransport::default();
        let endpoint = transport.bind(None).unwrap();
        let address = endpoint.local_addr().to_string();

        let handler = Arc::new(Echo::default());
        let listener = endpoint
            .serve(handler.clone(), Duration::from_secs(5))
            .unwrap();

        let request = ping();
        let response = transport
            .call(&address, &request, Duration::from_secs(5))
            .unwrap();

        assert_eq!(response.header, request.header);
        assert_eq!(handler.0.lock().unwrap().as_slice(), &[request.header.sender]);

        listener.shutdown.store(true, Ordering::Relaxed);
        listener.handle.join().unwrap().unwrap();

        assert!(matches!(
            transport.call(&address, &ping(), Duration::from_millis(500)),
            Err(Error::Unreachable { .. })
        ));
    }

    #[test]
    fn idle_connections_time_out() {
        let transport = TcpTransport::default();
        let endpoint = transport.bind(None).unwrap();
        let address = endpoint.local_addr().to_string();

        let listener = endpoint
            .serve(Arc::new(Echo::default()), Duration::from_millis(100))
            .unwrap();

        let mut stream = TcpStream::connect(&address).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        // Never send a request, the server hangs up after its own timeout.
        let start = std::time::Instant::now();
        let mut buf = vec![];
        let read = stream.read_to_end(&mut buf).unwrap();

        assert_eq!(read, 0);
        assert!(start.elapsed() < Duration::from_secs(2));

        listener.shutdown.store(true, Ordering::Relaxed);
        listener.handle.join().unwrap().unwrap();
    }

    #[test]
    fn unreachable() {
        let transport = TcpTransport::default();

        // Bind and drop, to get a port nobody listens on.
        let address = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .to_string();

        let result = transport.call(&address, &ping(), Duration::from_millis(500));

        assert!(matches!(result, Err(Error::Unreachable { .. })));
    }
}
