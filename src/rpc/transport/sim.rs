//! In process [Transport] for tests and simulations.
//!
//! Messages still go through the bencode codec, but calls are answered
//! synchronously on the caller's thread.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use flume::{Receiver, Sender};
use tracing::{debug, error};

use crate::common::{Message, RequestSpecific, ResponseSpecific};
use crate::server::RequestHandler;
use crate::{Error, Result};

use super::{
    dispatch, interpret_reply, request_message, Endpoint, Listener, Transport,
    MAX_THREAD_BLOCK_DURATION,
};

const FIRST_PORT: u16 = 1024;

/// A simulated network, shared by cloning.
///
/// Separate [SimNetwork]s never see each other's endpoints.
#[derive(Debug, Clone, Default)]
pub struct SimNetwork {
    state: Arc<Mutex<SimState>>,
}

#[derive(Debug, Default)]
struct SimState {
    endpoints: HashMap<String, SimEntry>,
    next_port: u16,
}

#[derive(Debug)]
struct SimEntry {
    /// Unset until the endpoint serves, and after it fails fatally.
    handler: Option<Weak<dyn RequestHandler>>,
    fatal_sender: Option<Sender<Error>>,
    connected: bool,
}

impl SimNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls to `address` fail as unreachable until [Self::reconnect].
    pub fn disconnect(&self, address: &str) {
        if let Some(entry) = self.state().endpoints.get_mut(address) {
            entry.connected = false;
        }
    }

    pub fn reconnect(&self, address: &str) {
        if let Some(entry) = self.state().endpoints.get_mut(address) {
            entry.connected = true;
        }
    }

    /// Number of bound endpoints.
    pub fn len(&self) -> usize {
        self.state().endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().endpoints.is_empty()
    }

    // === Private Methods ===

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unbind(&self, address: &str) {
        self.state().endpoints.remove(address);
    }

    fn handler(
        &self,
        address: &str,
    ) -> io::Result<(Arc<dyn RequestHandler>, Option<Sender<Error>>)> {
        let state = self.state();

        let entry = state
            .endpoints
            .get(address)
            .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "no such endpoint"))?;

        if !entry.connected {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "endpoint is disconnected",
            ));
        }

        let handler = entry
            .handler
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "not serving"))?;

        Ok((handler, entry.fatal_sender.clone()))
    }

    fn mark_dead(&self, address: &str) {
        if let Some(entry) = self.state().endpoints.get_mut(address) {
            entry.handler = None;
        }
    }
}

impl Transport for SimNetwork {
    fn bind(&self, port: Option<u16>) -> Result<Box<dyn Endpoint>> {
        let mut state = self.state();

        let address = match port {
            Some(port) => sim_address(port),
            None => loop {
                let port = FIRST_PORT.saturating_add(state.next_port);
                state.next_port = state.next_port.wrapping_add(1);

                let address = sim_address(port);
                if !state.endpoints.contains_key(&address) {
                    break address;
                }
            },
        };

        if state.endpoints.contains_key(&address) {
            return Err(io::Error::new(io::ErrorKind::AddrInUse, address).into());
        }

        state.endpoints.insert(
            address.clone(),
            SimEntry {
                handler: None,
                fatal_sender: None,
                connected: true,
            },
        );

        Ok(Box::new(SimEndpoint {
            network: self.clone(),
            address,
        }))
    }

    fn call(
        &self,
        address: &str,
        request: &RequestSpecific,
        _timeout: Duration,
    ) -> Result<ResponseSpecific> {
        let (handler, fatal_sender) = self
            .handler(address)
            .map_err(|error| Error::unreachable(address, error))?;

        let bytes = request_message(request).to_bytes()?;

        let (reply, fatal) = dispatch(handler.as_ref(), &bytes);

        if let Some(error) = fatal {
            self.mark_dead(address);

            if let Some(sender) = fatal_sender {
                let _ = sender.send(error);
            }
        }

        let reply = Message::from_bytes(reply.to_bytes()?)?;

        interpret_reply(request, reply)
    }
}

#[derive(Debug)]
pub struct SimEndpoint {
    network: SimNetwork,
    address: String,
}

impl Endpoint for SimEndpoint {
    fn local_addr(&self) -> &str {
        &self.address
    }

    /// Calls are answered on the caller's thread, so `request_timeout` has
    /// no effect here.
    fn serve(
        self: Box<Self>,
        handler: Arc<dyn RequestHandler>,
        _request_timeout: Duration,
    ) -> Result<Listener> {
        let (fatal_sender, fatal_receiver) = flume::unbounded();

        if let Some(entry) = self.network.state().endpoints.get_mut(&self.address) {
            entry.handler = Some(Arc::downgrade(&handler));
            entry.fatal_sender = Some(fatal_sender);
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();

        let handle = thread::Builder::new()
            .name(format!("kadnode sim {}", self.address))
            .spawn(move || supervise(*self, flag, fatal_receiver))?;

        Ok(Listener { shutdown, handle })
    }
}

/// Waits for a shutdown or a fatal error, then unbinds the endpoint.
fn supervise(
    endpoint: SimEndpoint,
    shutdown: Arc<AtomicBool>,
    fatal_receiver: Receiver<Error>,
) -> Result<()> {
    let result = loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!(local_addr = %endpoint.address, "Shutting down");
            break Ok(());
        }

        match fatal_receiver.recv_timeout(MAX_THREAD_BLOCK_DURATION) {
            Ok(error) => {
                error!(?error, local_addr = %endpoint.address, "Stopped serving");
                break Err(error);
            }
            Err(flume::RecvTimeoutError::Timeout) => {}
            Err(flume::RecvTimeoutError::Disconnected) => break Ok(()),
        }
    };

    endpoint.network.unbind(&endpoint.address);

    result
}

fn sim_address(port: u16) -> String {
    format!("sim:{port}")
}
