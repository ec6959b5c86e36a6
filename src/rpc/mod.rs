//! Rpc client, lookups and transports.

mod closest_nodes;
pub(crate) mod config;
mod info;
mod iterative_query;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::common::{Contact, Header, RequestSpecific, RequestTypeSpecific, ResponseSpecific};
use crate::{Error, Result};

pub use closest_nodes::ClosestNodes;
pub use config::Config;
pub use info::Info;
pub use iterative_query::{IterativeQuery, LookupOutcome, ProbeOutcome};
pub use transport::{sim::SimNetwork, tcp::TcpTransport, Endpoint, Listener, Transport};

pub const VERSION: [u8; 4] = [75, 68, 0, 1]; // "KD" version 01

/// Default connect, read and write timeout of a single call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Default maximum number of outstanding probes in a lookup.
pub const DEFAULT_ALPHA: usize = 3;
pub const DEFAULT_NETWORK_ID: &str = "kademlia";

/// Outbound half of the protocol: stamps requests with this node's header,
/// and validates the responses.
#[derive(Debug, Clone)]
pub struct Rpc {
    transport: Arc<dyn Transport>,
    header: Header,
    request_timeout: Duration,
}

impl Rpc {
    pub fn new(
        transport: Arc<dyn Transport>,
        contact: Contact,
        network_id: String,
        request_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            header: Header {
                sender: contact,
                network_id,
            },
            request_timeout,
        }
    }

    // === Getters ===

    /// Header sent with every request and response of this node.
    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn network_id(&self) -> &str {
        &self.header.network_id
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    // === Public Methods ===

    /// Send a request to `to` and wait for a response of the same method,
    /// from a peer on the same network.
    pub fn request(
        &self,
        to: &Contact,
        request_type: RequestTypeSpecific,
    ) -> Result<ResponseSpecific> {
        let request = RequestSpecific {
            header: self.header.clone(),
            request_type,
        };

        trace!(
            context = "rpc_request",
            to = to.address(),
            method = request.request_type.method_name()
        );

        let response = self
            .transport
            .call(to.address(), &request, self.request_timeout)
            .map_err(|error| {
                debug!(?error, to = to.address(), "Request failed");
                error
            })?;

        if response.header.network_id != self.header.network_id {
            return Err(Error::NetworkMismatch {
                local: self.header.network_id.clone(),
                remote: response.header.network_id,
            });
        }

        if response.response_type.method_name() != request.request_type.method_name() {
            return Err(Error::InvalidMessage(
                "Response method does not match the request",
            ));
        }

        Ok(response)
    }
}
