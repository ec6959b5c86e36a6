use std::time::Duration;

use crate::common::{Contact, Id};

use super::{DEFAULT_ALPHA, DEFAULT_NETWORK_ID, DEFAULT_REQUEST_TIMEOUT};

#[derive(Debug, Clone)]
/// Node Configurations
pub struct Config {
    /// This node's [Id].
    ///
    /// Defaults to None, where a random Id is generated.
    pub id: Option<Id>,
    /// Network id sent with every message. Peers with a different one are
    /// rejected.
    ///
    /// Defaults to [DEFAULT_NETWORK_ID]
    pub network_id: String,
    /// Explicit port to listen on.
    ///
    /// Defaults to None, where the transport picks any free port.
    pub port: Option<u16>,
    /// Contacts to bootstrap off, in order, right after the node starts.
    ///
    /// Defaults to an empty list.
    pub bootstrap: Vec<Contact>,
    /// Connect, read and write timeout for each outbound call.
    ///
    /// The longer this duration is, the longer lookups wait on dead peers.
    /// The shorter it is, the more busy peers get treated as dead.
    ///
    /// Defaults to [DEFAULT_REQUEST_TIMEOUT]
    pub request_timeout: Duration,
    /// Maximum number of outstanding probes in a lookup.
    ///
    /// Defaults to [DEFAULT_ALPHA]
    pub alpha: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id: None,
            network_id: DEFAULT_NETWORK_ID.to_string(),
            port: None,
            bootstrap: vec![],
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            alpha: DEFAULT_ALPHA,
        }
    }
}
