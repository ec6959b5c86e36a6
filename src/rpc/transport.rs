//! Request/response transports.
//!
//! A [Transport] binds [Endpoint]s that serve incoming requests, and makes
//! outbound calls. [tcp] is the real one, [sim] keeps everything in process.

pub mod sim;
pub mod tcp;

use std::fmt::Debug;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::common::{
    ErrorSpecific, Message, MessageType, RequestSpecific, ResponseSpecific, ERROR_GENERIC,
    ERROR_METHOD_UNKNOWN, ERROR_PROTOCOL, ERROR_SERVER,
};
use crate::server::RequestHandler;
use crate::{Error, Result};

use super::VERSION;

/// The maximum duration to block a thread polling for shutdown or new connections.
pub const MAX_THREAD_BLOCK_DURATION: Duration = Duration::from_millis(10);

pub trait Transport: Debug + Send + Sync {
    /// Reserve a local address. `None` lets the transport pick a free port.
    fn bind(&self, port: Option<u16>) -> Result<Box<dyn Endpoint>>;

    /// Send `request` to `address` and wait for the reply.
    ///
    /// Fails with [Error::Unreachable] if the peer can not be dialed, or does
    /// not answer within `timeout`. Error replies are returned as
    /// [Error::NetworkMismatch] or [Error::Remote].
    fn call(
        &self,
        address: &str,
        request: &RequestSpecific,
        timeout: Duration,
    ) -> Result<ResponseSpecific>;
}

pub trait Endpoint: Debug + Send {
    /// The address peers can reach this endpoint at.
    fn local_addr(&self) -> &str;

    /// Start answering requests with `handler`, until the returned
    /// [Listener::shutdown] flag is set or the handler fails fatally.
    ///
    /// `request_timeout` bounds reading a request and writing its reply.
    fn serve(
        self: Box<Self>,
        handler: Arc<dyn RequestHandler>,
        request_timeout: Duration,
    ) -> Result<Listener>;
}

/// A running [Endpoint].
#[derive(Debug)]
pub struct Listener {
    /// Set to stop serving.
    pub shutdown: Arc<AtomicBool>,
    /// Returns the fatal error that stopped serving, if any.
    pub handle: JoinHandle<Result<()>>,
}

/// Decode an incoming request, answer it with `handler` and return the reply.
///
/// The second element is set if the handler failed fatally, in which case the
/// endpoint must stop serving after sending the reply.
pub(crate) fn dispatch(handler: &dyn RequestHandler, bytes: &[u8]) -> (Message, Option<Error>) {
    let (message_type, fatal) = match Message::from_bytes(bytes) {
        Ok(Message {
            message_type: MessageType::Request(request),
            ..
        }) => match handler.handle_request(request) {
            Ok(response) => (MessageType::Response(response), None),
            Err(error) => {
                let reply = MessageType::Error(error_reply(&error));

                if error.is_fatal() {
                    (reply, Some(error))
                } else {
                    (reply, None)
                }
            }
        },
        Ok(_) => (
            MessageType::Error(ErrorSpecific {
                code: ERROR_METHOD_UNKNOWN,
                description: "Expected a request".to_string(),
            }),
            None,
        ),
        Err(error) => (
            MessageType::Error(ErrorSpecific {
                code: ERROR_METHOD_UNKNOWN,
                description: error.to_string(),
            }),
            None,
        ),
    };

    (
        Message {
            version: Some(VERSION.to_vec()),
            message_type,
        },
        fatal,
    )
}

/// Turn the reply to `request` into a response or the matching [Error].
pub(crate) fn interpret_reply(
    request: &RequestSpecific,
    reply: Message,
) -> Result<ResponseSpecific> {
    match reply.message_type {
        MessageType::Response(response) => Ok(response),
        MessageType::Error(ErrorSpecific {
            code: ERROR_PROTOCOL,
            description,
        }) => Err(Error::NetworkMismatch {
            local: request.header.network_id.clone(),
            remote: description,
        }),
        MessageType::Error(ErrorSpecific { code, description }) => {
            Err(Error::Remote { code, description })
        }
        MessageType::Request(_) => Err(Error::InvalidMessage("Expected a response, got a request")),
    }
}

pub(crate) fn request_message(request: &RequestSpecific) -> Message {
    Message {
        version: Some(VERSION.to_vec()),
        message_type: MessageType::Request(request.clone()),
    }
}

fn error_reply(error: &Error) -> ErrorSpecific {
    match error {
        // The requester learns which network we are on.
        Error::NetworkMismatch { local, .. } => ErrorSpecific {
            code: ERROR_PROTOCOL,
            description: local.clone(),
        },
        Error::ValueStoreFailure(_) => ErrorSpecific {
            code: ERROR_SERVER,
            description: "Server Error".to_string(),
        },
        Error::InvalidIdentifier(_) | Error::InvalidMessage(_) | Error::BencodeError(_) => {
            ErrorSpecific {
                code: ERROR_METHOD_UNKNOWN,
                description: error.to_string(),
            }
        }
        _ => ErrorSpecific {
            code: ERROR_GENERIC,
            description: error.to_string(),
        },
    }
}
