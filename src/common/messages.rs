//! Serialize and deserialize Krpc-like messages.

mod internal;

use std::convert::TryInto;

use serde_bencode::value::Value;

use crate::common::{Contact, Id};
use crate::{Error, Result};

/// Generic error, for anything without a more specific code.
pub const ERROR_GENERIC: i32 = 201;
/// The responder failed to serve the request (value store failure).
pub const ERROR_SERVER: i32 = 202;
/// Protocol error. Sent on a network id mismatch, with the responder's network id as description.
pub const ERROR_PROTOCOL: i32 = 203;
/// Unknown method or malformed request.
pub const ERROR_METHOD_UNKNOWN: i32 = 204;

#[derive(Debug, PartialEq, Clone)]
pub struct Message {
    /// The version of the requester or responder.
    pub version: Option<Vec<u8>>,

    pub message_type: MessageType,
}

#[derive(Debug, PartialEq, Clone)]
pub enum MessageType {
    Request(RequestSpecific),

    Response(ResponseSpecific),

    Error(ErrorSpecific),
}

#[derive(Debug, PartialEq, Clone)]
pub struct ErrorSpecific {
    pub code: i32,
    pub description: String,
}

/// Sent with every request and every response.
#[derive(Debug, PartialEq, Clone)]
pub struct Header {
    pub sender: Contact,
    pub network_id: String,
}

#[derive(Debug, PartialEq, Clone)]
pub struct RequestSpecific {
    pub header: Header,
    pub request_type: RequestTypeSpecific,
}

#[derive(Debug, PartialEq, Clone)]
pub enum RequestTypeSpecific {
    Ping,
    FindNode(FindNodeRequestArguments),
    FindValue(FindValueRequestArguments),
}

#[derive(Debug, PartialEq, Clone)]
pub struct ResponseSpecific {
    pub header: Header,
    pub response_type: ResponseTypeSpecific,
}

#[derive(Debug, PartialEq, Clone)]
pub enum ResponseTypeSpecific {
    Ping,
    FindNode(FindNodeResponseArguments),
    FindValue(FindValueResponseArguments),
}

// === FIND_NODE ===

#[derive(Debug, PartialEq, Clone)]
pub struct FindNodeRequestArguments {
    pub target: Id,
}

#[derive(Debug, PartialEq, Clone)]
pub struct FindNodeResponseArguments {
    pub contacts: Vec<Contact>,
}

// === FIND_VALUE ===

#[derive(Debug, PartialEq, Clone)]
pub struct FindValueRequestArguments {
    pub target: Id,
}

/// A find-value response carries either the value or closer contacts, never both.
#[derive(Debug, PartialEq, Clone)]
pub enum FindValueResponseArguments {
    Value(String),
    Contacts(Vec<Contact>),
}

impl RequestTypeSpecific {
    pub fn method_name(&self) -> &'static str {
        match self {
            RequestTypeSpecific::Ping => "ping",
            RequestTypeSpecific::FindNode(_) => "find_node",
            RequestTypeSpecific::FindValue(_) => "find_value",
        }
    }
}

impl ResponseTypeSpecific {
    pub fn method_name(&self) -> &'static str {
        match self {
            ResponseTypeSpecific::Ping => "ping",
            ResponseTypeSpecific::FindNode(_) => "find_node",
            ResponseTypeSpecific::FindValue(_) => "find_value",
        }
    }
}

impl Message {
    fn into_serde_message(self) -> internal::KrpcMessage {
        internal::KrpcMessage {
            version: self.version,
            variant: match self.message_type {
                MessageType::Request(RequestSpecific {
                    header,
                    request_type,
                }) => internal::KrpcMessageVariant::Request(match request_type {
                    RequestTypeSpecific::Ping => internal::KrpcRequestSpecific::Ping {
                        arguments: internal::KrpcPingArguments {
                            id: header.sender.id().to_vec(),
                            addr: header.sender.address().to_string(),
                            net: header.network_id,
                        },
                    },
                    RequestTypeSpecific::FindNode(find_node_args) => {
                        internal::KrpcRequestSpecific::FindNode {
                            arguments: target_arguments(header, &find_node_args.target),
                        }
                    }
                    RequestTypeSpecific::FindValue(find_value_args) => {
                        internal::KrpcRequestSpecific::FindValue {
                            arguments: target_arguments(header, &find_value_args.target),
                        }
                    }
                }),

                MessageType::Response(ResponseSpecific {
                    header,
                    response_type,
                }) => internal::KrpcMessageVariant::Response(match response_type {
                    ResponseTypeSpecific::Ping => internal::KrpcResponseSpecific::Ping {
                        arguments: internal::KrpcPingArguments {
                            id: header.sender.id().to_vec(),
                            addr: header.sender.address().to_string(),
                            net: header.network_id,
                        },
                    },
                    ResponseTypeSpecific::FindNode(find_node_args) => {
                        internal::KrpcResponseSpecific::FindNode {
                            arguments: internal::KrpcFindNodeResponseArguments {
                                id: header.sender.id().to_vec(),
                                addr: header.sender.address().to_string(),
                                net: header.network_id,
                                nodes: contacts_to_serde(&find_node_args.contacts),
                            },
                        }
                    }
                    ResponseTypeSpecific::FindValue(find_value_args) => {
                        let (nodes, value) = match find_value_args {
                            FindValueResponseArguments::Value(value) => (vec![], Some(value)),
                            FindValueResponseArguments::Contacts(contacts) => {
                                (contacts_to_serde(&contacts), None)
                            }
                        };

                        internal::KrpcResponseSpecific::FindValue {
                            arguments: internal::KrpcFindValueResponseArguments {
                                id: header.sender.id().to_vec(),
                                addr: header.sender.address().to_string(),
                                net: header.network_id,
                                nodes,
                                value,
                            },
                        }
                    }
                }),

                MessageType::Error(err) => {
                    internal::KrpcMessageVariant::Error(internal::KrpcErrorSpecific {
                        error_info: vec![
                            Value::Int(err.code.into()),
                            Value::Bytes(err.description.into()),
                        ],
                    })
                }
            },
        }
    }

    fn from_serde_message(msg: internal::KrpcMessage) -> Result<Message> {
        Ok(Message {
            version: msg.version,
            message_type: match msg.variant {
                internal::KrpcMessageVariant::Request(req_variant) => {
                    MessageType::Request(match req_variant {
                        internal::KrpcRequestSpecific::Ping { arguments } => RequestSpecific {
                            header: header(arguments.id, arguments.addr, arguments.net)?,
                            request_type: RequestTypeSpecific::Ping,
                        },
                        internal::KrpcRequestSpecific::FindNode { arguments } => RequestSpecific {
                            request_type: RequestTypeSpecific::FindNode(FindNodeRequestArguments {
                                target: Id::from_bytes(&arguments.target)?,
                            }),
                            header: header(arguments.id, arguments.addr, arguments.net)?,
                        },
                        internal::KrpcRequestSpecific::FindValue { arguments } => {
                            RequestSpecific {
                                request_type: RequestTypeSpecific::FindValue(
                                    FindValueRequestArguments {
                                        target: Id::from_bytes(&arguments.target)?,
                                    },
                                ),
                                header: header(arguments.id, arguments.addr, arguments.net)?,
                            }
                        }
                    })
                }
                internal::KrpcMessageVariant::Response(res_variant) => {
                    MessageType::Response(match res_variant {
                        internal::KrpcResponseSpecific::Ping { arguments } => ResponseSpecific {
                            header: header(arguments.id, arguments.addr, arguments.net)?,
                            response_type: ResponseTypeSpecific::Ping,
                        },
                        internal::KrpcResponseSpecific::FindNode { arguments } => {
                            ResponseSpecific {
                                response_type: ResponseTypeSpecific::FindNode(
                                    FindNodeResponseArguments {
                                        contacts: serde_to_contacts(arguments.nodes)?,
                                    },
                                ),
                                header: header(arguments.id, arguments.addr, arguments.net)?,
                            }
                        }
                        internal::KrpcResponseSpecific::FindValue { arguments } => {
                            let response = match arguments.value {
                                Some(value) => {
                                    if !arguments.nodes.is_empty() {
                                        return Err(Error::InvalidMessage(
                                            "find_value response with both a value and nodes",
                                        ));
                                    }
                                    FindValueResponseArguments::Value(value)
                                }
                                None => FindValueResponseArguments::Contacts(serde_to_contacts(
                                    arguments.nodes,
                                )?),
                            };

                            ResponseSpecific {
                                response_type: ResponseTypeSpecific::FindValue(response),
                                header: header(arguments.id, arguments.addr, arguments.net)?,
                            }
                        }
                    })
                }
                internal::KrpcMessageVariant::Error(err) => {
                    if err.error_info.len() < 2 {
                        return Err(Error::InvalidMessage(
                            "Error packet should have at least 2 elements",
                        ));
                    }
                    MessageType::Error(ErrorSpecific {
                        code: match err.error_info[0] {
                            Value::Int(code) => match code.try_into() {
                                Ok(code) => code,
                                Err(_) => {
                                    return Err(Error::InvalidMessage("error parsing error code"))
                                }
                            },
                            _ => {
                                return Err(Error::InvalidMessage(
                                    "Expected error code as first element",
                                ))
                            }
                        },
                        description: match &err.error_info[1] {
                            Value::Bytes(desc) => match std::str::from_utf8(desc) {
                                Ok(desc) => desc.to_string(),
                                Err(_) => {
                                    return Err(Error::InvalidMessage(
                                        "error parsing error description",
                                    ))
                                }
                            },
                            _ => {
                                return Err(Error::InvalidMessage(
                                    "Expected description as second element",
                                ))
                            }
                        },
                    })
                }
            },
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.clone().into_serde_message().to_bytes()?)
    }

    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Message> {
        Message::from_serde_message(internal::KrpcMessage::from_bytes(bytes)?)
    }
}

impl ResponseSpecific {
    /// Contacts carried by a find-node or a find-value response without a value.
    pub fn closer_nodes(&self) -> Option<&[Contact]> {
        match &self.response_type {
            ResponseTypeSpecific::Ping => None,
            ResponseTypeSpecific::FindNode(arguments) => Some(&arguments.contacts),
            ResponseTypeSpecific::FindValue(FindValueResponseArguments::Contacts(contacts)) => {
                Some(contacts)
            }
            ResponseTypeSpecific::FindValue(FindValueResponseArguments::Value(_)) => None,
        }
    }
}

fn header(id: Vec<u8>, addr: String, net: String) -> Result<Header> {
    Ok(Header {
        sender: Contact::new(Id::from_bytes(id)?, addr),
        network_id: net,
    })
}

fn target_arguments(header: Header, target: &Id) -> internal::KrpcTargetArguments {
    internal::KrpcTargetArguments {
        id: header.sender.id().to_vec(),
        addr: header.sender.address().to_string(),
        net: header.network_id,
        target: target.to_vec(),
    }
}

fn contacts_to_serde(contacts: &[Contact]) -> Vec<internal::KrpcContact> {
    contacts
        .iter()
        .map(|contact| internal::KrpcContact {
            id: contact.id().to_vec(),
            addr: contact.address().to_string(),
        })
        .collect()
}

fn serde_to_contacts(nodes: Vec<internal::KrpcContact>) -> Result<Vec<Contact>> {
    nodes
        .into_iter()
        .map(|node| Ok(Contact::new(Id::from_bytes(node.id)?, node.addr)))
        .collect()
}
