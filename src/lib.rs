#![doc = include_str!("../README.md")]
//! ## Feature flags
#![doc = document_features::document_features!()]
//!

// Public modules
mod common;

mod dht;
mod error;
pub mod rpc;
pub mod server;

pub use crate::common::{
    Contact, Id, KBucket, ReplacementCheck, RoutingTable, TouchOutcome, BUCKET_SIZE, ID_BITS,
    ID_SIZE,
};
pub use dht::{Node, NodeBuilder, Testnet};
pub use error::{Error, Result};

pub mod messages {
    //! Protocol messages, for custom [Transport](crate::rpc::Transport)s.
    pub use crate::common::messages::*;
}
