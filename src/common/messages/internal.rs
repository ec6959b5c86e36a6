use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KrpcMessage {
    #[serde(default)]
    #[serde(rename = "v", with = "serde_bytes")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<Vec<u8>>,

    #[serde(flatten)]
    pub variant: KrpcMessageVariant,
}

impl KrpcMessage {
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<KrpcMessage, serde_bencode::Error> {
        let obj = serde_bencode::from_bytes(bytes.as_ref())?;
        Ok(obj)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_bencode::Error> {
        serde_bencode::to_bytes(self)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "y")]
pub enum KrpcMessageVariant {
    #[serde(rename = "q")]
    Request(KrpcRequestSpecific),

    #[serde(rename = "r")]
    Response(KrpcResponseSpecific),

    #[serde(rename = "e")]
    Error(KrpcErrorSpecific),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "q")]
pub enum KrpcRequestSpecific {
    #[serde(rename = "ping")]
    Ping {
        #[serde(rename = "a")]
        arguments: KrpcPingArguments,
    },

    #[serde(rename = "find_node")]
    FindNode {
        #[serde(rename = "a")]
        arguments: KrpcTargetArguments,
    },

    #[serde(rename = "find_value")]
    FindValue {
        #[serde(rename = "a")]
        arguments: KrpcTargetArguments,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "q")]
pub enum KrpcResponseSpecific {
    #[serde(rename = "ping")]
    Ping {
        #[serde(rename = "r")]
        arguments: KrpcPingArguments,
    },

    #[serde(rename = "find_node")]
    FindNode {
        #[serde(rename = "r")]
        arguments: KrpcFindNodeResponseArguments,
    },

    #[serde(rename = "find_value")]
    FindValue {
        #[serde(rename = "r")]
        arguments: KrpcFindValueResponseArguments,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KrpcErrorSpecific {
    #[serde(rename = "e")]
    pub error_info: Vec<serde_bencode::value::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KrpcContact {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,

    pub addr: String,
}

// === PING ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KrpcPingArguments {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,

    pub addr: String,

    pub net: String,
}

// === FIND NODE / FIND VALUE ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KrpcTargetArguments {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,

    pub addr: String,

    pub net: String,

    #[serde(with = "serde_bytes")]
    pub target: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KrpcFindNodeResponseArguments {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,

    pub addr: String,

    pub net: String,

    pub nodes: Vec<KrpcContact>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KrpcFindValueResponseArguments {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,

    pub addr: String,

    pub net: String,

    #[serde(default)]
    pub nodes: Vec<KrpcContact>,

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}
