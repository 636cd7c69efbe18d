//! Noble CCTP module messages

use cosmrs::Any;
use prost::Message;

pub const MSG_RECEIVE_MESSAGE_TYPE_URL: &str = "/circle.cctp.v1.MsgReceiveMessage";

/// Delivers an attested cross-chain message to the CCTP module
#[derive(Clone, PartialEq, Message)]
pub struct MsgReceiveMessage {
    #[prost(string, tag = "1")]
    pub from: String,
    #[prost(bytes = "vec", tag = "2")]
    pub message: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub attestation: Vec<u8>,
}

impl MsgReceiveMessage {
    pub fn to_any(&self) -> Any {
        Any {
            type_url: MSG_RECEIVE_MESSAGE_TYPE_URL.to_string(),
            value: self.encode_to_vec(),
        }
    }
}
