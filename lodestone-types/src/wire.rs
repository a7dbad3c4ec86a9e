//! Wire messages exchanged between stores and with clients.
//!
//! Hand-written prost structs, so the encoding is plain protobuf without a
//! build-time protoc step. Field presence matters: `value` and `hash` on
//! [`WireValue`] are `optional` and must round-trip exactly, because the
//! merge rules distinguish full, hash-only and ttl-only records by presence.

use std::collections::HashMap;

/// One revision of one key as it travels between stores.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WireValue {
    #[prost(uint64, tag = "1")]
    pub version: u64,
    #[prost(string, tag = "2")]
    pub originator_id: ::prost::alloc::string::String,
    /// Present on full records only.
    #[prost(bytes = "vec", optional, tag = "3")]
    pub value: ::core::option::Option<::prost::alloc::vec::Vec<u8>>,
    #[prost(int64, tag = "4")]
    pub ttl_ms: i64,
    #[prost(uint64, tag = "5")]
    pub ttl_version: u64,
    /// Digest of (version, originator_id, value); present on hash dumps
    /// and on full records that carry one.
    #[prost(uint64, optional, tag = "6")]
    pub hash: ::core::option::Option<u64>,
}

/// A batch of key-values flooded to peers or delivered to subscribers.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WirePublication {
    #[prost(string, tag = "1")]
    pub area: ::prost::alloc::string::String,
    #[prost(map = "string, message", tag = "2")]
    pub key_vals: HashMap<::prost::alloc::string::String, WireValue>,
    /// Keys whose TTL ran out; a removal notice, never re-flooded.
    #[prost(string, repeated, tag = "3")]
    pub expired_keys: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    /// Nodes this publication has traversed; receivers refuse to forward
    /// to any peer already listed.
    #[prost(string, repeated, tag = "4")]
    pub node_ids: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(string, optional, tag = "5")]
    pub flood_root_id: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(int64, tag = "6")]
    pub timestamp_ms: i64,
}

/// Spanning-tree maintenance message (diffusing update algorithm).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WireDualMessage {
    /// The flood root this computation is about.
    #[prost(string, tag = "1")]
    pub root_id: ::prost::alloc::string::String,
    #[prost(enumeration = "DualMessageType", tag = "2")]
    pub msg_type: i32,
    /// Sender's reported distance to the root.
    #[prost(int64, tag = "3")]
    pub distance: i64,
    /// On updates: the receiver is the sender's elected tree parent.
    #[prost(bool, tag = "4")]
    pub you_are_parent: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WireDualMessages {
    #[prost(string, tag = "1")]
    pub sender_id: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "2")]
    pub messages: ::prost::alloc::vec::Vec<WireDualMessage>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
#[repr(i32)]
pub enum DualMessageType {
    Update = 0,
    Query = 1,
    Reply = 2,
}

/// Filter portion of dump/subscribe requests.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WireFilterParams {
    #[prost(string, repeated, tag = "1")]
    pub key_prefixes: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(string, repeated, tag = "2")]
    pub originator_ids: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    /// 0 = OR, 1 = AND.
    #[prost(int32, tag = "3")]
    pub operator: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetKeysRequest {
    #[prost(string, tag = "1")]
    pub area: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "2")]
    pub keys: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetKeyValsRequest {
    #[prost(string, tag = "1")]
    pub area: ::prost::alloc::string::String,
    #[prost(map = "string, message", tag = "2")]
    pub key_vals: HashMap<::prost::alloc::string::String, WireValue>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DumpKeyValsRequest {
    #[prost(string, tag = "1")]
    pub area: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub filters: ::core::option::Option<WireFilterParams>,
    /// Strip payloads from the reply, leaving digests.
    #[prost(bool, tag = "3")]
    pub do_not_publish_value: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DumpHashesRequest {
    #[prost(string, tag = "1")]
    pub area: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub filters: ::core::option::Option<WireFilterParams>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetPeersRequest {
    #[prost(string, tag = "1")]
    pub area: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WirePeerSpec {
    #[prost(string, tag = "1")]
    pub peer_name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub addr: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddPeersRequest {
    #[prost(string, tag = "1")]
    pub area: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "2")]
    pub peers: ::prost::alloc::vec::Vec<WirePeerSpec>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DelPeersRequest {
    #[prost(string, tag = "1")]
    pub area: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "2")]
    pub peer_names: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DualMessagesRequest {
    #[prost(string, tag = "1")]
    pub area: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub messages: ::core::option::Option<WireDualMessages>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FloodTopoSetRequest {
    #[prost(string, tag = "1")]
    pub area: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub root_id: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub peer_name: ::prost::alloc::string::String,
    /// True to pin the peer as a spanning-tree child, false to clear.
    #[prost(bool, tag = "4")]
    pub set_child: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetSptInfosRequest {
    #[prost(string, tag = "1")]
    pub area: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubscribeRequest {
    #[prost(string, repeated, tag = "1")]
    pub areas: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(message, optional, tag = "2")]
    pub filters: ::core::option::Option<WireFilterParams>,
    #[prost(bool, tag = "3")]
    pub ignore_ttl: bool,
    #[prost(bool, tag = "4")]
    pub do_not_publish_value: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetAreasRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AckReply {}

/// Request envelope for everything a store accepts.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StoreRequest {
    /// Name of the requesting node; used for split-horizon on floods.
    #[prost(string, tag = "1")]
    pub sender_id: ::prost::alloc::string::String,
    #[prost(
        oneof = "store_request::Request",
        tags = "2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14"
    )]
    pub request: ::core::option::Option<store_request::Request>,
}

pub mod store_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Request {
        #[prost(message, tag = "2")]
        GetKeys(super::GetKeysRequest),
        #[prost(message, tag = "3")]
        SetKeyVals(super::SetKeyValsRequest),
        #[prost(message, tag = "4")]
        DumpKeyVals(super::DumpKeyValsRequest),
        #[prost(message, tag = "5")]
        DumpHashes(super::DumpHashesRequest),
        #[prost(message, tag = "6")]
        GetPeers(super::GetPeersRequest),
        #[prost(message, tag = "7")]
        AddPeers(super::AddPeersRequest),
        #[prost(message, tag = "8")]
        DelPeers(super::DelPeersRequest),
        #[prost(message, tag = "9")]
        DualMessages(super::DualMessagesRequest),
        #[prost(message, tag = "10")]
        FloodTopoSet(super::FloodTopoSetRequest),
        #[prost(message, tag = "11")]
        GetSptInfos(super::GetSptInfosRequest),
        #[prost(message, tag = "12")]
        Subscribe(super::SubscribeRequest),
        /// Fire-and-forget flood from a peer; no reply is sent.
        #[prost(message, tag = "13")]
        Publication(super::WirePublication),
        #[prost(message, tag = "14")]
        GetAreas(super::GetAreasRequest),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WirePeerInfo {
    #[prost(string, tag = "1")]
    pub peer_name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub addr: ::prost::alloc::string::String,
    /// idle | syncing | established.
    #[prost(string, tag = "3")]
    pub state: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PeersReply {
    #[prost(message, repeated, tag = "1")]
    pub peers: ::prost::alloc::vec::Vec<WirePeerInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WireSptInfo {
    #[prost(string, tag = "1")]
    pub root_id: ::prost::alloc::string::String,
    #[prost(bool, tag = "2")]
    pub passive: bool,
    #[prost(int64, tag = "3")]
    pub cost: i64,
    #[prost(string, optional, tag = "4")]
    pub parent: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, repeated, tag = "5")]
    pub children: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SptInfosReply {
    #[prost(message, repeated, tag = "1")]
    pub infos: ::prost::alloc::vec::Vec<WireSptInfo>,
    /// Peers floods are currently sent to (tree children + parent).
    #[prost(string, repeated, tag = "2")]
    pub flood_peers: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(uint64, tag = "3")]
    pub updates_rx: u64,
    #[prost(uint64, tag = "4")]
    pub queries_rx: u64,
    #[prost(uint64, tag = "5")]
    pub replies_rx: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AreasReply {
    #[prost(string, repeated, tag = "1")]
    pub areas: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

/// Machine-readable failure class, mirrored from the store error kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
#[repr(i32)]
pub enum WireErrorCode {
    Internal = 0,
    InvalidArgument = 1,
    UnknownArea = 2,
    Lagged = 3,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WireError {
    #[prost(enumeration = "WireErrorCode", tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
}

/// Reply envelope.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StoreReply {
    #[prost(oneof = "store_reply::Reply", tags = "1, 2, 3, 4, 5, 6")]
    pub reply: ::core::option::Option<store_reply::Reply>,
}

pub mod store_reply {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Reply {
        #[prost(message, tag = "1")]
        Ack(super::AckReply),
        /// Key-value payloads (get/dump/hash-dump replies, and each
        /// message of a subscription stream).
        #[prost(message, tag = "2")]
        Publication(super::WirePublication),
        #[prost(message, tag = "3")]
        Peers(super::PeersReply),
        #[prost(message, tag = "4")]
        SptInfos(super::SptInfosReply),
        #[prost(message, tag = "5")]
        Areas(super::AreasReply),
        #[prost(message, tag = "6")]
        Error(super::WireError),
    }
}
