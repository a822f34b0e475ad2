// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: userlandfs broker wire protocol (fixed little-endian frames; bounded inputs)
//!
//! OWNERS: @runtime
//!
//! STATUS: Functional
//!
//! TEST_COVERAGE: Unit tests below + `tests/wire_decode.rs` (panic-freedom on arbitrary input)
//!
//! Discovery channel (`<product>.dispatcher` / `<product>.dispatcherReply`):
//!   - `CONNECT`     no payload
//!   - `CONNECT_ACK` exactly one [`ChannelDescriptor`]
//!
//! Session request channel (bodies follow the 8-byte nonce header added by the request port):
//!   - `UFS_DISCONNECT_REQUEST` empty body
//!   - `FS_CONNECT_REQUEST`     `[name_len:u16][name]`
//!   - `FS_CONNECT_REPLY`       `[status:i32][caps:u64][fs_type:u32][count:u32][descriptor; count]`
//!
//! Control channel (`<product>.dispatcherControl`):
//!   - `REGISTER_SERVICE`       `[reply_port:u32][pid:u32][name_len:u16][name]` followed by the
//!                              contact `[caps:u64][fs_type:u32][count:u32][descriptor; count]`
//!   - `REGISTER_SERVICE_REPLY` `[status:i32]`
//!   - `WORKER_EXITED`          `[pid:u32]`

use core::fmt;

use crate::PortId;

const fn fourcc(tag: &[u8; 4]) -> i32 {
    i32::from_be_bytes(*tag)
}

/// Discovery request, client → dispatcher.
pub const CONNECT: i32 = fourcc(b"cnct");
/// Discovery reply carrying the session request channel.
pub const CONNECT_ACK: i32 = fourcc(b"cack");
/// Worker registration, worker → dispatcher.
pub const REGISTER_SERVICE: i32 = fourcc(b"rgfs");
/// Registration verdict, dispatcher → worker.
pub const REGISTER_SERVICE_REPLY: i32 = fourcc(b"rgrp");
/// Worker exit notification, supervisor → dispatcher.
pub const WORKER_EXITED: i32 = fourcc(b"wext");

/// Session request: end the session's request loop.
pub const UFS_DISCONNECT_REQUEST: i32 = 0;
/// Session request: connect to the named filesystem.
pub const FS_CONNECT_REQUEST: i32 = 1;
/// Session reply to [`FS_CONNECT_REQUEST`].
pub const FS_CONNECT_REPLY: i32 = 2;

/// Success.
pub const STATUS_OK: i32 = 0;
/// No listener, channel or executable at the expected name.
pub const STATUS_NOT_FOUND: i32 = 1;
/// Malformed or undersized payload.
pub const STATUS_BAD_DATA: i32 = 2;
/// Naming conflict or permission failure.
pub const STATUS_DENIED: i32 = 3;
/// Resource setup failed.
pub const STATUS_NO_MEMORY: i32 = 4;
/// The discovery registry is already claimed.
pub const STATUS_ALREADY_RUNNING: i32 = 5;
/// The worker exited before completing registration.
pub const STATUS_ABORTED: i32 = 6;
/// The caller's wait budget expired.
pub const STATUS_TIMEOUT: i32 = 7;
/// The caller cancelled its wait.
pub const STATUS_CANCELLED: i32 = 8;
/// A channel closed underneath the call.
pub const STATUS_DISCONNECTED: i32 = 9;

/// Longest accepted filesystem name, in bytes.
pub const MAX_NAME_LEN: usize = 255;
/// Most contact channels a single service may publish.
pub const MAX_CONTACT_CHANNELS: usize = 32;
/// Largest `FS_CONNECT_REPLY` body: status plus a full contact.
pub const MAX_CONNECT_REPLY_LEN: usize = 4 + MAX_CONTACT_LEN;
/// Largest `REGISTER_SERVICE` payload: reply port, pid, a full name and a full contact.
pub const MAX_REGISTER_SERVICE_LEN: usize = 4 + 4 + 2 + MAX_NAME_LEN + MAX_CONTACT_LEN;

// Capabilities, fs type and channel count precede the channels.
const MAX_CONTACT_LEN: usize = 8 + 4 + 4 + MAX_CONTACT_CHANNELS * ChannelDescriptor::WIRE_SIZE;

/// Published port names of the dispatcher for one product.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WellKnownNames {
    /// Discovery key and name of the port CONNECT is sent to.
    pub connect: String,
    /// Name of the port CONNECT_ACK comes back on.
    pub connect_reply: String,
    /// Name of the port workers and the supervisor report to.
    pub control: String,
}

impl WellKnownNames {
    /// Names for `product`, e.g. `userlandfs.dispatcher`.
    pub fn for_product(product: &str) -> Self {
        Self {
            connect: format!("{product}.dispatcher"),
            connect_reply: format!("{product}.dispatcherReply"),
            control: format!("{product}.dispatcherControl"),
        }
    }
}

/// Identifier the supervisor assigns to a worker process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(u32);

impl ProcessId {
    /// Wraps a raw id.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw numeric value.
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {}", self.0)
    }
}

/// Describes a request channel: the port requests go to, the port replies come back on, and
/// the payload capacity of both.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelDescriptor {
    /// Port the channel owner receives requests on.
    pub request: PortId,
    /// Port the channel owner sends replies to.
    pub reply: PortId,
    /// Maximum payload size accepted by both ports.
    pub capacity: u32,
}

impl ChannelDescriptor {
    /// Encoded size in bytes.
    pub const WIRE_SIZE: usize = 12;

    /// Creates a descriptor.
    pub const fn new(request: PortId, reply: PortId, capacity: u32) -> Self {
        Self { request, reply, capacity }
    }

    /// Appends the encoded descriptor to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.request.raw().to_le_bytes());
        out.extend_from_slice(&self.reply.raw().to_le_bytes());
        out.extend_from_slice(&self.capacity.to_le_bytes());
    }

    /// Encodes the descriptor into a fresh buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::WIRE_SIZE);
        self.encode_into(&mut out);
        out
    }

    /// Decodes a descriptor from exactly [`Self::WIRE_SIZE`] bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != Self::WIRE_SIZE {
            return Err(DecodeError::Length { expected: Self::WIRE_SIZE, actual: bytes.len() });
        }
        let mut reader = Reader::new(bytes);
        Self::read(&mut reader)
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            request: PortId::from_raw(reader.u32()?),
            reply: PortId::from_raw(reader.u32()?),
            capacity: reader.u32()?,
        })
    }
}

/// Opaque capability mask a filesystem server reports for its volumes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FsCapabilities(u64);

impl FsCapabilities {
    /// Wraps a raw mask.
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Raw mask.
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Returns `true` if capability bit `index` is set.
    pub const fn has(self, index: u32) -> bool {
        index < 64 && (self.0 >> index) & 1 == 1
    }
}

/// Which client API the filesystem server implements.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ClientFsType {
    /// Legacy add-on interface.
    Legacy,
    /// Native add-on interface.
    #[default]
    Native,
    /// FUSE-style interface.
    Fuse,
}

impl ClientFsType {
    fn to_wire(self) -> u32 {
        match self {
            Self::Legacy => 0,
            Self::Native => 1,
            Self::Fuse => 2,
        }
    }

    fn from_wire(raw: u32) -> Result<Self, DecodeError> {
        match raw {
            0 => Ok(Self::Legacy),
            1 => Ok(Self::Native),
            2 => Ok(Self::Fuse),
            other => Err(DecodeError::UnknownFsType(other)),
        }
    }
}

/// Everything a client needs to talk to a ready filesystem server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceContact {
    /// Request channels published by the server.
    pub channels: Vec<ChannelDescriptor>,
    /// Capability mask reported by the server.
    pub capabilities: FsCapabilities,
    /// Client API implemented by the server.
    pub fs_type: ClientFsType,
}

impl ServiceContact {
    /// Creates a contact with default capabilities.
    pub fn new(channels: Vec<ChannelDescriptor>) -> Self {
        Self { channels, ..Self::default() }
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.capabilities.bits().to_le_bytes());
        out.extend_from_slice(&self.fs_type.to_wire().to_le_bytes());
        out.extend_from_slice(&(self.channels.len() as u32).to_le_bytes());
        for channel in &self.channels {
            channel.encode_into(out);
        }
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let capabilities = FsCapabilities::from_bits(reader.u64()?);
        let fs_type = ClientFsType::from_wire(reader.u32()?)?;
        let count = reader.u32()? as usize;
        if count > MAX_CONTACT_CHANNELS {
            return Err(DecodeError::TooLarge);
        }
        let mut channels = Vec::with_capacity(count);
        for _ in 0..count {
            channels.push(ChannelDescriptor::read(reader)?);
        }
        Ok(Self { channels, capabilities, fs_type })
    }
}

/// Decode errors for broker frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[must_use = "decode errors must be handled"]
pub enum DecodeError {
    /// Frame ended before a field was complete.
    #[error("frame truncated")]
    Truncated,
    /// Frame had bytes left after the last field.
    #[error("trailing bytes in frame")]
    Trailing,
    /// Fixed-size frame had the wrong length.
    #[error("expected {expected} bytes, got {actual}")]
    Length {
        /// Required length.
        expected: usize,
        /// Observed length.
        actual: usize,
    },
    /// A length prefix exceeded its bound.
    #[error("field exceeds its bound")]
    TooLarge,
    /// A name was not valid UTF-8.
    #[error("name is not utf-8")]
    Utf8,
    /// Unknown client fs type discriminant.
    #[error("unknown client fs type {0}")]
    UnknownFsType(u32),
    /// Frame carried an unexpected message code.
    #[error("unexpected message code {0:#x}")]
    UnexpectedCode(i32),
}

/// `FS_CONNECT_REQUEST` body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Name of the filesystem to connect to.
    pub name: String,
}

impl ConnectRequest {
    /// Encodes the request body.
    pub fn encode(&self) -> Result<Vec<u8>, DecodeError> {
        let mut out = Vec::with_capacity(2 + self.name.len());
        write_name(&mut out, &self.name)?;
        Ok(out)
    }

    /// Decodes a request body.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(body);
        let name = reader.name()?;
        reader.finish()?;
        Ok(Self { name })
    }
}

/// `FS_CONNECT_REPLY` body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectReply {
    /// Wire status; the contact is meaningful only for [`STATUS_OK`].
    pub status: i32,
    /// Contact information of the ready server.
    pub contact: ServiceContact,
}

impl ConnectReply {
    /// Successful reply.
    pub fn ok(contact: ServiceContact) -> Self {
        Self { status: STATUS_OK, contact }
    }

    /// Failed reply with an empty contact.
    pub fn failed(status: i32) -> Self {
        Self { status, contact: ServiceContact::default() }
    }

    /// Encodes the reply body.
    pub fn encode(&self) -> Vec<u8> {
        let channels = self.contact.channels.len();
        let mut out = Vec::with_capacity(20 + channels * ChannelDescriptor::WIRE_SIZE);
        out.extend_from_slice(&self.status.to_le_bytes());
        self.contact.write(&mut out);
        out
    }

    /// Decodes a reply body.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(body);
        let status = reader.i32()?;
        let contact = ServiceContact::read(&mut reader)?;
        reader.finish()?;
        Ok(Self { status, contact })
    }
}

/// `REGISTER_SERVICE` payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterService {
    /// Port the verdict is sent to.
    pub reply_port: PortId,
    /// Process id of the registering worker.
    pub pid: ProcessId,
    /// Filesystem name the worker serves.
    pub name: String,
    /// Contact information to publish.
    pub contact: ServiceContact,
}

impl RegisterService {
    /// Encodes the payload.
    pub fn encode(&self) -> Result<Vec<u8>, DecodeError> {
        if self.contact.channels.len() > MAX_CONTACT_CHANNELS {
            return Err(DecodeError::TooLarge);
        }
        let mut out = Vec::with_capacity(32 + self.name.len());
        out.extend_from_slice(&self.reply_port.raw().to_le_bytes());
        out.extend_from_slice(&self.pid.raw().to_le_bytes());
        write_name(&mut out, &self.name)?;
        self.contact.write(&mut out);
        Ok(out)
    }

    /// Decodes the payload.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(payload);
        let reply_port = PortId::from_raw(reader.u32()?);
        let pid = ProcessId::from_raw(reader.u32()?);
        let name = reader.name()?;
        let contact = ServiceContact::read(&mut reader)?;
        reader.finish()?;
        Ok(Self { reply_port, pid, name, contact })
    }
}

/// Encodes a `REGISTER_SERVICE_REPLY` payload.
pub fn encode_status(status: i32) -> Vec<u8> {
    status.to_le_bytes().to_vec()
}

/// Decodes a `REGISTER_SERVICE_REPLY` payload.
pub fn decode_status(payload: &[u8]) -> Result<i32, DecodeError> {
    let mut reader = Reader::new(payload);
    let status = reader.i32()?;
    reader.finish()?;
    Ok(status)
}

/// Encodes a `WORKER_EXITED` payload.
pub fn encode_worker_exited(pid: ProcessId) -> Vec<u8> {
    pid.raw().to_le_bytes().to_vec()
}

/// Decodes a `WORKER_EXITED` payload.
pub fn decode_worker_exited(payload: &[u8]) -> Result<ProcessId, DecodeError> {
    let mut reader = Reader::new(payload);
    let pid = ProcessId::from_raw(reader.u32()?);
    reader.finish()?;
    Ok(pid)
}

/// Decodes a `CONNECT_ACK` message; the payload must be exactly one descriptor.
pub fn decode_connect_ack(code: i32, payload: &[u8]) -> Result<ChannelDescriptor, DecodeError> {
    if code != CONNECT_ACK {
        return Err(DecodeError::UnexpectedCode(code));
    }
    ChannelDescriptor::decode(payload)
}

fn write_name(out: &mut Vec<u8>, name: &str) -> Result<(), DecodeError> {
    if name.len() > MAX_NAME_LEN {
        return Err(DecodeError::TooLarge);
    }
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(name.as_bytes());
    Ok(())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(len).ok_or(DecodeError::Truncated)?;
        let slice = self.bytes.get(self.pos..end).ok_or(DecodeError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        self.array().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        self.array().map(u32::from_le_bytes)
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        self.array().map(i32::from_le_bytes)
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        self.array().map(u64::from_le_bytes)
    }

    fn name(&mut self) -> Result<String, DecodeError> {
        let len = self.u16()? as usize;
        if len > MAX_NAME_LEN {
            return Err(DecodeError::TooLarge);
        }
        let raw = self.take(len)?;
        core::str::from_utf8(raw).map(str::to_string).map_err(|_| DecodeError::Utf8)
    }

    fn finish(&self) -> Result<(), DecodeError> {
        if self.pos == self.bytes.len() {
            Ok(())
        } else {
            Err(DecodeError::Trailing)
        }
    }
}
