//! Error taxonomy shared by the codec, channel, and RPC layers.
//!
//! Each layer owns its own error enum so callers can match on exactly the
//! failures that layer can produce. `RpcStatus` is the wire-level outcome
//! code carried in every response and absorbs both `CodecError` and
//! `ChannelError` via `From` at the boundaries where those layers feed
//! into the RPC protocol.

use thiserror::Error;

/// Failures from the [`crate::types::Type`] and [`crate::value::Value`] codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("syntax error: unrecognised tag byte")]
    SyntaxError,
    #[error("unexpected end of buffer")]
    UnexpectedEnd,
    #[error("buffer too small to hold the encoded value")]
    BufferTooSmall,
    #[error("struct type must declare at least one field")]
    EmptyStructType,
    #[error("struct type declares more than the maximum allowed fields")]
    StructTypeTooLarge,
    #[error("malformed type")]
    MalformedType,
}

/// Failures from a [`crate::channel::Channel`] implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("invalid arguments")]
    InvalidArgs,
    #[error("invalid message size")]
    InvalidMsgSize,
    #[error("buffer too small to hold the next message")]
    BufferTooSmall,
    #[error("channel is full")]
    ChannelFull,
    #[error("cannot write to channel")]
    CannotWrite,
    #[error("no incoming message")]
    NoIncomingMsg,
    #[error("unknown channel error")]
    Unknown,
}

/// Outcome code carried in every RPC response and returned by the client.
///
/// Numeric values are stable (and match the original wire protocol's status
/// byte), so they can be serialised directly as a single `u8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[repr(u8)]
pub enum RpcStatus {
    #[error("success")]
    Success = 0,
    #[error("syntax error")]
    SyntaxError = 1,
    #[error("unexpected end of buffer")]
    UnexpectedEnd = 2,
    #[error("buffer too small")]
    BufferTooSmall = 3,
    #[error("empty struct type")]
    EmptyStructType = 4,
    #[error("struct type too large")]
    StructTypeTooLarge = 5,
    #[error("malformed type")]
    MalformedType = 6,
    #[error("server creation error")]
    ServerCreationError = 7,
    #[error("server is full")]
    ServerFull = 8,
    #[error("unknown endpoint")]
    UnknownEndpoint = 9,
    #[error("argument mismatch")]
    ArgumentMismatch = 10,
    #[error("client channel is empty")]
    ClientChannelEmpty = 11,
    #[error("client channel error")]
    ClientChannelError = 12,
    #[error("bad request")]
    BadRequest = 13,
    #[error("server internal error")]
    ServerInternalError = 14,
    #[error("disconnect")]
    Disconnect = 15,
    #[error("bad response")]
    BadResponse = 16,
    #[error("client creation error")]
    ClientCreationError = 17,
    #[error("too many arguments")]
    TooManyArguments = 18,
}

impl RpcStatus {
    pub fn is_success(self) -> bool {
        matches!(self, RpcStatus::Success)
    }

    /// Recover a status from its wire byte. Unrecognised bytes map to
    /// `BadResponse`, since they can only arise from a corrupt or
    /// incompatible peer.
    pub fn from_wire_byte(byte: u8) -> RpcStatus {
        match byte {
            0 => RpcStatus::Success,
            1 => RpcStatus::SyntaxError,
            2 => RpcStatus::UnexpectedEnd,
            3 => RpcStatus::BufferTooSmall,
            4 => RpcStatus::EmptyStructType,
            5 => RpcStatus::StructTypeTooLarge,
            6 => RpcStatus::MalformedType,
            7 => RpcStatus::ServerCreationError,
            8 => RpcStatus::ServerFull,
            9 => RpcStatus::UnknownEndpoint,
            10 => RpcStatus::ArgumentMismatch,
            11 => RpcStatus::ClientChannelEmpty,
            12 => RpcStatus::ClientChannelError,
            13 => RpcStatus::BadRequest,
            14 => RpcStatus::ServerInternalError,
            15 => RpcStatus::Disconnect,
            17 => RpcStatus::ClientCreationError,
            18 => RpcStatus::TooManyArguments,
            _ => RpcStatus::BadResponse,
        }
    }

    pub fn to_wire_byte(self) -> u8 {
        self as u8
    }
}

impl From<CodecError> for RpcStatus {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::SyntaxError => RpcStatus::SyntaxError,
            CodecError::UnexpectedEnd => RpcStatus::UnexpectedEnd,
            CodecError::BufferTooSmall => RpcStatus::BufferTooSmall,
            CodecError::EmptyStructType => RpcStatus::EmptyStructType,
            CodecError::StructTypeTooLarge => RpcStatus::StructTypeTooLarge,
            CodecError::MalformedType => RpcStatus::MalformedType,
        }
    }
}

impl From<ChannelError> for RpcStatus {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::NoIncomingMsg => RpcStatus::ClientChannelEmpty,
            ChannelError::BufferTooSmall => RpcStatus::BufferTooSmall,
            _ => RpcStatus::ClientChannelError,
        }
    }
}
