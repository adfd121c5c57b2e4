//! zrpc Common Types and Framing
//!
//! This crate provides the protocol definitions and the framed record
//! codec shared by every zrpc component.
//!
//! # Overview
//!
//! A zrpc connection starts with a JSON handshake line ([`Options`])
//! followed by framed records. One record is two length-prefixed frames:
//! a [`Header`] frame and a body frame, both serialised with the codec
//! negotiated in the handshake.
//!
//! ```text
//! [options JSON]\n [4-byte len][header] [4-byte len][body] ...
//! ```
//!
//! # Components
//!
//! - [`protocol`] - Handshake options, record header, rpc addresses,
//!   wire constants, and the [`RpcError`] type
//! - [`codec`] - Body serialisation backends and the framed
//!   reader/writer pair

pub mod codec;
pub mod protocol;

pub use codec::{CodecKind, RecordReader, RecordWriter};
pub use protocol::error::{Result, RpcError};
pub use protocol::{Header, Options, RpcAddr};
