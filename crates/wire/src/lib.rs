// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatch protocol between agents, operators, and the dispatcher.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON payload. One
//! request and one response per connection.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod request;
mod response;
mod types;
mod version;
mod wire;

pub use request::Request;
pub use response::Response;
pub use types::{sha256_hex, AgentSummary, ErrorKind, JobSummary, PayloadManifest, RejectionCounts};
pub use version::{negotiate, MIN_PROTOCOL_VERSION, PROTOCOL_VERSION};
pub use wire::{
    call, decode, encode, read_message, read_request, write_message, write_response,
    ProtocolError, MAX_MESSAGE_SIZE,
};
