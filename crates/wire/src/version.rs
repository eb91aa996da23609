// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Protocol version negotiation performed by `Hello`.

/// Protocol spoken by this build.
pub const PROTOCOL_VERSION: u32 = 1;

/// Oldest protocol the dispatcher still serves.
pub const MIN_PROTOCOL_VERSION: u32 = 1;

/// Pick the protocol both sides speak, or `None` if the client is too old.
///
/// Newer clients are talked to at our version; they must tolerate the
/// fields they added being absent.
pub fn negotiate(client: u32) -> Option<u32> {
    if client < MIN_PROTOCOL_VERSION {
        None
    } else {
        Some(client.min(PROTOCOL_VERSION))
    }
}
