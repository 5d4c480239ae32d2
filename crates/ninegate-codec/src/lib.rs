// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Encode and decode the 9P2000.L wire message set for NineGate.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Wire codec for the 9P message sets served by NineGate.
//!
//! The crate is split into the byte-level [`Buffer`] cursor, the field-exact
//! protocol [`types`], and the tagged message catalog in [`messages`]. Framing
//! (the `size[4] type[1] tag[2]` header) lives in `ninegate-transport`; this
//! crate only concerns itself with message bodies.

mod buffer;
pub mod messages;
pub mod types;

pub use buffer::Buffer;
pub use messages::{
    code, payload_fixed_size, CodecError, Dialect, Frame, MsgType, Payload, Rmessage, Tmessage,
    HEADER_LENGTH, MAXIMUM_LENGTH,
};
pub use types::*;
