//! Wire protocol types shared between the Hearth client runtime and the
//! engine's session endpoint.
//!
//! Everything here is plain data: frames, the startup greeting, version
//! values, endpoint coordinates, and the query document well-formedness
//! scan. No I/O happens in this crate.

mod document;
mod endpoint;
mod greeting;
mod version;
mod wire;

pub use document::{ensure_well_formed, DocumentError};
pub use endpoint::{Endpoint, ParseEndpointError};
pub use greeting::Greeting;
pub use version::{ParseVersionError, Version, VersionRange};
pub use wire::{
    ClientInfo, ClientMessage, EngineMessage, ErrorCode, ErrorPayload, QueryBody, Reply,
    ReplyBody, PROTOCOL_REVISION,
};
