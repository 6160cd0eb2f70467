//! Built-in services.

pub mod ping;

pub use ping::{PingRequest, PingResponse, PingService};
