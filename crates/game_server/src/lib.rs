//! # Game Server
//!
//! The default subsystem set for a Rally process, plus the transport that
//! connects clients to the message router.
//!
//! The server core contains **no game logic**. It provides infrastructure and
//! delegates everything else to [`rally_dispatch::Service`]s:
//!
//! * **Logging** - `tracing` subscriber installation ([`systems::LoggerSystem`])
//! * **Metrics** - Prometheus registry and scrape endpoint ([`systems::MetricsSystem`])
//! * **Discovery** - Service catalog and change tracking ([`systems::DiscoverySystem`])
//! * **Clustering** - Node membership on top of discovery ([`systems::ClusterSystem`])
//! * **Transport** - HTTP unary calls and WebSocket streams ([`transport::HttpTransport`])
//!
//! ## Runlevels
//!
//! | name        | runlevel |
//! |-------------|----------|
//! | `logger`    | 0        |
//! | `metrics`   | 1        |
//! | `discovery` | 1        |
//! | `cluster`   | 2        |
//! | `services`  | 3        |
//! | `http`      | 4        |
//!
//! The kernel starts runlevels in ascending order and stops them in
//! descending order, so the transport only accepts connections once every
//! service is ready and closes them before any service is torn down.
//!
//! ## Message Flow
//!
//! 1. A client opens a WebSocket, choosing JSON or binary envelopes through
//!    the upgrade request's `Content-Type`
//! 2. Each inbound frame is handed to the [`rally_dispatch::MessageRouter`]
//! 3. Every message in the envelope runs through the handlers registered for
//!    its schema, in registration order
//! 4. Handlers answer through [`rally_dispatch::ConnectionContext::emit`],
//!    one frame per call
//!
//! ## Usage
//!
//! ```rust,no_run
//! use game_server::ServerBuilder;
//! use rally_kernel::SystemConfig;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let kernel = ServerBuilder::new(SystemConfig::empty()).build()?;
//! kernel.start().await?;
//! // ... wait for a shutdown signal ...
//! kernel.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod services;
pub mod systems;
pub mod transport;

pub use bootstrap::{default_kernel, BootstrapError, ServerBuilder};
pub use services::{PingRequest, PingResponse, PingService};
pub use transport::{HttpSettings, HttpTransport};
