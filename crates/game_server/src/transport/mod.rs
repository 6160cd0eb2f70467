//! HTTP and WebSocket transport.
//!
//! * `POST <prefix>/<service path>/<Method>` invokes a unary method. The
//!   request's `Content-Type` selects the encoding of both request and
//!   response bodies.
//! * `GET <prefix><messages>` upgrades to a WebSocket. The upgrade request's
//!   `Content-Type` selects the envelope encoding for the whole connection;
//!   JSON is used when the header is absent.
//! * `GET <metrics path>` serves Prometheus metrics when the `metrics`
//!   subsystem is up.

mod http;
mod unary;
mod websocket;

pub use http::{
    build_app, join_path, HttpSettings, HttpTransport, TransportMetrics, TransportState,
};
