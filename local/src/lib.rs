//! Local development server for the Driftbase realtime API.
//!
//! Implements the protocol surface the SDK talks to: the SSE streaming
//! endpoint, the subscription-set control endpoint, and publish/drop hooks
//! for development and testing. Reused as a library by the SDK's integration
//! tests and shipped as the `local` binary.

pub mod server;
