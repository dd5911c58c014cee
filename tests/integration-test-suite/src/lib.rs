//! Integration test suite for Agent Fabric.
//!
//! Cross-crate scenarios: bridges and clients wired end to end over an
//! in-process fabric, plus the streamable-HTTP handshake over loopback.

pub mod fabric;

#[cfg(test)]
mod fastmcp_http_tests;
#[cfg(test)]
mod mcp_stream_tests;
#[cfg(test)]
mod negotiation_tests;
#[cfg(test)]
mod patterns_tests;
#[cfg(test)]
mod slimrpc_tests;
