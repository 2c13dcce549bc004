//! External-facing surfaces layered on top of [`crate::runtimes::SessionManager`]:
//! an HTTP/SSE session API (`api` feature) and an MCP JSON-RPC server
//! (`llm` feature, since MCP is the agent-facing surface per this crate's
//! feature split).

pub mod auth;

#[cfg(feature = "api")]
pub mod http;

#[cfg(feature = "llm")]
pub mod mcp;
