// Library root — exposes the session pieces to the binary and to integration tests.
// The binary entry point is src/main.rs.

pub mod config;
pub mod corpus;
pub mod error;
pub mod llm;
pub mod logger;
pub mod router;
pub mod session;
