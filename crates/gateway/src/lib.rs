//! Gateway: WebSocket server bridging a remote operator console to local
//! command execution.
//!
//! Lifecycle:
//! 1. Load config, resolve the fixed project root
//! 2. Bind the listening socket (fatal if the port is taken)
//! 3. Accept connections; one session per connection
//! 4. Classify inbound commands, spawn them, stream output frames back
//! 5. Drain on SIGINT/SIGTERM, force-exit after a fixed grace window
//!
//! Classification and process plumbing live in `coldwire-exec`; the wire
//! format lives in `coldwire-protocol`.

pub mod server;
pub mod session;
pub mod state;
