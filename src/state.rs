//! State types for the RDP endpoints.
//!
//! The server is a two-state machine; the client is a straight line of
//! phases with error exits.  Transitions live in [`crate::server`] and
//! [`crate::client`]; this module only names the states.
//!
//! ```text
//!  server:  IDLE ──SYN──▶ CONNECTED ──FIN done / abandon / timeout──▶ IDLE
//!                            │  ▲
//!                            └──┘ SYN from same peer (reset)
//!
//!  client:  HANDSHAKE ─▶ REQUEST ─▶ STREAMING ─▶ TEARDOWN ─▶ CLOSED
//!               └───────────┴────────────┴── failure ──────────▲
//! ```

/// Server connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerState {
    /// No connection; reads block indefinitely.
    #[default]
    Idle,
    /// One live connection; reads are bounded by the connection timeout.
    Connected,
}

/// Where a client session currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientPhase {
    /// SYN sent (or about to be); waiting for the server's SYN.
    #[default]
    Handshake,
    /// Handshake done; the request is outstanding.
    Request,
    /// Consuming response chunks.
    Streaming,
    /// FIN answered; lingering for duplicate FINs.
    Teardown,
    /// Socket released, successfully or not.
    Closed,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::fmt::Display for ClientPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
