use thiserror::Error;

/// Errors surfaced by the mesh core.
///
/// Nothing in here is fatal: transport failures are retried by the next
/// heartbeat, and a rejected layout leaves the previous one in place.
#[derive(Debug, Error)]
pub enum MeshError {
    /// A layout failed structural validation (empty screen list, non-positive
    /// screen size, duplicate screen id, or a frame that is not the union of
    /// its screens).
    #[error("invalid layout: {0}")]
    InvalidLayout(String),

    /// The transport was already closed when a broadcast was attempted.
    #[error("transport closed")]
    TransportClosed,

    /// A broadcast failed for a transport-specific reason.
    #[error("transport send failed: {0}")]
    TransportSend(String),

    /// Boot options could not be read or parsed.
    #[error("invalid boot options: {0}")]
    InvalidConfig(String),
}
