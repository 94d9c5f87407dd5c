use thiserror::Error;

/// Outcomes a reconciliation pass can fail with. The reconciler is the only
/// place that turns these into retry-vs-report decisions; none of them ever
/// aborts the process.
#[derive(Debug, Error)]
pub enum Error {
    /// A transient infrastructure error: conflict, timeout, unavailability.
    #[error("kubernetes api error: {0}")]
    Kube(#[from] ::kube::Error),

    /// A transient management-protocol error.
    #[error("reaper management api error: {0}")]
    Manager(#[from] ::reaper_client::Error),

    /// Malformed or contradictory desired state; reported through the
    /// resource status rather than retried at a tight interval.
    #[error("invalid reaper configuration: {0}")]
    InvalidConfig(String),
}
