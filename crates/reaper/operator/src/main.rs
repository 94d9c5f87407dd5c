mod ctx;
mod error;
mod reconcile;

use reaper_core_k8s::manager::Ctx;

pub(crate) mod consts {
    use core::time::Duration;

    use reaper_core::env::infer;

    pub const NAME: &str = "reaper-operator";

    const ENV_RETRY_DELAY_SECONDS: &str = "REAPER_OPERATOR_RETRY_DELAY_SECONDS";

    /// Delay before retrying a pass that is waiting on an external condition
    /// (datacenter readiness, workload rollout, management API).
    pub fn infer_retry_delay() -> Duration {
        infer(ENV_RETRY_DELAY_SECONDS)
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(10))
    }
}

#[tokio::main]
async fn main() {
    self::ctx::reaper::Ctx::spawn_crd().await
}
