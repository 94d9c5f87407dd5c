use chrono::{DateTime, Utc};
use reaper_api::reaper::{ReaperProgress, ReaperStatus};

/// Snapshot of the observed world gathered during one reconciliation pass.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ReaperObservation {
    pub datacenter_ready: bool,
    pub service_exists: bool,
    pub deployment_exists: bool,
    pub desired_replicas: i32,
    pub ready_replicas: i32,
    /// Whether connect, registration and verification all succeeded against
    /// the managed Reaper application during this pass.
    pub configured: bool,
}

impl ReaperObservation {
    pub fn workload_ready(&self) -> bool {
        self.deployment_exists && self.ready_replicas >= self.desired_replicas
    }

    fn serving(&self) -> bool {
        self.datacenter_ready && self.service_exists && self.workload_ready() && self.configured
    }
}

/// Advances the readiness state machine by one observed pass. Pure: all I/O
/// happens in the reconciler shell that gathers the observation.
///
/// The progress label records that the serving topology was reached at least
/// once and never falls back afterwards; the Ready condition alone tracks
/// current health, and its transition timestamp moves only when the boolean
/// value changes.
pub fn advance(
    current: &ReaperStatus,
    observation: &ReaperObservation,
    now: DateTime<Utc>,
) -> ReaperStatus {
    let mut next = current.clone();
    next.progress = next_progress(current.progress, observation);
    if observation.serving() {
        next.set_ready(now);
    } else {
        next.set_not_ready(now, None);
    }
    next
}

fn next_progress(current: ReaperProgress, observation: &ReaperObservation) -> ReaperProgress {
    if current == ReaperProgress::Running {
        return ReaperProgress::Running;
    }
    if !observation.datacenter_ready {
        ReaperProgress::Pending
    } else if !observation.service_exists || !observation.workload_ready() {
        ReaperProgress::Deploying
    } else if !observation.configured {
        ReaperProgress::Configuring
    } else {
        ReaperProgress::Running
    }
}
