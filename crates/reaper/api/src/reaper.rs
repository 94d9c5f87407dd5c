use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{
    Affinity, PodSecurityContext, Probe, SecurityContext, Toleration,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::image::Image;

pub const DEFAULT_KEYSPACE: &str = "reaper_db";

/// The compiled-in Reaper release deployed when no image override is given.
pub const DEFAULT_VERSION: &str = "3.1.0";
pub const DEFAULT_IMAGE_REPOSITORY: &str = "thelastpickle";
pub const DEFAULT_IMAGE_NAME: &str = "cassandra-reaper";

/// Port serving the Reaper UI and management REST API.
pub const APP_PORT: i32 = 8080;
/// Port serving the Reaper health checks.
pub const ADMIN_PORT: i32 = 8081;

/// The name of the service generated for a Reaper resource. Deterministic so
/// that repeated reconciliations address the same object.
pub fn service_name(reaper_name: &str) -> String {
    format!("{reaper_name}-service")
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema, CustomResource)]
#[kube(
    group = "cassandra-reaper.io",
    version = "v1alpha1",
    kind = "Reaper",
    root = "ReaperCrd",
    status = "ReaperStatus",
    namespaced,
    printcolumn = r#"{
        "name": "DC",
        "type": "string",
        "description": "target datacenter name",
        "jsonPath": ".spec.datacenterRef.name"
    }"#,
    printcolumn = r#"{
        "name": "Status",
        "type": "string",
        "description": "progress of the reaper instance",
        "jsonPath": ".status.progress"
    }"#,
    printcolumn = r#"{
        "name": "Age",
        "type": "date",
        "jsonPath": ".metadata.creationTimestamp"
    }"#
)]
#[serde(rename_all = "camelCase")]
pub struct ReaperSpec {
    /// The CassandraDatacenter this Reaper instance manages. It is also used
    /// as the backend for persisting Reaper's own state. Reaper must be able
    /// to reach the JMX and CQL ports of the nodes in this datacenter.
    pub datacenter_ref: CassandraDatacenterRef,

    /// How this Reaper deployment relates to the target datacenter's network.
    /// For single-DC clusters the default (LOCAL) is fine; for multi-DC
    /// clusters EACH is recommended, one Reaper instance per DC.
    #[serde(default)]
    pub datacenter_availability: DatacenterAvailability,

    /// The image to use for the Reaper pod main container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_image: Option<Image>,

    /// The image to use for the Reaper pod init container, which performs
    /// schema migrations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_container_image: Option<Image>,

    #[serde(default = "ReaperSpec::default_service_account_name")]
    pub service_account_name: String,

    /// The keyspace to use to store Reaper's state. Created by the schema
    /// init container if it does not exist.
    #[serde(default = "ReaperSpec::default_keyspace")]
    pub keyspace: String,

    /// The secret holding the username and password Reaper uses for CQL
    /// connections to the datacenter. Leave unset if CQL authentication is
    /// not required. The secret must live in the Reaper's namespace and
    /// contain the two keys "username" and "password".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cassandra_user_secret_ref: Option<String>,

    /// The secret holding the username and password Reaper uses for JMX
    /// connections to the datacenter's nodes. Leave unset if JMX
    /// authentication is not required. Same layout as the CQL secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jmx_user_secret_ref: Option<String>,

    /// Auto scheduling properties. When enabled, Reaper dynamically creates
    /// a repair schedule for every non-system keyspace in the cluster, and
    /// removes it again when the keyspace disappears.
    #[serde(default)]
    pub auto_scheduling: AutoScheduling,

    /// Overrides the Reaper main container liveness probe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<Probe>,

    /// Overrides the Reaper main container readiness probe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<Probe>,

    /// Affinity applied to the Reaper pods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,

    /// Tolerations applied to the Reaper pods.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,

    /// Pod-level security context applied to the Reaper pods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_security_context: Option<PodSecurityContext>,

    /// Security context applied to the Reaper main container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,

    /// Security context applied to the schema-migration init container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_container_security_context: Option<SecurityContext>,
}

impl ReaperSpec {
    fn default_service_account_name() -> String {
        "default".into()
    }

    fn default_keyspace() -> String {
        DEFAULT_KEYSPACE.into()
    }

    pub fn default_image() -> Image {
        Image {
            repository: Some(DEFAULT_IMAGE_REPOSITORY.into()),
            name: Some(DEFAULT_IMAGE_NAME.into()),
            tag: Some(DEFAULT_VERSION.into()),
            ..Default::default()
        }
    }
}

/// References the target CassandraDatacenter that Reaper should manage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CassandraDatacenterRef {
    /// The datacenter name.
    pub name: String,

    /// The datacenter namespace. If empty, the datacenter is assumed to
    /// reside in the same namespace as the Reaper instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(
    Copy,
    Clone,
    Debug,
    Display,
    Default,
    EnumString,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum DatacenterAvailability {
    #[default]
    Local,
    All,
    Each,
}

/// Options to configure the auto scheduling of repairs for new keyspaces.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AutoScheduling {
    #[serde(default)]
    pub enabled: bool,

    /// The type of repair schedules to create. AUTO picks ADAPTIVE or
    /// INCREMENTAL depending on the Cassandra server version: ADAPTIVE for
    /// Cassandra 3, INCREMENTAL for Cassandra 4 and above.
    #[serde(default)]
    pub repair_type: RepairType,

    /// The percentage of unrepaired data over which an incremental repair is
    /// started. Only relevant for repair type INCREMENTAL.
    #[serde(default = "AutoScheduling::default_percent_unrepaired_threshold")]
    pub percent_unrepaired_threshold: i32,

    /// Delay before the schedule period starts. ISO-8601 duration string.
    #[serde(default = "AutoScheduling::default_initial_delay_period")]
    pub initial_delay_period: String,

    /// Interval between checks for whether to start a repair task. ISO-8601
    /// duration string.
    #[serde(default = "AutoScheduling::default_period_between_polls")]
    pub period_between_polls: String,

    /// Grace period before the first repair of a schedule is started.
    /// ISO-8601 duration string.
    #[serde(default = "AutoScheduling::default_time_before_first_schedule")]
    pub time_before_first_schedule: String,

    /// Time spacing between each of the created repair schedules. ISO-8601
    /// duration string.
    #[serde(default = "AutoScheduling::default_schedule_spread_period")]
    pub schedule_spread_period: String,

    /// Clusters excluded from the repair schedules.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_clusters: Vec<String>,

    /// Keyspaces excluded from the repair schedules.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_keyspaces: Vec<String>,
}

impl Default for AutoScheduling {
    fn default() -> Self {
        Self {
            enabled: false,
            repair_type: RepairType::default(),
            percent_unrepaired_threshold: Self::default_percent_unrepaired_threshold(),
            initial_delay_period: Self::default_initial_delay_period(),
            period_between_polls: Self::default_period_between_polls(),
            time_before_first_schedule: Self::default_time_before_first_schedule(),
            schedule_spread_period: Self::default_schedule_spread_period(),
            excluded_clusters: Vec::default(),
            excluded_keyspaces: Vec::default(),
        }
    }
}

impl AutoScheduling {
    const fn default_percent_unrepaired_threshold() -> i32 {
        10
    }

    fn default_initial_delay_period() -> String {
        "PT15S".into()
    }

    fn default_period_between_polls() -> String {
        "PT10M".into()
    }

    fn default_time_before_first_schedule() -> String {
        "PT5M".into()
    }

    fn default_schedule_spread_period() -> String {
        "PT6H".into()
    }
}

#[derive(
    Copy,
    Clone,
    Debug,
    Display,
    Default,
    EnumString,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum RepairType {
    /// A regular repair, neither adaptive nor incremental.
    Regular,
    /// An adaptive repair; most suited for Cassandra 3.
    Adaptive,
    /// An incremental repair; should only be used with Cassandra 4+.
    Incremental,
    /// ADAPTIVE or INCREMENTAL depending on the Cassandra server version.
    #[default]
    Auto,
}

/// A word summarizing the lifecycle of a Reaper resource.
#[derive(
    Copy,
    Clone,
    Debug,
    Display,
    Default,
    EnumString,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
pub enum ReaperProgress {
    /// Waiting for the datacenter to become ready.
    #[default]
    Pending,
    /// Waiting for the Reaper deployment and its service to become ready.
    Deploying,
    /// The Reaper instance is ready for work and is being connected to its
    /// target datacenter.
    Configuring,
    /// Reaper is up and running.
    Running,
}

#[derive(
    Copy,
    Clone,
    Debug,
    Display,
    EnumString,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
pub enum ReaperConditionType {
    Ready,
}

#[derive(
    Copy,
    Clone,
    Debug,
    Display,
    Default,
    EnumString,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReaperCondition {
    pub r#type: ReaperConditionType,
    pub status: ConditionStatus,

    /// The last time the condition transited from one status to another.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,

    /// Operator-readable detail on the current status, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The observed state of a Reaper resource.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReaperStatus {
    #[serde(default)]
    pub progress: ReaperProgress,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ReaperCondition>,
}

impl ReaperStatus {
    pub fn condition(&self, r#type: ReaperConditionType) -> Option<&ReaperCondition> {
        self.conditions
            .iter()
            .find(|condition| condition.r#type == r#type)
    }

    pub fn condition_status(&self, r#type: ReaperConditionType) -> ConditionStatus {
        self.condition(r#type)
            .map(|condition| condition.status)
            .unwrap_or_default()
    }

    /// Replaces the condition of the same type in place, preserving its
    /// position. The transition timestamp moves only when the status value
    /// actually changes; repeated confirmations of the same value keep it.
    pub fn set_condition(&mut self, condition: ReaperCondition) {
        match self
            .conditions
            .iter_mut()
            .find(|existing| existing.r#type == condition.r#type)
        {
            Some(existing) if existing.status == condition.status => {
                existing.message = condition.message;
            }
            Some(existing) => *existing = condition,
            None => self.conditions.push(condition),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.condition_status(ReaperConditionType::Ready) == ConditionStatus::True
    }

    pub fn set_ready(&mut self, now: DateTime<Utc>) {
        self.set_condition(ReaperCondition {
            r#type: ReaperConditionType::Ready,
            status: ConditionStatus::True,
            last_transition_time: Some(now),
            message: None,
        })
    }

    pub fn set_not_ready(&mut self, now: DateTime<Utc>, message: Option<String>) {
        self.set_condition(ReaperCondition {
            r#type: ReaperConditionType::Ready,
            status: ConditionStatus::False,
            last_transition_time: Some(now),
            message,
        })
    }
}
