use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use semver::Version;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::reaper::ConditionStatus;

/// Read-side mirror of the CassandraDatacenter resource owned by the
/// datacenter's own operator. Only the fields this operator consumes or
/// patches are modeled; everything else is preserved by merge patching.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema, CustomResource)]
#[kube(
    group = "cassandra.datastax.com",
    version = "v1beta1",
    kind = "CassandraDatacenter",
    root = "CassandraDatacenterCrd",
    status = "CassandraDatacenterStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CassandraDatacenterSpec {
    /// The name of the logical Cassandra cluster this datacenter belongs to.
    pub cluster_name: String,

    #[serde(default)]
    pub server_type: String,

    pub server_version: String,

    #[serde(default)]
    pub size: i32,

    /// Users bootstrapped by the datacenter operator from existing secrets.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<CassandraUser>,

    /// Customizations layered onto the pods generated for this datacenter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_template_spec: Option<PodTemplateSpec>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CassandraUser {
    pub secret_name: String,
    #[serde(default)]
    pub superuser: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CassandraDatacenterStatus {
    #[serde(default)]
    pub cassandra_operator_progress: CassandraOperatorProgress,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<DatacenterCondition>,
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
pub enum CassandraOperatorProgress {
    #[default]
    Updating,
    Ready,
}

/// Condition types are kept as plain strings: the datacenter operator owns
/// this resource and emits types this mirror must not fail to deserialize.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatacenterCondition {
    pub r#type: String,
    pub status: ConditionStatus,
}

pub const DATACENTER_CONDITION_READY: &str = "Ready";

impl CassandraDatacenterCrd {
    /// Whether the datacenter has converged and advertises a Ready condition.
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .map(|status| {
                status.cassandra_operator_progress == CassandraOperatorProgress::Ready
                    && status.conditions.iter().any(|condition| {
                        condition.r#type == DATACENTER_CONDITION_READY
                            && condition.status == ConditionStatus::True
                    })
            })
            .unwrap_or_default()
    }

    /// The cluster name mangled into a DNS-friendly form, the way the
    /// datacenter operator derives the names of the objects it generates.
    pub fn sanitized_cluster_name(&self) -> String {
        let mut sanitized: String = self
            .spec
            .cluster_name
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        while sanitized.ends_with('-') {
            sanitized.pop();
        }
        sanitized.trim_start_matches('-').into()
    }

    /// The name of the service exposing the CQL and management ports of this
    /// datacenter's nodes.
    pub fn service_name(&self) -> String {
        format!("{}-{}-service", self.sanitized_cluster_name(), self.name_any())
    }

    /// The major Cassandra release of this datacenter, if the advertised
    /// server version can be parsed.
    pub fn server_major_version(&self) -> Option<u64> {
        Version::parse(&self.spec.server_version)
            .ok()
            .map(|version| version.major)
    }
}

#[cfg(test)]
mod tests {
    use kube::core::ObjectMeta;

    use super::*;

    fn datacenter(cluster_name: &str, server_version: &str) -> CassandraDatacenterCrd {
        let mut dc = CassandraDatacenterCrd::new(
            "dc1",
            CassandraDatacenterSpec {
                cluster_name: cluster_name.into(),
                server_type: "cassandra".into(),
                server_version: server_version.into(),
                size: 3,
                users: Vec::new(),
                pod_template_spec: None,
            },
        );
        dc.metadata = ObjectMeta {
            name: Some("dc1".into()),
            namespace: Some("cass".into()),
            ..Default::default()
        };
        dc
    }

    #[test]
    fn readiness_requires_progress_and_condition() {
        let mut dc = datacenter("demo", "4.0.3");
        assert!(!dc.is_ready());

        dc.status = Some(CassandraDatacenterStatus {
            cassandra_operator_progress: CassandraOperatorProgress::Ready,
            conditions: Vec::new(),
        });
        assert!(!dc.is_ready());

        dc.status = Some(CassandraDatacenterStatus {
            cassandra_operator_progress: CassandraOperatorProgress::Ready,
            conditions: vec![DatacenterCondition {
                r#type: DATACENTER_CONDITION_READY.into(),
                status: ConditionStatus::True,
            }],
        });
        assert!(dc.is_ready());
    }

    #[test]
    fn service_name_is_deterministic() {
        let dc = datacenter("My Cluster", "3.11.7");
        assert_eq!(dc.sanitized_cluster_name(), "my-cluster");
        assert_eq!(dc.service_name(), "my-cluster-dc1-service");
    }

    #[test]
    fn server_major_version_parses_or_abstains() {
        assert_eq!(datacenter("demo", "3.11.7").server_major_version(), Some(3));
        assert_eq!(datacenter("demo", "4.0.3").server_major_version(), Some(4));
        assert_eq!(datacenter("demo", "not-a-version").server_major_version(), None);
    }
}
