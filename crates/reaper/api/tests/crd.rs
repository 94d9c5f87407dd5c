use kube::CustomResourceExt;
use reaper_api::reaper::{
    DatacenterAvailability, ReaperCrd, ReaperSpec, DEFAULT_KEYSPACE,
};
use serde_json::json;

#[test]
fn crd_is_namespaced_with_status_subresource() {
    let crd = ReaperCrd::crd();
    assert_eq!(crd.spec.group, "cassandra-reaper.io");
    assert_eq!(crd.spec.names.kind, "Reaper");
    assert_eq!(crd.spec.scope, "Namespaced");

    let version = &crd.spec.versions[0];
    assert_eq!(version.name, "v1alpha1");
    assert!(version
        .subresources
        .as_ref()
        .and_then(|subresources| subresources.status.as_ref())
        .is_some());
}

#[test]
fn minimal_spec_gets_the_documented_defaults() {
    let spec: ReaperSpec =
        serde_json::from_value(json!({"datacenterRef": {"name": "dc1"}})).unwrap();

    assert_eq!(spec.datacenter_ref.name, "dc1");
    assert_eq!(spec.datacenter_ref.namespace, None);
    assert_eq!(spec.datacenter_availability, DatacenterAvailability::Local);
    assert_eq!(spec.keyspace, DEFAULT_KEYSPACE);
    assert_eq!(spec.service_account_name, "default");
    assert!(!spec.auto_scheduling.enabled);
    assert!(spec.container_image.is_none());
    assert!(spec.cassandra_user_secret_ref.is_none());
}

#[test]
fn spec_round_trips_through_json() {
    let original: ReaperSpec = serde_json::from_value(json!({
        "datacenterRef": {"name": "dc1", "namespace": "cass"},
        "datacenterAvailability": "EACH",
        "keyspace": "reaper_custom",
        "cassandraUserSecretRef": "reaper-cql",
        "autoScheduling": {"enabled": true, "repairType": "INCREMENTAL"},
    }))
    .unwrap();

    let value = serde_json::to_value(&original).unwrap();
    let back: ReaperSpec = serde_json::from_value(value).unwrap();
    assert_eq!(back, original);
}
