pub mod datacenter;
pub mod deployment;
pub mod service;
pub mod status;

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use reaper_api::{consts, reaper::ReaperCrd};

/// The identity label pair carried by every generated object and matched by
/// the workload selector. Derived from the resource name alone so that the
/// selector stays immutable across reconciliations.
pub fn reaper_labels(reaper_name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        consts::LABEL_MANAGED_BY.into(),
        consts::LABEL_MANAGED_BY_VALUE.into(),
    );
    labels.insert(consts::LABEL_REAPER.into(), reaper_name.into());
    labels
}

/// Back-reference from a generated object to its owning Reaper resource, so
/// that deleting the resource garbage-collects the object.
pub fn owner_references(reaper: &ReaperCrd) -> Option<Vec<OwnerReference>> {
    reaper
        .controller_owner_ref(&())
        .map(|reference| vec![reference])
}
