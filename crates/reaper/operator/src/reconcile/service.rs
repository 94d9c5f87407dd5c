use k8s_openapi::{
    api::core::v1::{Service, ServicePort, ServiceSpec},
    apimachinery::pkg::util::intstr::IntOrString,
};
use kube::{core::ObjectMeta, ResourceExt};
use reaper_api::reaper::{service_name, ReaperCrd, APP_PORT};

use super::{owner_references, reaper_labels};

/// Builds the service fronting a Reaper deployment. Pure: the same resource
/// identity always yields the same object.
pub fn build_service(reaper: &ReaperCrd) -> Service {
    let labels = reaper_labels(&reaper.name_any());

    Service {
        metadata: ObjectMeta {
            name: Some(service_name(&reaper.name_any())),
            namespace: reaper.namespace(),
            labels: Some(labels.clone()),
            owner_references: owner_references(reaper),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                name: Some("app".into()),
                port: APP_PORT,
                protocol: Some("TCP".into()),
                target_port: Some(IntOrString::String("app".into())),
                ..Default::default()
            }]),
            selector: Some(labels),
            ..Default::default()
        }),
        status: None,
    }
}

/// Decides the create-or-keep action for the generated service. Services are
/// created once and never patched; a pre-existing object with the expected
/// name is adopted as-is.
pub fn reconcile_service(reaper: &ReaperCrd, existing: Option<&Service>) -> Option<Service> {
    match existing {
        Some(_) => None,
        None => Some(build_service(reaper)),
    }
}

#[cfg(test)]
mod tests {
    use reaper_api::consts;

    use super::super::fixtures;
    use super::*;

    #[test]
    fn service_has_stable_name_owner_and_selector() {
        let reaper = fixtures::reaper();
        let service = build_service(&reaper);

        assert_eq!(service.metadata.name.as_deref(), Some("test-reaper-service"));
        assert_eq!(service.metadata.namespace.as_deref(), Some("test-ns"));

        let owners = service.metadata.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].uid, reaper.metadata.uid.clone().unwrap());
        assert_eq!(owners[0].kind, "Reaper");

        let selector = service.spec.as_ref().unwrap().selector.clone().unwrap();
        assert_eq!(selector.len(), 2);
        assert_eq!(
            selector.get(consts::LABEL_REAPER).map(String::as_str),
            Some("test-reaper"),
        );
        assert_eq!(
            selector.get(consts::LABEL_MANAGED_BY).map(String::as_str),
            Some(consts::LABEL_MANAGED_BY_VALUE),
        );
    }

    #[test]
    fn building_twice_yields_identical_objects() {
        let reaper = fixtures::reaper();
        let first = serde_json::to_vec(&build_service(&reaper)).unwrap();
        let second = serde_json::to_vec(&build_service(&reaper)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn existing_services_are_left_untouched() {
        let reaper = fixtures::reaper();
        let existing = build_service(&reaper);

        assert!(reconcile_service(&reaper, Some(&existing)).is_none());
        assert!(reconcile_service(&reaper, None).is_some());
    }
}
