use std::sync::OnceLock;

use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{
            Container, ContainerPort, EnvVar, EnvVarSource, HTTPGetAction, PodSpec,
            PodTemplateSpec, Probe, SecretKeySelector,
        },
    },
    apimachinery::pkg::{apis::meta::v1::LabelSelector, util::intstr::IntOrString},
};
use kube::{core::ObjectMeta, ResourceExt};
use reaper_api::{
    cassandra::CassandraDatacenterCrd,
    image::{collect_pull_secrets, Image},
    reaper::{ReaperCrd, ReaperSpec, RepairType, ADMIN_PORT, APP_PORT},
};
use regex::Regex;

use super::{owner_references, reaper_labels};
use crate::error::Error;

pub const MAIN_CONTAINER: &str = "reaper";
pub const INIT_CONTAINER: &str = "reaper-schema-init";

/// Builds the deployment running a Reaper instance against the given
/// datacenter. Pure and idempotent: identical inputs yield byte-identical
/// objects. Fails only on malformed desired state (invalid durations, AUTO
/// repair type against an unparseable server version).
pub fn build_deployment(
    reaper: &ReaperCrd,
    datacenter: &CassandraDatacenterCrd,
) -> Result<Deployment, Error> {
    let spec = &reaper.spec;
    let labels = reaper_labels(&reaper.name_any());

    let main_image = Image::resolve(spec.container_image.as_ref(), &ReaperSpec::default_image());
    let init_image = Image::resolve(
        spec.init_container_image.as_ref(),
        &ReaperSpec::default_image(),
    );

    let core_env = core_env(reaper, datacenter);
    let auth_env = cassandra_auth_env(reaper);

    let mut env = core_env.clone();
    env.extend(auto_scheduling_env(reaper, datacenter)?);
    env.extend(auth_env.iter().cloned());

    let mut init_env = core_env;
    init_env.extend(auth_env);

    let image_pull_secrets = collect_pull_secrets(&[&main_image, &init_image]);

    let main_container = Container {
        name: MAIN_CONTAINER.into(),
        image: Some(main_image.to_string()),
        image_pull_policy: Some(main_image.pull_policy.to_string()),
        ports: Some(vec![
            ContainerPort {
                name: Some("app".into()),
                container_port: APP_PORT,
                protocol: Some("TCP".into()),
                ..Default::default()
            },
            ContainerPort {
                name: Some("admin".into()),
                container_port: ADMIN_PORT,
                protocol: Some("TCP".into()),
                ..Default::default()
            },
        ]),
        env: Some(env),
        liveness_probe: Some(spec.liveness_probe.clone().unwrap_or_else(default_probe)),
        readiness_probe: Some(spec.readiness_probe.clone().unwrap_or_else(default_probe)),
        security_context: spec.security_context.clone(),
        ..Default::default()
    };

    let init_container = Container {
        name: INIT_CONTAINER.into(),
        image: Some(init_image.to_string()),
        image_pull_policy: Some(init_image.pull_policy.to_string()),
        env: Some(init_env),
        args: Some(vec!["schema-migration".into()]),
        security_context: spec.init_container_security_context.clone(),
        ..Default::default()
    };

    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(reaper.name_any()),
            namespace: reaper.namespace(),
            labels: Some(labels.clone()),
            owner_references: owner_references(reaper),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(spec.service_account_name.clone()),
                    affinity: spec.affinity.clone(),
                    tolerations: (!spec.tolerations.is_empty()).then(|| spec.tolerations.clone()),
                    security_context: spec.pod_security_context.clone(),
                    image_pull_secrets: (!image_pull_secrets.is_empty()).then_some(image_pull_secrets),
                    init_containers: Some(vec![init_container]),
                    containers: vec![main_container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    })
}

/// Decides the create-or-keep action for the generated deployment. Drift on
/// an existing object is never overwritten; only its status is read back for
/// the readiness computation.
pub fn reconcile_deployment(
    desired: Deployment,
    existing: Option<&Deployment>,
) -> Option<Deployment> {
    match existing {
        Some(_) => None,
        None => Some(desired),
    }
}

fn default_probe() -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/healthcheck".into()),
            port: IntOrString::String("admin".into()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(45),
        period_seconds: Some(15),
        ..Default::default()
    }
}

/// The connection settings every Reaper container needs, main and init alike.
fn core_env(reaper: &ReaperCrd, datacenter: &CassandraDatacenterCrd) -> Vec<EnvVar> {
    vec![
        env("REAPER_STORAGE_TYPE", "cassandra"),
        env("REAPER_ENABLE_DYNAMIC_SEED_LIST", "false"),
        env("REAPER_CASS_CLUSTER_NAME", datacenter.spec.cluster_name.as_str()),
        env(
            "REAPER_CASS_CONTACT_POINTS",
            format!("[{}]", datacenter.service_name()),
        ),
        env("REAPER_CASS_KEYSPACE", reaper.spec.keyspace.as_str()),
        env("REAPER_CASS_LOCAL_DC", datacenter.name_any()),
        env(
            "REAPER_DATACENTER_AVAILABILITY",
            reaper.spec.datacenter_availability.to_string(),
        ),
        env("REAPER_AUTH_ENABLED", "false"),
    ]
}

fn auto_scheduling_env(
    reaper: &ReaperCrd,
    datacenter: &CassandraDatacenterCrd,
) -> Result<Vec<EnvVar>, Error> {
    let auto = &reaper.spec.auto_scheduling;
    if !auto.enabled {
        return Ok(Vec::new());
    }

    for (field, value) in [
        ("initialDelayPeriod", &auto.initial_delay_period),
        ("periodBetweenPolls", &auto.period_between_polls),
        ("timeBeforeFirstSchedule", &auto.time_before_first_schedule),
        ("scheduleSpreadPeriod", &auto.schedule_spread_period),
    ] {
        validate_duration(field, value)?;
    }

    let (adaptive, incremental) = resolve_repair_type(auto.repair_type, datacenter)?;

    Ok(vec![
        env("REAPER_AUTO_SCHEDULING_ENABLED", "true"),
        env("REAPER_AUTO_SCHEDULING_ADAPTIVE", adaptive.to_string()),
        env("REAPER_AUTO_SCHEDULING_INCREMENTAL", incremental.to_string()),
        env(
            "REAPER_AUTO_SCHEDULING_PERCENT_UNREPAIRED_THRESHOLD",
            auto.percent_unrepaired_threshold.to_string(),
        ),
        env(
            "REAPER_AUTO_SCHEDULING_INITIAL_DELAY_PERIOD",
            auto.initial_delay_period.as_str(),
        ),
        env(
            "REAPER_AUTO_SCHEDULING_PERIOD_BETWEEN_POLLS",
            auto.period_between_polls.as_str(),
        ),
        env(
            "REAPER_AUTO_SCHEDULING_TIME_BEFORE_FIRST_SCHEDULE",
            auto.time_before_first_schedule.as_str(),
        ),
        env(
            "REAPER_AUTO_SCHEDULING_SCHEDULE_SPREAD_PERIOD",
            auto.schedule_spread_period.as_str(),
        ),
        env(
            "REAPER_AUTO_SCHEDULING_EXCLUDED_CLUSTERS",
            auto.excluded_clusters.join(","),
        ),
        env(
            "REAPER_AUTO_SCHEDULING_EXCLUDED_KEYSPACES",
            auto.excluded_keyspaces.join(","),
        ),
    ])
}

/// CQL credentials, emitted only when a secret is configured, always as the
/// trailing {username, password, enabled} triplet.
fn cassandra_auth_env(reaper: &ReaperCrd) -> Vec<EnvVar> {
    match &reaper.spec.cassandra_user_secret_ref {
        Some(secret) => vec![
            secret_env("REAPER_CASS_AUTH_USERNAME", secret, "username"),
            secret_env("REAPER_CASS_AUTH_PASSWORD", secret, "password"),
            env("REAPER_CASS_AUTH_ENABLED", "true"),
        ],
        None => Vec::new(),
    }
}

/// Maps the declared repair type onto Reaper's (adaptive, incremental) flag
/// pair. AUTO follows the server major version: ADAPTIVE below Cassandra 4,
/// INCREMENTAL from 4 on; an unparseable version is a configuration error,
/// not a guess.
fn resolve_repair_type(
    repair_type: RepairType,
    datacenter: &CassandraDatacenterCrd,
) -> Result<(bool, bool), Error> {
    match repair_type {
        RepairType::Regular => Ok((false, false)),
        RepairType::Adaptive => Ok((true, false)),
        RepairType::Incremental => Ok((false, true)),
        RepairType::Auto => match datacenter.server_major_version() {
            Some(major) if major >= 4 => Ok((false, true)),
            Some(_) => Ok((true, false)),
            None => Err(Error::InvalidConfig(format!(
                "cannot resolve repair type AUTO: unparseable server version {:?} on datacenter {}",
                datacenter.spec.server_version,
                datacenter.name_any(),
            ))),
        },
    }
}

fn validate_duration(field: &str, value: &str) -> Result<(), Error> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(
            r"^([-+]?)P(?:([-+]?[0-9]+)D)?(T(?:([-+]?[0-9]+)H)?(?:([-+]?[0-9]+)M)?(?:([-+]?[0-9]+)(?:[.,]([0-9]{0,9}))?S)?)?$",
        )
        .expect("the ISO-8601 duration pattern is well-formed")
    });

    if pattern.is_match(value) {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!(
            "autoScheduling.{field}: {value:?} is not a valid ISO-8601 duration",
        )))
    }
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: Some(value.into()),
        value_from: None,
    }
}

fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: None,
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: Some(secret.into()),
                key: key.into(),
                ..Default::default()
            }),
            ..Default::default()
        }),
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::LocalObjectReference;
    use reaper_api::{
        image::PullPolicy,
        reaper::{AutoScheduling, DEFAULT_VERSION},
    };

    use super::super::fixtures;
    use super::*;

    fn container_env(deployment: &Deployment) -> Vec<EnvVar> {
        deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
            .env
            .clone()
            .unwrap()
    }

    fn env_value<'a>(env: &'a [EnvVar], name: &str) -> Option<&'a str> {
        env.iter()
            .find(|var| var.name == name)
            .and_then(|var| var.value.as_deref())
    }

    #[test]
    fn custom_main_image_and_default_init_image() {
        let mut reaper = fixtures::reaper();
        reaper.spec.container_image = Some(Image {
            name: Some("cassandra-reaper-custom".into()),
            pull_secret_ref: Some(LocalObjectReference {
                name: Some("main-secret".into()),
            }),
            ..Default::default()
        });

        let deployment = build_deployment(&reaper, &fixtures::datacenter()).unwrap();

        let owners = deployment.metadata.owner_references.as_ref().unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "Reaper");
        assert_eq!(owners[0].uid, reaper.metadata.uid.clone().unwrap());

        let pod = deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap();

        // custom image without a tag falls back to latest and pulls always
        let main = &pod.containers[0];
        assert_eq!(
            main.image.as_deref(),
            Some("docker.io/thelastpickle/cassandra-reaper-custom:latest"),
        );
        assert_eq!(
            main.image_pull_policy.as_deref(),
            Some(PullPolicy::Always.to_string().as_str()),
        );

        // untouched init image keeps the pinned default release
        let init = &pod.init_containers.as_ref().unwrap()[0];
        assert_eq!(
            init.image.as_deref(),
            Some(format!("docker.io/thelastpickle/cassandra-reaper:{DEFAULT_VERSION}").as_str()),
        );
        assert_eq!(
            init.image_pull_policy.as_deref(),
            Some(PullPolicy::IfNotPresent.to_string().as_str()),
        );

        let secrets = pod.image_pull_secrets.as_ref().unwrap();
        assert_eq!(secrets.len(), 1);
        assert_eq!(secrets[0].name.as_deref(), Some("main-secret"));
    }

    #[test]
    fn selector_is_stable_and_matches_the_template() {
        let reaper = fixtures::reaper();
        let datacenter = fixtures::datacenter();

        let first = build_deployment(&reaper, &datacenter).unwrap();
        let second = build_deployment(&reaper, &datacenter).unwrap();
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap(),
        );

        let spec = first.spec.unwrap();
        let selector = spec.selector.match_labels.unwrap();
        let template_labels = spec.template.metadata.unwrap().labels.unwrap();
        assert_eq!(selector, template_labels);
        assert_eq!(selector, reaper_labels("test-reaper"));
    }

    #[test]
    fn auto_scheduling_env_only_when_enabled() {
        let datacenter = fixtures::datacenter();

        let reaper = fixtures::reaper();
        let deployment = build_deployment(&reaper, &datacenter).unwrap();
        assert_eq!(
            env_value(&container_env(&deployment), "REAPER_AUTO_SCHEDULING_ENABLED"),
            None,
        );

        let mut reaper = fixtures::reaper();
        reaper.spec.auto_scheduling = AutoScheduling {
            enabled: true,
            ..Default::default()
        };
        let deployment = build_deployment(&reaper, &datacenter).unwrap();
        let env = container_env(&deployment);
        assert_eq!(env_value(&env, "REAPER_AUTO_SCHEDULING_ENABLED"), Some("true"));
        // AUTO against Cassandra 3 resolves to an adaptive schedule
        assert_eq!(env_value(&env, "REAPER_AUTO_SCHEDULING_ADAPTIVE"), Some("true"));
        assert_eq!(env_value(&env, "REAPER_AUTO_SCHEDULING_INCREMENTAL"), Some("false"));
        assert_eq!(
            env_value(&env, "REAPER_AUTO_SCHEDULING_INITIAL_DELAY_PERIOD"),
            Some("PT15S"),
        );
    }

    #[test]
    fn auto_repair_type_follows_the_server_major_version() {
        let mut reaper = fixtures::reaper();
        reaper.spec.auto_scheduling = AutoScheduling {
            enabled: true,
            ..Default::default()
        };

        let mut datacenter = fixtures::datacenter();
        datacenter.spec.server_version = "4.0.3".into();
        let env = container_env(&build_deployment(&reaper, &datacenter).unwrap());
        assert_eq!(env_value(&env, "REAPER_AUTO_SCHEDULING_ADAPTIVE"), Some("false"));
        assert_eq!(env_value(&env, "REAPER_AUTO_SCHEDULING_INCREMENTAL"), Some("true"));

        datacenter.spec.server_version = "whatever".into();
        assert!(matches!(
            build_deployment(&reaper, &datacenter),
            Err(Error::InvalidConfig(_)),
        ));
    }

    #[test]
    fn invalid_durations_are_configuration_errors() {
        let mut reaper = fixtures::reaper();
        reaper.spec.auto_scheduling = AutoScheduling {
            enabled: true,
            period_between_polls: "ten minutes".into(),
            ..Default::default()
        };

        assert!(matches!(
            build_deployment(&reaper, &fixtures::datacenter()),
            Err(Error::InvalidConfig(_)),
        ));
    }

    #[test]
    fn cassandra_auth_env_is_the_trailing_triplet() {
        let datacenter = fixtures::datacenter();

        let reaper = fixtures::reaper();
        let env = container_env(&build_deployment(&reaper, &datacenter).unwrap());
        assert!(!env.iter().any(|var| var.name.starts_with("REAPER_CASS_AUTH_")));

        let mut reaper = fixtures::reaper();
        reaper.spec.cassandra_user_secret_ref = Some("top-secret-cass".into());
        let env = container_env(&build_deployment(&reaper, &datacenter).unwrap());

        let tail: Vec<_> = env[env.len() - 3..].iter().collect();
        assert_eq!(tail[0].name, "REAPER_CASS_AUTH_USERNAME");
        assert_eq!(tail[1].name, "REAPER_CASS_AUTH_PASSWORD");
        for (var, key) in tail[..2].iter().zip(["username", "password"]) {
            let secret_ref = var
                .value_from
                .as_ref()
                .unwrap()
                .secret_key_ref
                .as_ref()
                .unwrap();
            assert_eq!(secret_ref.name.as_deref(), Some("top-secret-cass"));
            assert_eq!(secret_ref.key, key);
        }
        assert_eq!(tail[2].name, "REAPER_CASS_AUTH_ENABLED");
        assert_eq!(tail[2].value.as_deref(), Some("true"));
    }

    #[test]
    fn probe_overrides_pass_through_verbatim() {
        let mut reaper = fixtures::reaper();
        reaper.spec.readiness_probe = Some(Probe::default());

        let deployment = build_deployment(&reaper, &fixtures::datacenter()).unwrap();
        let main = &deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0];

        // an empty-valued probe must not be silently replaced by the default
        assert_eq!(main.readiness_probe, Some(Probe::default()));
        assert_eq!(main.liveness_probe, Some(default_probe()));
    }

    #[test]
    fn existing_deployments_are_left_untouched() {
        let desired =
            build_deployment(&fixtures::reaper(), &fixtures::datacenter()).unwrap();

        let mut existing = desired.clone();
        // operator-made drift on the live object must survive reconciliation
        existing.spec.as_mut().unwrap().replicas = Some(3);

        assert!(reconcile_deployment(desired.clone(), Some(&existing)).is_none());
        assert!(reconcile_deployment(desired, None).is_some());
    }

    #[test]
    fn core_env_points_at_the_datacenter() {
        let deployment =
            build_deployment(&fixtures::reaper(), &fixtures::datacenter()).unwrap();
        let env = container_env(&deployment);

        assert_eq!(env_value(&env, "REAPER_CASS_CLUSTER_NAME"), Some("test-cluster"));
        assert_eq!(
            env_value(&env, "REAPER_CASS_CONTACT_POINTS"),
            Some("[test-cluster-test-dc-service]"),
        );
        assert_eq!(env_value(&env, "REAPER_CASS_LOCAL_DC"), Some("test-dc"));
        assert_eq!(env_value(&env, "REAPER_DATACENTER_AVAILABILITY"), Some("LOCAL"));
        assert_eq!(env_value(&env, "REAPER_CASS_KEYSPACE"), Some("reaper_db"));

        // schema migration runs with the same connection settings
        let init = &deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap()
            .init_containers
            .as_ref()
            .unwrap()[0];
        assert_eq!(init.args, Some(vec!["schema-migration".to_string()]));
        assert_eq!(
            env_value(init.env.as_ref().unwrap(), "REAPER_CASS_KEYSPACE"),
            Some("reaper_db"),
        );
    }
}
