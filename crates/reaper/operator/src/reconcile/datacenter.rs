use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec, SecretKeySelector, VolumeMount,
};
use reaper_api::{
    cassandra::{CassandraDatacenterSpec, CassandraUser},
    reaper::ReaperCrd,
};

pub const JMX_INIT_CONTAINER: &str = "jmx-credentials";
pub const CASSANDRA_CONTAINER: &str = "cassandra";

const JMX_INIT_IMAGE: &str = "docker.io/busybox:1.33.1";

/// The CQL superuser secret bootstrapped for Reaper when no explicit
/// reference is configured.
pub fn default_user_secret_name(cluster_name: &str) -> String {
    format!("{cluster_name}-reaper")
}

/// The JMX credential secret consumed by the datacenter's nodes when no
/// explicit reference is configured.
pub fn default_jmx_user_secret_name(cluster_name: &str) -> String {
    format!("{cluster_name}-reaper-jmx")
}

/// Merges the settings the target datacenter must carry so that it and the
/// Reaper instance can mutually authenticate. Must run before the datacenter
/// operator computes its final pod template. Idempotent: re-invocation never
/// appends duplicate users, init containers, or env entries; duplicates are
/// detected by stable name, not full equality.
pub fn add_reaper_settings(reaper: &ReaperCrd, datacenter: &mut CassandraDatacenterSpec) {
    add_user(reaper, datacenter);

    let cluster_name = datacenter.cluster_name.clone();
    let template = datacenter.pod_template_spec.get_or_insert_with(Default::default);
    add_jmx_init_container(reaper, &cluster_name, template);
    update_cassandra_container(template, |container| {
        // the local-JMX-without-auth shortcut would bypass the credentials
        let env = container.env.get_or_insert_with(Vec::new);
        if !env.iter().any(|var| var.name == "LOCAL_JMX") {
            env.push(EnvVar {
                name: "LOCAL_JMX".into(),
                value: Some("no".into()),
                value_from: None,
            });
        }
    });
}

fn add_user(reaper: &ReaperCrd, datacenter: &mut CassandraDatacenterSpec) {
    let secret_name = reaper
        .spec
        .cassandra_user_secret_ref
        .clone()
        .unwrap_or_else(|| default_user_secret_name(&datacenter.cluster_name));

    if !datacenter.users.iter().any(|user| user.secret_name == secret_name) {
        datacenter.users.push(CassandraUser {
            secret_name,
            superuser: true,
        });
    }
}

fn add_jmx_init_container(
    reaper: &ReaperCrd,
    cluster_name: &str,
    template: &mut PodTemplateSpec,
) {
    let pod = template.spec.get_or_insert_with(PodSpec::default);
    let init_containers = pod.init_containers.get_or_insert_with(Vec::new);
    if init_containers
        .iter()
        .any(|container| container.name == JMX_INIT_CONTAINER)
    {
        return;
    }

    let secret_name = reaper
        .spec
        .jmx_user_secret_ref
        .clone()
        .unwrap_or_else(|| default_jmx_user_secret_name(cluster_name));

    init_containers.push(Container {
        name: JMX_INIT_CONTAINER.into(),
        image: Some(JMX_INIT_IMAGE.into()),
        image_pull_policy: Some("IfNotPresent".into()),
        env: Some(vec![
            jmx_secret_env("REAPER_JMX_USERNAME", &secret_name, "username"),
            jmx_secret_env("REAPER_JMX_PASSWORD", &secret_name, "password"),
        ]),
        args: Some(vec![
            "/bin/sh".into(),
            "-c".into(),
            "echo \"$REAPER_JMX_USERNAME $REAPER_JMX_PASSWORD\" > /config/jmxremote.password"
                .into(),
        ]),
        volume_mounts: Some(vec![VolumeMount {
            name: "server-config".into(),
            mount_path: "/config".into(),
            ..Default::default()
        }]),
        ..Default::default()
    });
}

/// Applies `f` to the datacenter's main container, creating the entry if the
/// template does not declare it yet.
fn update_cassandra_container<F>(template: &mut PodTemplateSpec, f: F)
where
    F: FnOnce(&mut Container),
{
    let pod = template.spec.get_or_insert_with(PodSpec::default);
    let index = pod
        .containers
        .iter()
        .position(|container| container.name == CASSANDRA_CONTAINER)
        .unwrap_or_else(|| {
            pod.containers.push(Container {
                name: CASSANDRA_CONTAINER.into(),
                ..Default::default()
            });
            pod.containers.len() - 1
        });
    f(&mut pod.containers[index])
}

fn jmx_secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
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
