use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::{apps::v1::Deployment, core::v1::Service};
use kube::{
    api::{Patch, PatchParams, PostParams},
    runtime::{controller::Action, watcher::Config, Controller},
    Api, Client, CustomResourceExt, ResourceExt,
};
use reaper_api::{
    cassandra::CassandraDatacenterCrd,
    reaper::{service_name, ReaperCrd, ReaperProgress, ReaperStatus},
};
use reaper_client::{HttpReaperManager, ReaperManager};
use reaper_core_k8s::manager::{Manager, TryDefault};
use serde_json::json;
use tracing::{info, instrument, warn, Level};

use crate::{
    error::Error,
    reconcile::{
        datacenter::add_reaper_settings,
        deployment::{build_deployment, reconcile_deployment},
        service::reconcile_service,
        status::{advance, ReaperObservation},
    },
};

pub struct Ctx {
    manager: Arc<dyn ReaperManager>,
}

#[async_trait]
impl TryDefault for Ctx {
    async fn try_default() -> Result<Self> {
        Ok(Self {
            manager: Arc::new(HttpReaperManager::default()),
        })
    }
}

#[async_trait]
impl ::reaper_core_k8s::manager::Ctx for Ctx {
    type Data = ReaperCrd;
    type Error = Error;

    const NAME: &'static str = crate::consts::NAME;
    const FALLBACK: Duration = Duration::from_secs(5 * 60); // 5 minutes

    fn init_controller(
        kube: &Client,
        controller: Controller<<Self as ::reaper_core_k8s::manager::Ctx>::Data>,
    ) -> Controller<<Self as ::reaper_core_k8s::manager::Ctx>::Data> {
        controller
            .owns(Api::<Service>::all(kube.clone()), Config::default())
            .owns(Api::<Deployment>::all(kube.clone()), Config::default())
    }

    #[instrument(level = Level::INFO, skip_all, fields(name = %data.name_any(), namespace = data.namespace()), err(Display))]
    async fn reconcile(
        manager: Arc<Manager<Self>>,
        data: Arc<<Self as ::reaper_core_k8s::manager::Ctx>::Data>,
    ) -> Result<Action, Error>
    where
        Self: Sized,
    {
        let kube = &manager.kube;
        let name = data.name_any();
        let namespace = data.namespace().unwrap_or_else(|| "default".into());

        // the target datacenter must exist and be ready before anything else
        let datacenter_ref = &data.spec.datacenter_ref;
        let datacenter_namespace = datacenter_ref
            .namespace
            .clone()
            .unwrap_or_else(|| namespace.clone());
        let datacenter_api =
            Api::<CassandraDatacenterCrd>::namespaced(kube.clone(), &datacenter_namespace);
        let datacenter = match datacenter_api
            .get_opt(&datacenter_ref.name)
            .await?
            .filter(CassandraDatacenterCrd::is_ready)
        {
            Some(datacenter) => datacenter,
            None => {
                info!(
                    "datacenter is not ready yet: {datacenter_namespace}/{}",
                    datacenter_ref.name,
                );
                Self::persist_status(kube, &namespace, &name, &data, &ReaperObservation::default())
                    .await?;
                return Ok(Action::requeue(crate::consts::infer_retry_delay()));
            }
        };

        // cluster-side credentials must exist before the workload uses them
        if data.spec.cassandra_user_secret_ref.is_some()
            || data.spec.jmx_user_secret_ref.is_some()
        {
            Self::bridge_datacenter(&datacenter_api, &data, &datacenter).await?;
        }

        // the service is created once and never patched afterwards
        let service_api = Api::<Service>::namespaced(kube.clone(), &namespace);
        let existing_service = service_api.get_opt(&service_name(&name)).await?;
        if let Some(desired) = reconcile_service(&data, existing_service.as_ref()) {
            Self::create(&service_api, &desired).await?;
            info!("created service: {namespace}/{}", service_name(&name));
        }

        // the deployment is created once; drift on it is not overwritten
        let desired_deployment = match build_deployment(&data, &datacenter) {
            Ok(deployment) => deployment,
            Err(Error::InvalidConfig(message)) => {
                warn!("invalid configuration ({namespace}/{name}): {message}");
                Self::persist_config_error(kube, &namespace, &name, &data, message).await?;
                return Ok(Action::requeue(Self::FALLBACK));
            }
            Err(error) => return Err(error),
        };
        let deployment_api = Api::<Deployment>::namespaced(kube.clone(), &namespace);
        let existing_deployment = deployment_api.get_opt(&name).await?;
        let deployment = match reconcile_deployment(desired_deployment, existing_deployment.as_ref())
        {
            Some(desired) => {
                Self::create(&deployment_api, &desired).await?;
                info!("created deployment: {namespace}/{name}");
                desired
            }
            None => existing_deployment.unwrap_or_default(),
        };

        let desired_replicas = deployment
            .spec
            .as_ref()
            .and_then(|spec| spec.replicas)
            .unwrap_or(1);
        let ready_replicas = deployment
            .status
            .as_ref()
            .and_then(|status| status.ready_replicas)
            .unwrap_or_default();

        let mut observation = ReaperObservation {
            datacenter_ready: true,
            service_exists: true,
            deployment_exists: true,
            desired_replicas,
            ready_replicas,
            configured: false,
        };

        // register and verify through the management api once the workload
        // reports full readiness; failures here are transient
        let mut transient = false;
        if observation.workload_ready() {
            match Self::register(&*manager.ctx.manager, &data, &datacenter).await {
                Ok(configured) => observation.configured = configured,
                Err(error) => {
                    warn!("failed to configure reaper ({namespace}/{name}): {error}");
                    transient = true;
                }
            }
        }

        let status = Self::persist_status(kube, &namespace, &name, &data, &observation).await?;

        if status.progress == ReaperProgress::Running && !transient {
            Ok(Action::requeue(Self::FALLBACK))
        } else {
            Ok(Action::requeue(crate::consts::infer_retry_delay()))
        }
    }

    fn error_policy<E>(_manager: Arc<Manager<Self>>, _error: E) -> Action
    where
        Self: Sized,
        E: ::std::fmt::Debug,
    {
        // transient by taxonomy; try again soon rather than at the resync
        Action::requeue(crate::consts::infer_retry_delay())
    }
}

impl Ctx {
    /// Connects to the managed Reaper application, registers the target
    /// datacenter with it, and verifies the registration took hold. Every
    /// step is safely re-callable.
    async fn register(
        manager: &dyn ReaperManager,
        reaper: &ReaperCrd,
        datacenter: &CassandraDatacenterCrd,
    ) -> Result<bool, ::reaper_client::Error> {
        manager.connect(reaper).await?;
        manager.add_cluster(datacenter).await?;
        manager.verify_cluster_is_configured(datacenter).await
    }

    /// Merge-patches the bridged settings into the datacenter spec when they
    /// are not present yet. The datacenter's own operator applies them.
    #[instrument(level = Level::INFO, skip_all, err(Display))]
    async fn bridge_datacenter(
        api: &Api<CassandraDatacenterCrd>,
        reaper: &ReaperCrd,
        datacenter: &CassandraDatacenterCrd,
    ) -> Result<(), Error> {
        let mut desired = datacenter.spec.clone();
        add_reaper_settings(reaper, &mut desired);

        if desired != datacenter.spec {
            let name = datacenter.name_any();
            let patch = Patch::Merge(json!({
                "spec": desired,
            }));
            let pp = PatchParams::apply(<Self as ::reaper_core_k8s::manager::Ctx>::NAME);
            api.patch(&name, &pp, &patch).await?;

            info!("updated datacenter with reaper settings: {name}");
        }
        Ok(())
    }

    /// Creates a generated object, tolerating a concurrent pass having
    /// created it first.
    async fn create<K>(api: &Api<K>, object: &K) -> Result<(), Error>
    where
        K: Clone + ::core::fmt::Debug + ::serde::Serialize + ::serde::de::DeserializeOwned,
    {
        let pp = PostParams {
            dry_run: false,
            field_manager: Some(<Self as ::reaper_core_k8s::manager::Ctx>::NAME.into()),
        };
        match api.create(&pp, object).await {
            Ok(_) => Ok(()),
            Err(::kube::Error::Api(response)) if response.code == 409 => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    /// Runs the readiness state machine and persists its outcome, but only
    /// when it differs from the recorded status.
    async fn persist_status(
        kube: &Client,
        namespace: &str,
        name: &str,
        reaper: &ReaperCrd,
        observation: &ReaperObservation,
    ) -> Result<ReaperStatus, Error> {
        let current = reaper.status.clone().unwrap_or_default();
        let next = advance(&current, observation, Utc::now());

        if next != current {
            Self::patch_status(kube, namespace, name, &next).await?;
            info!("reaper is {}: {namespace}/{name}", next.progress);
        }
        Ok(next)
    }

    /// Surfaces a configuration error through the Ready condition so the
    /// resource is never left stuck without an explanation.
    async fn persist_config_error(
        kube: &Client,
        namespace: &str,
        name: &str,
        reaper: &ReaperCrd,
        message: String,
    ) -> Result<(), Error> {
        let current = reaper.status.clone().unwrap_or_default();
        let mut next = current.clone();
        next.set_not_ready(Utc::now(), Some(message));

        if next != current {
            Self::patch_status(kube, namespace, name, &next).await?;
        }
        Ok(())
    }

    async fn patch_status(
        kube: &Client,
        namespace: &str,
        name: &str,
        status: &ReaperStatus,
    ) -> Result<(), Error> {
        let api = Api::<ReaperCrd>::namespaced(kube.clone(), namespace);
        let crd = ReaperCrd::api_resource();

        let patch = Patch::Merge(json!({
            "apiVersion": crd.api_version,
            "kind": crd.kind,
            "status": status,
        }));
        let pp = PatchParams::apply(<Self as ::reaper_core_k8s::manager::Ctx>::NAME);
        api.patch_status(name, &pp, &patch).await?;
        Ok(())
    }
}
