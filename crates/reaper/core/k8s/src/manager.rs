use core::time::Duration;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    api::{Patch, PatchParams, PostParams},
    runtime::{controller::Action, watcher::Config, Controller},
    Api, Client, CustomResourceExt, Resource, ResourceExt,
};
use reaper_core::tracer;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

pub struct Manager<C> {
    pub kube: Client,
    pub ctx: Arc<C>,
}

#[async_trait]
pub trait Ctx
where
    Self: 'static + Send + Sync + TryDefault,
    <Self as Ctx>::Data:
        Send + Sync + Clone + ::core::fmt::Debug + DeserializeOwned + Resource<DynamicType = ()>,
    <Self as Ctx>::Error: 'static + Send + ::std::error::Error,
{
    type Data;
    type Error;

    const NAME: &'static str;
    const FALLBACK: Duration = Duration::from_secs(5 * 60); // 5 minutes

    async fn spawn_crd()
    where
        Self: Sized,
        <Self as Ctx>::Data: CustomResourceExt,
    {
        <Self as Ctx>::try_spawn(|client| async move {
            Self::init_crd(client.clone())
                .await
                .map(|()| Api::<<Self as Ctx>::Data>::all(client))
        })
        .await
        .expect("spawning a manager with CRD")
    }

    async fn try_spawn<F, Fut>(f_init: F) -> Result<()>
    where
        Self: Sized,
        F: FnOnce(Client) -> Fut + Send,
        Fut: ::core::future::Future<Output = Result<Api<<Self as Ctx>::Data>>> + Send,
    {
        tracer::init_once();

        let client = Client::try_default().await?;
        let ctx = Arc::new(Self::try_default().await?);
        let manager = Arc::new(Manager {
            kube: client.clone(),
            ctx: ctx.clone(),
        });

        let api = f_init(client.clone()).await?;

        // All good. Start controller and return its future.
        Self::init_controller(&client, Controller::new(api, Config::default()))
            .run(
                |data, manager| Self::reconcile(manager, data),
                |data, error, manager| {
                    let kind = <<Self as Ctx>::Data>::kind(&());
                    let name = data.name_any();
                    warn!("failed to reconcile {kind} {name:?}: {error:?}");
                    Self::error_policy(manager, error)
                },
                manager,
            )
            .for_each(|_| ::futures::future::ready(()))
            .await;
        Ok(())
    }

    /// Registers additional watches (e.g. owned child kinds) on the controller.
    fn init_controller(
        _kube: &Client,
        controller: Controller<<Self as Ctx>::Data>,
    ) -> Controller<<Self as Ctx>::Data>
    where
        Self: Sized,
    {
        controller
    }

    async fn init_crd(client: Client) -> Result<()>
    where
        <Self as Ctx>::Data: CustomResourceExt,
    {
        // Ensure CRD is installed before loop-watching
        let api = Api::<CustomResourceDefinition>::all(client);
        let crd = <Self as Ctx>::Data::crd();
        let name = crd.name_any();

        if api.get_opt(&name).await?.is_none() {
            let pp = PostParams {
                dry_run: false,
                field_manager: Some(<Self as Ctx>::NAME.into()),
            };
            api.create(&pp, &crd).await?;

            info!("Created CRD: {name}");
        } else {
            let pp = PatchParams {
                dry_run: false,
                force: true,
                field_manager: Some(<Self as Ctx>::NAME.into()),
                ..Default::default()
            };
            api.patch(&name, &pp, &Patch::Apply(&crd)).await?;

            info!("Updated CRD: {name}");
        }
        Ok(())
    }

    async fn reconcile(
        manager: Arc<Manager<Self>>,
        data: Arc<<Self as Ctx>::Data>,
    ) -> Result<Action, <Self as Ctx>::Error>
    where
        Self: Sized;

    fn error_policy<E>(_manager: Arc<Manager<Self>>, _error: E) -> Action
    where
        Self: Sized,
        E: ::std::fmt::Debug,
    {
        Action::requeue(<Self as Ctx>::FALLBACK)
    }
}

#[async_trait]
pub trait TryDefault {
    async fn try_default() -> Result<Self>
    where
        Self: Sized;
}

#[async_trait]
impl<T> TryDefault for T
where
    T: Default,
{
    async fn try_default() -> Result<Self> {
        Ok(T::default())
    }
}
