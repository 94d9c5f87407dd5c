use kube::ResourceExt;
use reaper_api::{
    cassandra::CassandraDatacenterCrd,
    reaper::{service_name, ReaperCrd, APP_PORT},
};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not connected to a reaper instance")]
    NotConnected,
    #[error("failed to reach the reaper management api: {0}")]
    Http(#[from] ::reqwest::Error),
    #[error("unexpected response from the reaper management api: {0}")]
    UnexpectedStatus(StatusCode),
    #[error("failed to build a reaper management url: {0}")]
    Url(#[from] ::url::ParseError),
}

/// The management-protocol surface the reconciler requires of a running
/// Reaper application. Implementations must keep all three operations safely
/// re-callable: registering an already-registered datacenter is a no-op.
#[async_trait::async_trait]
pub trait ReaperManager
where
    Self: Send + Sync,
{
    async fn connect(&self, reaper: &ReaperCrd) -> Result<(), Error>;

    async fn add_cluster(&self, datacenter: &CassandraDatacenterCrd) -> Result<(), Error>;

    async fn verify_cluster_is_configured(
        &self,
        datacenter: &CassandraDatacenterCrd,
    ) -> Result<bool, Error>;
}

/// Talks to the Reaper REST management API through the generated service.
#[derive(Default)]
pub struct HttpReaperManager {
    client: ::reqwest::Client,
    endpoint: RwLock<Option<Url>>,
}

impl HttpReaperManager {
    /// The in-cluster base URL of a Reaper instance's management API.
    pub fn management_endpoint(reaper: &ReaperCrd) -> Result<Url, Error> {
        let name = service_name(&reaper.name_any());
        let namespace = reaper.namespace().unwrap_or_else(|| "default".into());
        Url::parse(&format!("http://{name}.{namespace}.svc:{APP_PORT}")).map_err(Into::into)
    }

    /// The hostname Reaper should use to seed its connection to a datacenter.
    pub fn seed_host(datacenter: &CassandraDatacenterCrd) -> String {
        let name = datacenter.service_name();
        let namespace = datacenter.namespace().unwrap_or_else(|| "default".into());
        format!("{name}.{namespace}.svc")
    }

    async fn cluster_url(&self, datacenter: &CassandraDatacenterCrd) -> Result<Url, Error> {
        let endpoint = self
            .endpoint
            .read()
            .await
            .clone()
            .ok_or(Error::NotConnected)?;
        endpoint
            .join(&format!("cluster/{}", datacenter.spec.cluster_name))
            .map_err(Into::into)
    }
}

#[async_trait::async_trait]
impl ReaperManager for HttpReaperManager {
    async fn connect(&self, reaper: &ReaperCrd) -> Result<(), Error> {
        let endpoint = Self::management_endpoint(reaper)?;

        let ping = endpoint.join("ping")?;
        let response = self.client.get(ping).send().await?;
        if !response.status().is_success() {
            return Err(Error::UnexpectedStatus(response.status()));
        }

        debug!("connected to reaper at {endpoint}");
        self.endpoint.write().await.replace(endpoint);
        Ok(())
    }

    async fn add_cluster(&self, datacenter: &CassandraDatacenterCrd) -> Result<(), Error> {
        let mut url = self.cluster_url(datacenter).await?;
        url.query_pairs_mut()
            .append_pair("seedHost", &Self::seed_host(datacenter));

        let response = self.client.put(url).send().await?;
        match response.status() {
            // CONFLICT means the cluster is already registered
            status if status.is_success() || status == StatusCode::CONFLICT => {
                debug!("registered cluster {}", datacenter.spec.cluster_name);
                Ok(())
            }
            status => Err(Error::UnexpectedStatus(status)),
        }
    }

    async fn verify_cluster_is_configured(
        &self,
        datacenter: &CassandraDatacenterCrd,
    ) -> Result<bool, Error> {
        let url = self.cluster_url(datacenter).await?;

        let response = self.client.get(url).send().await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(Error::UnexpectedStatus(status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use kube::core::ObjectMeta;
    use reaper_api::{cassandra::CassandraDatacenterSpec, reaper::*};

    use super::*;

    #[test]
    fn endpoint_and_seed_host_derive_from_stable_names() {
        let mut reaper = ReaperCrd::new(
            "repairs",
            ReaperSpec {
                datacenter_ref: CassandraDatacenterRef {
                    name: "dc1".into(),
                    namespace: None,
                },
                datacenter_availability: Default::default(),
                container_image: None,
                init_container_image: None,
                service_account_name: "default".into(),
                keyspace: DEFAULT_KEYSPACE.into(),
                cassandra_user_secret_ref: None,
                jmx_user_secret_ref: None,
                auto_scheduling: Default::default(),
                liveness_probe: None,
                readiness_probe: None,
                affinity: None,
                tolerations: Vec::new(),
                pod_security_context: None,
                security_context: None,
                init_container_security_context: None,
            },
        );
        reaper.metadata.namespace = Some("ops".into());

        let endpoint = HttpReaperManager::management_endpoint(&reaper).unwrap();
        assert_eq!(endpoint.as_str(), "http://repairs-service.ops.svc:8080/");

        let mut datacenter = CassandraDatacenterCrd::new(
            "dc1",
            CassandraDatacenterSpec {
                cluster_name: "demo".into(),
                server_type: "cassandra".into(),
                server_version: "4.0.3".into(),
                size: 3,
                users: Vec::new(),
                pod_template_spec: None,
            },
        );
        datacenter.metadata = ObjectMeta {
            name: Some("dc1".into()),
            namespace: Some("cass".into()),
            ..Default::default()
        };
        assert_eq!(
            HttpReaperManager::seed_host(&datacenter),
            "demo-dc1-service.cass.svc",
        );
    }
}
