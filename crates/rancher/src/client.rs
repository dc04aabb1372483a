//! HTTP client for the Cattle API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::error::RancherError;
use crate::models::{Certificate, Collection, LoadBalancer, Project, Service};

/// Platform operations the reconciler depends on
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Active, labelled services in listing order
    async fn eligible_services(&self) -> Result<Vec<Service>, RancherError>;

    /// All load balancer services
    async fn load_balancers(&self) -> Result<Vec<LoadBalancer>, RancherError>;

    /// The certificate record named `name`, if one exists
    async fn find_certificate(&self, name: &str) -> Result<Option<Certificate>, RancherError>;

    /// Create the record if it has no id, otherwise update it in place
    async fn upsert_certificate(&self, certificate: &Certificate) -> Result<(), RancherError>;

    /// Replace the load balancer record
    async fn update_load_balancer(&self, load_balancer: &LoadBalancer) -> Result<(), RancherError>;
}

/// Cattle API client
///
/// Every request carries the configured `Authorization` header and is
/// bounded by the client timeout.
#[derive(Debug, Clone)]
pub struct RancherClient {
    endpoint: String,
    eligibility_label: String,
    http: reqwest::Client,
}

impl RancherClient {
    /// Create a client for `endpoint` (e.g. `http://rancher:8080/v2-beta`)
    pub fn new(
        endpoint: impl Into<String>,
        authorization: &str,
        eligibility_label: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RancherError> {
        let mut auth = HeaderValue::from_str(authorization)
            .map_err(|e| RancherError::Config(format!("invalid authorization header: {}", e)))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| RancherError::Config(e.to_string()))?;

        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        debug!(endpoint = %endpoint, "Created Cattle API client");

        Ok(Self {
            endpoint,
            eligibility_label: eligibility_label.into(),
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// First project visible to the API key; certificates are written there
    pub async fn project(&self) -> Result<Project, RancherError> {
        let url = format!("{}/projects", self.endpoint);
        let projects: Collection<Project> = self.get_json(&url, &[]).await?;
        projects
            .data
            .into_iter()
            .next()
            .ok_or(RancherError::NoProject)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, RancherError> {
        trace!(url = %url, "GET");
        let response = self
            .execute("GET", url, self.http.get(url).query(query))
            .await?;
        response
            .json::<T>()
            .await
            .map_err(|source| RancherError::Decode {
                url: url.to_string(),
                source,
            })
    }

    async fn execute(
        &self,
        method: &'static str,
        url: &str,
        request: RequestBuilder,
    ) -> Result<Response, RancherError> {
        let response = request
            .send()
            .await
            .map_err(|source| RancherError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RancherError::Status {
                method,
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl PlatformApi for RancherClient {
    async fn eligible_services(&self) -> Result<Vec<Service>, RancherError> {
        let url = format!("{}/services", self.endpoint);
        let services: Collection<Service> = self
            .get_json(&url, &[("system", "false"), ("kind", "service")])
            .await?;

        let total = services.data.len();
        let eligible: Vec<Service> = services
            .data
            .into_iter()
            .filter(|s| s.is_eligible(&self.eligibility_label))
            .collect();

        debug!(
            total = total,
            eligible = eligible.len(),
            label = %self.eligibility_label,
            "Listed services"
        );

        Ok(eligible)
    }

    async fn load_balancers(&self) -> Result<Vec<LoadBalancer>, RancherError> {
        let url = format!("{}/loadbalancerservices", self.endpoint);
        let balancers: Collection<LoadBalancer> = self.get_json(&url, &[]).await?;
        debug!(count = balancers.data.len(), "Listed load balancers");
        Ok(balancers.data)
    }

    async fn find_certificate(&self, name: &str) -> Result<Option<Certificate>, RancherError> {
        let url = format!("{}/certificates", self.endpoint);
        let certificates: Collection<Certificate> = self
            .get_json(&url, &[("system", "false"), ("name", name)])
            .await?;

        Ok(certificates.data.into_iter().find(|c| c.name == name))
    }

    async fn upsert_certificate(&self, certificate: &Certificate) -> Result<(), RancherError> {
        let project = self.project().await?;

        let (method, url, request) = match &certificate.id {
            Some(id) => {
                let url = format!(
                    "{}/projects/{}/certificates/{}",
                    self.endpoint, project.id, id
                );
                let request = self.http.put(&url);
                ("PUT", url, request)
            }
            None => {
                let url = format!("{}/projects/{}/certificates", self.endpoint, project.id);
                let request = self.http.post(&url);
                ("POST", url, request)
            }
        };

        debug!(
            method = method,
            name = %certificate.name,
            project = %project.id,
            "Writing certificate to Cattle"
        );

        self.execute(method, &url, request.json(certificate)).await?;
        Ok(())
    }

    async fn update_load_balancer(&self, load_balancer: &LoadBalancer) -> Result<(), RancherError> {
        let url = format!(
            "{}/loadbalancerservices/{}",
            self.endpoint, load_balancer.id
        );

        debug!(
            load_balancer = %load_balancer.id,
            certificates = load_balancer.lb_config.certificate_ids.len(),
            "Updating load balancer"
        );

        self.execute("PUT", &url, self.http.put(&url).json(load_balancer))
            .await?;
        Ok(())
    }
}
