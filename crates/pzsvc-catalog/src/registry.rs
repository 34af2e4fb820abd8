//! Service registration
//!
//! On startup the service looks itself up in the catalog by name and then
//! either registers fresh or refreshes the existing entry.

use crate::client::CatalogClient;
use crate::error::{CatalogError, Result};
use crate::model::{ClassType, ResourceMetadata, Service, ServiceList};
use reqwest::header::AUTHORIZATION;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// What this service announces about itself
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceRegistration {
    pub name: String,
    pub description: String,
    pub url: String,
    pub version: String,
    pub attributes: BTreeMap<String, String>,
}

/// Which registration path was taken
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManageOutcome {
    Registered,
    Updated { service_id: String },
}

impl ServiceRegistration {
    fn to_service(&self, service_id: &str) -> Service {
        Service {
            service_id: service_id.to_string(),
            url: self.url.clone(),
            resource_metadata: ResourceMetadata {
                name: self.name.clone(),
                description: self.description.clone(),
                class_type: ClassType::default(),
                method: "POST".to_string(),
                version: self.version.clone(),
                metadata: self.attributes.clone(),
            },
        }
    }
}

impl CatalogClient {
    /// Search for a registered service whose name matches exactly.
    pub async fn find_service(&self, name: &str, credential: &str) -> Result<Option<String>> {
        let response = self
            .http()
            .get(self.url("service"))
            .query(&[("per_page", "1000"), ("keyword", name)])
            .header(AUTHORIZATION, credential)
            .send()
            .await?;

        let status = response.status();
        let url = response.url().to_string();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CatalogError::Status {
                status: status.as_u16(),
                url,
                body,
            });
        }

        let list: ServiceList = serde_json::from_str(&body)?;
        Ok(list
            .data
            .into_iter()
            .find(|svc| svc.resource_metadata.name == name)
            .map(|svc| svc.service_id))
    }

    /// Register `registration`, or update it when a service of that name
    /// already exists.
    pub async fn manage_registration(
        &self,
        registration: &ServiceRegistration,
        credential: &str,
    ) -> Result<ManageOutcome> {
        if credential.is_empty() {
            return Err(CatalogError::MissingCredential);
        }

        let existing = self.find_service(&registration.name, credential).await?;
        let service = registration.to_service(existing.as_deref().unwrap_or_default());
        debug!(service = %serde_json::to_string(&service)?, "Registration payload");

        let (request, outcome) = match existing {
            None => {
                info!(name = %registration.name, "Registering service");
                (self.http().post(self.url("service")), ManageOutcome::Registered)
            }
            Some(service_id) => {
                info!(name = %registration.name, service_id = %service_id, "Updating service registration");
                (
                    self.http().put(self.url(&format!("service/{}", service_id))),
                    ManageOutcome::Updated { service_id },
                )
            }
        };

        let response = request
            .header(AUTHORIZATION, credential)
            .json(&service)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let url = response.url().to_string();
            let body = response.text().await.unwrap_or_default();
            return Err(CatalogError::Status {
                status: status.as_u16(),
                url,
                body,
            });
        }

        Ok(outcome)
    }
}
