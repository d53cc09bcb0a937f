//! Service Client Matrix
//!
//! One provider handle per (profile, region) cell for a service. Global
//! services (S3, IAM) collapse the region dimension to a single cell per
//! profile.

use crate::aws::auth::{self, Credentials};
use crate::aws::client::{AwsClient, ClientSettings};
use crate::aws::credentials::CredentialStore;
use crate::aws::service::Service;
use crate::error::{Error, Result};
use crate::resource::Provider;
use std::sync::Arc;

/// Profile label used when credentials do not come from a named profile
pub const DEFAULT_PROFILE: &str = "default";

/// Where the matrix gets its credentials
#[derive(Debug, Clone)]
pub enum CredentialSource {
    /// Profiles from the credentials store; `None` means all of them
    Profiles(Option<Vec<String>>),
    /// One access key pair given on the command line
    Static(Credentials),
    /// Environment variables or the instance role
    Ambient,
}

/// One authenticated handle
#[derive(Clone)]
pub struct MatrixCell {
    pub profile: String,
    /// `None` for global services
    pub region: Option<String>,
    pub provider: Arc<dyn Provider>,
}

impl std::fmt::Debug for MatrixCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixCell")
            .field("profile", &self.profile)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// All cells for one service, in profile order then region order
#[derive(Debug, Clone)]
pub struct ServiceMatrix {
    service: Service,
    cells: Vec<MatrixCell>,
}

impl ServiceMatrix {
    /// Assemble a matrix from ready-made cells
    pub fn from_cells(service: Service, cells: Vec<MatrixCell>) -> Self {
        Self { service, cells }
    }

    /// Build the matrix for `service`.
    ///
    /// Profiles missing from the store or lacking a key pair are skipped with
    /// a warning. Ending up with no cell at all is a configuration error, as
    /// is an empty region list for a regional service.
    pub async fn build(
        service: Service,
        source: &CredentialSource,
        store: Option<&CredentialStore>,
        regions: &[String],
        settings: &ClientSettings,
    ) -> Result<Self> {
        if !service.is_global() && regions.is_empty() {
            return Err(Error::config(format!(
                "no regions configured for regional service {}",
                service
            )));
        }

        let identities: Vec<(String, Credentials)> = match source {
            CredentialSource::Static(creds) => vec![(DEFAULT_PROFILE.to_string(), creds.clone())],
            CredentialSource::Ambient => {
                vec![(DEFAULT_PROFILE.to_string(), auth::resolve_ambient().await?)]
            }
            CredentialSource::Profiles(wanted) => {
                let Some(store) = store else {
                    return Err(Error::config("no credentials store loaded"));
                };
                profile_credentials(store, wanted.as_deref())
            }
        };

        let mut cells = Vec::new();
        for (profile, creds) in identities {
            if service.is_global() {
                cells.push(MatrixCell {
                    profile: profile.clone(),
                    region: None,
                    provider: Arc::new(AwsClient::new(service, None, creds, settings.clone())),
                });
                continue;
            }
            for region in regions {
                cells.push(MatrixCell {
                    profile: profile.clone(),
                    region: Some(region.clone()),
                    provider: Arc::new(AwsClient::new(
                        service,
                        Some(region),
                        creds.clone(),
                        settings.clone(),
                    )),
                });
            }
        }

        if cells.is_empty() {
            return Err(Error::config(format!(
                "no usable profile for service {}",
                service
            )));
        }

        tracing::debug!(service = %service, cells = cells.len(), "built client matrix");
        Ok(Self { service, cells })
    }

    pub fn service(&self) -> Service {
        self.service
    }

    pub fn cells(&self) -> &[MatrixCell] {
        &self.cells
    }

    /// Profiles in matrix order, each once
    pub fn profiles(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for cell in &self.cells {
            if !seen.contains(&cell.profile.as_str()) {
                seen.push(&cell.profile);
            }
        }
        seen
    }

    /// Look up a cell. For global services `region` is ignored.
    pub fn cell(&self, profile: &str, region: Option<&str>) -> Option<&MatrixCell> {
        self.cells.iter().find(|cell| {
            cell.profile == profile && (self.service.is_global() || cell.region.as_deref() == region)
        })
    }
}

fn profile_credentials(
    store: &CredentialStore,
    wanted: Option<&[String]>,
) -> Vec<(String, Credentials)> {
    let names = match wanted {
        Some(names) => names.to_vec(),
        None => store.profiles(),
    };

    names
        .into_iter()
        .filter_map(|profile| {
            if !store.contains(&profile) {
                tracing::warn!(profile = %profile, "profile not found in credentials store, skipping");
                return None;
            }
            match store.credentials(&profile) {
                Ok(creds) => Some((profile, creds)),
                Err(e) => {
                    tracing::warn!(profile = %profile, error = %e, "unusable profile, skipping");
                    None
                }
            }
        })
        .collect()
}
