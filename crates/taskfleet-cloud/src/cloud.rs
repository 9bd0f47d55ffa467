//! Cloud selection: provider, region, credentials and operation deadlines

use crate::error::{CloudError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

/// Supported backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Aws,
    Gcp,
    Az,
    K8s,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Aws => "aws",
            Provider::Gcp => "gcp",
            Provider::Az => "az",
            Provider::K8s => "k8s",
        }
    }

    /// Environment variables that must be present in [`Cloud::credentials`]
    /// when credentials are supplied explicitly
    pub fn required_credentials(&self) -> &'static [&'static str] {
        match self {
            Provider::Aws => &["AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY"],
            Provider::Gcp => &["GOOGLE_APPLICATION_CREDENTIALS_DATA"],
            Provider::Az => &[
                "AZURE_CLIENT_ID",
                "AZURE_CLIENT_SECRET",
                "AZURE_SUBSCRIPTION_ID",
                "AZURE_TENANT_ID",
            ],
            Provider::K8s => &["KUBECONFIG_DATA"],
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "aws" => Ok(Provider::Aws),
            "gcp" => Ok(Provider::Gcp),
            "az" | "azure" => Ok(Provider::Az),
            "k8s" | "kubernetes" => Ok(Provider::K8s),
            other => Err(CloudError::ProviderNotFound(other.to_string())),
        }
    }
}

/// Generic region name (`us-east`, `us-west`, `eu-north`, `eu-west`) or a
/// provider-native one, which is passed through untouched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Region(pub String);

impl Region {
    pub fn new(region: impl Into<String>) -> Self {
        Self(region.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Region (or zone, for GCP) understood by the provider
    pub fn native(&self, provider: Provider) -> String {
        let mapped = match (provider, self.0.as_str()) {
            (Provider::Aws, "us-east") => "us-east-1",
            (Provider::Aws, "us-west") => "us-west-1",
            (Provider::Aws, "eu-north") => "eu-north-1",
            (Provider::Aws, "eu-west") => "eu-west-1",
            (Provider::Gcp, "us-east") => "us-east1-c",
            (Provider::Gcp, "us-west") => "us-west1-b",
            (Provider::Gcp, "eu-north") => "europe-north1-a",
            (Provider::Gcp, "eu-west") => "europe-west1-d",
            (Provider::Az, "us-east") => "eastus",
            (Provider::Az, "us-west") => "westus2",
            (Provider::Az, "eu-north") => "northeurope",
            (Provider::Az, "eu-west") => "westeurope",
            (_, other) => other,
        };
        mapped.to_string()
    }
}

impl Default for Region {
    fn default() -> Self {
        Self("us-west".to_string())
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deadlines per operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Duration,
    pub read: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(15 * 60),
            read: Duration::from_secs(3 * 60),
            update: Duration::from_secs(3 * 60),
            delete: Duration::from_secs(15 * 60),
        }
    }
}

/// Where and as whom a task runs
#[derive(Debug, Clone)]
pub struct Cloud {
    pub provider: Provider,
    pub region: Region,
    pub timeouts: Timeouts,
    /// Provider environment variables handed to the provider tooling
    pub credentials: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
}

impl Cloud {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            region: Region::default(),
            timeouts: Timeouts::default(),
            credentials: BTreeMap::new(),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_region(mut self, region: Region) -> Self {
        self.region = region;
        self
    }

    pub fn with_credentials(mut self, credentials: BTreeMap<String, String>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn native_region(&self) -> String {
        self.region.native(self.provider)
    }

    /// Explicit credential, falling back to the process environment
    pub fn credential(&self, key: &str) -> Option<String> {
        self.credentials
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
            .filter(|value| !value.is_empty())
    }

    /// Check that every credential the provider requires was supplied
    pub fn validate_credentials(&self) -> Result<()> {
        let missing: Vec<&str> = self
            .provider
            .required_credentials()
            .iter()
            .copied()
            .filter(|key| !self.credentials.contains_key(*key))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(CloudError::AuthenticationFailed(format!(
                "missing {} credentials: {}",
                self.provider,
                missing.join(", ")
            )))
        }
    }
}

/// Bound `future` by `limit`, reporting `operation` on expiry
pub async fn with_timeout<T, F>(operation: &str, limit: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(CloudError::Timeout(format!(
            "{operation} did not finish within {}s",
            limit.as_secs()
        ))),
    }
}
