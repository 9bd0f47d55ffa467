//! SSH key material for worker access
//!
//! Every task gets one ed25519 key pair derived from its identifier and the
//! cloud credentials, so any host holding the same credentials recovers the
//! same pair and nothing is stored locally.
//!
//! ```text
//! seed = SHA-256("taskfleet-ssh" ‖ long identifier ‖ credentials)
//! ```

use crate::cloud::Cloud;
use crate::error::Result;
use crate::identifier::Identifier;
use crate::resource::{DataSource, Slot};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use ssh_key::private::{Ed25519Keypair, KeypairData};
use ssh_key::{LineEnding, PrivateKey};

const DOMAIN: &[u8] = b"taskfleet-ssh";

/// OpenSSH-formatted key pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshKeyPair {
    pub public_key: String,
    pub private_key: String,
}

impl SshKeyPair {
    /// Pair for `identifier` under `secret`; equal inputs give equal pairs
    pub fn derive(identifier: &Identifier, secret: &str) -> Result<Self> {
        let mut hasher = Sha256::new();
        hasher.update(DOMAIN);
        hasher.update(identifier.long().as_bytes());
        hasher.update([0]);
        hasher.update(secret.as_bytes());
        let seed: [u8; 32] = hasher.finalize().into();

        let keypair = Ed25519Keypair::from_seed(&seed);
        let private = PrivateKey::new(KeypairData::from(keypair), identifier.long())?;
        Ok(Self {
            public_key: private.public_key().to_openssh()?,
            private_key: private.to_openssh(LineEnding::LF)?.to_string(),
        })
    }

    /// Pair for a task on `cloud`, keyed by the provider's credentials
    pub fn for_task(cloud: &Cloud, identifier: &Identifier) -> Result<Self> {
        Self::derive(identifier, &credential_secret(cloud))
    }
}

/// Provider credentials joined in a fixed order
fn credential_secret(cloud: &Cloud) -> String {
    let values: Vec<String> = cloud
        .provider
        .required_credentials()
        .iter()
        .filter_map(|key| cloud.credential(key))
        .collect();
    if values.is_empty() {
        tracing::warn!(
            "No {} credentials in the environment; SSH keys depend on the task name only",
            cloud.provider
        );
    }
    values.join("\n")
}

/// Task key pair as a data source
pub struct KeyMaterial {
    cloud: Cloud,
    identifier: Identifier,
    pub value: Slot<SshKeyPair>,
}

impl KeyMaterial {
    pub fn new(cloud: Cloud, identifier: Identifier) -> Self {
        Self {
            cloud,
            identifier,
            value: Slot::new("SSH key pair"),
        }
    }

    /// Derived pair, reading it first if needed
    pub async fn pair(&self) -> Result<SshKeyPair> {
        if let Some(pair) = self.value.try_get() {
            return Ok(pair);
        }
        self.read().await?;
        self.value.get()
    }
}

#[async_trait]
impl DataSource for KeyMaterial {
    async fn read(&self) -> Result<()> {
        let pair = SshKeyPair::for_task(&self.cloud, &self.identifier)?;
        self.value.set(pair);
        Ok(())
    }
}
