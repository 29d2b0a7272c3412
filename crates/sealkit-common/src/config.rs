//! JSON session profiles.
//!
//! A profile captures everything needed to set up one side of a TLS session:
//!
//! ```json
//! {
//!   "endpoint": "client",
//!   "verify": "required",
//!   "hostname": "localhost",
//!   "ca_chain": "ca.pem",
//!   "personalization": "edge-proxy-7"
//! }
//! ```
//!
//! Relative file paths are resolved against the directory holding the profile.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sealkit_crypto::drbg::{DRBG_MAX_INPUT, DRBG_RESEED_INTERVAL};
use sealkit_crypto::{Drbg, Endpoint, EntropyPool, TlsSession, VerifyMode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

pub const DEFAULT_READ_BUFFER: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Server,
}

impl From<Role> for Endpoint {
    fn from(role: Role) -> Self {
        match role {
            Role::Client => Endpoint::Client,
            Role::Server => Endpoint::Server,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyPolicy {
    None,
    Optional,
    Required,
}

impl From<VerifyPolicy> for VerifyMode {
    fn from(policy: VerifyPolicy) -> Self {
        match policy {
            VerifyPolicy::None => VerifyMode::None,
            VerifyPolicy::Optional => VerifyMode::Optional,
            VerifyPolicy::Required => VerifyMode::Required,
        }
    }
}

fn default_verify() -> VerifyPolicy {
    VerifyPolicy::Required
}

fn default_reseed_interval() -> u64 {
    DRBG_RESEED_INTERVAL
}

fn default_read_buffer() -> usize {
    DEFAULT_READ_BUFFER
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionProfile {
    pub endpoint: Role,
    #[serde(default = "default_verify")]
    pub verify: VerifyPolicy,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub ca_chain: Option<PathBuf>,
    #[serde(default)]
    pub cert: Option<PathBuf>,
    #[serde(default)]
    pub key: Option<PathBuf>,
    #[serde(default)]
    pub personalization: Option<String>,
    #[serde(default = "default_reseed_interval")]
    pub reseed_interval: u64,
    #[serde(default = "default_read_buffer")]
    pub read_buffer: usize,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl SessionProfile {
    /// A profile with defaults for everything but the role.
    pub fn new(endpoint: Role) -> Self {
        Self {
            endpoint,
            verify: default_verify(),
            hostname: None,
            ca_chain: None,
            cert: None,
            key: None,
            personalization: None,
            reseed_interval: default_reseed_interval(),
            read_buffer: default_read_buffer(),
            base_dir: None,
        }
    }

    /// Read and validate a profile file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let mut profile = Self::from_json(&text)?;
        profile.base_dir = path.parent().map(Path::to_path_buf);
        debug!(path = %path.display(), endpoint = ?profile.endpoint, "loaded session profile");
        Ok(profile)
    }

    /// Parse and validate a profile from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let profile: Self = serde_json::from_str(text)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        match (&self.cert, &self.key) {
            (Some(_), None) => return Err(Error::config("cert is set but key is missing")),
            (None, Some(_)) => return Err(Error::config("key is set but cert is missing")),
            _ => {}
        }
        if self.endpoint == Role::Server && self.cert.is_none() {
            return Err(Error::config("server profiles need a cert and key"));
        }
        if self.verify == VerifyPolicy::Required && self.ca_chain.is_none() {
            return Err(Error::config("required verification needs a ca_chain"));
        }
        if self.reseed_interval == 0 {
            return Err(Error::config("reseed_interval must be positive"));
        }
        if self.read_buffer == 0 {
            return Err(Error::config("read_buffer must be positive"));
        }
        if let Some(p) = &self.personalization {
            if p.len() > DRBG_MAX_INPUT {
                return Err(Error::config(format!(
                    "personalization is {} bytes, limit is {DRBG_MAX_INPUT}",
                    p.len()
                )));
            }
        }
        Ok(())
    }

    /// Resolve a profile path against the profile's directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Build the generator this profile asks for.
    pub fn build_rng(&self, pool: &Arc<EntropyPool>) -> Result<Drbg> {
        let personalization = self.personalization.as_deref().map(str::as_bytes);
        let drbg = Drbg::new(pool, personalization)?;
        drbg.set_reseed_interval(self.reseed_interval)?;
        Ok(drbg)
    }

    /// Push role, verification policy, hostname, and certificates into a
    /// fresh session. The RNG and transport are left to the caller.
    pub fn configure(&self, session: &mut TlsSession) -> Result<()> {
        session.set_endpoint(self.endpoint.into())?;
        session.set_verify_mode(self.verify.into())?;
        if let Some(host) = &self.hostname {
            session.set_hostname(host)?;
        }
        if let Some(path) = &self.ca_chain {
            let pem = fs::read_to_string(self.resolve(path))?;
            let count = session.set_ca_chain(&pem)?;
            debug!(count, "loaded CA certificates");
        }
        if let (Some(cert), Some(key)) = (&self.cert, &self.key) {
            let cert_pem = fs::read_to_string(self.resolve(cert))?;
            let key_pem = fs::read_to_string(self.resolve(key))?;
            session.set_own_cert(&cert_pem, &key_pem)?;
        }
        Ok(())
    }
}
