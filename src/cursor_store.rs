//! Cursor(watermark) storage with a remote-then-file fallback
//! The remote tier is a pluggable key-value secret store, define it as
//! trait and implement it for the testability(using mock)
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use log::{info, warn};
use serde::Deserialize;
use serde_json::json;

#[cfg(test)]
use mockall::{automock, predicate::*};

/// get/put-by-name semantics over the latest version of a named secret
#[cfg_attr(test, automock)]
pub trait SecretStore {
    fn get(&self, name: &str) -> Result<Option<String>>;
    fn put(&self, name: &str, value: &str) -> Result<()>;
}

/// GCP Secret Manager over its REST surface.
/// Authenticates with the access token served by the Cloud Run metadata
/// server, so it only works inside the hosted environment.
pub struct GcpSecretStore {
    agent: ureq::Agent,
    project_id: String,
}

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const SECRET_MANAGER_URL: &str = "https://secretmanager.googleapis.com/v1";

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
}

#[derive(Deserialize)]
struct SecretVersion {
    payload: SecretPayload,
}

#[derive(Deserialize)]
struct SecretPayload {
    data: String,
}

impl GcpSecretStore {
    pub fn new(project_id: String) -> Self {
        let agent: ureq::Agent = ureq::AgentBuilder::new()
            .timeout_read(Duration::from_secs(5))
            .timeout_write(Duration::from_secs(5))
            .build();
        GcpSecretStore { agent, project_id }
    }

    fn access_token(&self) -> Result<String> {
        let response = self
            .agent
            .get(METADATA_TOKEN_URL)
            .set("Metadata-Flavor", "Google")
            .call()?;
        let token: MetadataToken = serde_json::from_reader(response.into_reader())?;
        Ok(token.access_token)
    }

    fn add_version(&self, token: &str, name: &str, value: &str) -> Result<(), ureq::Error> {
        self.agent
            .post(&format!(
                "{}/projects/{}/secrets/{}:addVersion",
                SECRET_MANAGER_URL, self.project_id, name
            ))
            .set("Authorization", &format!("Bearer {}", token))
            .send_json(json!({ "payload": { "data": base64::encode(value) } }))?;
        Ok(())
    }
}

impl SecretStore for GcpSecretStore {
    fn get(&self, name: &str) -> Result<Option<String>> {
        let token = self.access_token()?;
        let request = self
            .agent
            .get(&format!(
                "{}/projects/{}/secrets/{}/versions/latest:access",
                SECRET_MANAGER_URL, self.project_id, name
            ))
            .set("Authorization", &format!("Bearer {}", token));

        let response = match request.call() {
            Ok(response) => response,
            // secret or version not created yet
            Err(ureq::Error::Status(404, _)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let version: SecretVersion = serde_json::from_reader(response.into_reader())?;
        let decoded = base64::decode(&version.payload.data)?;
        Ok(Some(String::from_utf8(decoded)?))
    }

    fn put(&self, name: &str, value: &str) -> Result<()> {
        let token = self.access_token()?;
        match self.add_version(&token, name, value) {
            Ok(()) => Ok(()),
            // create the secret container on first use, then retry once
            Err(ureq::Error::Status(404, _)) => {
                info!("Secret {} is not found. Creating it", name);
                self.agent
                    .post(&format!(
                        "{}/projects/{}/secrets?secretId={}",
                        SECRET_MANAGER_URL, self.project_id, name
                    ))
                    .set("Authorization", &format!("Bearer {}", token))
                    .send_json(json!({ "replication": { "automatic": {} } }))?;
                self.add_version(&token, name, value)?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Two storage tiers tried in priority order.
/// The remote tier is only wired in when the process runs hosted with a
/// project identity, that decision is made by the caller at construction.
pub struct CursorStore<S: SecretStore> {
    remote: Option<S>,
    secret_name: String,
    state_file: PathBuf,
}

impl<S: SecretStore> CursorStore<S> {
    pub fn new(remote: Option<S>, secret_name: String, state_file: PathBuf) -> Self {
        CursorStore {
            remote,
            secret_name,
            state_file,
        }
    }

    /// Load the cursor, remote tier first, then the local state file.
    /// Nothing stored anywhere means a first run, so no error escapes.
    pub fn load(&self) -> Option<String> {
        if let Some(remote) = &self.remote {
            match remote.get(&self.secret_name) {
                Ok(Some(cursor)) if !cursor.trim().is_empty() => {
                    let cursor = cursor.trim().to_string();
                    info!("Loaded the previous id from the secret store: {}", cursor);
                    return Some(cursor);
                }
                Ok(_) => {
                    info!("No id in the secret store. Checking the local state file")
                }
                Err(e) => {
                    warn!("Secret store read failed, falling back to the file: {:#}", e)
                }
            }
        }
        self.load_file()
    }

    fn load_file(&self) -> Option<String> {
        match fs::read_to_string(&self.state_file) {
            Ok(raw) => {
                let cursor = raw.trim();
                if cursor.is_empty() {
                    info!("The state file is empty. Treating this as the first run");
                    None
                } else {
                    info!("Loaded the previous id: {}", cursor);
                    Some(cursor.to_string())
                }
            }
            Err(_) => {
                info!("The state file is not found. Treating this as the first run");
                None
            }
        }
    }

    /// Save the cursor, remote tier first; a remote failure falls back to
    /// the local state file, a local failure propagates
    pub fn save(&self, cursor: &str) -> Result<()> {
        if let Some(remote) = &self.remote {
            match remote.put(&self.secret_name, cursor) {
                Ok(()) => {
                    info!("Saved the id to the secret store: {}", cursor);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Secret store write failed, falling back to the file: {:#}", e)
                }
            }
        }
        fs::write(&self.state_file, cursor)?;
        info!("Saved the id: {}", cursor);
        Ok(())
    }
}
