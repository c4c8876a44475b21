//! KvStore over the Consul HTTP API (or the `kvsem serve` subset of it).
//!
//! Enable with the `consul` feature flag. Calls are blocking.

use std::time::Duration;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::StoreError;
use crate::infrastructure::KvStore;
use crate::types::{KvEntry, PutOptions, SessionRequest};
use crate::wire::{KvPairJson, SessionCreateJson, SessionIdJson};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// RFC 3986 unreserved characters pass through; `#`, `?`, `%` and the rest
/// are escaped so a key can never leave its path.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn escape(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

/// `/v1/kv/<key>` with every segment escaped and the `/` separators kept.
pub(crate) fn kv_path(key: &str) -> String {
    let segments: Vec<String> = key.split('/').map(escape).collect();
    format!("/v1/kv/{}", segments.join("/"))
}

pub struct ConsulKvStore {
    agent: ureq::Agent,
    base_url: String,
    token: Option<String>,
    datacenter: Option<String>,
}

impl ConsulKvStore {
    /// `address` is the agent's base URL, e.g. `http://127.0.0.1:8500`.
    pub fn new(address: &str) -> Self {
        Self::with_timeout(address, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(address: &str, timeout: Duration) -> Self {
        let address = address.trim_end_matches('/');
        let base_url = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };

        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            base_url,
            token: None,
            datacenter: None,
        }
    }

    /// ACL token sent as `X-Consul-Token`
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_datacenter(mut self, datacenter: impl Into<String>) -> Self {
        self.datacenter = Some(datacenter.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        let mut request = self
            .agent
            .request(method, &format!("{}{}", self.base_url, path));
        if let Some(token) = &self.token {
            request = request.set("X-Consul-Token", token);
        }
        if let Some(dc) = &self.datacenter {
            request = request.query("dc", dc);
        }
        request
    }
}

fn map_error(error: ureq::Error) -> StoreError {
    match error {
        ureq::Error::Status(status, response) => StoreError::Http {
            status,
            message: response.into_string().unwrap_or_default().trim().to_string(),
        },
        ureq::Error::Transport(transport) => StoreError::Transport(transport.to_string()),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(response: ureq::Response) -> Result<T, StoreError> {
    response
        .into_json()
        .map_err(|e| StoreError::Protocol(e.to_string()))
}

impl KvStore for ConsulKvStore {
    fn create_session(&self, request: &SessionRequest) -> Result<String, StoreError> {
        let body = SessionCreateJson::from(request);
        let response = self
            .request("PUT", "/v1/session/create")
            .send_json(&body)
            .map_err(map_error)?;
        let created: SessionIdJson = read_json(response)?;
        Ok(created.id)
    }

    fn renew_session(&self, session_id: &str) -> Result<bool, StoreError> {
        match self
            .request("PUT", &format!("/v1/session/renew/{}", escape(session_id)))
            .call()
        {
            Ok(_) => Ok(true),
            Err(ureq::Error::Status(404, _)) => Ok(false),
            Err(e) => Err(map_error(e)),
        }
    }

    fn destroy_session(&self, session_id: &str) -> Result<(), StoreError> {
        self.request("PUT", &format!("/v1/session/destroy/{}", escape(session_id)))
            .call()
            .map_err(map_error)?;
        Ok(())
    }

    fn put(&self, key: &str, value: &[u8], options: &PutOptions) -> Result<bool, StoreError> {
        let mut request = self.request("PUT", &kv_path(key));
        if let Some(session_id) = &options.acquire {
            request = request.query("acquire", session_id);
        }
        if let Some(cas) = options.cas {
            request = request.query("cas", &cas.to_string());
        }

        let response = match request.send_bytes(value) {
            Ok(response) => response,
            Err(ureq::Error::Status(500, response)) => {
                let message = response.into_string().unwrap_or_default();
                if message.contains("invalid session") {
                    return Err(StoreError::InvalidSession(
                        options.acquire.clone().unwrap_or_default(),
                    ));
                }
                return Err(StoreError::Http {
                    status: 500,
                    message: message.trim().to_string(),
                });
            }
            Err(e) => return Err(map_error(e)),
        };
        read_json(response)
    }

    fn list_recursive(&self, prefix: &str) -> Result<Vec<KvEntry>, StoreError> {
        let response = match self
            .request("GET", &kv_path(prefix))
            .query("recurse", "true")
            .call()
        {
            Ok(response) => response,
            Err(ureq::Error::Status(404, _)) => return Ok(Vec::new()),
            Err(e) => return Err(map_error(e)),
        };

        let pairs: Vec<KvPairJson> = read_json(response)?;
        let mut entries = pairs
            .into_iter()
            .map(KvEntry::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.request("DELETE", &kv_path(key))
            .call()
            .map_err(map_error)?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<KvEntry>, StoreError> {
        let response = match self.request("GET", &kv_path(key)).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(404, _)) => return Ok(None),
            Err(e) => return Err(map_error(e)),
        };

        let pairs: Vec<KvPairJson> = read_json(response)?;
        pairs
            .into_iter()
            .find(|pair| pair.key == key)
            .map(KvEntry::try_from)
            .transpose()
    }
}
