// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Client side of the Nebi server REST interface.
//!
//! Nebi only consumes the server. Everything that talks to it goes through the
//! [`Remote`] trait, so pulls and diffs can be exercised against an in-memory
//! server in tests. [`NebiClient`] is the real implementation over HTTP.

use crate::{
    config::RemoteSettings,
    error::{Error, Result},
    resolve::{Reference, Tag},
    LOCK_FILE, MANIFEST_FILE, SPEC_FILES,
};

use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Environment as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub owner: Option<Owner>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub username: String,
}

/// Tag pointing at a version of an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagInfo {
    pub tag: String,
    pub version_number: u64,
}

/// Successful answer to a login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub username: String,
}

/// Operations nebi needs from a Nebi server.
#[allow(async_fn_in_trait)]
pub trait Remote {
    /// Base URL of the server, without the API prefix.
    fn url(&self) -> &str;

    async fn list_environments(&self) -> Result<Vec<Environment>>;

    async fn get_environment(&self, id: &str) -> Result<Environment>;

    async fn list_tags(&self, id: &str) -> Result<Vec<TagInfo>>;

    async fn delete_environment(&self, id: &str) -> Result<()>;

    /// Fetch one spec file of a version.
    ///
    /// Returns [`None`] if the version has no such file.
    async fn fetch_file(&self, id: &str, version: u64, name: &str) -> Result<Option<Vec<u8>>>;
}

/// Spec files of one environment version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub environment: Environment,
    pub tag: String,
    pub version: u64,

    /// Raw bytes keyed by file name. Always holds `pixi.toml`.
    pub files: BTreeMap<String, Vec<u8>>,
}

/// Find environment by name, falling back to its server id.
///
/// # Errors
///
/// - Return [`Error::NotFound`] if the server has no environment of that name
///   or id.
pub async fn find_environment(remote: &impl Remote, name: &str) -> Result<Environment> {
    let by_name = remote
        .list_environments()
        .await?
        .into_iter()
        .find(|environment| environment.name == name);

    match by_name {
        Some(environment) => Ok(environment),
        None => remote.get_environment(name).await,
    }
}

/// Fetch spec files of `spec:tag` reference.
///
/// File fetches run concurrently, bounded by `workers`, and are all joined
/// before returning.
///
/// # Errors
///
/// - Return [`Error::Unavailable`] for digest references, they need an OCI
///   registry.
/// - Return [`Error::NotFound`] if the environment, the tag, or the manifest
///   of the version does not exist.
#[instrument(skip(remote), level = "debug")]
pub async fn fetch(remote: &impl Remote, reference: &Reference, workers: usize) -> Result<Fetched> {
    let tag = match &reference.tag {
        Tag::Name(tag) => tag.clone(),
        Tag::Digest(digest) => {
            return Err(Error::Unavailable {
                target: format!("{}@{digest}", reference.spec),
                reason: "digest references need an OCI registry".into(),
            })
        }
    };

    let environment = find_environment(remote, &reference.spec).await?;
    let version = remote
        .list_tags(&environment.id)
        .await?
        .into_iter()
        .find(|info| info.tag == tag)
        .map(|info| info.version_number)
        .ok_or_else(|| Error::not_found("tag", reference.to_string()))?;
    debug!("{reference} is version {version} of {:?}", environment.id);

    let results: Vec<_> = stream::iter(SPEC_FILES)
        .map(|name| {
            let id = environment.id.as_str();
            async move { (name, remote.fetch_file(id, version, name).await) }
        })
        .buffer_unordered(workers.max(1))
        .collect()
        .await;

    let mut files = BTreeMap::new();
    for (name, result) in results {
        if let Some(bytes) = result? {
            files.insert(name.to_string(), bytes);
        }
    }

    if !files.contains_key(MANIFEST_FILE) {
        return Err(Error::not_found("spec file", format!("{reference}/{MANIFEST_FILE}")));
    }

    Ok(Fetched {
        environment,
        tag,
        version,
        files,
    })
}

/// REST client for a Nebi server.
#[derive(Debug, Clone)]
pub struct NebiClient {
    url: String,
    token: Option<String>,
    http: Client,
}

impl NebiClient {
    /// Construct client for server URL.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Unavailable`] if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, token: Option<String>, settings: &RemoteSettings) -> Result<Self> {
        let url = url.into().trim_end_matches('/').to_string();
        let http = Client::builder()
            .user_agent(format!("nebi/{}", env!("CARGO_PKG_VERSION")))
            .timeout(settings.timeout())
            .build()
            .map_err(|err| Error::Unavailable {
                target: url.clone(),
                reason: err.to_string(),
            })?;

        Ok(Self { url, token, http })
    }

    /// Exchange username and password for a token.
    ///
    /// # Errors
    ///
    /// - Return [`Error::AuthRequired`] if the server rejects the credentials.
    #[instrument(skip(self, password), level = "debug")]
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse> {
        #[derive(Serialize)]
        struct Login<'a> {
            username: &'a str,
            password: &'a str,
        }

        let request = self
            .http
            .post(self.endpoint("/auth/login"))
            .json(&Login { username, password });
        let response = self.send(request, "user", username).await?;
        self.json(response).await
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v1{path}", self.url)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorize(self.http.get(self.endpoint(path)))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, what: &'static str, name: &str) -> Result<Response> {
        let response = request.send().await.map_err(|err| Error::Unavailable {
            target: self.url.clone(),
            reason: err.to_string(),
        })?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::AuthRequired {
                url: self.url.clone(),
            }),
            StatusCode::NOT_FOUND => Err(Error::not_found(what, name)),
            status if !status.is_success() => Err(Error::Unavailable {
                target: self.url.clone(),
                reason: format!("server answered {status}"),
            }),
            _ => Ok(response),
        }
    }

    async fn json<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        let bytes = response.bytes().await.map_err(|err| Error::Unavailable {
            target: self.url.clone(),
            reason: err.to_string(),
        })?;

        serde_json::from_slice(&bytes)
            .map_err(|err| Error::malformed(format!("response from {}", self.url), err.to_string()))
    }
}

impl Remote for NebiClient {
    fn url(&self) -> &str {
        &self.url
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_environments(&self) -> Result<Vec<Environment>> {
        let response = self.send(self.get("/environments"), "server", &self.url).await?;
        self.json(response).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_environment(&self, id: &str) -> Result<Environment> {
        let response = self
            .send(self.get(&format!("/environments/{id}")), "environment", id)
            .await?;
        self.json(response).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_tags(&self, id: &str) -> Result<Vec<TagInfo>> {
        let response = self
            .send(self.get(&format!("/environments/{id}/tags")), "environment", id)
            .await?;
        self.json(response).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete_environment(&self, id: &str) -> Result<()> {
        let request = self.authorize(self.http.delete(self.endpoint(&format!("/environments/{id}"))));
        self.send(request, "environment", id).await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn fetch_file(&self, id: &str, version: u64, name: &str) -> Result<Option<Vec<u8>>> {
        let slug = match name {
            MANIFEST_FILE => "pixi-toml",
            LOCK_FILE => "pixi-lock",
            _ => return Err(Error::not_found("spec file", name)),
        };

        let path = format!("/environments/{id}/versions/{version}/{slug}");
        let response = match self.send(self.get(&path), "spec file", name).await {
            Ok(response) => response,
            Err(Error::NotFound { .. }) if name == LOCK_FILE => return Ok(None),
            Err(err) => return Err(err),
        };

        let bytes = response.bytes().await.map_err(|err| Error::Unavailable {
            target: self.url.clone(),
            reason: err.to_string(),
        })?;
        Ok(Some(bytes.to_vec()))
    }
}

/// In-memory server for tests.
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub(crate) struct FakeRemote {
        pub environments: Vec<Environment>,
        pub tags: BTreeMap<String, Vec<TagInfo>>,
        pub files: BTreeMap<(String, u64, String), Vec<u8>>,
        pub deleted: Mutex<Vec<String>>,
    }

    impl FakeRemote {
        /// Publish spec files of an environment under a tag.
        pub(crate) fn publish(&mut self, name: &str, tag: &str, manifest: &str, lock: Option<&str>) {
            let id = match self.environments.iter().find(|env| env.name == name) {
                Some(env) => env.id.clone(),
                None => {
                    let id = format!("env-{}", self.environments.len() + 1);
                    let now = Utc::now();
                    self.environments.push(Environment {
                        id: id.clone(),
                        name: name.into(),
                        status: "ready".into(),
                        owner: Some(Owner {
                            username: "alice".into(),
                        }),
                        created_at: now,
                        updated_at: now,
                    });
                    id
                }
            };

            let tags = self.tags.entry(id.clone()).or_default();
            let version = tags.len() as u64 + 1;
            tags.push(TagInfo {
                tag: tag.into(),
                version_number: version,
            });

            self.files
                .insert((id.clone(), version, MANIFEST_FILE.into()), manifest.as_bytes().to_vec());
            if let Some(lock) = lock {
                self.files
                    .insert((id, version, LOCK_FILE.into()), lock.as_bytes().to_vec());
            }
        }
    }

    impl Remote for FakeRemote {
        fn url(&self) -> &str {
            "https://nebi.example.org"
        }

        async fn list_environments(&self) -> Result<Vec<Environment>> {
            Ok(self.environments.clone())
        }

        async fn get_environment(&self, id: &str) -> Result<Environment> {
            self.environments
                .iter()
                .find(|env| env.id == id)
                .cloned()
                .ok_or_else(|| Error::not_found("environment", id))
        }

        async fn list_tags(&self, id: &str) -> Result<Vec<TagInfo>> {
            self.tags
                .get(id)
                .cloned()
                .ok_or_else(|| Error::not_found("environment", id))
        }

        async fn delete_environment(&self, id: &str) -> Result<()> {
            self.get_environment(id).await?;
            if let Ok(mut deleted) = self.deleted.lock() {
                deleted.push(id.to_string());
            }
            Ok(())
        }

        async fn fetch_file(&self, id: &str, version: u64, name: &str) -> Result<Option<Vec<u8>>> {
            Ok(self
                .files
                .get(&(id.to_string(), version, name.to_string()))
                .cloned())
        }
    }
}
