//! Hand-written doubles shared by the unit tests of this crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use url::Url;

use crate::auth::jwt::{JwtClaims, JwtSigner};
use crate::auth::{
    AppCredential, AuthConfig, ClientId, CredentialIssuer, InstallationId, PrivateKey,
    RepositoryId, TokenOptions,
};
use crate::client::{Account, GitHubApi, Installation, InstallationTokenGrant, Repository};
use crate::error::{ApiError, SigningError};

pub(crate) const TEST_KEY: &str = include_str!("../testdata/test_app_key.pem");

/// Signs nothing; returns `jwt-<jti>` and counts calls.
#[derive(Default)]
pub(crate) struct StubSigner {
    pub signs: AtomicUsize,
}

#[async_trait]
impl JwtSigner for StubSigner {
    async fn sign(&self, claims: &JwtClaims) -> Result<String, SigningError> {
        self.signs.fetch_add(1, Ordering::SeqCst);
        Ok(format!("jwt-{}", claims.jti))
    }
}

/// In-memory GitHub that counts token mints and revocations.
pub(crate) struct MockApi {
    pub token_ttl: chrono::Duration,
    pub create_latency: Duration,
    pub revoke_latency: Duration,
    pub fail_revoke: AtomicBool,
    pub creates: AtomicUsize,
    pub revokes: AtomicUsize,
    pub lookups: AtomicUsize,
    pub revoked: Mutex<Vec<String>>,
    pub installations: Vec<Installation>,
    pub repositories: HashMap<InstallationId, Vec<Repository>>,
    pub repo_installations: HashMap<String, InstallationId>,
    pub files: HashMap<String, String>,
    pub commits: HashMap<String, String>,
}

impl Default for MockApi {
    fn default() -> Self {
        Self {
            token_ttl: chrono::Duration::minutes(60),
            create_latency: Duration::from_millis(10),
            revoke_latency: Duration::ZERO,
            fail_revoke: AtomicBool::new(false),
            creates: AtomicUsize::new(0),
            revokes: AtomicUsize::new(0),
            lookups: AtomicUsize::new(0),
            revoked: Mutex::new(Vec::new()),
            installations: Vec::new(),
            repositories: HashMap::new(),
            repo_installations: HashMap::new(),
            files: HashMap::new(),
            commits: HashMap::new(),
        }
    }
}

impl MockApi {
    pub fn with_token_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn revokes(&self) -> usize {
        self.revokes.load(Ordering::SeqCst)
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Installation token strings look like `ghs_<installation>_<n>`.
    pub fn installation_of(token: &str) -> Option<InstallationId> {
        token
            .strip_prefix("ghs_")?
            .split('_')
            .next()?
            .parse()
            .ok()
    }
}

#[async_trait]
impl GitHubApi for MockApi {
    async fn create_installation_token(
        &self,
        app_token: &str,
        installation_id: InstallationId,
        options: &TokenOptions,
    ) -> Result<InstallationTokenGrant, ApiError> {
        if !app_token.starts_with("jwt-") {
            return Err(ApiError::AuthenticationFailed);
        }
        tokio::time::sleep(self.create_latency).await;
        if installation_id.as_u64() == 404 {
            return Err(ApiError::NotFound);
        }

        let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(InstallationTokenGrant {
            token: format!("ghs_{}_{}", installation_id, n),
            expires_at: Utc::now() + self.token_ttl,
            permissions: options.permissions.clone(),
            repositories: Vec::new(),
        })
    }

    async fn revoke_installation_token(&self, installation_token: &str) -> Result<(), ApiError> {
        tokio::time::sleep(self.revoke_latency).await;
        self.revokes.fetch_add(1, Ordering::SeqCst);
        if self.fail_revoke.load(Ordering::SeqCst) {
            return Err(ApiError::HttpError {
                status: 502,
                message: "bad gateway".to_string(),
            });
        }
        self.revoked
            .lock()
            .unwrap()
            .push(installation_token.to_string());
        Ok(())
    }

    async fn list_installations(&self, _app_token: &str) -> Result<Vec<Installation>, ApiError> {
        Ok(self.installations.clone())
    }

    async fn list_installation_repositories(
        &self,
        installation_token: &str,
    ) -> Result<Vec<Repository>, ApiError> {
        let id = Self::installation_of(installation_token).ok_or(ApiError::AuthenticationFailed)?;
        Ok(self.repositories.get(&id).cloned().unwrap_or_default())
    }

    async fn find_repository_installation(
        &self,
        _app_token: &str,
        owner: &str,
        _repo: &str,
    ) -> Result<Installation, ApiError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let id = self
            .repo_installations
            .get(owner)
            .copied()
            .ok_or(ApiError::NotFound)?;
        Ok(installation(id.as_u64(), owner))
    }

    async fn get_commit_sha(
        &self,
        _token: &str,
        owner: &str,
        repo: &str,
        reference: &str,
    ) -> Result<String, ApiError> {
        self.commits
            .get(&format!("{owner}/{repo}@{reference}"))
            .cloned()
            .ok_or(ApiError::NotFound)
    }

    async fn get_file_contents(
        &self,
        _token: &str,
        owner: &str,
        repo: &str,
        path: &str,
        _reference: &str,
    ) -> Result<Option<String>, ApiError> {
        Ok(self.files.get(&format!("{owner}/{repo}/{path}")).cloned())
    }
}

pub(crate) fn installation(id: u64, login: &str) -> Installation {
    Installation {
        id: InstallationId::new(id),
        account: Account {
            id,
            login: login.to_string(),
            account_type: Some("Organization".to_string()),
        },
    }
}

pub(crate) fn repository(id: u64, owner: &str, name: &str) -> Repository {
    Repository {
        id: RepositoryId::new(id),
        name: name.to_string(),
        full_name: format!("{owner}/{name}"),
        owner: Account {
            id: 1,
            login: owner.to_string(),
            account_type: None,
        },
        clone_url: Url::parse(&format!("https://github.com/{owner}/{name}.git")).unwrap(),
        default_branch: Some("main".to_string()),
        fork: false,
        archived: false,
        is_template: false,
    }
}

pub(crate) fn test_config() -> AuthConfig {
    AuthConfig {
        app_token_ttl: Duration::from_secs(60),
        app_token_refresh_margin: Duration::from_secs(5),
        installation_token_refresh_margin: Duration::from_secs(1),
        request_timeout: Duration::from_secs(2),
    }
}

pub(crate) fn test_issuer(api: Arc<MockApi>, config: AuthConfig) -> CredentialIssuer {
    test_issuer_with_signer(api, Arc::new(StubSigner::default()), config)
}

pub(crate) fn test_issuer_with_signer(
    api: Arc<MockApi>,
    signer: Arc<StubSigner>,
    config: AuthConfig,
) -> CredentialIssuer {
    let credential = AppCredential::new(
        ClientId::new("Iv1.test").unwrap(),
        PrivateKey::from_pem(TEST_KEY).unwrap(),
        None,
    );
    CredentialIssuer::new(credential, signer, api, config)
}

/// Poll `check` until it holds or a second passes.
pub(crate) async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
