//! # Browser GitHub
//!
//! Everything the module browser needs to act as an installed GitHub App:
//!
//! - [`auth`]: the credential issuer. Mints RS256 application tokens locally,
//!   exchanges them for installation tokens, caches both until they near
//!   expiry and revokes installation tokens when their client closes.
//! - [`client`]: the REST surface consumed by the issuer and the bus
//!   components, behind the [`client::GitHubApi`] trait.
//! - [`askpass`]: the bus component answering credential requests for
//!   repositories hosted on the served GitHub instance.
//! - [`watcher`]: the bus component that enumerates installations and
//!   publishes discovered repositories and Go modules.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use browser_github::auth::{
//!     AppCredential, AuthConfig, ClientId, CredentialIssuer, ExpiringToken, InstallationId,
//!     InstallationPermissions, PermissionLevel, PrivateKey, TokenOptions,
//! };
//! use browser_github::auth::jwt::Rs256Signer;
//! use browser_github::client::{ClientConfig, RestClient};
//!
//! # async fn example(pem: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let key = PrivateKey::from_pem(pem)?;
//! let signer = Rs256Signer::new(&key)?;
//! let credential = AppCredential::new(ClientId::new("Iv1.0123456789abcdef")?, key, None);
//! let api = RestClient::new(ClientConfig::default())?;
//!
//! let issuer = CredentialIssuer::new(
//!     credential,
//!     Arc::new(signer),
//!     Arc::new(api),
//!     AuthConfig::default(),
//! );
//!
//! let client = issuer.installation_client(
//!     InstallationId::new(42),
//!     TokenOptions::new(InstallationPermissions::new().with("contents", PermissionLevel::Read)),
//! )?;
//! let token = client.token().await?;
//! println!("token expires at {}", token.expires_at());
//!
//! client.close();
//! issuer.close();
//! # Ok(())
//! # }
//! ```

pub mod askpass;
pub mod auth;
pub mod client;
pub mod error;
pub mod watcher;

#[cfg(test)]
pub(crate) mod test_support;

pub use askpass::CredentialResponder;
pub use auth::{CredentialIssuer, InstallationClient, InstallationClientCache};
pub use client::{GitHubApi, RestClient};
pub use error::{ApiError, AuthError, SigningError, ValidationError, WatchError};
pub use watcher::{RepositoryWatcher, WatchSummary};
