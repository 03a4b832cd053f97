//! The `browser-askpass` credential helper.
//!
//! git runs `$GIT_ASKPASS "<prompt>"` and reads the answer from stdout. The
//! helper works out which repository is being fetched, asks the broker at
//! `BROWSER_ASKPASS_ADDR` for the requested field and prints it.

use std::path::Path;
use std::time::Duration;

use browser_askpass::AskpassClient;
use browser_core::messages::CredentialField;
use regex::Regex;
use tokio::process::Command;
use tracing::debug;
use url::Url;

use crate::errors::HelperError;

/// Overall deadline for one helper invocation.
pub const HELPER_TIMEOUT: Duration = Duration::from_secs(20);

/// A classified git credential prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub field: CredentialField,
    /// The URL quoted in the prompt, without any embedded credentials.
    pub url: Option<Url>,
}

impl Prompt {
    /// Classify a prompt such as `Username for 'https://github.com': `.
    ///
    /// # Errors
    ///
    /// Returns `HelperError::UnexpectedPrompt` for anything that is not a
    /// username or password prompt.
    pub fn parse(prompt: &str) -> Result<Self, HelperError> {
        let field = if prompt.starts_with("Username ") {
            CredentialField::Username
        } else if prompt.starts_with("Password ") {
            CredentialField::Password
        } else {
            return Err(HelperError::UnexpectedPrompt {
                prompt: prompt.trim().to_string(),
            });
        };

        Ok(Self {
            field,
            url: quoted_url(prompt),
        })
    }
}

fn quoted_url(prompt: &str) -> Option<Url> {
    let pattern = Regex::new(r"'([^']+)'").ok()?;
    let quoted = pattern.captures(prompt)?.get(1)?.as_str();
    Url::parse(quoted).ok().map(without_credentials)
}

fn without_credentials(mut url: Url) -> Url {
    // Only fails for cannot-be-a-base URLs, which carry no credentials.
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url
}

/// The `origin` remote of the repository containing `dir`, if it is an
/// absolute URL.
pub async fn origin_url(dir: &Path) -> Option<Url> {
    let output = Command::new("git")
        .args(["config", "--get", "remote.origin.url"])
        .current_dir(dir)
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        debug!(dir = %dir.display(), "No origin remote");
        return None;
    }

    let remote = String::from_utf8_lossy(&output.stdout);
    Url::parse(remote.trim()).ok().map(without_credentials)
}

/// Answer `prompt` for the repository in `dir`.
///
/// The repository URL comes from the `origin` remote, falling back to the
/// URL quoted in the prompt.
///
/// # Errors
///
/// Returns `HelperError` if the prompt is not recognised, no repository URL
/// can be determined or the broker does not answer.
pub async fn answer(client: &AskpassClient, prompt: &str, dir: &Path) -> Result<String, HelperError> {
    let prompt = Prompt::parse(prompt)?;

    let repo_url = match origin_url(dir).await {
        Some(url) => url,
        None => prompt.url.ok_or(HelperError::NoRepositoryUrl)?,
    };

    debug!(field = %prompt.field, repo_url = %repo_url, "Asking credential broker");
    Ok(client.ask(&repo_url, prompt.field).await?)
}

/// Answer `prompt` for the repository in the working directory, using the
/// broker named by the environment.
pub async fn run_helper(prompt: &str) -> Result<String, HelperError> {
    let client = AskpassClient::from_env(HELPER_TIMEOUT)?;
    let dir = std::env::current_dir().unwrap_or_else(|_| std::env::temp_dir());
    answer(&client, prompt, &dir).await
}

#[cfg(test)]
#[path = "helper_tests.rs"]
mod tests;
