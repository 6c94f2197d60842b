//! Git fetcher - shallow checkouts of a single tag or branch.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use git2::build::CheckoutBuilder;
use git2::{Cred, CredentialType, FetchOptions, RemoteCallbacks, Repository};
use url::Url;

use crate::sources::fetch::Fetcher;

/// Default network timeout for a single fetch.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// [`Fetcher`] backed by libgit2.
///
/// Fetches `refs/tags/<ref>` with depth 1, falling back to
/// `refs/heads/<ref>`, then checks the commit out detached.
#[derive(Debug, Clone)]
pub struct GitFetcher {
    timeout: Duration,
}

impl Default for GitFetcher {
    fn default() -> Self {
        GitFetcher {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl GitFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn fetch_options(&self, deadline: Instant) -> FetchOptions<'static> {
        let mut callbacks = RemoteCallbacks::new();
        // Returning false from the progress callback aborts the transfer.
        callbacks.transfer_progress(move |_| Instant::now() < deadline);
        callbacks.credentials(|_url, username, allowed| {
            if allowed.contains(CredentialType::SSH_KEY) {
                Cred::ssh_key_from_agent(username.unwrap_or("git"))
            } else {
                Cred::default()
            }
        });

        let mut opts = FetchOptions::new();
        opts.remote_callbacks(callbacks);
        opts.depth(1);
        opts
    }
}

impl Fetcher for GitFetcher {
    fn fetch(&self, url: &str, reference: &str, destination: &Path) -> Result<()> {
        let display_url = redact_url(url);
        tracing::debug!("git fetch {} @ {}", display_url, reference);

        let deadline = Instant::now() + self.timeout;
        let repo = Repository::init(destination)
            .with_context(|| format!("failed to init repository at {}", destination.display()))?;
        let mut remote = repo
            .remote_anonymous(url)
            .with_context(|| format!("invalid remote {}", display_url))?;

        let (tag_spec, branch_spec) = refspecs(reference);
        let mut opts = self.fetch_options(deadline);
        let target = match remote.fetch(&[tag_spec.as_str()], Some(&mut opts), None) {
            Ok(()) => format!("refs/tags/{}", reference),
            Err(tag_err) => {
                if Instant::now() >= deadline {
                    bail!(
                        "timed out after {}s fetching {}",
                        self.timeout.as_secs(),
                        display_url
                    );
                }
                tracing::debug!("tag `{}` not fetched ({}), trying branch", reference, tag_err);
                let mut opts = self.fetch_options(deadline);
                remote
                    .fetch(&[branch_spec.as_str()], Some(&mut opts), None)
                    .with_context(|| {
                        format!(
                            "`{}` is neither a tag nor a branch of {}",
                            reference, display_url
                        )
                    })?;
                format!("refs/remotes/origin/{}", reference)
            }
        };

        let object = repo
            .revparse_single(&target)
            .with_context(|| format!("fetched ref {} not found", target))?;
        let commit = object
            .peel_to_commit()
            .with_context(|| format!("{} does not point at a commit", target))?;

        repo.checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().force()))
            .context("failed to check out fetched tree")?;
        repo.set_head_detached(commit.id())
            .context("failed to detach HEAD")?;

        tracing::debug!("checked out {} at {}", reference, commit.id());
        Ok(())
    }
}

/// Refspecs for the tag form and the branch form of `reference`.
fn refspecs(reference: &str) -> (String, String) {
    (
        format!("+refs/tags/{r}:refs/tags/{r}", r = reference),
        format!("+refs/heads/{r}:refs/remotes/origin/{r}", r = reference),
    )
}

/// Strip credentials from a URL before it is logged.
pub fn redact_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) if !parsed.username().is_empty() || parsed.password().is_some() => {
            let _ = parsed.set_username("");
            let _ = parsed.set_password(None);
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}
