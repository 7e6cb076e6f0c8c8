// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! GitHub release feed with a best-known-value cache

use crate::config::ReleaseFeedConfig;
use crate::error::{FleetError, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;

const USER_AGENT: &str = concat!("fluxion-ota/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct GithubRelease {
    tag_name: String,
}

#[derive(Debug, Clone)]
struct CachedRelease {
    tag: String,
    fetched_at: DateTime<Utc>,
}

/// Latest upstream firmware release, refreshed on demand.
///
/// The cached tag only ever moves forward to the next successfully fetched value;
/// a failed refresh leaves it as it was.
#[derive(Debug)]
pub struct VersionFeed {
    client: reqwest::Client,
    repository: String,
    url: String,
    cache: RwLock<Option<CachedRelease>>,
}

impl VersionFeed {
    pub fn new(config: &ReleaseFeedConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| FleetError::FeedFetch(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            repository: config.repository.clone(),
            url: format!(
                "{}/repos/{}/releases/latest",
                config.api_base_url(),
                config.repository
            ),
            cache: RwLock::new(None),
        })
    }

    /// Fetch the latest release tag and cache it.
    ///
    /// Failures are logged and returned; the cached value is left untouched.
    pub async fn refresh(&self) -> Result<String> {
        match self.fetch_latest_tag().await {
            Ok(tag) => {
                let previous = self.cache.write().replace(CachedRelease {
                    tag: tag.clone(),
                    fetched_at: Utc::now(),
                });
                match previous {
                    Some(old) if old.tag == tag => {
                        tracing::debug!("Latest {} release unchanged: {tag}", self.repository);
                    }
                    _ => tracing::info!("Latest {} release: {tag}", self.repository),
                }
                Ok(tag)
            }
            Err(e) => {
                tracing::error!("Failed to refresh latest release: {e}");
                Err(e)
            }
        }
    }

    /// Last successfully fetched tag, never blocks on I/O
    pub fn current(&self) -> Option<String> {
        self.cache.read().as_ref().map(|c| c.tag.clone())
    }

    pub fn last_refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.cache.read().as_ref().map(|c| c.fetched_at)
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn release_url(&self, tag: &str) -> String {
        release_url(&self.repository, tag)
    }

    async fn fetch_latest_tag(&self) -> Result<String> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| FleetError::FeedFetch(format!("Request failed: {e}")))?;

        if let Some(remaining) = response.headers().get("x-ratelimit-remaining")
            && let Ok(remaining_str) = remaining.to_str()
            && let Ok(remaining_int) = remaining_str.parse::<u32>()
            && remaining_int < 10
        {
            tracing::warn!("GitHub rate limit low: {remaining_int} remaining");
        }

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_owned());
            return Err(FleetError::FeedFetch(format!(
                "GitHub API error {status}: {body}"
            )));
        }

        let release: GithubRelease = response
            .json()
            .await
            .map_err(|e| FleetError::FeedFetch(format!("Failed to parse response: {e}")))?;

        let tag = release.tag_name.trim();
        if tag.is_empty() {
            return Err(FleetError::FeedFetch("Release has an empty tag_name".to_owned()));
        }

        Ok(tag.to_owned())
    }
}

pub fn release_url(repository: &str, tag: &str) -> String {
    format!("https://github.com/{repository}/releases/tag/{tag}")
}
