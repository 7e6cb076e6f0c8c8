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

use crate::error::Result;
use async_trait::async_trait;

/// Publish/subscribe transport the fleet engine talks through.
///
/// Implementations report failures as `FleetError::Transport`. Delivery of
/// inbound messages is not part of this trait; the transport feeds them to
/// the [`Dispatcher`](crate::dispatcher::Dispatcher).
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Fire-and-forget publish
    async fn publish(&self, topic: &str, payload: &str) -> Result<()>;

    async fn subscribe(&self, topic: &str) -> Result<()>;

    async fn unsubscribe(&self, topic: &str) -> Result<()>;
}
