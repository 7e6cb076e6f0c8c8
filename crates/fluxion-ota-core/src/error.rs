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

//! Error types for the OTA fleet crate

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("release feed fetch failed: {0}")]
    FeedFetch(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("no target version known for device {0}")]
    NoTargetVersion(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("config file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, FleetError>;
