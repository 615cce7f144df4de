// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Application metadata used to enrich labels.
//!
//! The real cache resolves ids against the platform API and lives outside this
//! crate. It plugs in through [`AppInfoRepository`].

use std::collections::HashMap;

/// Human readable metadata for one application. Empty fields mean unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppInfo {
    pub name: String,
    pub space_name: String,
    pub space_guid: String,
    pub org_name: String,
    pub org_guid: String,
}

pub trait AppInfoRepository: Send + Sync {
    /// Looks up `app_id`. A miss returns `AppInfo::default()`.
    fn get_app_info(&self, app_id: &str) -> AppInfo;

    /// Bulk load, called once before events are consumed.
    fn warm_up(&self) {}
}

/// Resolves nothing. Used when metadata resolution is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAppInfoRepository;

impl AppInfoRepository for NullAppInfoRepository {
    fn get_app_info(&self, _app_id: &str) -> AppInfo {
        AppInfo::default()
    }
}

/// Fixed id to metadata table.
#[derive(Debug, Default, Clone)]
pub struct StaticAppInfoRepository {
    apps: HashMap<String, AppInfo>,
}

impl StaticAppInfoRepository {
    #[must_use]
    pub fn new(apps: HashMap<String, AppInfo>) -> Self {
        Self { apps }
    }
}

impl AppInfoRepository for StaticAppInfoRepository {
    fn get_app_info(&self, app_id: &str) -> AppInfo {
        self.apps.get(app_id).cloned().unwrap_or_default()
    }
}
