// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Builds the label set attached to every log entry and metric.
//!
//! A label is only emitted when its source field is present. Events that can
//! carry an application id additionally get the id and whatever metadata the
//! [`AppInfoRepository`] knows about it.

use crate::app_info::AppInfoRepository;
use crate::event::Event;
use crate::metric::Labels;
use std::sync::Arc;

pub const ORIGIN: &str = "origin";
pub const EVENT_TYPE: &str = "event_type";
pub const DEPLOYMENT: &str = "deployment";
pub const JOB: &str = "job";
pub const INDEX: &str = "index";
pub const IP: &str = "ip";
pub const APPLICATION_ID: &str = "application_id";
pub const APP_NAME: &str = "app_name";
pub const SPACE_NAME: &str = "space_name";
pub const SPACE_GUID: &str = "space_guid";
pub const ORG_NAME: &str = "org_name";
pub const ORG_GUID: &str = "org_guid";

#[derive(Clone)]
pub struct LabelBuilder {
    app_info: Arc<dyn AppInfoRepository>,
}

impl LabelBuilder {
    pub fn new(app_info: Arc<dyn AppInfoRepository>) -> Self {
        Self { app_info }
    }

    #[must_use]
    pub fn build(&self, event: &Event) -> Labels {
        let mut labels = Labels::new();

        insert_present(&mut labels, ORIGIN, event.origin.as_deref());
        labels.insert(EVENT_TYPE.to_string(), event.kind().to_string());
        insert_present(&mut labels, DEPLOYMENT, event.deployment.as_deref());
        insert_present(&mut labels, JOB, event.job.as_deref());
        insert_present(&mut labels, INDEX, event.index.as_deref());
        insert_present(&mut labels, IP, event.ip.as_deref());

        if let Some(app_id) = event.application_id() {
            self.insert_app_metadata(&mut labels, &app_id);
            labels.insert(APPLICATION_ID.to_string(), app_id);
        }

        labels
    }

    fn insert_app_metadata(&self, labels: &mut Labels, app_id: &str) {
        let app = self.app_info.get_app_info(app_id);
        insert_non_empty(labels, APP_NAME, app.name);
        insert_non_empty(labels, SPACE_NAME, app.space_name);
        insert_non_empty(labels, SPACE_GUID, app.space_guid);
        insert_non_empty(labels, ORG_NAME, app.org_name);
        insert_non_empty(labels, ORG_GUID, app.org_guid);
    }
}

fn insert_present(labels: &mut Labels, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        labels.insert(key.to_string(), value.to_string());
    }
}

fn insert_non_empty(labels: &mut Labels, key: &str, value: String) {
    if !value.is_empty() {
        labels.insert(key.to_string(), value);
    }
}
