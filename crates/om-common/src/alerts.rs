//! Alert-configuration reconciliation.
//!
//! The first pod of a deployment reconciles the project's alert
//! configurations once: desired alerts absent from the project are created,
//! and alerts whose monitored settings drifted are updated in place under
//! their existing id.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::OmResult;

/// The alert settings that are compared; everything else the server adds
/// (links, created/updated timestamps, enabled flag) is ignored.
const CHECKED_KEYS: [&str; 6] = [
    "eventTypeName",
    "matchers",
    "notifications",
    "threshold",
    "typeName",
    "metricThreshold",
];

/// One alert configuration. Alerts are matched by `eventTypeName`; the
/// remaining settings stay schemaless since the API accepts many shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub event_type_name: String,
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

/// Paged collection as returned by the alertConfigs endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertConfigPage {
    #[serde(default)]
    pub results: Vec<AlertConfig>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Alerts to push after a diff: `create` via POST, `update` via PUT under
/// the carried id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertChanges {
    pub create: Vec<AlertConfig>,
    pub update: Vec<AlertConfig>,
}

impl AlertChanges {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty()
    }
}

fn checked_value(alert: &AlertConfig, key: &str) -> Option<Value> {
    if key == "eventTypeName" {
        return Some(Value::String(alert.event_type_name.clone()));
    }
    alert.settings.get(key).cloned()
}

/// True when every checked key the desired alert specifies matches the
/// current alert.
fn settings_match(current: &AlertConfig, desired: &AlertConfig) -> bool {
    CHECKED_KEYS.iter().all(|key| match checked_value(desired, key) {
        Some(wanted) => checked_value(current, key).as_ref() == Some(&wanted),
        None => true,
    })
}

/// Diffs desired alerts against the project's current ones.
///
/// `group_id` is stamped onto newly created alerts; updates carry the id of
/// the alert they replace.
pub fn diff_alerts(
    group_id: &str,
    current: &[AlertConfig],
    desired: &[AlertConfig],
) -> OmResult<AlertChanges> {
    let mut changes = AlertChanges::default();

    for wanted in desired {
        match current
            .iter()
            .find(|c| c.event_type_name == wanted.event_type_name)
        {
            Some(existing) => {
                if !settings_match(existing, wanted) {
                    let mut update = wanted.clone();
                    update.id = existing.id.clone();
                    update.group_id = Some(group_id.to_string());
                    changes.update.push(update);
                }
            }
            None => {
                let mut create = wanted.clone();
                create.group_id = Some(group_id.to_string());
                changes.create.push(create);
            }
        }
    }

    Ok(changes)
}
