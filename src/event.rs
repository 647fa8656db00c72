//! Tracked events and the collection shape clients submit them in.
//!
//! A client posts one [`Collection`]: device/session metadata shared by every
//! item plus a list of [`Payload`]s. Each payload becomes one [`Event`], the
//! unit the engine buffers and hands to a storage converter.

use chrono::DateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// One tracked user action, ready for persistence.
///
/// Immutable after construction except for the IP mutators, which the
/// HTTP layer applies before the event enters the job queue.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Event {
    pub device_id: String,
    pub client_id: String,
    pub session: String,
    pub nr: u32,
    pub env: String,
    pub system_version: String,
    pub product_version: String,
    /// ISO-8601 timestamp (`YYYY-MM-DDTHH:MM:SS`, UTC).
    pub at: String,
    pub timezone: String,
    pub event: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub device_make: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub device_model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub system: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub system_language: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub browser: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub browser_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub product_git_hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub product_language: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub country: String,
    /// Free-form parameters as a serialized JSON object.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parameters: String,
}

impl Event {
    /// Build an event from the shared collection metadata and one payload.
    pub fn new(meta: &Collection, payload: &Payload) -> Self {
        Self {
            device_id: meta.device_id.clone(),
            client_id: meta.client_id.clone(),
            session: meta.session.clone(),
            nr: payload.nr,
            env: meta.env.clone(),
            system_version: meta.system_version.clone(),
            product_version: meta.product_version.clone(),
            at: to_isoformat(payload.at),
            timezone: payload.timezone.clone(),
            event: payload.event.clone(),
            device_make: meta.device_make.clone(),
            device_model: meta.device_model.clone(),
            system: meta.system.clone(),
            system_language: meta.system_language.clone(),
            browser: meta.browser.clone(),
            browser_version: meta.browser_version.clone(),
            product_git_hash: meta.product_git_hash.clone(),
            product_language: meta.product_language.clone(),
            user_id: payload.user_id.clone(),
            tenant_id: payload.tenant_id.clone(),
            ip: payload.ip.clone(),
            country: payload.country.clone(),
            parameters: parameters_to_json(&payload.parameters),
        }
    }

    pub fn set_ip_address(&mut self, ip: impl Into<String>) {
        self.ip = ip.into();
    }

    /// Mask the last octet of an IPv4 address (`1.2.3.4` -> `1.2.3.0`).
    /// Anything that is not a dotted quad is left alone.
    pub fn truncate_ipv4_last_octet(&mut self) {
        if let Cow::Owned(masked) = ipv4_pattern().replace(&self.ip, "${prefix}.0") {
            self.ip = masked;
        }
    }

    /// Field values in record order, for delimited output formats.
    pub fn to_record(&self) -> Vec<String> {
        vec![
            self.device_id.clone(),
            self.client_id.clone(),
            self.session.clone(),
            self.nr.to_string(),
            self.env.clone(),
            self.system_version.clone(),
            self.product_version.clone(),
            self.at.clone(),
            self.timezone.clone(),
            self.event.clone(),
            self.device_make.clone(),
            self.device_model.clone(),
            self.system.clone(),
            self.system_language.clone(),
            self.browser.clone(),
            self.browser_version.clone(),
            self.product_git_hash.clone(),
            self.product_language.clone(),
            self.user_id.clone(),
            self.tenant_id.clone(),
            self.ip.clone(),
            self.country.clone(),
            self.parameters.clone(),
        ]
    }
}

fn ipv4_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<prefix>[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3})\.[0-9]{1,3}$")
            .expect("IPv4 pattern is valid")
    })
}

/// Unix seconds to `YYYY-MM-DDTHH:MM:SS` in UTC.
pub fn to_isoformat(at: u64) -> String {
    i64::try_from(at)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string())
        .unwrap_or_default()
}

fn parameters_to_json(parameters: &[Parameter]) -> String {
    let map: BTreeMap<&str, &str> = parameters
        .iter()
        .map(|p| (p.name.as_str(), p.value.as_str()))
        .collect();
    serde_json::to_string(&map).unwrap_or_else(|_| "{}".to_string())
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

/// A batch of payloads sharing device and session metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub session: String,
    #[serde(default)]
    pub system_version: String,
    #[serde(default)]
    pub product_version: String,
    #[serde(default = "default_env")]
    pub env: String,
    #[serde(default)]
    pub device_make: String,
    #[serde(default)]
    pub device_model: String,
    #[serde(default)]
    pub system: String,
    #[serde(default)]
    pub system_language: String,
    #[serde(default)]
    pub browser: String,
    #[serde(default)]
    pub browser_version: String,
    #[serde(default)]
    pub product_git_hash: String,
    #[serde(default)]
    pub product_language: String,
    #[serde(default)]
    pub payloads: Vec<Payload>,
}

fn default_env() -> String {
    "PRODUCTION".to_string()
}

impl Collection {
    /// Required identifiers are present and every payload names an event and a time.
    pub fn is_valid(&self) -> bool {
        let ids_present = !self.device_id.is_empty()
            && !self.client_id.is_empty()
            && !self.session.is_empty()
            && !self.system_version.is_empty()
            && !self.product_version.is_empty();
        ids_present
            && self
                .payloads
                .iter()
                .all(|p| !p.event.is_empty() && p.at != 0)
    }

    pub fn has_payloads(&self) -> bool {
        !self.payloads.is_empty()
    }

    /// Expand into one event per payload, in submission order.
    pub fn events(&self) -> Vec<Event> {
        self.payloads.iter().map(|p| Event::new(self, p)).collect()
    }
}

/// A single tracked action inside a collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    /// Unix seconds.
    #[serde(default)]
    pub at: u64,
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub nr: u32,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub timezone: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub country: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: String,
}
