// omectl - CLI for OpenManage Enterprise device inventory
// Copyright (C) 2024 Mathias Uhl <mathiasuhl@gmx.de>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Wire and in-memory types for the OME session and device services.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Body of `POST /api/SessionService/Sessions`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionRequest<'a> {
    pub user_name: &'a str,
    pub password: &'a str,
    pub session_type: &'a str,
}

impl<'a> SessionRequest<'a> {
    pub fn api(user_name: &'a str, password: &'a str) -> Self {
        Self {
            user_name,
            password,
            session_type: "API",
        }
    }
}

/// An authenticated X-Auth session. Lives until the process exits; no logout is sent.
#[derive(Clone)]
pub struct Session {
    base_url: Url,
    token: String,
    content_type: &'static str,
}

impl Session {
    pub fn new(base_url: Url, token: impl Into<String>) -> Self {
        Self {
            base_url,
            token: token.into(),
            content_type: JSON_CONTENT_TYPE,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("base_url", &self.base_url.as_str())
            .field("token", &"***")
            .field("content_type", &self.content_type)
            .finish()
    }
}

/// A device record exactly as the appliance returned it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Device(pub Map<String, Value>);

impl Device {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Best-effort label for error messages.
    pub fn label(&self) -> String {
        match self.field("Id").or_else(|| self.field("DeviceName")) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => "<unknown>".to_string(),
            Some(other) => other.to_string(),
        }
    }
}

/// One page of `GET /api/DeviceService/Devices`.
#[derive(Debug, Clone, Deserialize)]
pub struct DevicePage {
    #[serde(rename = "@odata.count", default)]
    pub count: i64,
    #[serde(default)]
    pub value: Vec<Device>,
    #[serde(rename = "@odata.nextLink", default)]
    pub next_link: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Every device page merged in delivery order.
///
/// `count` is the server-reported total from the first page. `next_link` is
/// whatever cursor the last merged page carried: `None` after a complete walk,
/// or the link of the page that could not be fetched when paging stopped early.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceCollection {
    #[serde(rename = "@odata.count")]
    pub count: i64,
    pub value: Vec<Device>,
    #[serde(
        rename = "@odata.nextLink",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub next_link: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DeviceCollection {
    pub fn merge(&mut self, page: DevicePage) {
        self.value.extend(page.value);
        self.next_link = page.next_link;
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }
}

impl From<DevicePage> for DeviceCollection {
    fn from(page: DevicePage) -> Self {
        Self {
            count: page.count,
            value: page.value,
            next_link: page.next_link,
            extra: page.extra,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page(body: Value) -> DevicePage {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn session_request_uses_ome_field_names() {
        let body = serde_json::to_value(SessionRequest::api("admin", "secret")).unwrap();
        assert_eq!(
            body,
            json!({"UserName": "admin", "Password": "secret", "SessionType": "API"})
        );
    }

    #[test]
    fn session_debug_hides_token() {
        let session = Session::new(Url::parse("https://ome.test/").unwrap(), "tok-123");
        let rendered = format!("{:?}", session);
        assert!(!rendered.contains("tok-123"));
        assert_eq!(session.token(), "tok-123");
        assert_eq!(session.content_type(), "application/json");
    }

    #[test]
    fn merge_appends_in_delivery_order_and_moves_cursor() {
        let mut collection = DeviceCollection::from(page(json!({
            "@odata.context": "/api/$metadata#Collection(DeviceService.Device)",
            "@odata.count": 3,
            "value": [{"Id": 1}, {"Id": 2}],
            "@odata.nextLink": "/api/DeviceService/Devices?$skip=2&$top=2"
        })));
        collection.merge(page(json!({
            "@odata.count": 3,
            "value": [{"Id": 3}]
        })));

        let ids: Vec<_> = collection.value.iter().map(|d| d.field("Id").cloned()).collect();
        assert_eq!(ids, vec![Some(json!(1)), Some(json!(2)), Some(json!(3))]);
        assert_eq!(collection.count, 3);
        assert!(collection.next_link.is_none());
        assert_eq!(
            collection.extra["@odata.context"],
            "/api/$metadata#Collection(DeviceService.Device)"
        );
    }

    #[test]
    fn page_without_count_reads_as_zero() {
        let parsed = page(json!({"value": []}));
        assert_eq!(parsed.count, 0);
        assert!(parsed.next_link.is_none());
    }

    #[test]
    fn device_label_prefers_id() {
        let device: Device = serde_json::from_value(json!({"Id": 10074, "DeviceName": "r740"})).unwrap();
        assert_eq!(device.label(), "10074");
        let unnamed: Device = serde_json::from_value(json!({"Model": "R640"})).unwrap();
        assert_eq!(unnamed.label(), "<unknown>");
    }
}
