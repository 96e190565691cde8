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

use crate::config::Settings;
use crate::model::{DeviceCollection, DevicePage, JSON_CONTENT_TYPE, Session, SessionRequest};
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderValue};
use reqwest::{StatusCode, Url};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const SESSION_PATH: &str = "api/SessionService/Sessions";
pub const DEVICES_PATH: &str = "api/DeviceService/Devices";
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

const USER_AGENT: &str = concat!("omectl/", env!("CARGO_PKG_VERSION"));
const MAX_ERROR_BODY: usize = 200;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("building HTTP client")]
    Build(#[source] reqwest::Error),
    #[error("`{url}` is not a valid request URL")]
    InvalidUrl { url: String },
    #[error("unable to create a session with appliance {host}: {reason}")]
    Auth { host: String, reason: String },
    #[error("unable to connect to OME appliance {host}")]
    AuthTransport {
        host: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unable to get device list from OME appliance {host}: {reason}")]
    Fetch { host: String, reason: String },
    #[error("unable to get device list from OME appliance {host}")]
    FetchTransport {
        host: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("no devices managed by {host}")]
    EmptyResult { host: String },
}

/// What to do when a device page comes back with anything but 200 OK.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PagingPolicy {
    /// Log the failure and keep the pages collected so far.
    #[default]
    Lenient,
    /// Fail the whole fetch.
    Strict,
}

#[derive(Debug, Clone)]
pub struct OmeClient {
    base_url: Url,
    host: String,
    http: Client,
    paging: PagingPolicy,
}

impl OmeClient {
    pub fn new(settings: &Settings) -> Result<Self, ClientError> {
        if !settings.verify_tls {
            warn!(
                host = %settings.host,
                "TLS certificate verification is disabled for this appliance"
            );
        }
        let http = Client::builder()
            .danger_accept_invalid_certs(!settings.verify_tls)
            .user_agent(HeaderValue::from_static(USER_AGENT))
            .timeout(settings.timeout)
            .build()
            .map_err(ClientError::Build)?;

        Ok(Self {
            base_url: settings.base_url.clone(),
            host: settings.host.clone(),
            http,
            paging: PagingPolicy::default(),
        })
    }

    pub fn with_paging(mut self, paging: PagingPolicy) -> Self {
        self.paging = paging;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Opens an X-Auth session. Only `201 Created` carrying an `X-Auth-Token` header counts.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<Session, ClientError> {
        let url = self.join(SESSION_PATH)?;
        debug!(%url, user = username, "creating session");

        let response = self
            .http
            .post(url)
            .header(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))
            .header(ACCEPT, HeaderValue::from_static(JSON_CONTENT_TYPE))
            .json(&SessionRequest::api(username, password))
            .send()
            .map_err(|source| ClientError::AuthTransport {
                host: self.host.clone(),
                source,
            })?;

        let status = response.status();
        if status != StatusCode::CREATED {
            let body = response.text().unwrap_or_default();
            return Err(ClientError::Auth {
                host: self.host.clone(),
                reason: format!("HTTP {}{}", status, body_excerpt(&body)),
            });
        }

        let token = response
            .headers()
            .get(AUTH_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ClientError::Auth {
                host: self.host.clone(),
                reason: format!("response carried no {AUTH_TOKEN_HEADER} header"),
            })?
            .to_string();

        info!(host = %self.host, "session created");
        Ok(Session::new(self.base_url.clone(), token))
    }

    /// Walks `@odata.nextLink` from the first device page until a page carries none.
    ///
    /// `device_name` narrows the first request with `$filter=DeviceName eq '...'`;
    /// subsequent pages follow the server's links verbatim.
    pub fn fetch_all_devices(
        &self,
        session: &Session,
        device_name: Option<&str>,
    ) -> Result<DeviceCollection, ClientError> {
        let mut first = self.join_on(session.base_url(), DEVICES_PATH)?;
        if let Some(name) = device_name {
            first
                .query_pairs_mut()
                .append_pair("$filter", &device_name_filter(name));
        }

        let mut next = Some(first);
        let mut collected: Option<DeviceCollection> = None;
        let mut pages = 0usize;

        while let Some(url) = next.take() {
            let Some(page) = self.fetch_page(session, &url)? else {
                break;
            };
            pages += 1;

            if page.count <= 0 {
                error!(host = %self.host, "no devices managed by appliance");
                return Err(ClientError::EmptyResult {
                    host: self.host.clone(),
                });
            }

            if let Some(link) = page.next_link.as_deref() {
                next = Some(self.join_on(session.base_url(), link)?);
            }

            debug!(page = pages, records = page.value.len(), "merging device page");
            match collected.as_mut() {
                Some(collection) => collection.merge(page),
                None => collected = Some(DeviceCollection::from(page)),
            }
        }

        let collection = collected.ok_or_else(|| ClientError::Fetch {
            host: self.host.clone(),
            reason: "the first device page could not be retrieved".to_string(),
        })?;
        info!(
            host = %self.host,
            pages,
            devices = collection.len(),
            reported = collection.count,
            "device list retrieved"
        );
        Ok(collection)
    }

    /// `Ok(None)` means the page was dropped under the lenient policy.
    fn fetch_page(&self, session: &Session, url: &Url) -> Result<Option<DevicePage>, ClientError> {
        debug!(%url, "requesting device page");
        let response = self
            .http
            .get(url.clone())
            .header(AUTH_TOKEN_HEADER, session.token())
            .header(CONTENT_TYPE, session.content_type())
            .header(ACCEPT, HeaderValue::from_static(JSON_CONTENT_TYPE))
            .send()
            .map_err(|source| self.fetch_transport(source))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().unwrap_or_default();
            let reason = format!("HTTP {} at {}{}", status, url, body_excerpt(&body));
            return match self.paging {
                PagingPolicy::Lenient => {
                    error!(
                        host = %self.host,
                        %reason,
                        "unable to retrieve device page; treating it as the end of the list"
                    );
                    Ok(None)
                }
                PagingPolicy::Strict => Err(ClientError::Fetch {
                    host: self.host.clone(),
                    reason,
                }),
            };
        }

        let text = response
            .text()
            .map_err(|source| self.fetch_transport(source))?;
        let page = serde_json::from_str(&text).map_err(|err| ClientError::Fetch {
            host: self.host.clone(),
            reason: format!("invalid device page at {url}: {err}"),
        })?;
        Ok(Some(page))
    }

    fn fetch_transport(&self, source: reqwest::Error) -> ClientError {
        ClientError::FetchTransport {
            host: self.host.clone(),
            source,
        }
    }

    fn join(&self, path: &str) -> Result<Url, ClientError> {
        self.join_on(&self.base_url, path)
    }

    /// Relative API paths sit under the base; `/api/...` links from the server
    /// replace its path, and absolute links are used unchanged.
    fn join_on(&self, base: &Url, link: &str) -> Result<Url, ClientError> {
        base.join(link).map_err(|_| ClientError::InvalidUrl {
            url: link.to_string(),
        })
    }
}

fn device_name_filter(name: &str) -> String {
    format!("DeviceName eq '{}'", name.replace('\'', "''"))
}

fn body_excerpt(body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return String::new();
    }
    if body.chars().count() > MAX_ERROR_BODY {
        let cut: String = body.chars().take(MAX_ERROR_BODY).collect();
        format!(" - {}...", cut)
    } else {
        format!(" - {}", body)
    }
}
