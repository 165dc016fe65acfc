use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

use super::{Registry, RegistryError};
use crate::model::ProgramListing;

const SCOPE_ASSET_TYPES: [&str; 3] = ["URL", "DOMAIN", "WILDCARD"];

/// HackerOne hacker-API client.
pub struct HackerOneClient {
    client: Client,
    base_url: String,
    token: String,
    page_delay: Duration,
}

impl HackerOneClient {
    pub fn new(client: Client, base_url: &str, token: &str, page_delay: Duration) -> Result<Self, RegistryError> {
        Url::parse(base_url)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.trim().to_string(),
            page_delay,
        })
    }

    /// `user:secret` tokens go out as Basic auth, anything else as a Bearer token.
    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        if self.token.is_empty() {
            return req;
        }
        match self.token.split_once(':') {
            Some((user, secret)) => req.basic_auth(user, Some(secret)),
            None => req.bearer_auth(&self.token),
        }
    }

    async fn get(&self, url: &str) -> Result<(StatusCode, String), RegistryError> {
        let resp = self
            .authorize(self.client.get(url))
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        Ok((status, body))
    }

    fn program_url(&self, handle: &str) -> String {
        format!("{}/hackers/programs/{}", self.base_url, urlencoding::encode(handle))
    }

    async fn direct_scopes(&self, handle: &str) -> Result<Vec<String>, RegistryError> {
        let url = format!("{}/structured_scopes", self.program_url(handle));
        let (status, body) = self.get(&url).await?;
        if !status.is_success() {
            tracing::debug!(program = handle, status = status.as_u16(), "structured_scopes endpoint unavailable");
            return Ok(Vec::new());
        }
        Ok(parse_direct_scopes(&body).unwrap_or_default())
    }

    async fn included_scopes(&self, handle: &str) -> Result<Vec<String>, RegistryError> {
        let url = format!("{}?include=structured_scopes", self.program_url(handle));
        let (status, body) = self.get(&url).await?;
        if status == StatusCode::UNAUTHORIZED {
            return Err(RegistryError::Unauthorized { status: status.as_u16(), body });
        }
        if !status.is_success() {
            return Ok(Vec::new());
        }
        match parse_included_scopes(&body) {
            Ok(scopes) => Ok(scopes),
            Err(e) => {
                tracing::debug!(program = handle, error = %e, "undecodable program scope, treating as empty");
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl Registry for HackerOneClient {
    async fn list_programs(&self) -> Result<Vec<ProgramListing>, RegistryError> {
        let mut programs = Vec::new();
        let mut next = Some(format!("{}/hackers/programs", self.base_url));
        let mut pages = 0usize;

        while let Some(url) = next.take() {
            if pages > 0 && !self.page_delay.is_zero() {
                tokio::time::sleep(self.page_delay).await;
            }
            let (status, body) = self.get(&url).await?;
            if status == StatusCode::UNAUTHORIZED {
                return Err(RegistryError::Unauthorized { status: status.as_u16(), body });
            }
            if !status.is_success() {
                return Err(RegistryError::Status { status: status.as_u16(), body });
            }

            let (page, following) = parse_programs_page(&body)?;
            pages += 1;
            programs.extend(page);
            tracing::debug!(page = pages, total = programs.len(), "fetched program page");
            next = following.filter(|n| *n != url);
        }

        Ok(programs)
    }

    async fn get_scope(&self, handle: &str) -> Result<Vec<String>, RegistryError> {
        match self.direct_scopes(handle).await {
            Ok(scopes) if !scopes.is_empty() => return Ok(scopes),
            Ok(_) => {}
            Err(e) => tracing::debug!(program = handle, error = %e, "structured_scopes request failed, trying program endpoint"),
        }
        self.included_scopes(handle).await
    }
}

#[derive(Debug, Deserialize)]
struct ProgramsPage {
    #[serde(default)]
    data: Vec<ProgramEntry>,
    #[serde(default)]
    links: Links,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProgramEntry {
    attributes: ProgramAttributes,
}

#[derive(Debug, Deserialize)]
struct ProgramAttributes {
    handle: String,
    name: Option<String>,
    url: Option<String>,
    domain: Option<String>,
    offers_bounties: Option<bool>,
    submission_state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScopeAttributes {
    asset_identifier: Option<String>,
    asset_type: Option<String>,
}

impl ScopeAttributes {
    fn into_domain(self) -> Option<String> {
        let kind = self.asset_type?;
        if SCOPE_ASSET_TYPES.contains(&kind.as_str()) {
            self.asset_identifier.filter(|a| !a.trim().is_empty())
        } else {
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct DirectScopes {
    #[serde(default)]
    data: Vec<DirectScope>,
}

#[derive(Debug, Deserialize)]
struct DirectScope {
    attributes: ScopeAttributes,
}

#[derive(Debug, Deserialize)]
struct ProgramWithScopes {
    data: ProgramRelations,
    #[serde(default)]
    included: Vec<IncludedResource>,
}

#[derive(Debug, Deserialize)]
struct ProgramRelations {
    #[serde(default)]
    relationships: Relationships,
}

#[derive(Debug, Default, Deserialize)]
struct Relationships {
    #[serde(default)]
    structured_scopes: ScopeRefs,
}

#[derive(Debug, Default, Deserialize)]
struct ScopeRefs {
    #[serde(default)]
    data: Vec<ResourceRef>,
}

#[derive(Debug, Deserialize)]
struct ResourceRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct IncludedResource {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    attributes: ScopeAttributes,
}

pub(crate) fn parse_programs_page(body: &str) -> Result<(Vec<ProgramListing>, Option<String>), serde_json::Error> {
    let page: ProgramsPage = serde_json::from_str(body)?;
    let programs = page
        .data
        .into_iter()
        .map(|entry| {
            let a = entry.attributes;
            ProgramListing {
                name: a.name.unwrap_or_else(|| a.handle.clone()),
                url: a.url.unwrap_or_default(),
                primary_domain: a.domain.filter(|d| !d.trim().is_empty()),
                offers_bounties: a.offers_bounties.unwrap_or(false),
                classification: a.submission_state.unwrap_or_default(),
                handle: a.handle,
            }
        })
        .collect();
    Ok((programs, page.links.next.filter(|n| !n.is_empty())))
}

pub(crate) fn parse_direct_scopes(body: &str) -> Result<Vec<String>, serde_json::Error> {
    let scopes: DirectScopes = serde_json::from_str(body)?;
    Ok(scopes.data.into_iter().filter_map(|s| s.attributes.into_domain()).collect())
}

pub(crate) fn parse_included_scopes(body: &str) -> Result<Vec<String>, serde_json::Error> {
    let program: ProgramWithScopes = serde_json::from_str(body)?;
    let mut by_id: HashMap<String, ScopeAttributes> = program
        .included
        .into_iter()
        .filter(|inc| inc.kind == "structured-scope")
        .map(|inc| (inc.id, inc.attributes))
        .collect();

    Ok(program
        .data
        .relationships
        .structured_scopes
        .data
        .into_iter()
        .filter_map(|r| by_id.remove(&r.id))
        .filter_map(ScopeAttributes::into_domain)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_program_page_with_nulls() {
        let body = json!({
            "data": [
                {"id": "1", "type": "program", "attributes": {
                    "handle": "acme", "name": "Acme", "url": "https://hackerone.com/acme",
                    "domain": "acme.com", "offers_bounties": true, "submission_state": "open"}},
                {"id": "2", "type": "program", "attributes": {
                    "handle": "quiet", "name": null, "url": null, "domain": "",
                    "offers_bounties": null, "submission_state": null}}
            ],
            "links": {"next": "https://api.example/v1/hackers/programs?page=2"}
        })
        .to_string();

        let (programs, next) = parse_programs_page(&body).unwrap();
        assert_eq!(programs.len(), 2);
        assert_eq!(programs[0].primary_domain.as_deref(), Some("acme.com"));
        assert!(programs[0].offers_bounties);
        assert_eq!(programs[1].name, "quiet");
        assert_eq!(programs[1].primary_domain, None);
        assert!(!programs[1].offers_bounties);
        assert_eq!(next.as_deref(), Some("https://api.example/v1/hackers/programs?page=2"));
    }

    #[test]
    fn last_page_has_no_next() {
        let (programs, next) = parse_programs_page(r#"{"data": [], "links": {}}"#).unwrap();
        assert!(programs.is_empty());
        assert!(next.is_none());
    }

    #[test]
    fn direct_scopes_keep_only_domain_like_assets() {
        let body = json!({"data": [
            {"attributes": {"asset_identifier": "*.acme.com", "asset_type": "WILDCARD"}},
            {"attributes": {"asset_identifier": "https://app.acme.com", "asset_type": "URL"}},
            {"attributes": {"asset_identifier": "com.acme.android", "asset_type": "GOOGLE_PLAY_APP_ID"}},
            {"attributes": {"asset_identifier": "api.acme.com", "asset_type": "DOMAIN"}}
        ]})
        .to_string();
        assert_eq!(
            parse_direct_scopes(&body).unwrap(),
            vec!["*.acme.com", "https://app.acme.com", "api.acme.com"]
        );
    }

    #[test]
    fn included_scopes_resolve_through_relationships() {
        let body = json!({
            "data": {"id": "9", "type": "program", "relationships": {"structured_scopes": {"data": [
                {"id": "s1", "type": "structured-scope"},
                {"id": "s2", "type": "structured-scope"},
                {"id": "missing", "type": "structured-scope"}
            ]}}},
            "included": [
                {"id": "s1", "type": "structured-scope", "attributes": {"asset_identifier": "acme.com", "asset_type": "DOMAIN"}},
                {"id": "s2", "type": "structured-scope", "attributes": {"asset_identifier": "10.0.0.0/8", "asset_type": "CIDR"}},
                {"id": "s3", "type": "structured-scope", "attributes": {"asset_identifier": "orphan.acme.com", "asset_type": "DOMAIN"}}
            ]
        })
        .to_string();
        assert_eq!(parse_included_scopes(&body).unwrap(), vec!["acme.com"]);
    }
}
