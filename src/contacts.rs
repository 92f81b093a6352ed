//! Contact import from the Google People API.
//!
//! Only the REST calls are implemented here. The caller supplies an OAuth
//! access token (config `contacts.access_token` or `GOOGLE_ACCESS_TOKEN`).

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ContactsConfig;
use crate::error::{MeetprepError, Result};

const PERSON_FIELDS: &str = "names,emailAddresses,organizations,memberships";
const CUSTOM_GROUP: &str = "Custom group";
const MAX_PAGES: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl Contact {
    /// `Name <email> (Title) [labels]`, omitting empty parts.
    pub fn display_line(&self) -> String {
        let mut line = format!("{} <{}>", self.name, self.email);
        if !self.title.is_empty() {
            line.push_str(&format!(" ({})", self.title));
        }
        if !self.labels.is_empty() {
            line.push_str(&format!(" [{}]", self.labels.join(", ")));
        }
        line
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContactStats {
    pub total: usize,
    pub with_title: usize,
    pub with_labels: usize,
}

impl ContactStats {
    pub fn from_contacts(contacts: &[Contact]) -> Self {
        Self {
            total: contacts.len(),
            with_title: contacts.iter().filter(|c| !c.title.is_empty()).count(),
            with_labels: contacts.iter().filter(|c| !c.labels.is_empty()).count(),
        }
    }
}

pub fn system_label(group_id: &str) -> Option<&'static str> {
    match group_id {
        "myContacts" => Some("My contacts"),
        "starred" => Some("Starred"),
        "blocked" => Some("Blocked"),
        "family" => Some("Family"),
        "friends" => Some("Friends"),
        "coworkers" => Some("Coworkers"),
        _ => None,
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionsPage {
    #[serde(default)]
    connections: Vec<Person>,
    next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Person {
    #[serde(default)]
    names: Vec<PersonName>,
    #[serde(default)]
    email_addresses: Vec<EmailAddress>,
    #[serde(default)]
    organizations: Vec<Organization>,
    #[serde(default)]
    memberships: Vec<Membership>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersonName {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmailAddress {
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Organization {
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Membership {
    contact_group_membership: Option<GroupMembership>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupMembership {
    contact_group_resource_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupsPage {
    #[serde(default)]
    contact_groups: Vec<ContactGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContactGroup {
    resource_name: String,
    name: Option<String>,
    formatted_name: Option<String>,
}

fn group_id(resource_name: &str) -> &str {
    resource_name.trim_start_matches("contactGroups/")
}

impl Person {
    fn into_contact(self, groups: &HashMap<String, String>) -> Option<Contact> {
        let name = self
            .names
            .into_iter()
            .next()
            .and_then(|n| n.display_name)
            .filter(|n| !n.trim().is_empty())?;
        let email = self
            .email_addresses
            .into_iter()
            .next()
            .and_then(|e| e.value)
            .filter(|e| !e.trim().is_empty())?;
        let title = self
            .organizations
            .into_iter()
            .next()
            .and_then(|o| o.title)
            .unwrap_or_default();
        let labels = self
            .memberships
            .into_iter()
            .filter_map(|m| m.contact_group_membership?.contact_group_resource_name)
            .map(|resource| group_id(&resource).to_string())
            .filter(|id| !id.is_empty())
            .map(|id| match system_label(&id) {
                Some(label) => label.to_string(),
                None => groups
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(|| CUSTOM_GROUP.to_string()),
            })
            .collect();
        Some(Contact {
            name,
            email,
            title,
            labels,
        })
    }
}

#[derive(Clone)]
pub struct PeopleClient {
    http: reqwest::Client,
    access_token: String,
    endpoint: String,
    page_size: u32,
}

impl PeopleClient {
    pub fn new(access_token: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            access_token: access_token.into(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            page_size: 100,
        }
    }

    pub fn from_config(cfg: &ContactsConfig) -> Result<Self> {
        let token = cfg
            .access_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| MeetprepError::Config("missing GOOGLE_ACCESS_TOKEN".into()))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| MeetprepError::Contacts(format!("http client error: {err}")))?;
        Ok(Self {
            http,
            access_token: token,
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            page_size: cfg.page_size.clamp(1, 1000),
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let response = self
            .http
            .get(format!("{}{}", self.endpoint, path))
            .bearer_auth(&self.access_token)
            .query(query)
            .send()
            .await
            .map_err(|e| MeetprepError::Contacts(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MeetprepError::Contacts(format!("People API error {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| MeetprepError::Contacts(format!("failed to parse response: {e}")))
    }

    /// Group id to display name for the user's contact groups.
    pub async fn contact_groups(&self) -> Result<HashMap<String, String>> {
        let page: GroupsPage = self.get("/contactGroups", &[]).await?;
        Ok(page
            .contact_groups
            .into_iter()
            .map(|group| {
                let id = group_id(&group.resource_name).to_string();
                let name = group
                    .formatted_name
                    .filter(|n| !n.is_empty())
                    .or(group.name.filter(|n| !n.is_empty()))
                    .unwrap_or_else(|| id.clone());
                (id, name)
            })
            .collect())
    }

    /// Every connection that has both a name and an email address.
    pub async fn list_contacts(&self) -> Result<Vec<Contact>> {
        let groups = match self.contact_groups().await {
            Ok(groups) => groups,
            Err(err) => {
                tracing::warn!(error = %err, "contact groups unavailable, using system labels only");
                HashMap::new()
            }
        };

        let mut contacts = Vec::new();
        let mut page_token: Option<String> = None;
        let mut seen_tokens = HashSet::new();
        for _ in 0..MAX_PAGES {
            let mut query = vec![
                ("pageSize", self.page_size.to_string()),
                ("personFields", PERSON_FIELDS.to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let page: ConnectionsPage = self.get("/people/me/connections", &query).await?;
            contacts.extend(page.connections.into_iter().filter_map(|p| p.into_contact(&groups)));

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) if seen_tokens.insert(token.clone()) => page_token = Some(token),
                Some(token) => {
                    tracing::warn!(%token, "contacts API repeated a page token, stopping");
                    break;
                }
                None => break,
            }
        }

        tracing::info!(count = contacts.len(), "contacts loaded");
        Ok(contacts)
    }
}

pub async fn backup(contacts: &[Contact], path: &Path) -> Result<()> {
    let serialized = serde_json::to_string_pretty(contacts)?;
    tokio::fs::write(path, serialized).await.map_err(|err| {
        MeetprepError::Storage(format!("failed to write `{}`: {err}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{bearer_token, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mock_people(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/contactGroups"))
            .and(bearer_token("token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "contactGroups": [
                    {"resourceName": "contactGroups/abc", "name": "abc", "formattedName": "Investors"},
                    {"resourceName": "contactGroups/myContacts", "name": "myContacts"}
                ]
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/people/me/connections"))
            .and(query_param("personFields", PERSON_FIELDS))
            .and(query_param("pageToken", "next"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "connections": [{
                    "names": [{"displayName": "Bao Tran"}],
                    "emailAddresses": [{"value": "bao@example.com"}]
                }]
            })))
            .with_priority(1)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/people/me/connections"))
            .and(query_param("pageSize", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "connections": [
                    {
                        "names": [{"displayName": "Jane Doe"}],
                        "emailAddresses": [{"value": "jane@example.com"}],
                        "organizations": [{"title": "CEO"}],
                        "memberships": [
                            {"contactGroupMembership": {"contactGroupResourceName": "contactGroups/starred"}},
                            {"contactGroupMembership": {"contactGroupResourceName": "contactGroups/abc"}},
                            {"contactGroupMembership": {"contactGroupResourceName": "contactGroups/zzz"}}
                        ]
                    },
                    {"names": [{"displayName": "No Email"}]},
                    {"emailAddresses": [{"value": "anon@example.com"}]}
                ],
                "nextPageToken": "next"
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn lists_contacts_across_pages_with_labels() {
        let server = MockServer::start().await;
        mock_people(&server).await;
        let client = PeopleClient::new("token", server.uri());

        let contacts = client.list_contacts().await.unwrap();

        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0].title, "CEO");
        assert_eq!(contacts[0].labels, vec!["Starred", "Investors", "Custom group"]);
        assert_eq!(contacts[1].email, "bao@example.com");

        let stats = ContactStats::from_contacts(&contacts);
        assert_eq!(stats, ContactStats { total: 2, with_title: 1, with_labels: 1 });
        assert_eq!(
            contacts[0].display_line(),
            "Jane Doe <jane@example.com> (CEO) [Starred, Investors, Custom group]"
        );
    }

    #[tokio::test]
    async fn repeated_page_token_stops_paging() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/contactGroups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"contactGroups": []})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/people/me/connections"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "connections": [{
                    "names": [{"displayName": "Jane Doe"}],
                    "emailAddresses": [{"value": "jane@example.com"}]
                }],
                "nextPageToken": "same"
            })))
            .mount(&server)
            .await;
        let client = PeopleClient::new("token", server.uri());

        let contacts = client.list_contacts().await.unwrap();

        let pages = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|req| req.url.path() == "/people/me/connections")
            .count();
        assert_eq!(pages, 2);
        assert_eq!(contacts.len(), 2);
    }

    #[tokio::test]
    async fn api_errors_are_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
            .mount(&server)
            .await;
        let client = PeopleClient::new("token", server.uri());

        let err = client.list_contacts().await.unwrap_err();
        assert!(matches!(err, MeetprepError::Contacts(msg) if msg.contains("401")));
    }

    #[tokio::test]
    async fn backup_writes_pretty_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contacts.json");
        let contacts = vec![Contact {
            name: "Jane".into(),
            email: "jane@example.com".into(),
            title: String::new(),
            labels: vec![],
        }];

        backup(&contacts, &path).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\n  "));
        let back: Vec<Contact> = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, contacts);
    }

    #[test]
    fn missing_token_is_a_config_error() {
        assert!(matches!(
            PeopleClient::from_config(&ContactsConfig::default()),
            Err(MeetprepError::Config(_))
        ));
    }
}
