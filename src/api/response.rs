//! XML response documents
//!
//! Every response is a `<PhotoShelterAPI>` document with a top-level
//! `<status>`. Anything but "ok" carries an `<error>` with a class and a
//! message; a class mentioning "session" means the session expired.

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{Result, UploaderError};
use crate::tree::{NodeKind, TreeNode};

use super::transport::{status_failure, RawResponse};
use super::types::{Organization, Photographer};

#[derive(Debug, Deserialize)]
struct StatusDocument {
    #[serde(default)]
    status: String,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    class: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct DataDocument<D> {
    #[serde(default)]
    data: Option<D>,
}

/// Check transport status, content type and API status, then decode `<data>`.
pub fn parse_data<D: DeserializeOwned + Default>(resp: &RawResponse) -> Result<D> {
    let text = checked_body(resp)?;
    let doc: DataDocument<D> = quick_xml::de::from_str(&text)?;
    Ok(doc.data.unwrap_or_default())
}

/// Same checks as `parse_data` for calls whose payload is ignored.
pub fn parse_ok(resp: &RawResponse) -> Result<()> {
    checked_body(resp).map(|_| ())
}

fn checked_body(resp: &RawResponse) -> Result<String> {
    let text = resp.body_text();
    if resp.status != 200 {
        return Err(status_failure(resp.status, error_message(&text)));
    }
    if resp.media_type().as_deref() != Some("text/xml") {
        return Err(UploaderError::Protocol(format!(
            "unexpected content type {}: {}",
            resp.content_type.as_deref().unwrap_or("(none)"),
            error_message(&text)
        )));
    }

    let doc: StatusDocument = quick_xml::de::from_str(&text)?;
    if doc.status != "ok" {
        let error = doc.error.unwrap_or_default();
        let class = if error.class.is_empty() {
            "UnknownError".to_string()
        } else {
            error.class
        };
        let message = if error.message.is_empty() {
            "Unknown error.".to_string()
        } else {
            error.message
        };
        if class.to_ascii_lowercase().contains("session") {
            return Err(UploaderError::SessionExpired(format!("{}: {}", class, message)));
        }
        return Err(UploaderError::Remote { class, message });
    }
    Ok(text)
}

/// Best-effort `<error><message>` of a failed response, for error text.
fn error_message(text: &str) -> String {
    quick_xml::de::from_str::<StatusDocument>(text)
        .ok()
        .and_then(|doc| doc.error)
        .map(|e| e.message)
        .unwrap_or_default()
}

fn flag(value: &str) -> bool {
    value.trim() == "t"
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginData {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub org: Vec<OrgEntry>,
    /// "f" when the account has no subscriber access of its own
    #[serde(default)]
    pub subscriber: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

impl LoginData {
    pub fn organizations(&self) -> Vec<Organization> {
        self.org
            .iter()
            .map(|o| Organization {
                id: o.id.trim().to_string(),
                name: o.name.clone(),
                full_member: flag(&o.member),
            })
            .collect()
    }

    pub fn single_user(&self) -> bool {
        self.subscriber.as_deref().map(flag).unwrap_or(true)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct OrgEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub member: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChildrenData {
    #[serde(default)]
    pub children: Vec<ChildEntry>,
}

impl ChildrenData {
    /// Nodes under `parent_id`, sorted case-insensitively by display name.
    pub fn into_nodes(self, parent_id: &str) -> Vec<TreeNode> {
        let mut nodes: Vec<TreeNode> = self
            .children
            .into_iter()
            .filter_map(|child| child.into_node(parent_id))
            .collect();
        crate::tree::sort_nodes(&mut nodes);
        nodes
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ChildEntry {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub listed: String,
    #[serde(default)]
    pub collection: Option<NodeBody>,
    #[serde(default)]
    pub gallery: Option<NodeBody>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NodeBody {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub description: String,
}

impl ChildEntry {
    /// Unknown kinds, and kinds whose body is missing, are dropped.
    fn into_node(self, parent_id: &str) -> Option<TreeNode> {
        let (kind, body) = match self.kind.trim() {
            "collection" => (NodeKind::Collection, self.collection?),
            "gallery" => (NodeKind::Gallery, self.gallery?),
            _ => return None,
        };
        Some(TreeNode {
            id: body.id.trim().to_string(),
            parent_id: parent_id.to_string(),
            kind,
            display_name: display_name(&body.name),
            name: body.name,
            listed: flag(&self.listed),
            visibility: body.mode,
            description: body.description,
        })
    }
}

/// Names come back HTML-escaped inside the XML text.
pub fn display_name(raw: &str) -> String {
    quick_xml::escape::unescape(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

#[derive(Debug, Default, Deserialize)]
pub struct IdData {
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct TotalData {
    #[serde(default)]
    pub total: String,
}

impl TotalData {
    pub fn count(&self) -> u64 {
        self.total.trim().parse().unwrap_or(0)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PhotographersData {
    #[serde(default)]
    pub photographers: Vec<PhotographerEntry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PhotographerEntry {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

impl PhotographersData {
    pub fn into_photographers(self) -> Vec<Photographer> {
        self.photographers
            .into_iter()
            .map(|p| Photographer {
                user_id: p.user_id.trim().to_string(),
                first_name: p.first_name.trim().to_string(),
                last_name: p.last_name.trim().to_string(),
            })
            .collect()
    }
}
