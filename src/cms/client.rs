use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::watch;


/// Raw failure reported by a collaborator. Classification happens later.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct CmsError {
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: String,
}

impl CmsError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn timeout(after: std::time::Duration) -> Self {
        Self::new(format!("Request timeout after {}ms", after.as_millis())).with_code("ETIMEDOUT")
    }
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub doc_type: String,
    pub slug: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, doc_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            doc_type: doc_type.into(),
            slug: None,
            title: None,
            fields: Map::new(),
        }
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}


/// Field mutations committed in one `CmsClient::patch` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub set: Map<String, Value>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(field.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}


#[async_trait]
pub trait CmsClient: Send + Sync {
    async fn fetch_by_id(&self, id: &str) -> Result<Option<Document>, CmsError>;

    async fn fetch_by_slug(&self, slug: &str) -> Result<Option<Document>, CmsError>;

    async fn delete(&self, id: &str) -> Result<(), CmsError>;

    async fn create(&self, document: Document) -> Result<Document, CmsError>;

    async fn patch(&self, id: &str, patch: Patch) -> Result<Document, CmsError>;
}


#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn invalidate_tag(&self, tag: &str) -> Result<(), CmsError>;

    async fn invalidate_path(&self, path: &str) -> Result<(), CmsError>;
}


pub trait NetworkMonitor: Send + Sync {
    fn is_online(&self) -> bool;

    fn subscribe(&self) -> watch::Receiver<bool>;
}


/// `NetworkMonitor` backed by a watch channel; hosts flip it from their own
/// connectivity checks.
pub struct WatchNetworkMonitor {
    sender: watch::Sender<bool>,
}

impl WatchNetworkMonitor {
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self { sender }
    }

    pub fn set_online(&self, online: bool) {
        self.sender.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }
}

impl Default for WatchNetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkMonitor for WatchNetworkMonitor {
    fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}
