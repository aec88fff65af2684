use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::client::{CacheInvalidator, CmsClient, CmsError, Document, Patch};


/// In-process document store with scriptable faults. Backs the demo binary
/// and the test suites.
pub struct InMemoryCms {
    documents: Mutex<HashMap<String, Document>>,
    scripted_failures: Mutex<VecDeque<CmsError>>,
    permanent_failures: Mutex<HashMap<String, CmsError>>,
    outage: Mutex<Option<CmsError>>,
    delete_latency: Mutex<Duration>,
    delete_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    create_calls: AtomicUsize,
    next_id: AtomicUsize,
}

impl InMemoryCms {
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
            scripted_failures: Mutex::new(VecDeque::new()),
            permanent_failures: Mutex::new(HashMap::new()),
            outage: Mutex::new(None),
            delete_latency: Mutex::new(Duration::ZERO),
            delete_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
        }
    }


    pub fn with_documents(documents: impl IntoIterator<Item = Document>) -> Self {
        let cms = Self::new();
        for doc in documents {
            cms.insert(doc);
        }
        cms
    }


    pub fn insert(&self, document: Document) {
        self.documents.lock().insert(document.id.clone(), document);
    }


    /// Next delete calls fail with these errors, in order, before succeeding.
    pub fn fail_next_deletes(&self, errors: impl IntoIterator<Item = CmsError>) {
        self.scripted_failures.lock().extend(errors);
    }


    /// Every delete of `id` fails with `error`.
    pub fn fail_always(&self, id: impl Into<String>, error: CmsError) {
        self.permanent_failures.lock().insert(id.into(), error);
    }


    /// Every call fails with `error` until cleared with `None`.
    pub fn set_outage(&self, error: Option<CmsError>) {
        *self.outage.lock() = error;
    }


    pub fn set_delete_latency(&self, latency: Duration) {
        *self.delete_latency.lock() = latency;
    }


    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }


    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }


    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }


    pub fn contains(&self, id: &str) -> bool {
        self.documents.lock().contains_key(id)
    }


    pub fn len(&self) -> usize {
        self.documents.lock().len()
    }


    pub fn is_empty(&self) -> bool {
        self.documents.lock().is_empty()
    }

    fn check_outage(&self) -> Result<(), CmsError> {
        match self.outage.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for InMemoryCms {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CmsClient for InMemoryCms {
    async fn fetch_by_id(&self, id: &str) -> Result<Option<Document>, CmsError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.check_outage()?;
        Ok(self.documents.lock().get(id).cloned())
    }

    async fn fetch_by_slug(&self, slug: &str) -> Result<Option<Document>, CmsError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.check_outage()?;
        Ok(self
            .documents
            .lock()
            .values()
            .find(|doc| doc.slug.as_deref() == Some(slug))
            .cloned())
    }

    async fn delete(&self, id: &str) -> Result<(), CmsError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);

        let latency = *self.delete_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        self.check_outage()?;

        if let Some(err) = self.permanent_failures.lock().get(id).cloned() {
            return Err(err);
        }
        if let Some(err) = self.scripted_failures.lock().pop_front() {
            debug!("Scripted delete failure for {}: {}", id, err);
            return Err(err);
        }

        self.documents.lock().remove(id);
        Ok(())
    }

    async fn create(&self, mut document: Document) -> Result<Document, CmsError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.check_outage()?;
        if document.id.is_empty() {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            document.id = format!("{}-{}", document.doc_type, n);
        }
        self.documents.lock().insert(document.id.clone(), document.clone());
        Ok(document)
    }

    async fn patch(&self, id: &str, patch: Patch) -> Result<Document, CmsError> {
        self.check_outage()?;
        let mut documents = self.documents.lock();
        let doc = documents
            .get_mut(id)
            .ok_or_else(|| CmsError::with_status(404, format!("Document {} not found", id)))?;

        for (field, value) in patch.set {
            match field.as_str() {
                "title" => doc.title = value.as_str().map(str::to_string),
                "slug" => doc.slug = value.as_str().map(str::to_string),
                _ => {
                    doc.fields.insert(field, value);
                }
            }
        }
        Ok(doc.clone())
    }
}


#[derive(Default)]
pub struct RecordingInvalidator {
    tags: Mutex<Vec<String>>,
    paths: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingInvalidator {
    pub fn new() -> Self {
        Self::default()
    }


    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }


    pub fn tags(&self) -> Vec<String> {
        self.tags.lock().clone()
    }


    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().clone()
    }

    fn check(&self) -> Result<(), CmsError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(CmsError::with_status(503, "Revalidation endpoint unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheInvalidator for RecordingInvalidator {
    async fn invalidate_tag(&self, tag: &str) -> Result<(), CmsError> {
        self.check()?;
        self.tags.lock().push(tag.to_string());
        Ok(())
    }

    async fn invalidate_path(&self, path: &str) -> Result<(), CmsError> {
        self.check()?;
        self.paths.lock().push(path.to_string());
        Ok(())
    }
}
