//! In-memory cluster used by the engine tests: deterministic slicing,
//! ID-sorted scrolls, and bookkeeping for scroll/bulk accounting.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use esbridge_cluster::{BulkReport, Cluster};
use esbridge_core::{
    Doc, Error, IndexBundle, Result, ScrollOption, ScrollResult, VersionFamily,
};
use serde_json::{json, Value};

#[derive(Default)]
pub struct MockIndex {
    pub settings: Value,
    pub mappings: Value,
    pub aliases: Value,
    /// BTreeMap keeps documents in `_id` order, which is exactly what a
    /// sorted scroll returns.
    pub docs: BTreeMap<String, Value>,
}

struct ScrollState {
    pages: VecDeque<Vec<Doc>>,
    total: u64,
    cleared: bool,
}

pub struct MockCluster {
    version: String,
    family: VersionFamily,
    addresses: Vec<String>,
    indices: Mutex<HashMap<String, MockIndex>>,
    scrolls: Mutex<HashMap<String, ScrollState>>,
    next_scroll: AtomicU64,
    pub opened_scrolls: AtomicU64,
    pub cleared_scrolls: AtomicU64,
    pub double_clears: AtomicU64,
    pub bulk_calls: AtomicU64,
}

impl MockCluster {
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            family: VersionFamily::from_version(version),
            addresses: vec!["http://mock:9200".to_string()],
            indices: Mutex::new(HashMap::new()),
            scrolls: Mutex::new(HashMap::new()),
            next_scroll: AtomicU64::new(0),
            opened_scrolls: AtomicU64::new(0),
            cleared_scrolls: AtomicU64::new(0),
            double_clears: AtomicU64::new(0),
            bulk_calls: AtomicU64::new(0),
        }
    }

    pub fn typed() -> Self {
        Self::new("6.8.23")
    }

    pub fn typeless() -> Self {
        Self::new("7.17.9")
    }

    pub fn add_index<I, S>(&self, name: &str, mappings: Value, docs: I)
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let mut indices = self.indices.lock().unwrap();
        let index = MockIndex {
            settings: json!({"index": {"number_of_shards": "1"}}),
            mappings,
            aliases: json!({}),
            docs: docs.into_iter().map(|(id, src)| (id.into(), src)).collect(),
        };
        indices.insert(name.to_string(), index);
    }

    pub fn docs_of(&self, index: &str) -> BTreeMap<String, Value> {
        self.indices.lock().unwrap().get(index).map(|i| i.docs.clone()).unwrap_or_default()
    }

    pub fn mappings_of(&self, index: &str) -> Value {
        self.indices
            .lock()
            .unwrap()
            .get(index)
            .map(|i| i.mappings.clone())
            .unwrap_or(Value::Null)
    }

    fn matches_filter(id: &str, query: &Option<Value>) -> bool {
        let Some(query) = query else { return true };
        match query.pointer("/terms/_id").and_then(Value::as_array) {
            Some(ids) => ids.iter().any(|v| v.as_str() == Some(id)),
            None => true,
        }
    }

    fn slice_of(id: &str, max: u32) -> u32 {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        (hasher.finish() % u64::from(max)) as u32
    }
}

#[async_trait]
impl Cluster for MockCluster {
    fn version(&self) -> &str {
        &self.version
    }

    fn family(&self) -> VersionFamily {
        self.family
    }

    fn addresses(&self) -> &[String] {
        &self.addresses
    }

    fn user(&self) -> &str {
        ""
    }

    fn password(&self) -> &str {
        ""
    }

    async fn indexes(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.indices.lock().unwrap().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn exists(&self, index: &str) -> Result<bool> {
        Ok(self.indices.lock().unwrap().contains_key(index))
    }

    async fn settings(&self, index: &str) -> Result<Value> {
        let indices = self.indices.lock().unwrap();
        let idx = indices
            .get(index)
            .ok_or_else(|| Error::cluster(404, Some(index), "no such index"))?;
        Ok(json!({ index: {"settings": idx.settings} }))
    }

    async fn mappings(&self, index: &str) -> Result<Value> {
        let indices = self.indices.lock().unwrap();
        let idx = indices
            .get(index)
            .ok_or_else(|| Error::cluster(404, Some(index), "no such index"))?;
        Ok(json!({ index: {"mappings": idx.mappings} }))
    }

    async fn aliases(&self, index: &str) -> Result<Value> {
        let indices = self.indices.lock().unwrap();
        let idx = indices
            .get(index)
            .ok_or_else(|| Error::cluster(404, Some(index), "no such index"))?;
        Ok(json!({ index: {"aliases": idx.aliases} }))
    }

    async fn bundle(&self, index: &str) -> Result<Option<IndexBundle>> {
        let indices = self.indices.lock().unwrap();
        Ok(indices.get(index).map(|idx| IndexBundle {
            index: index.to_string(),
            settings: idx.settings.clone(),
            mappings: idx.mappings.clone(),
            aliases: idx.aliases.clone(),
        }))
    }

    async fn create_index(&self, bundle: &IndexBundle) -> Result<()> {
        let mut indices = self.indices.lock().unwrap();
        if indices.contains_key(&bundle.index) {
            return Err(Error::cluster(400, Some(&bundle.index), "resource_already_exists"));
        }
        indices.insert(
            bundle.index.clone(),
            MockIndex {
                settings: bundle.settings.clone(),
                mappings: bundle.mappings.clone(),
                aliases: bundle.aliases.clone(),
                docs: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        let mut indices = self.indices.lock().unwrap();
        indices
            .remove(index)
            .map(|_| ())
            .ok_or_else(|| Error::cluster(404, Some(index), "no such index"))
    }

    async fn open_scroll(&self, index: &str, option: &ScrollOption) -> Result<ScrollResult> {
        let indices = self.indices.lock().unwrap();
        let idx = indices
            .get(index)
            .ok_or_else(|| Error::cluster(404, Some(index), "no such index"))?;

        let docs: Vec<Doc> = idx
            .docs
            .iter()
            .filter(|(id, _)| Self::matches_filter(id, &option.query))
            .filter(|(id, _)| match (option.slice_id, option.slice_count) {
                (Some(slice), Some(max)) => Self::slice_of(id, max) == slice,
                _ => true,
            })
            .map(|(id, src)| Doc::create(id.clone(), src.clone()))
            .collect();
        drop(indices);

        let total = docs.len() as u64;
        let mut pages: VecDeque<Vec<Doc>> = docs
            .chunks(option.scroll_size.max(1) as usize)
            .map(<[Doc]>::to_vec)
            .collect();

        let scroll_id = format!("scroll-{}", self.next_scroll.fetch_add(1, Ordering::Relaxed));
        self.opened_scrolls.fetch_add(1, Ordering::Relaxed);

        let first = pages.pop_front().unwrap_or_default();
        self.scrolls
            .lock()
            .unwrap()
            .insert(scroll_id.clone(), ScrollState { pages, total, cleared: false });
        Ok(ScrollResult { total, docs: first, scroll_id })
    }

    async fn next_scroll(&self, scroll_id: &str, _scroll_time: u32) -> Result<ScrollResult> {
        let mut scrolls = self.scrolls.lock().unwrap();
        let state = scrolls
            .get_mut(scroll_id)
            .ok_or_else(|| Error::cluster(404, None, "no such scroll"))?;
        let docs = state.pages.pop_front().unwrap_or_default();
        Ok(ScrollResult { total: state.total, docs, scroll_id: scroll_id.to_string() })
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<()> {
        let mut scrolls = self.scrolls.lock().unwrap();
        match scrolls.get_mut(scroll_id) {
            Some(state) if !state.cleared => {
                state.cleared = true;
                self.cleared_scrolls.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Some(_) => {
                self.double_clears.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            None => Err(Error::cluster(404, None, "no such scroll")),
        }
    }

    async fn bulk(&self, body: String) -> Result<BulkReport> {
        self.bulk_calls.fetch_add(1, Ordering::Relaxed);

        let mut items = 0usize;
        let mut lines = body.lines();
        let mut indices = self.indices.lock().unwrap();
        while let Some(meta_line) = lines.next() {
            let meta: Value = serde_json::from_str(meta_line)
                .map_err(|e| Error::cluster(400, None, format!("bad bulk meta: {e}")))?;
            let (action, detail) = meta
                .as_object()
                .and_then(|o| o.iter().next())
                .map(|(k, v)| (k.clone(), v.clone()))
                .ok_or_else(|| Error::cluster(400, None, "empty bulk action"))?;
            let index = detail.get("_index").and_then(Value::as_str).unwrap_or_default();
            let id = detail.get("_id").and_then(Value::as_str).unwrap_or_default().to_string();
            if self.family.needs_type() {
                assert!(
                    detail.get("_type").is_some(),
                    "typed cluster bulk action must carry _type"
                );
            } else {
                assert!(
                    detail.get("_type").is_none(),
                    "typeless cluster bulk action must not carry _type"
                );
            }

            let idx = indices
                .get_mut(index)
                .ok_or_else(|| Error::cluster(404, Some(index), "no such index"))?;
            match action.as_str() {
                "index" => {
                    let source: Value = serde_json::from_str(
                        lines
                            .next()
                            .ok_or_else(|| Error::cluster(400, None, "missing bulk body"))?,
                    )
                    .map_err(|e| Error::cluster(400, None, format!("bad bulk body: {e}")))?;
                    idx.docs.insert(id, source);
                }
                "update" => {
                    let body: Value = serde_json::from_str(
                        lines
                            .next()
                            .ok_or_else(|| Error::cluster(400, None, "missing bulk body"))?,
                    )
                    .map_err(|e| Error::cluster(400, None, format!("bad bulk body: {e}")))?;
                    // `{"doc": src}` on typeless clusters, `{<type>: src}` on
                    // typed ones; either way the single value is the source.
                    let source = body
                        .as_object()
                        .and_then(|o| o.values().next())
                        .cloned()
                        .ok_or_else(|| Error::cluster(400, None, "empty update body"))?;
                    idx.docs.insert(id, source);
                }
                "delete" => {
                    idx.docs.remove(&id);
                }
                other => {
                    return Err(Error::cluster(400, None, format!("unknown action {other}")))
                }
            }
            items += 1;
        }

        Ok(BulkReport { items, failures: Vec::new() })
    }

    async fn count(&self, index: &str) -> Result<u64> {
        let indices = self.indices.lock().unwrap();
        let idx = indices
            .get(index)
            .ok_or_else(|| Error::cluster(404, Some(index), "no such index"))?;
        Ok(idx.docs.len() as u64)
    }

    async fn cluster_health(&self) -> Result<Value> {
        Ok(json!({"status": "green"}))
    }

    async fn cluster_info(&self) -> Result<Value> {
        Ok(json!({"version": {"number": self.version}}))
    }
}
