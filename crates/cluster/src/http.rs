//! HTTP implementation of the cluster adapter over reqwest.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use esbridge_core::{
    ClusterDescriptor, Doc, Error, IndexBundle, Result, ScrollOption, ScrollResult, VersionFamily,
};
use metrics::{counter, histogram};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::bulk::BulkReport;
use crate::Cluster;

/// A connected cluster. Immutable after [`HttpCluster::connect`]; every call
/// builds its own request, so one instance is shared across all workers.
pub struct HttpCluster {
    client: reqwest::Client,
    descriptor: ClusterDescriptor,
    version: String,
    family: VersionFamily,
    next_address: AtomicUsize,
}

impl HttpCluster {
    /// Build the HTTP client and resolve the cluster version, probing the
    /// info endpoint unless the descriptor pins one.
    pub async fn connect(descriptor: ClusterDescriptor) -> Result<Self> {
        if descriptor.addresses.is_empty() {
            return Err(Error::Config("cluster descriptor has no addresses".into()));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        let mut cluster = Self {
            client,
            version: String::new(),
            family: VersionFamily::Typeless,
            next_address: AtomicUsize::new(0),
            descriptor,
        };

        let version = match cluster.descriptor.version.clone() {
            Some(v) => v,
            None => {
                let info = cluster.cluster_info().await?;
                info.pointer("/version/number")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        Error::cluster(200, None, "cluster info has no version.number")
                    })?
            }
        };
        cluster.family = VersionFamily::from_version(&version);
        cluster.version = version;
        debug!(version = %cluster.version, family = ?cluster.family, "cluster connected");
        Ok(cluster)
    }

    fn url(&self, path: &str) -> String {
        let n = self.next_address.fetch_add(1, Ordering::Relaxed);
        let address = &self.descriptor.addresses[n % self.descriptor.addresses.len()];
        format!("{}/{}", address.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, self.url(path));
        if !self.descriptor.user.is_empty() {
            req = req.basic_auth(&self.descriptor.user, Some(&self.descriptor.password));
        }
        req
    }

    async fn send(
        &self,
        req: reqwest::RequestBuilder,
        index: Option<&str>,
    ) -> Result<reqwest::Response> {
        let resp = req.send().await.map_err(|e| Error::Transport(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = resp.text().await.unwrap_or_default();
        Err(Error::cluster(status.as_u16(), index, message))
    }

    async fn get_json(&self, path: &str, index: Option<&str>) -> Result<Value> {
        let resp = self.send(self.request(reqwest::Method::GET, path), index).await?;
        resp.json().await.map_err(|e| Error::Transport(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct CatIndexRow {
    index: String,
}

#[async_trait]
impl Cluster for HttpCluster {
    fn version(&self) -> &str {
        &self.version
    }

    fn family(&self) -> VersionFamily {
        self.family
    }

    fn addresses(&self) -> &[String] {
        &self.descriptor.addresses
    }

    fn user(&self) -> &str {
        &self.descriptor.user
    }

    fn password(&self) -> &str {
        &self.descriptor.password
    }

    async fn indexes(&self) -> Result<Vec<String>> {
        let rows: Vec<CatIndexRow> = serde_json::from_value(
            self.get_json("_cat/indices?format=json&h=index", None).await?,
        )
        .map_err(|e| Error::cluster(200, None, format!("unexpected _cat payload: {e}")))?;
        Ok(rows.into_iter().map(|r| r.index).collect())
    }

    async fn exists(&self, index: &str) -> Result<bool> {
        let resp = self
            .request(reqwest::Method::HEAD, index)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        match resp.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status => Err(Error::cluster(status, Some(index), "exists check failed")),
        }
    }

    async fn settings(&self, index: &str) -> Result<Value> {
        self.get_json(&format!("{index}/_settings"), Some(index)).await
    }

    async fn mappings(&self, index: &str) -> Result<Value> {
        self.get_json(&format!("{index}/_mapping"), Some(index)).await
    }

    async fn aliases(&self, index: &str) -> Result<Value> {
        self.get_json(&format!("{index}/_alias"), Some(index)).await
    }

    async fn bundle(&self, index: &str) -> Result<Option<IndexBundle>> {
        if !self.exists(index).await? {
            return Ok(None);
        }
        let settings = self.settings(index).await?;
        let mappings = self.mappings(index).await?;
        let aliases = self.aliases(index).await?;
        Ok(Some(IndexBundle {
            index: index.to_string(),
            settings: section(&settings, index, "settings"),
            mappings: section(&mappings, index, "mappings"),
            aliases: section(&aliases, index, "aliases"),
        }))
    }

    async fn create_index(&self, bundle: &IndexBundle) -> Result<()> {
        let body = json!({
            "settings": bundle.settings,
            "mappings": bundle.mappings,
            "aliases": bundle.aliases,
        });
        self.send(
            self.request(reqwest::Method::PUT, &bundle.index).json(&body),
            Some(&bundle.index),
        )
        .await?;
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        self.send(self.request(reqwest::Method::DELETE, index), Some(index)).await?;
        Ok(())
    }

    async fn open_scroll(&self, index: &str, option: &ScrollOption) -> Result<ScrollResult> {
        let mut body = Map::new();
        if let Some(query) = &option.query {
            body.insert("query".to_string(), query.clone());
        }
        if let (Some(id), Some(max)) = (option.slice_id, option.slice_count) {
            body.insert("slice".to_string(), json!({"field": "_id", "id": id, "max": max}));
        }

        let mut params = vec![
            ("scroll".to_string(), format!("{}m", option.scroll_time)),
            ("size".to_string(), option.scroll_size.to_string()),
        ];
        if !option.sort_fields.is_empty() {
            params.push(("sort".to_string(), option.sort_fields.join(",")));
        }

        let req = self
            .request(reqwest::Method::POST, &format!("{index}/_search"))
            .query(&params)
            .json(&Value::Object(body));
        let payload: Value = self
            .send(req, Some(index))
            .await?
            .json()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        counter!("cluster_scroll_pages_total", 1u64);
        parse_scroll(&payload)
    }

    async fn next_scroll(&self, scroll_id: &str, scroll_time: u32) -> Result<ScrollResult> {
        let req = self
            .request(reqwest::Method::POST, "_search/scroll")
            .json(&json!({"scroll": format!("{scroll_time}m"), "scroll_id": scroll_id}));
        let payload: Value = self
            .send(req, None)
            .await?
            .json()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        counter!("cluster_scroll_pages_total", 1u64);
        parse_scroll(&payload)
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<()> {
        let req = self
            .request(reqwest::Method::DELETE, "_search/scroll")
            .json(&json!({"scroll_id": [scroll_id]}));
        self.send(req, None).await?;
        Ok(())
    }

    async fn bulk(&self, body: String) -> Result<BulkReport> {
        histogram!("cluster_bulk_bytes", body.len() as f64);
        let req = self
            .request(reqwest::Method::POST, "_bulk")
            .header("Content-Type", "application/x-ndjson")
            .body(body);
        let payload: Value = self
            .send(req, None)
            .await?
            .json()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        counter!("cluster_bulk_requests_total", 1u64);
        Ok(BulkReport::from_response(&payload))
    }

    async fn count(&self, index: &str) -> Result<u64> {
        let payload = self.get_json(&format!("{index}/_count"), Some(index)).await?;
        payload
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::cluster(200, Some(index), "count payload has no count"))
    }

    async fn cluster_health(&self) -> Result<Value> {
        self.get_json("_cluster/health", None).await
    }

    async fn cluster_info(&self) -> Result<Value> {
        self.get_json("", None).await
    }
}

/// Pull one section (`settings`/`mappings`/`aliases`) out of a payload keyed
/// by index name. Falls back to the first entry for responses keyed by a
/// concrete name behind an alias.
fn section(payload: &Value, index: &str, key: &str) -> Value {
    payload
        .get(index)
        .and_then(|v| v.get(key))
        .cloned()
        .or_else(|| {
            payload
                .as_object()
                .and_then(|o| o.values().next())
                .and_then(|v| v.get(key))
                .cloned()
        })
        .unwrap_or_else(|| Value::Object(Map::new()))
}

/// Decode a search/scroll response into a [`ScrollResult`], normalizing the
/// two `hits.total` shapes (integer on typed clusters, `{value, relation}`
/// on typeless ones) to a plain count.
fn parse_scroll(payload: &Value) -> Result<ScrollResult> {
    let scroll_id = payload
        .get("_scroll_id")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::cluster(200, None, "scroll response has no _scroll_id"))?
        .to_string();

    let total = match payload.pointer("/hits/total") {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::Object(obj)) => obj.get("value").and_then(Value::as_u64).unwrap_or(0),
        _ => 0,
    };

    let docs: Vec<Doc> = match payload.pointer("/hits/hits") {
        Some(hits) => serde_json::from_value(hits.clone())
            .map_err(|e| Error::cluster(200, None, format!("unexpected hit shape: {e}")))?,
        None => Vec::new(),
    };

    Ok(ScrollResult { total, docs, scroll_id })
}
