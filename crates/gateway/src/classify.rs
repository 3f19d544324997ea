//! URI classification: map (method, path) onto the REST action it denotes,
//! rewriting typed-style document paths for typeless upstreams.

use axum::http::Method;
use esbridge_core::VersionFamily;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestAction {
    GetInfo,
    GetDocument,
    UpsertDocument,
    CreateDocument,
    UpdateDocument,
    DeleteDocument,
    Bulk,
    Search,
    SearchLimit,
    GetIndex,
    CreateIndex,
    DeleteIndex,
    GetIndexMapping,
    UpdateIndexMapping,
    GetIndexSettings,
    UpdateIndexSettings,
    ClusterHealth,
    ClusterSettings,
}

impl RequestAction {
    /// Actions that mutate cluster state and must be mirrored to the slave.
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            RequestAction::UpsertDocument
                | RequestAction::CreateDocument
                | RequestAction::UpdateDocument
                | RequestAction::DeleteDocument
                | RequestAction::Bulk
                | RequestAction::CreateIndex
                | RequestAction::DeleteIndex
                | RequestAction::UpdateIndexMapping
                | RequestAction::UpdateIndexSettings
        )
    }
}

#[derive(Debug, Clone)]
pub struct ClassifiedRequest {
    pub action: RequestAction,
    /// The upstream path; the `<type>` segment is stripped when the upstream
    /// does not speak types.
    pub uri: String,
    pub index: Option<String>,
    pub doc_type: Option<String>,
    pub doc_id: Option<String>,
}

/// Classify a request path for an upstream of the given family.
pub fn classify(
    method: &Method,
    path: &str,
    family: VersionFamily,
) -> Result<ClassifiedRequest, String> {
    let needs_type = family.needs_type();
    let segments: Vec<&str> = path.split('/').collect();

    if path == "/" && method == Method::GET {
        return Ok(plain(RequestAction::GetInfo, path));
    }

    if path.ends_with("/_create") || path.ends_with("/_update") {
        let action = if path.ends_with("/_create") {
            RequestAction::CreateDocument
        } else {
            RequestAction::UpdateDocument
        };
        if method != Method::POST {
            return Err(format!("unsupported method {method} for {path}"));
        }
        let mut out = plain(action, path);
        out.index = segments.get(1).map(|s| s.to_string());
        if segments.len() == 5 {
            out.doc_type = Some(segments[2].to_string());
            out.doc_id = Some(segments[3].to_string());
            if !needs_type {
                out.uri = strip_segment(&segments, 2);
            }
        } else if segments.len() == 4 {
            out.doc_id = Some(segments[2].to_string());
        }
        return Ok(out);
    }

    if path.ends_with("/_search") {
        let action = if method == Method::GET {
            RequestAction::Search
        } else if method == Method::POST {
            RequestAction::SearchLimit
        } else {
            return Err(format!("unsupported method {method} for {path}"));
        };
        let mut out = plain(action, path);
        out.index = segments.get(1).map(|s| s.to_string());
        if segments.len() == 4 {
            out.doc_type = Some(segments[2].to_string());
            if !needs_type {
                out.uri = strip_segment(&segments, 2);
            }
        }
        return Ok(out);
    }

    if path == "/_cluster/health" {
        return Ok(plain(RequestAction::ClusterHealth, path));
    }
    if path == "/_cluster/settings" {
        return Ok(plain(RequestAction::ClusterSettings, path));
    }

    if path.ends_with("/_mapping") {
        let action = if method == Method::GET {
            RequestAction::GetIndexMapping
        } else if method == Method::PUT {
            RequestAction::UpdateIndexMapping
        } else {
            return Err(format!("unsupported method {method} for {path}"));
        };
        let mut out = plain(action, path);
        out.index = segments.get(1).map(|s| s.to_string());
        if segments.len() == 4 {
            out.doc_type = Some(segments[2].to_string());
            if !needs_type {
                out.uri = strip_segment(&segments, 2);
            }
        }
        return Ok(out);
    }

    if path.ends_with("/_settings") {
        let action = if method == Method::GET {
            RequestAction::GetIndexSettings
        } else if method == Method::PUT {
            RequestAction::UpdateIndexSettings
        } else {
            return Err(format!("unsupported method {method} for {path}"));
        };
        let mut out = plain(action, path);
        out.index = segments.get(1).map(|s| s.to_string());
        return Ok(out);
    }

    if path.ends_with("/_bulk") {
        return Ok(plain(RequestAction::Bulk, path));
    }

    if segments.len() == 2 {
        let action = if method == Method::GET {
            RequestAction::GetIndex
        } else if method == Method::PUT {
            RequestAction::CreateIndex
        } else if method == Method::DELETE {
            RequestAction::DeleteIndex
        } else {
            return Err(format!("unsupported method {method} for {path}"));
        };
        let mut out = plain(action, path);
        out.index = segments.get(1).map(|s| s.to_string());
        return Ok(out);
    }

    if segments.len() >= 3 {
        let action = if method == Method::GET {
            RequestAction::GetDocument
        } else if method == Method::PUT {
            RequestAction::UpsertDocument
        } else if method == Method::DELETE {
            RequestAction::DeleteDocument
        } else {
            return Err(format!("unsupported method {method} for {path}"));
        };
        let mut out = plain(action, path);
        out.index = segments.get(1).map(|s| s.to_string());
        if segments.len() == 4 {
            out.doc_type = Some(segments[2].to_string());
            out.doc_id = Some(segments[3].to_string());
            if !needs_type {
                out.uri = strip_segment(&segments, 2);
            }
        } else if segments.len() == 3 {
            out.doc_id = Some(segments[2].to_string());
        }
        return Ok(out);
    }

    Err(format!("invalid uri {path}"))
}

fn plain(action: RequestAction, path: &str) -> ClassifiedRequest {
    ClassifiedRequest {
        action,
        uri: path.to_string(),
        index: None,
        doc_type: None,
        doc_id: None,
    }
}

fn strip_segment(segments: &[&str], at: usize) -> String {
    let kept: Vec<&str> =
        segments.iter().enumerate().filter(|(i, _)| *i != at).map(|(_, s)| *s).collect();
    kept.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_get_is_info() {
        let c = classify(&Method::GET, "/", VersionFamily::Typeless).unwrap();
        assert_eq!(c.action, RequestAction::GetInfo);
    }

    #[test]
    fn create_suffix_classifies_for_typed_upstream() {
        let c = classify(&Method::POST, "/books/book/1/_create", VersionFamily::Typed).unwrap();
        assert_eq!(c.action, RequestAction::CreateDocument);
        assert_eq!(c.index.as_deref(), Some("books"));
        assert_eq!(c.doc_type.as_deref(), Some("book"));
        assert_eq!(c.doc_id.as_deref(), Some("1"));
        assert_eq!(c.uri, "/books/book/1/_create");
    }

    #[test]
    fn create_suffix_strips_type_for_typeless_upstream() {
        let c = classify(&Method::POST, "/books/book/1/_create", VersionFamily::Typeless).unwrap();
        assert_eq!(c.action, RequestAction::CreateDocument);
        assert_eq!(c.uri, "/books/1/_create");
    }

    #[test]
    fn update_suffix_classifies() {
        let c = classify(&Method::POST, "/books/1/_update", VersionFamily::Typeless).unwrap();
        assert_eq!(c.action, RequestAction::UpdateDocument);
        assert_eq!(c.doc_id.as_deref(), Some("1"));
    }

    #[test]
    fn search_verbs_split_by_method() {
        let get = classify(&Method::GET, "/books/_search", VersionFamily::Typeless).unwrap();
        assert_eq!(get.action, RequestAction::Search);
        let post = classify(&Method::POST, "/books/_search", VersionFamily::Typeless).unwrap();
        assert_eq!(post.action, RequestAction::SearchLimit);
    }

    #[test]
    fn typed_search_path_strips_type_for_typeless() {
        let c = classify(&Method::GET, "/books/book/_search", VersionFamily::Typeless).unwrap();
        assert_eq!(c.action, RequestAction::Search);
        assert_eq!(c.uri, "/books/_search");
    }

    #[test]
    fn index_level_verbs() {
        assert_eq!(
            classify(&Method::PUT, "/books", VersionFamily::Typed).unwrap().action,
            RequestAction::CreateIndex
        );
        assert_eq!(
            classify(&Method::DELETE, "/books", VersionFamily::Typed).unwrap().action,
            RequestAction::DeleteIndex
        );
        assert_eq!(
            classify(&Method::GET, "/books", VersionFamily::Typed).unwrap().action,
            RequestAction::GetIndex
        );
    }

    #[test]
    fn document_level_verbs() {
        let c = classify(&Method::PUT, "/books/book/1", VersionFamily::Typeless).unwrap();
        assert_eq!(c.action, RequestAction::UpsertDocument);
        assert_eq!(c.uri, "/books/1");
        assert_eq!(c.doc_id.as_deref(), Some("1"));

        let c = classify(&Method::DELETE, "/books/1", VersionFamily::Typed).unwrap();
        assert_eq!(c.action, RequestAction::DeleteDocument);
    }

    #[test]
    fn mapping_and_settings_and_cluster_paths() {
        assert_eq!(
            classify(&Method::PUT, "/books/_mapping", VersionFamily::Typed).unwrap().action,
            RequestAction::UpdateIndexMapping
        );
        assert_eq!(
            classify(&Method::GET, "/books/_settings", VersionFamily::Typed).unwrap().action,
            RequestAction::GetIndexSettings
        );
        assert_eq!(
            classify(&Method::GET, "/_cluster/health", VersionFamily::Typed).unwrap().action,
            RequestAction::ClusterHealth
        );
        assert_eq!(
            classify(&Method::POST, "/books/_bulk", VersionFamily::Typed).unwrap().action,
            RequestAction::Bulk
        );
    }
}
