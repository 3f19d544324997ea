//! Cross-family payload rewrites: request mapping bodies and the
//! `hits.total` shape of search responses.

use esbridge_core::VersionFamily;
use esbridge_translate::translate_mappings;
use serde_json::{json, Value};

/// Reshape the `mappings` member of an index-creation or mapping-update body
/// for the given upstream family. Bodies without a `mappings` object pass
/// through untouched.
pub fn rewrite_mappings_body(body: &mut Value, family: VersionFamily) -> anyhow::Result<()> {
    let Some(mappings) = body.get("mappings") else {
        return Ok(());
    };
    let rewritten = translate_mappings(mappings, family)?;
    body["mappings"] = rewritten;
    Ok(())
}

/// Rewrite `hits.total` between the integer shape (typed clusters) and the
/// `{value, relation}` shape (typeless clusters) so the client sees the
/// dialect of the cluster it believes it is talking to.
pub fn rewrite_search_total(body: &mut Value, master: VersionFamily, client: VersionFamily) {
    match (master, client) {
        (VersionFamily::Typeless, VersionFamily::Typed) => {
            if let Some(value) = body.pointer("/hits/total/value").cloned() {
                body["hits"]["total"] = value;
            }
        }
        (VersionFamily::Typed, VersionFamily::Typeless) => {
            if let Some(total) = body.pointer("/hits/total") {
                if total.is_number() {
                    let total = total.clone();
                    body["hits"]["total"] = json!({"value": total, "relation": "eq"});
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn typeless_master_flattens_total_for_typed_client() {
        let mut body = json!({
            "took": 2,
            "hits": {"total": {"value": 42, "relation": "eq"}, "hits": [{"_id": "1"}]}
        });
        rewrite_search_total(&mut body, VersionFamily::Typeless, VersionFamily::Typed);
        assert_eq!(body["hits"]["total"], json!(42));
        // The rest of the payload survives untouched.
        assert_eq!(body["took"], json!(2));
        assert_eq!(body["hits"]["hits"], json!([{"_id": "1"}]));
    }

    #[test]
    fn typed_master_expands_total_for_typeless_client() {
        let mut body = json!({"hits": {"total": 42, "hits": []}});
        rewrite_search_total(&mut body, VersionFamily::Typed, VersionFamily::Typeless);
        assert_eq!(body["hits"]["total"], json!({"value": 42, "relation": "eq"}));
    }

    #[test]
    fn same_family_is_untouched() {
        let mut body = json!({"hits": {"total": 42}});
        rewrite_search_total(&mut body, VersionFamily::Typed, VersionFamily::Typed);
        assert_eq!(body["hits"]["total"], json!(42));
    }

    #[test]
    fn mapping_body_rewritten_toward_upstream_family() {
        let mut body = json!({
            "settings": {"index": {"number_of_shards": "1"}},
            "mappings": {"book": {"properties": {"title": {"type": "text"}}}}
        });
        rewrite_mappings_body(&mut body, VersionFamily::Typeless).unwrap();
        assert_eq!(body["mappings"], json!({"properties": {"title": {"type": "text"}}}));
        assert_eq!(body["settings"]["index"]["number_of_shards"], json!("1"));

        let mut body = json!({"mappings": {"properties": {"n": {"type": "long"}}}});
        rewrite_mappings_body(&mut body, VersionFamily::Typed).unwrap();
        assert_eq!(
            body["mappings"],
            json!({"_doc": {"properties": {"n": {"type": "long"}}}})
        );
    }

    #[test]
    fn body_without_mappings_passes_through() {
        let mut body = json!({"settings": {}});
        rewrite_mappings_body(&mut body, VersionFamily::Typed).unwrap();
        assert_eq!(body, json!({"settings": {}}));
    }
}
