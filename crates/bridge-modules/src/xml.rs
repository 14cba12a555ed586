//! XML parsing and a minimal DOM/XPath surface. Grounded on `roxmltree`
//! (read-only, arena-backed tree). Full XPath is out of scope; `xpath`
//! supports a child-path subset (`/a/b/c`, `/a/b/@attr`) sufficient for the
//! catalog's documented `xml.xpath` operation.

use crate::params::required_str;
use async_trait::async_trait;
use bridge_config::ResourceKind;
use bridge_core::{registry::PutOptions, BridgeError, HandlerContext, ModuleCatalog, ModuleHandler};
use roxmltree::Document;
use serde_json::{json, Value};

pub fn register(catalog: &mut ModuleCatalog) {
    catalog.register("xml", "parse", Parse);
    catalog.register("xml", "xpath", XPath);
    catalog.register("xml", "close_document", CloseDocument);
    catalog.register("xml", "dom_create_parser", DomCreateParser);
    catalog.register("xml", "dom_parse", DomParse);
    catalog.register("xml", "dom_root", DomRoot);
    catalog.register("xml", "dom_children", DomChildren);
    catalog.register("xml", "dom_node_name", DomNodeName);
    catalog.register("xml", "dom_node_text", DomNodeText);
    catalog.register("xml", "dom_nodelist_item", DomNodelistItem);
    catalog.register("xml", "dom_close", DomClose);
}

/// roxmltree's `Document` borrows from the source text, so the registry
/// holds the owned text alongside it using `ouroboros`-free self-reference:
/// we re-parse lazily per call instead of storing the borrowed tree. This
/// trades a small amount of CPU for avoiding unsafe self-referential
/// structs, matching the registry's "opaque value" contract.
struct StoredXml {
    text: String,
}

struct Parse;

#[async_trait]
impl ModuleHandler for Parse {
    fn required_params(&self) -> &[&'static str] {
        &["xml"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let text = required_str(&params, "xml", "parse", "xml")?;
        Document::parse(text)
            .map_err(|e| BridgeError::Handler(format!("xml parse failed: {e}")))?;
        let handle = ctx
            .registry
            .put(ResourceKind::XmlDocument, StoredXml { text: text.to_string() }, PutOptions::default())
            .await;
        Ok(json!({ "document_id": handle }))
    }
}

struct XPath;

#[async_trait]
impl ModuleHandler for XPath {
    fn required_params(&self) -> &[&'static str] {
        &["document_id", "path"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let handle = required_str(&params, "xml", "xpath", "document_id")?;
        let path = required_str(&params, "xml", "xpath", "path")?;
        let value = ctx.registry.get(ResourceKind::XmlDocument, handle).await?;
        let stored = value
            .downcast::<StoredXml>()
            .map_err(|_| BridgeError::Internal("xml document handle type mismatch".to_string()))?;
        let doc = Document::parse(&stored.text)
            .map_err(|e| BridgeError::Internal(format!("previously-valid document failed to reparse: {e}")))?;

        let (element_path, attr) = split_attribute(path);
        let segments: Vec<&str> = element_path.trim_start_matches('/').split('/').filter(|s| !s.is_empty()).collect();

        let mut current = doc.root_element();
        if segments.first().copied() != Some(current.tag_name().name()) {
            return Ok(json!({ "matches": Value::Array(vec![]) }));
        }
        for seg in &segments[1..] {
            let next = current.children().find(|n| n.is_element() && n.tag_name().name() == *seg);
            match next {
                Some(n) => current = n,
                None => return Ok(json!({ "matches": Value::Array(vec![]) })),
            }
        }

        let result = match attr {
            Some(name) => current.attribute(name).map(|v| json!(v)),
            None => Some(json!(current.text().unwrap_or("").to_string())),
        };
        Ok(json!({ "matches": result.map(|v| vec![v]).unwrap_or_default() }))
    }
}

fn split_attribute(path: &str) -> (&str, Option<&str>) {
    match path.rsplit_once("/@") {
        Some((rest, attr)) => (rest, Some(attr)),
        None => (path, None),
    }
}

struct CloseDocument;

#[async_trait]
impl ModuleHandler for CloseDocument {
    fn required_params(&self) -> &[&'static str] {
        &["document_id"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let handle = required_str(&params, "xml", "close_document", "document_id")?;
        ctx.registry.delete(ResourceKind::XmlDocument, handle).await?;
        Ok(json!({ "closed": true }))
    }
}

// --- Minimal DOM walk surface: xml_dom_parser / xml_dom_document /
// xml_dom_node / xml_dom_nodelist. A "node" is addressed by a breadcrumb of
// child indices from the document root, resolved by re-parsing the stored
// text on each access (see `StoredXml` above for why).

struct DomNode {
    document_id: String,
    path: Vec<usize>,
}

struct DomNodelist {
    document_id: String,
    paths: Vec<Vec<usize>>,
}

/// A `dom_create_parser` handle carries no state of its own; it exists so
/// callers that expect a parser-then-parse two-step (mirroring a DOM
/// library's `XML::LibXML->new` followed by `->parse_string`) have
/// something to hold.
struct DomCreateParser;

#[async_trait]
impl ModuleHandler for DomCreateParser {
    async fn handle(&self, _params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let handle = ctx.registry.put(ResourceKind::XmlDomParser, (), PutOptions::default()).await;
        Ok(json!({ "parser_id": handle }))
    }
}

struct DomParse;

#[async_trait]
impl ModuleHandler for DomParse {
    fn required_params(&self) -> &[&'static str] {
        &["parser_id", "xml"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let parser_id = required_str(&params, "xml", "dom_parse", "parser_id")?;
        let text = required_str(&params, "xml", "dom_parse", "xml")?;
        ctx.registry.touch(ResourceKind::XmlDomParser, parser_id).await?;
        Document::parse(text).map_err(|e| BridgeError::Handler(format!("xml parse failed: {e}")))?;
        let handle = ctx
            .registry
            .put(ResourceKind::XmlDomDocument, StoredXml { text: text.to_string() }, PutOptions::default())
            .await;
        Ok(json!({ "document_id": handle }))
    }
}

fn resolve<'a>(doc: &'a Document<'a>, path: &[usize]) -> Option<roxmltree::Node<'a, 'a>> {
    let mut node = doc.root_element();
    for &idx in path {
        node = node.children().filter(|n| n.is_element()).nth(idx)?;
    }
    Some(node)
}

fn load_document_text(
    value: std::sync::Arc<dyn std::any::Any + Send + Sync>,
) -> Result<String, BridgeError> {
    value
        .downcast::<StoredXml>()
        .map(|s| s.text.clone())
        .map_err(|_| BridgeError::Internal("xml dom document handle type mismatch".to_string()))
}

struct DomRoot;

#[async_trait]
impl ModuleHandler for DomRoot {
    fn required_params(&self) -> &[&'static str] {
        &["document_id"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let document_id = required_str(&params, "xml", "dom_root", "document_id")?;
        let value = ctx.registry.get(ResourceKind::XmlDomDocument, document_id).await?;
        load_document_text(value)?;
        let handle = ctx
            .registry
            .put(
                ResourceKind::XmlDomNode,
                DomNode { document_id: document_id.to_string(), path: Vec::new() },
                PutOptions::default(),
            )
            .await;
        Ok(json!({ "node_id": handle }))
    }
}

struct DomChildren;

#[async_trait]
impl ModuleHandler for DomChildren {
    fn required_params(&self) -> &[&'static str] {
        &["node_id"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let node_id = required_str(&params, "xml", "dom_children", "node_id")?;
        let node_value = ctx.registry.get(ResourceKind::XmlDomNode, node_id).await?;
        let node = node_value
            .downcast::<DomNode>()
            .map_err(|_| BridgeError::Internal("xml dom node handle type mismatch".to_string()))?;

        let doc_value = ctx.registry.get(ResourceKind::XmlDomDocument, &node.document_id).await?;
        let text = load_document_text(doc_value)?;
        let doc = Document::parse(&text)
            .map_err(|e| BridgeError::Internal(format!("previously-valid document failed to reparse: {e}")))?;
        let parent = resolve(&doc, &node.path)
            .ok_or_else(|| BridgeError::InvalidHandle(node_id.to_string()))?;
        let child_count = parent.children().filter(|n| n.is_element()).count();

        let paths: Vec<Vec<usize>> = (0..child_count)
            .map(|i| {
                let mut p = node.path.clone();
                p.push(i);
                p
            })
            .collect();
        let handle = ctx
            .registry
            .put(
                ResourceKind::XmlDomNodelist,
                DomNodelist { document_id: node.document_id.clone(), paths },
                PutOptions::default(),
            )
            .await;
        Ok(json!({ "nodelist_id": handle, "length": child_count }))
    }
}

struct DomNodeName;

#[async_trait]
impl ModuleHandler for DomNodeName {
    fn required_params(&self) -> &[&'static str] {
        &["node_id"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let node_id = required_str(&params, "xml", "dom_node_name", "node_id")?;
        let (name, _) = resolve_node_for(ctx, node_id).await?;
        Ok(json!({ "name": name }))
    }
}

struct DomNodeText;

#[async_trait]
impl ModuleHandler for DomNodeText {
    fn required_params(&self) -> &[&'static str] {
        &["node_id"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let node_id = required_str(&params, "xml", "dom_node_text", "node_id")?;
        let (_, text) = resolve_node_for(ctx, node_id).await?;
        Ok(json!({ "text": text }))
    }
}

async fn resolve_node_for(ctx: &HandlerContext, node_id: &str) -> Result<(String, String), BridgeError> {
    let node_value = ctx.registry.get(ResourceKind::XmlDomNode, node_id).await?;
    let node = node_value
        .downcast::<DomNode>()
        .map_err(|_| BridgeError::Internal("xml dom node handle type mismatch".to_string()))?;
    let doc_value = ctx.registry.get(ResourceKind::XmlDomDocument, &node.document_id).await?;
    let text = load_document_text(doc_value)?;
    let doc = Document::parse(&text)
        .map_err(|e| BridgeError::Internal(format!("previously-valid document failed to reparse: {e}")))?;
    let element = resolve(&doc, &node.path).ok_or_else(|| BridgeError::InvalidHandle(node_id.to_string()))?;
    Ok((element.tag_name().name().to_string(), element.text().unwrap_or("").to_string()))
}

struct DomNodelistItem;

#[async_trait]
impl ModuleHandler for DomNodelistItem {
    fn required_params(&self) -> &[&'static str] {
        &["nodelist_id", "index"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let nodelist_id = required_str(&params, "xml", "dom_nodelist_item", "nodelist_id")?;
        let index = params.get("index").and_then(Value::as_u64).ok_or_else(|| {
            BridgeError::InvalidParams("xml".to_string(), "dom_nodelist_item".to_string(), "index must be a non-negative integer".to_string())
        })? as usize;

        let value = ctx.registry.get(ResourceKind::XmlDomNodelist, nodelist_id).await?;
        let list = value
            .downcast::<DomNodelist>()
            .map_err(|_| BridgeError::Internal("xml dom nodelist handle type mismatch".to_string()))?;
        let path = list
            .paths
            .get(index)
            .ok_or_else(|| BridgeError::InvalidHandle(format!("{nodelist_id}[{index}]")))?
            .clone();

        let handle = ctx
            .registry
            .put(
                ResourceKind::XmlDomNode,
                DomNode { document_id: list.document_id.clone(), path },
                PutOptions::default(),
            )
            .await;
        Ok(json!({ "node_id": handle }))
    }
}

struct DomClose;

#[async_trait]
impl ModuleHandler for DomClose {
    fn required_params(&self) -> &[&'static str] {
        &["document_id"]
    }

    async fn handle(&self, params: Value, ctx: &HandlerContext) -> Result<Value, BridgeError> {
        let document_id = required_str(&params, "xml", "dom_close", "document_id")?;
        ctx.registry.delete(ResourceKind::XmlDomDocument, document_id).await?;
        Ok(json!({ "closed": true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_config::BridgeConfig;
    use bridge_core::clock::SystemClock;
    use bridge_core::registry::ResourceRegistry;
    use std::sync::Arc;

    fn ctx() -> HandlerContext {
        let config = Arc::new(BridgeConfig::default());
        let clock = Arc::new(SystemClock);
        HandlerContext::new(Arc::new(ResourceRegistry::new(&config, clock.clone())), config, clock)
    }

    #[tokio::test]
    async fn parse_then_xpath_finds_nested_text() {
        let ctx = ctx();
        let xml = "<root><item id=\"7\">hello</item></root>";
        let parsed = Parse.handle(json!({"xml": xml}), &ctx).await.unwrap();
        let document_id = parsed["document_id"].as_str().unwrap().to_string();

        let text = XPath
            .handle(json!({"document_id": document_id, "path": "/root/item"}), &ctx)
            .await
            .unwrap();
        assert_eq!(text["matches"][0], "hello");

        let attr = XPath
            .handle(json!({"document_id": document_id, "path": "/root/item/@id"}), &ctx)
            .await
            .unwrap();
        assert_eq!(attr["matches"][0], "7");
    }

    #[tokio::test]
    async fn malformed_xml_is_a_handler_error() {
        let ctx = ctx();
        let err = Parse.handle(json!({"xml": "<not-closed>"}), &ctx).await.unwrap_err();
        assert_eq!(err.code(), "handler_error");
    }

    #[tokio::test]
    async fn dom_walk_reaches_a_grandchild_via_root_children_and_nodelist() {
        let ctx = ctx();
        let parser = DomCreateParser.handle(json!({}), &ctx).await.unwrap();
        let parser_id = parser["parser_id"].as_str().unwrap().to_string();

        let xml = "<root><a/><b>leaf</b></root>";
        let parsed = DomParse.handle(json!({"parser_id": parser_id, "xml": xml}), &ctx).await.unwrap();
        let document_id = parsed["document_id"].as_str().unwrap().to_string();

        let root = DomRoot.handle(json!({"document_id": document_id}), &ctx).await.unwrap();
        let root_id = root["node_id"].as_str().unwrap().to_string();

        let children = DomChildren.handle(json!({"node_id": root_id}), &ctx).await.unwrap();
        assert_eq!(children["length"], 2);
        let nodelist_id = children["nodelist_id"].as_str().unwrap().to_string();

        let second = DomNodelistItem
            .handle(json!({"nodelist_id": nodelist_id, "index": 1}), &ctx)
            .await
            .unwrap();
        let node_id = second["node_id"].as_str().unwrap().to_string();

        let name = DomNodeName.handle(json!({"node_id": node_id}), &ctx).await.unwrap();
        assert_eq!(name["name"], "b");
        let text = DomNodeText.handle(json!({"node_id": node_id}), &ctx).await.unwrap();
        assert_eq!(text["text"], "leaf");

        DomClose.handle(json!({"document_id": document_id}), &ctx).await.unwrap();
    }
}
