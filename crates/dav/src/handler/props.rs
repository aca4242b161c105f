use std::time::Instant;

use http::StatusCode;
use loom_http::connection::Exchange;
use tracing::debug;
use xmltree::Element;

use super::dav::{Change, DavHandler};
use super::file::content_type_for;
use super::{DavRequest, respond_xml};
use crate::adapter::Metadata;
use crate::error::DavError;
use crate::headers::Depth;
use crate::path;
use crate::xml::{self, MultiStatus, PatchOp, PropertyName, Propfind, dav_element, dav_text};

/// The properties computed from the resource rather than stored with it.
const LIVE_PROPERTIES: [&str; 8] = [
    "resourcetype",
    "displayname",
    "getetag",
    "getlastmodified",
    "getcontentlength",
    "getcontenttype",
    "supportedlock",
    "lockdiscovery",
];

fn is_live(name: &PropertyName) -> bool {
    name.is_dav() && LIVE_PROPERTIES.contains(&name.name.as_str())
}

impl DavHandler {
    /// Reads an XML request body up to the configured limit.
    pub(super) async fn read_xml(&self, exchange: &mut Exchange) -> Result<Option<Element>, DavError> {
        if exchange.request_payload_size().is_empty() {
            return Ok(None);
        }
        let body = exchange.read_to_end(self.config().max_xml_bytes).await?;
        xml::parse_document(&body)
    }

    pub(super) async fn propfind(&self, exchange: &mut Exchange, request: &DavRequest) -> Result<(), DavError> {
        let meta = self.adapter().metadata(&request.path).await?.ok_or(DavError::NotFound)?;
        let depth = Depth::parse(exchange.header("Depth"), Depth::Infinity)?;
        if depth == Depth::Infinity && !self.config().allow_infinite_propfind {
            return Err(DavError::forbidden("PROPFIND with Depth: infinity is disabled"));
        }
        let propfind = xml::parse_propfind(self.read_xml(exchange).await?.as_ref())?;

        let mut multistatus = MultiStatus::new();
        let now = Instant::now();
        for (path, meta) in self.walk(&request.path, meta, depth).await? {
            let propstats = match &propfind {
                Propfind::AllProp => {
                    let mut found = self.live_properties(request, &path, &meta, now);
                    found.extend(self.adapter().dead_properties(&path).await?);
                    vec![(StatusCode::OK, found)]
                }
                Propfind::PropName => {
                    let mut names: Vec<_> = self.live_properties(request, &path, &meta, now).iter().map(|e| dav_element(&e.name)).collect();
                    names.extend(self.adapter().dead_properties(&path).await?.iter().map(|e| PropertyName::of(e).to_element()));
                    vec![(StatusCode::OK, names)]
                }
                Propfind::Prop(names) => self.requested_properties(request, &path, &meta, names, now).await?,
            };
            multistatus.add_propstats(&request.href(&path, meta.is_collection), propstats);
        }

        debug!(path = request.path, ?depth, responses = multistatus.len(), "propfind");
        respond_xml(exchange, StatusCode::MULTI_STATUS, multistatus.to_xml()?).await
    }

    async fn requested_properties(
        &self,
        request: &DavRequest,
        path: &str,
        meta: &Metadata,
        names: &[PropertyName],
        now: Instant,
    ) -> Result<Vec<(StatusCode, Vec<Element>)>, DavError> {
        let dead = self.adapter().dead_properties(path).await?;
        let (mut found, mut missing) = (Vec::new(), Vec::new());
        for name in names {
            let value = if name.is_dav() { self.live_property(request, path, meta, &name.name, now) } else { None };
            match value.or_else(|| dead.iter().find(|e| PropertyName::of(e) == *name).cloned()) {
                Some(element) => found.push(element),
                None => missing.push(name.to_element()),
            }
        }
        Ok(vec![(StatusCode::OK, found), (StatusCode::NOT_FOUND, missing)])
    }

    fn live_properties(&self, request: &DavRequest, path: &str, meta: &Metadata, now: Instant) -> Vec<Element> {
        LIVE_PROPERTIES.iter().filter_map(|name| self.live_property(request, path, meta, name, now)).collect()
    }

    fn live_property(&self, request: &DavRequest, path: &str, meta: &Metadata, name: &str, now: Instant) -> Option<Element> {
        let element = match name {
            "resourcetype" => {
                let mut element = dav_element("resourcetype");
                if meta.is_collection {
                    element.children.push(xmltree::XMLNode::Element(dav_element("collection")));
                }
                element
            }
            "displayname" => dav_text("displayname", path::name(path)),
            "getetag" => dav_text("getetag", meta.etag.as_str()),
            "getlastmodified" => dav_text("getlastmodified", httpdate::fmt_http_date(meta.modified)),
            "getcontentlength" if !meta.is_collection => dav_text("getcontentlength", meta.length.to_string()),
            "getcontenttype" if !meta.is_collection => dav_text("getcontenttype", content_type_for(path).to_string()),
            "supportedlock" => xml::supported_lock(),
            "lockdiscovery" => xml::lock_discovery(&self.locks().get_locks(path), &request.mount, now),
            _ => return None,
        };
        Some(element)
    }

    pub(super) async fn proppatch(&self, exchange: &mut Exchange, request: &DavRequest) -> Result<(), DavError> {
        let meta = self.adapter().metadata(&request.path).await?.ok_or(DavError::NotFound)?;
        self.check_write(request, &request.path, Change::Modify).await?;
        let document = self.read_xml(exchange).await?.ok_or_else(|| DavError::bad_request("PROPPATCH needs a body"))?;
        let ops = xml::parse_proppatch(&document)?;

        let name_of = |op: &PatchOp| match op {
            PatchOp::Set(element) => PropertyName::of(element),
            PatchOp::Remove(name) => name.clone(),
        };
        let (protected, allowed): (Vec<_>, Vec<_>) = ops.iter().map(name_of).partition(is_live);

        let propstats = if protected.is_empty() {
            for op in ops {
                match op {
                    PatchOp::Set(element) => self.adapter().patch_properties(&request.path, vec![element], Vec::new()).await?,
                    PatchOp::Remove(name) => self.adapter().patch_properties(&request.path, Vec::new(), vec![name]).await?,
                }
            }
            vec![(StatusCode::OK, allowed.iter().map(PropertyName::to_element).collect())]
        } else {
            debug!(path = request.path, protected = protected.len(), "proppatch on live properties refused");
            vec![
                (StatusCode::FORBIDDEN, protected.iter().map(PropertyName::to_element).collect()),
                (StatusCode::FAILED_DEPENDENCY, allowed.iter().map(PropertyName::to_element).collect()),
            ]
        };

        let mut multistatus = MultiStatus::new();
        multistatus.add_propstats(&request.href(&request.path, meta.is_collection), propstats);
        respond_xml(exchange, StatusCode::MULTI_STATUS, multistatus.to_xml()?).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use indoc::indoc;
    use loom_http::handler::Handler;

    use super::*;
    use crate::adapter::{MemoryResourceAdapter, ResourceAdapter};
    use crate::handler::DavConfig;
    use crate::handler::testing::send;
    use crate::xml::DAV_NS;

    async fn handler(config: DavConfig) -> (Arc<dyn Handler>, Arc<MemoryResourceAdapter>) {
        let adapter = Arc::new(MemoryResourceAdapter::new());
        adapter.create_collection("/docs").await.unwrap();
        adapter.create_file("/docs/a.txt").await.unwrap();
        adapter.write_at("/docs/a.txt", 0, b"hello").await.unwrap();
        let handler: Arc<dyn Handler> = Arc::new(DavHandler::new(Arc::clone(&adapter) as Arc<dyn ResourceAdapter>, config));
        (handler, adapter)
    }

    fn responses(body: &str) -> Vec<Element> {
        let root = Element::parse(body.as_bytes()).unwrap();
        root.children.iter().filter_map(|node| node.as_element().cloned()).collect()
    }

    fn href(response: &Element) -> String {
        response.get_child(("href", DAV_NS)).unwrap().get_text().unwrap().into_owned()
    }

    /// The `prop` element of the propstat with `status`.
    fn props<'a>(response: &'a Element, status: &str) -> Option<&'a Element> {
        response
            .children
            .iter()
            .filter_map(|node| node.as_element())
            .filter(|e| e.name == "propstat")
            .find(|propstat| propstat.get_child(("status", DAV_NS)).and_then(Element::get_text).is_some_and(|s| s.contains(status)))
            .and_then(|propstat| propstat.get_child(("prop", DAV_NS)))
    }

    #[tokio::test]
    async fn allprop_to_depth_one() {
        let (handler, _) = handler(DavConfig::default()).await;
        let reply = send(handler, "PROPFIND", "/docs", &[("Depth", "1")], "").await;
        assert_eq!(reply.status, 207);
        assert!(reply.header("content-type").unwrap().starts_with("application/xml"));

        let responses = responses(&reply.body);
        assert_eq!(responses.iter().map(href).collect::<Vec<_>>(), vec!["/docs/", "/docs/a.txt"]);

        let collection = props(&responses[0], "200").unwrap();
        assert!(collection.get_child(("resourcetype", DAV_NS)).unwrap().get_child(("collection", DAV_NS)).is_some());
        assert!(collection.get_child(("getcontentlength", DAV_NS)).is_none());

        let file = props(&responses[1], "200").unwrap();
        assert_eq!(file.get_child(("getcontentlength", DAV_NS)).unwrap().get_text().unwrap(), "5");
        assert_eq!(file.get_child(("getcontenttype", DAV_NS)).unwrap().get_text().unwrap(), "text/plain; charset=utf-8");
        assert_eq!(file.get_child(("displayname", DAV_NS)).unwrap().get_text().unwrap(), "a.txt");
        assert!(file.get_child(("supportedlock", DAV_NS)).is_some());
    }

    #[tokio::test]
    async fn named_properties_and_missing_ones() {
        let (handler, _) = handler(DavConfig::default()).await;
        let body = indoc! {r#"
            <?xml version="1.0" encoding="utf-8"?>
            <D:propfind xmlns:D="DAV:" xmlns:z="urn:z">
              <D:prop><D:getetag/><z:color/></D:prop>
            </D:propfind>
        "#};
        let reply = send(handler, "PROPFIND", "/docs/a.txt", &[("Depth", "0")], body).await;
        assert_eq!(reply.status, 207);

        let responses = responses(&reply.body);
        assert_eq!(responses.len(), 1);
        assert!(props(&responses[0], "200").unwrap().get_child(("getetag", DAV_NS)).is_some());
        assert!(props(&responses[0], "404").unwrap().get_child(("color", "urn:z")).is_some());
    }

    #[tokio::test]
    async fn propfind_refusals() {
        let (handler, _) = handler(DavConfig::default().with_infinite_propfind(false)).await;
        assert_eq!(send(Arc::clone(&handler), "PROPFIND", "/docs", &[], "").await.status, 403);
        assert_eq!(send(Arc::clone(&handler), "PROPFIND", "/missing", &[("Depth", "0")], "").await.status, 404);
        assert_eq!(send(handler, "PROPFIND", "/docs", &[("Depth", "0")], "<not-xml").await.status, 400);
    }

    #[tokio::test]
    async fn proppatch_then_propfind() {
        let (handler, adapter) = handler(DavConfig::default()).await;
        let update = indoc! {r#"
            <D:propertyupdate xmlns:D="DAV:" xmlns:z="urn:z">
              <D:set><D:prop><z:color>red</z:color><z:size>2</z:size></D:prop></D:set>
              <D:remove><D:prop><z:size/></D:prop></D:remove>
            </D:propertyupdate>
        "#};
        let reply = send(Arc::clone(&handler), "PROPPATCH", "/docs/a.txt", &[], update).await;
        assert_eq!(reply.status, 207);
        assert!(props(&responses(&reply.body)[0], "200").is_some());

        let stored = adapter.dead_properties("/docs/a.txt").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].get_text().unwrap(), "red");

        let names = r#"<D:propfind xmlns:D="DAV:"><D:propname/></D:propfind>"#;
        let reply = send(handler, "PROPFIND", "/docs/a.txt", &[("Depth", "0")], names).await;
        let found = props(&responses(&reply.body)[0], "200").unwrap().clone();
        assert!(found.get_child(("color", "urn:z")).is_some_and(|color| color.children.is_empty()));
        assert!(found.get_child(("getetag", DAV_NS)).is_some());
    }

    #[tokio::test]
    async fn proppatch_of_live_properties_changes_nothing() {
        let (handler, adapter) = handler(DavConfig::default()).await;
        let update = indoc! {r#"
            <D:propertyupdate xmlns:D="DAV:" xmlns:z="urn:z">
              <D:set><D:prop><D:getetag>"forged"</D:getetag><z:color>red</z:color></D:prop></D:set>
            </D:propertyupdate>
        "#};
        let reply = send(handler, "PROPPATCH", "/docs/a.txt", &[], update).await;
        assert_eq!(reply.status, 207);

        let responses = responses(&reply.body);
        assert!(props(&responses[0], "403").unwrap().get_child(("getetag", DAV_NS)).is_some());
        assert!(props(&responses[0], "424").unwrap().get_child(("color", "urn:z")).is_some());
        assert!(adapter.dead_properties("/docs/a.txt").await.unwrap().is_empty());
    }
}
