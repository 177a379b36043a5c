//! Document registry: host documents, their embedded documents, and mapping tables.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use tower_lsp::lsp_types::{Range, Url};

use super::language::{EmbeddedName, LanguageModule};
use super::map::EmbeddedTarget;
use super::region::{Region, RegionKind};
use super::text::TextDocument;
use super::Span;

/// Maximum nesting of embedded documents.
pub const MAX_EMBEDDING_DEPTH: usize = 8;

/// Link from an embedded document back to the region of its host that feeds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLink {
    /// Document containing the region (a host, or an embedded document when nested).
    pub host: Url,
    /// Offset of this contribution inside the embedded text.
    pub base: usize,
    /// The host's region, with embedded offsets relative to `base`.
    pub region: Region,
}

impl SourceLink {
    /// Host span -> embedded span, clipped to the region.
    pub fn to_embedded(&self, host: &Span) -> Option<Span> {
        self.region
            .to_embedded(host)
            .map(|span| span.start + self.base..span.end + self.base)
    }

    /// Embedded span -> host span; None for synthesised text.
    pub fn to_host(&self, embedded: &Span) -> Option<Span> {
        let start = embedded.start.checked_sub(self.base)?;
        let end = embedded.end.checked_sub(self.base)?;
        self.region.to_host(&(start..end))
    }

    pub fn kind(&self) -> RegionKind {
        self.region.kind
    }
}

/// Immutable snapshot of one document and everything derived from it.
///
/// A node is replaced as a whole when its document changes; readers holding
/// an `Arc<DocumentNode>` keep a consistent view of content and mapping.
#[derive(Debug, Clone)]
pub struct DocumentNode {
    document: Arc<TextDocument>,
    /// Mapping table: regions of this document feeding embedded documents.
    regions: Vec<Region>,
    embedded: Vec<Arc<DocumentNode>>,
    /// Reverse index: regions of other documents feeding this one.
    sources: Vec<SourceLink>,
}

impl DocumentNode {
    pub fn document(&self) -> &Arc<TextDocument> {
        &self.document
    }

    pub fn uri(&self) -> &Url {
        self.document.uri()
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn embedded(&self) -> &[Arc<DocumentNode>] {
        &self.embedded
    }

    pub fn sources(&self) -> &[SourceLink] {
        &self.sources
    }

    /// Whether this node is a top-level document rather than an embedded one.
    pub fn is_host(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn child(&self, uri: &Url) -> Option<&Arc<DocumentNode>> {
        self.embedded.iter().find(|c| c.uri() == uri)
    }

    /// The link from `host`'s region `region_id` into this document.
    pub fn source_link(&self, host: &Url, region_id: usize) -> Option<&SourceLink> {
        self.sources
            .iter()
            .find(|l| &l.host == host && l.region.id == region_id)
    }

    /// Translate a span of this document into every embedded document it touches.
    ///
    /// Returns one entry per region intersecting `span`, clipped to that
    /// region. Text governed by no region yields nothing.
    pub fn to_embedded(&self, span: &Span) -> Vec<(Url, Span)> {
        self.regions
            .iter()
            .filter_map(|region| {
                let child = self.child(&region.target)?;
                let link = child.source_link(self.uri(), region.id)?;
                let embedded = link.to_embedded(span)?;
                Some((region.target.clone(), embedded))
            })
            .collect()
    }

    /// Every document below this one, depth-first.
    fn descendants(&self) -> Vec<Arc<DocumentNode>> {
        let mut out = Vec::new();
        for child in &self.embedded {
            out.push(Arc::clone(child));
            out.extend(child.descendants());
        }
        out
    }
}

/// One host's contribution to a shared document.
#[derive(Debug, Clone)]
struct SharedPart {
    text: String,
    region: Region,
}

/// Contributions feeding one shared (N:1) document.
#[derive(Debug)]
struct SharedDocument {
    language_id: String,
    version: i32,
    parts: BTreeMap<(Url, usize), SharedPart>,
}

impl SharedDocument {
    fn remove_host(&mut self, host: &Url) -> bool {
        let before = self.parts.len();
        self.parts.retain(|(owner, _), _| owner != host);
        before != self.parts.len()
    }

    fn hosts(&self) -> BTreeSet<Url> {
        self.parts.keys().map(|(host, _)| host.clone()).collect()
    }
}

/// Thread-safe storage for open documents and their embedded documents.
///
/// Readers never lock: they clone `Arc` snapshots out of the maps. Writers
/// are serialised by the lock guarding shared-document contributions.
pub struct DocumentStore {
    hosts: DashMap<Url, Arc<DocumentNode>>,
    virtuals: DashMap<Url, Arc<DocumentNode>>,
    shared: Mutex<BTreeMap<Url, SharedDocument>>,
    languages: Vec<Arc<dyn LanguageModule>>,
    shared_version: AtomicI32,
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("hosts", &self.hosts.len())
            .field("virtuals", &self.virtuals.len())
            .field("languages", &self.languages.len())
            .finish_non_exhaustive()
    }
}

impl DocumentStore {
    /// Create an empty store splitting documents with `languages`.
    pub fn new(languages: Vec<Arc<dyn LanguageModule>>) -> Self {
        Self {
            hosts: DashMap::new(),
            virtuals: DashMap::new(),
            shared: Mutex::new(BTreeMap::new()),
            languages,
            shared_version: AtomicI32::new(0),
        }
    }

    /// Open or update a host document.
    ///
    /// The document's mapping table and embedded documents are rebuilt from
    /// scratch and published as one snapshot.
    pub fn open(
        &self,
        uri: Url,
        language_id: &str,
        version: i32,
        text: String,
    ) -> Arc<DocumentNode> {
        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        let mut touched = BTreeSet::new();
        for (shared_uri, doc) in shared.iter_mut() {
            if doc.remove_host(&uri) {
                touched.insert(shared_uri.clone());
            }
        }

        let document = Arc::new(TextDocument::new(uri.clone(), language_id, version, text));
        let mut contributions = Vec::new();
        let node = self.derive(document, 0, &mut contributions);

        for (language_id, part) in contributions {
            let target = part.region.target.clone();
            let entry = shared
                .entry(target.clone())
                .or_insert_with(|| SharedDocument {
                    language_id,
                    version: 0,
                    parts: BTreeMap::new(),
                });
            entry.parts.insert((uri.clone(), part.region.id), part);
            touched.insert(target);
        }

        let affected = self.rebuild_shared(&mut shared, &touched);
        let node = Arc::new(self.relink(&node, &shared));
        self.replace_host(&uri, Some(Arc::clone(&node)));
        self.republish(&shared, affected, &uri);

        tracing::debug!(
            uri = %uri,
            version,
            regions = node.regions().len(),
            "rebuilt mapping table"
        );
        node
    }

    /// Close a host document, dropping its embedded documents and contributions.
    pub fn close(&self, uri: &Url) {
        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        let mut touched = BTreeSet::new();
        for (shared_uri, doc) in shared.iter_mut() {
            if doc.remove_host(uri) {
                touched.insert(shared_uri.clone());
            }
        }
        let affected = self.rebuild_shared(&mut shared, &touched);
        self.replace_host(uri, None);
        self.republish(&shared, affected, uri);
    }

    /// Get a host document's current snapshot.
    pub fn get(&self, uri: &Url) -> Option<Arc<DocumentNode>> {
        self.hosts.get(uri).map(|r| Arc::clone(&r))
    }

    /// Get any document's snapshot, host or embedded.
    pub fn node(&self, uri: &Url) -> Option<Arc<DocumentNode>> {
        self.get(uri)
            .or_else(|| self.virtuals.get(uri).map(|r| Arc::clone(&r)))
    }

    /// URIs of all open host documents.
    pub fn host_uris(&self) -> Vec<Url> {
        let mut uris: Vec<Url> = self.hosts.iter().map(|e| e.key().clone()).collect();
        uris.sort();
        uris
    }

    /// Chain from a top-level host down to `uri`.
    ///
    /// Shared documents are reached through their first contributor.
    pub fn target(&self, uri: &Url) -> Option<EmbeddedTarget> {
        let mut chain = vec![self.node(uri)?];
        let mut links = Vec::new();
        while let Some(link) = chain.last().and_then(|n| n.sources().first()).cloned() {
            if chain.len() > MAX_EMBEDDING_DEPTH {
                return None;
            }
            chain.push(self.node(&link.host)?);
            links.push(link);
        }
        chain.reverse();
        links.reverse();
        Some(EmbeddedTarget::from_chain(chain, links))
    }

    /// Translate a span of any document to its top-level host.
    ///
    /// Returns None if the span falls in synthesised text, or (with
    /// `editable`) passes through a region that does not accept edits.
    pub fn to_host(&self, uri: &Url, span: &Span, editable: bool) -> Option<(Url, Span)> {
        self.to_host_at_depth(uri, span, editable, 0)
    }

    fn to_host_at_depth(
        &self,
        uri: &Url,
        span: &Span,
        editable: bool,
        depth: usize,
    ) -> Option<(Url, Span)> {
        if depth > MAX_EMBEDDING_DEPTH {
            return None;
        }
        let node = self.node(uri)?;
        if node.is_host() {
            return Some((uri.clone(), span.clone()));
        }
        node.sources().iter().find_map(|link| {
            if editable && !link.kind().is_editable() {
                return None;
            }
            let host_span = link.to_host(span)?;
            self.to_host_at_depth(&link.host, &host_span, editable, depth + 1)
        })
    }

    /// Translate a range of any document to its top-level host.
    ///
    /// URIs the store does not know are real files and pass through unchanged.
    pub fn to_host_range(&self, uri: &Url, range: Range, editable: bool) -> Option<(Url, Range)> {
        let Some(node) = self.node(uri) else {
            return Some((uri.clone(), range));
        };
        if node.is_host() {
            return Some((uri.clone(), range));
        }
        let span = node.document().line_index().range_to_span(range)?;
        let (host_uri, host_span) = self.to_host(uri, &span, editable)?;
        let host = self.node(&host_uri)?;
        Some((
            host_uri,
            host.document().line_index().span_to_range(&host_span),
        ))
    }

    /// Whether `uri` names an embedded document.
    pub fn is_embedded(&self, uri: &Url) -> bool {
        self.virtuals.contains_key(uri)
    }

    fn derive(
        &self,
        document: Arc<TextDocument>,
        depth: usize,
        contributions: &mut Vec<(String, SharedPart)>,
    ) -> DocumentNode {
        let mut regions = Vec::new();
        let mut embedded = Vec::new();

        let module = if depth < MAX_EMBEDDING_DEPTH {
            self.languages.iter().find(|m| m.handles(&document))
        } else {
            None
        };

        if let Some(module) = module {
            for (id, code) in module.embedded_codes(&document).into_iter().enumerate() {
                match code.name {
                    EmbeddedName::Local(name) => {
                        let uri = virtual_uri(document.uri(), &name);
                        let region = Region::new(id, uri.clone(), code.kind, code.segments);
                        let child_document = Arc::new(TextDocument::new(
                            uri,
                            code.language_id,
                            document.version(),
                            code.text,
                        ));
                        let mut child = self.derive(child_document, depth + 1, &mut Vec::new());
                        child.sources.push(SourceLink {
                            host: document.uri().clone(),
                            base: 0,
                            region: region.clone(),
                        });
                        regions.push(region);
                        embedded.push(Arc::new(child));
                    }
                    EmbeddedName::Shared(uri) if depth == 0 => {
                        let region = Region::new(id, uri, code.kind, code.segments);
                        contributions.push((
                            code.language_id,
                            SharedPart {
                                text: code.text,
                                region: region.clone(),
                            },
                        ));
                        regions.push(region);
                    }
                    EmbeddedName::Shared(uri) => {
                        tracing::debug!(
                            uri = %uri,
                            host = %document.uri(),
                            "ignoring shared embedding below the top level"
                        );
                    }
                }
            }
        }

        DocumentNode {
            document,
            regions,
            embedded,
            sources: Vec::new(),
        }
    }

    /// Rebuild every touched shared document; returns the hosts feeding them.
    fn rebuild_shared(
        &self,
        shared: &mut BTreeMap<Url, SharedDocument>,
        touched: &BTreeSet<Url>,
    ) -> BTreeSet<Url> {
        let mut affected = BTreeSet::new();
        for uri in touched {
            let Some(doc) = shared.get_mut(uri) else {
                continue;
            };
            if doc.parts.is_empty() {
                shared.remove(uri);
                self.forget_shared(uri);
                continue;
            }

            doc.version = self.shared_version.fetch_add(1, Ordering::Relaxed) + 1;
            let mut text = String::new();
            let mut sources = Vec::new();
            for ((host, _), part) in &doc.parts {
                let base = text.len();
                text.push_str(&part.text);
                if !text.ends_with('\n') {
                    text.push('\n');
                }
                sources.push(SourceLink {
                    host: host.clone(),
                    base,
                    region: part.region.clone(),
                });
            }
            affected.extend(doc.hosts());

            let document = Arc::new(TextDocument::new(
                uri.clone(),
                doc.language_id.clone(),
                doc.version,
                text,
            ));
            let mut node = self.derive(document, 1, &mut Vec::new());
            node.sources = sources;
            let node = Arc::new(node);
            self.forget_shared(uri);
            for descendant in node.descendants() {
                self.virtuals
                    .insert(descendant.uri().clone(), Arc::clone(&descendant));
            }
            self.virtuals.insert(uri.clone(), node);
        }
        affected
    }

    /// Copy of `node` whose shared children point at the current shared snapshots.
    fn relink(&self, node: &DocumentNode, shared: &BTreeMap<Url, SharedDocument>) -> DocumentNode {
        let mut node = node.clone();
        let host = node.uri().clone();
        node.embedded.retain(|c| owned_by(c.uri(), &host));
        let targets: BTreeSet<&Url> = node
            .regions
            .iter()
            .map(|r| &r.target)
            .filter(|t| shared.contains_key(*t))
            .collect();
        let children: Vec<Arc<DocumentNode>> = targets
            .into_iter()
            .filter_map(|t| self.virtuals.get(t).map(|r| Arc::clone(&r)))
            .collect();
        node.embedded.extend(children);
        node
    }

    /// Swap a host snapshot, keeping the embedded index in step.
    fn replace_host(&self, uri: &Url, node: Option<Arc<DocumentNode>>) {
        let previous = match &node {
            Some(node) => self.hosts.insert(uri.clone(), Arc::clone(node)),
            None => self.hosts.remove(uri).map(|(_, node)| node),
        };

        let mut current = BTreeSet::new();
        if let Some(node) = &node {
            for descendant in node.descendants() {
                if owned_by(descendant.uri(), uri) {
                    current.insert(descendant.uri().clone());
                    self.virtuals
                        .insert(descendant.uri().clone(), Arc::clone(&descendant));
                }
            }
        }

        if let Some(previous) = previous {
            for descendant in previous.descendants() {
                if owned_by(descendant.uri(), uri) && !current.contains(descendant.uri()) {
                    self.virtuals.remove(descendant.uri());
                }
            }
        }
    }

    fn forget_shared(&self, uri: &Url) {
        if let Some((_, node)) = self.virtuals.remove(uri) {
            for descendant in node.descendants() {
                self.virtuals.remove(descendant.uri());
            }
        }
    }

    /// Re-publish other hosts whose shared children were rebuilt.
    fn republish(&self, shared: &BTreeMap<Url, SharedDocument>, hosts: BTreeSet<Url>, skip: &Url) {
        for host in hosts.iter().filter(|h| *h != skip) {
            let Some(node) = self.get(host) else {
                continue;
            };
            self.hosts
                .insert(host.clone(), Arc::new(self.relink(&node, shared)));
        }
    }
}

/// Whether `uri` is a local embedded document of `host` (or `host` itself).
fn owned_by(uri: &Url, host: &Url) -> bool {
    let mut base = uri.clone();
    base.set_fragment(None);
    let mut host = host.clone();
    host.set_fragment(None);
    base == host
}

/// URI of a local embedded document: the host URI with `name` appended to its fragment.
pub(crate) fn virtual_uri(host: &Url, name: &str) -> Url {
    let mut uri = host.clone();
    let fragment = match host.fragment() {
        Some(existing) if !existing.is_empty() => format!("{existing}/{name}"),
        _ => name.to_string(),
    };
    uri.set_fragment(Some(&fragment));
    uri
}
