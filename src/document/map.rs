//! Coordinate mapping between a host document and the documents embedded in it.

use std::sync::Arc;

use tower_lsp::lsp_types::{Position, Range, Url};

use super::state::{DocumentNode, SourceLink, MAX_EMBEDDING_DEPTH};
use super::text::TextDocument;
use super::Span;

/// A document reached from a host, together with the path that reached it.
///
/// `chain[0]` is the top-level host and the last entry is the target itself;
/// `links[i]` maps `chain[i + 1]` back into `chain[i]`. A host targeting
/// itself has a one-element chain and no links.
#[derive(Debug, Clone)]
pub struct EmbeddedTarget {
    chain: Vec<Arc<DocumentNode>>,
    links: Vec<SourceLink>,
}

impl EmbeddedTarget {
    /// The host itself as a target.
    pub fn root(node: Arc<DocumentNode>) -> Self {
        Self {
            chain: vec![node],
            links: Vec::new(),
        }
    }

    pub(crate) fn from_chain(chain: Vec<Arc<DocumentNode>>, links: Vec<SourceLink>) -> Self {
        Self { chain, links }
    }

    fn push(&self, child: Arc<DocumentNode>, link: SourceLink) -> Self {
        let mut next = self.clone();
        next.chain.push(child);
        next.links.push(link);
        next
    }

    /// The target document.
    pub fn document(&self) -> &Arc<TextDocument> {
        self.node().document()
    }

    pub fn node(&self) -> &Arc<DocumentNode> {
        &self.chain[self.chain.len() - 1]
    }

    /// The top-level host the target was reached from.
    pub fn host(&self) -> &Arc<DocumentNode> {
        &self.chain[0]
    }

    /// Number of embedding levels between host and target.
    pub fn depth(&self) -> usize {
        self.links.len()
    }

    pub fn is_host(&self) -> bool {
        self.links.is_empty()
    }

    /// Whether every region on the path accepts edit write-back.
    pub fn is_editable(&self) -> bool {
        self.links.iter().all(|l| l.kind().is_editable())
    }

    /// Target span -> host span, walking the chain upwards.
    pub fn to_host_span(&self, span: &Span) -> Option<Span> {
        self.links
            .iter()
            .rev()
            .try_fold(span.clone(), |span, link| link.to_host(&span))
    }

    /// Host span -> target span, walking the chain downwards.
    pub fn to_embedded_span(&self, span: &Span) -> Option<Span> {
        self.links
            .iter()
            .try_fold(span.clone(), |span, link| link.to_embedded(&span))
    }

    /// Translate a range of the target document into host coordinates.
    ///
    /// Returns None when the range falls in text with no host counterpart.
    pub fn to_host_range(&self, range: Range) -> Option<Range> {
        if self.is_host() {
            return Some(range);
        }
        let span = self.document().line_index().range_to_span(range)?;
        let host = self.to_host_span(&span)?;
        Some(self.host().document().line_index().span_to_range(&host))
    }

    /// Like [`Self::to_host_range`], but only through regions accepting edits.
    pub fn to_host_edit_range(&self, range: Range) -> Option<Range> {
        if !self.is_editable() {
            return None;
        }
        self.to_host_range(range)
    }

    pub fn to_host_position(&self, position: Position) -> Option<Position> {
        self.to_host_range(Range::new(position, position))
            .map(|r| r.start)
    }

    /// Translate a host range into the target document.
    pub fn to_embedded_range(&self, range: Range) -> Option<Range> {
        if self.is_host() {
            return Some(range);
        }
        let span = self.host().document().line_index().range_to_span(range)?;
        let embedded = self.to_embedded_span(&span)?;
        Some(self.document().line_index().span_to_range(&embedded))
    }

    pub fn to_embedded_position(&self, position: Position) -> Option<Position> {
        self.to_embedded_range(Range::new(position, position))
            .map(|r| r.start)
    }

    pub fn uri(&self) -> &Url {
        self.document().uri()
    }
}

/// Every document a host range reaches, with the range translated into each.
///
/// The host itself comes first, then embedded documents depth-first in
/// mapping-table order. Documents the range does not touch are skipped.
pub fn embedded_targets(root: &Arc<DocumentNode>, range: Range) -> Vec<(EmbeddedTarget, Range)> {
    let mut out = vec![(EmbeddedTarget::root(Arc::clone(root)), range)];
    let Some(span) = root.document().line_index().range_to_span(range) else {
        return out;
    };
    collect(&EmbeddedTarget::root(Arc::clone(root)), &span, &mut out);
    out
}

fn collect(parent: &EmbeddedTarget, span: &Span, out: &mut Vec<(EmbeddedTarget, Range)>) {
    if parent.depth() >= MAX_EMBEDDING_DEPTH {
        return;
    }
    let node = parent.node();
    for region in node.regions() {
        let Some(child) = node.child(&region.target) else {
            continue;
        };
        let Some(link) = child.source_link(node.uri(), region.id) else {
            continue;
        };
        let Some(embedded) = link.to_embedded(span) else {
            continue;
        };
        let target = parent.push(Arc::clone(child), link.clone());
        let range = child.document().line_index().span_to_range(&embedded);
        out.push((target.clone(), range));
        collect(&target, &embedded, out);
    }
}

/// Every document below `root`, regardless of position: whole-document requests.
pub fn all_targets(root: &Arc<DocumentNode>) -> Vec<EmbeddedTarget> {
    embedded_targets(root, root.document().line_index().full_range())
        .into_iter()
        .map(|(target, _)| target)
        .collect()
}
