//! Translation of provider results from embedded to host coordinates.
//!
//! Items whose coordinates have no host counterpart are dropped, never
//! reported as errors. Edits only pass through regions that accept them.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use tower_lsp::lsp_types::{
    CallHierarchyIncomingCall, CallHierarchyItem, CallHierarchyOutgoingCall, CodeAction,
    CodeLens, ColorInformation, ColorPresentation, CompletionItem, CompletionTextEdit,
    Diagnostic, DiagnosticRelatedInformation, DocumentChangeOperation, DocumentChanges,
    DocumentHighlight, DocumentLink, DocumentSymbol, FoldingRange, Hover, InlayHint,
    InsertReplaceEdit, LinkedEditingRanges, Location, LocationLink, OneOf,
    OptionalVersionedTextDocumentIdentifier, Position, PrepareRenameResponse, Range,
    SelectionRange, SymbolInformation, TextDocumentEdit, TextEdit, Url, WorkspaceEdit,
};

use crate::document::{DocumentStore, EmbeddedTarget};
use crate::lsp::AbsoluteToken;

use super::capability::Capability;
use super::dispatch::{ItemTag, Registration};

/// Maps one provider's results for one target back to the host.
pub(crate) struct Translator<'a> {
    store: &'a DocumentStore,
    target: &'a EmbeddedTarget,
    registration: Option<&'a Registration>,
}

impl<'a> Translator<'a> {
    pub fn new(
        store: &'a DocumentStore,
        target: &'a EmbeddedTarget,
        registration: Option<&'a Registration>,
    ) -> Self {
        Self {
            store,
            target,
            registration,
        }
    }

    pub fn host_uri(&self) -> &Url {
        self.target.host().uri()
    }

    /// Ask the producing provider to adjust a range that failed to map.
    fn fallback(&self, range: Range) -> Option<Range> {
        let registration = self
            .registration
            .filter(|r| r.implements(Capability::ResolveEmbeddedRange))?;
        let document = self.target.document();
        panic::catch_unwind(AssertUnwindSafe(|| {
            registration
                .provider
                .resolve_embedded_range(document, range)
        }))
        .ok()
        .flatten()
    }

    pub fn range(&self, range: Range) -> Option<Range> {
        self.target.to_host_range(range).or_else(|| {
            self.fallback(range)
                .and_then(|r| self.target.to_host_range(r))
        })
    }

    /// Map a range an edit will be applied to; refuses non-editable regions.
    pub fn edit_range(&self, range: Range) -> Option<Range> {
        self.target.to_host_edit_range(range).or_else(|| {
            self.fallback(range)
                .and_then(|r| self.target.to_host_edit_range(r))
        })
    }

    pub fn position(&self, position: Position) -> Option<Position> {
        self.range(Range::new(position, position)).map(|r| r.start)
    }

    /// Map a range of any document, preferring this target's path for its own document.
    fn range_in(&self, uri: &Url, range: Range, editable: bool) -> Option<(Url, Range)> {
        if uri == self.target.uri() {
            let mapped = if editable {
                self.edit_range(range)
            } else {
                self.range(range)
            };
            return mapped.map(|r| (self.host_uri().clone(), r));
        }
        self.store.to_host_range(uri, range, editable)
    }

    pub fn tag(&self, data: Option<serde_json::Value>) -> Option<serde_json::Value> {
        let provider = self.registration.map(Registration::id).unwrap_or_default();
        ItemTag::new(provider, self.target.uri(), data).wrap()
    }

    pub fn hover(&self, mut hover: Hover) -> Option<Hover> {
        if let Some(range) = hover.range {
            hover.range = Some(self.range(range)?);
        }
        Some(hover)
    }

    pub fn location(&self, location: Location) -> Option<Location> {
        let (uri, range) = self.range_in(&location.uri, location.range, false)?;
        Some(Location::new(uri, range))
    }

    pub fn location_link(&self, link: LocationLink) -> Option<LocationLink> {
        let (uri, target_range) = self.range_in(&link.target_uri, link.target_range, false)?;
        let (selection_uri, target_selection_range) =
            self.range_in(&link.target_uri, link.target_selection_range, false)?;
        if selection_uri != uri {
            return None;
        }
        Some(LocationLink {
            origin_selection_range: link.origin_selection_range.and_then(|r| self.range(r)),
            target_uri: uri,
            target_range,
            target_selection_range,
        })
    }

    pub fn highlight(&self, highlight: DocumentHighlight) -> Option<DocumentHighlight> {
        Some(DocumentHighlight {
            range: self.range(highlight.range)?,
            kind: highlight.kind,
        })
    }

    pub fn document_link(&self, mut link: DocumentLink) -> Option<DocumentLink> {
        link.range = self.range(link.range)?;
        Some(link)
    }

    #[allow(deprecated)]
    pub fn symbol(&self, symbol: DocumentSymbol) -> Option<DocumentSymbol> {
        let range = self.range(symbol.range)?;
        let selection_range = self.range(symbol.selection_range)?;
        let children = symbol
            .children
            .map(|children| children.into_iter().filter_map(|c| self.symbol(c)).collect());
        Some(DocumentSymbol {
            range,
            selection_range,
            children,
            ..symbol
        })
    }

    pub fn symbol_information(&self, mut symbol: SymbolInformation) -> Option<SymbolInformation> {
        symbol.location = self.location(symbol.location)?;
        Some(symbol)
    }

    pub fn color(&self, color: ColorInformation) -> Option<ColorInformation> {
        Some(ColorInformation {
            range: self.range(color.range)?,
            color: color.color,
        })
    }

    pub fn color_presentation(&self, mut presentation: ColorPresentation) -> ColorPresentation {
        presentation.text_edit = presentation.text_edit.and_then(|e| self.text_edit(e));
        presentation.additional_text_edits = presentation
            .additional_text_edits
            .map(|edits| self.text_edits(edits));
        presentation
    }

    pub fn folding_range(&self, folding: FoldingRange) -> Option<FoldingRange> {
        let start = Position::new(folding.start_line, folding.start_character.unwrap_or(0));
        let end = Position::new(folding.end_line, folding.end_character.unwrap_or(0));
        let mapped = self.range(Range::new(start, end))?;
        Some(FoldingRange {
            start_line: mapped.start.line,
            start_character: folding.start_character.map(|_| mapped.start.character),
            end_line: mapped.end.line,
            end_character: folding.end_character.map(|_| mapped.end.character),
            ..folding
        })
    }

    /// Map a selection range, truncating the parent chain at the first unmappable level.
    pub fn selection_range(&self, selection: SelectionRange) -> Option<SelectionRange> {
        Some(SelectionRange {
            range: self.range(selection.range)?,
            parent: selection
                .parent
                .and_then(|parent| self.selection_range(*parent))
                .map(Box::new),
        })
    }

    pub fn text_edit(&self, edit: TextEdit) -> Option<TextEdit> {
        Some(TextEdit {
            range: self.edit_range(edit.range)?,
            new_text: edit.new_text,
        })
    }

    pub fn text_edits(&self, edits: Vec<TextEdit>) -> Vec<TextEdit> {
        edits.into_iter().filter_map(|e| self.text_edit(e)).collect()
    }

    pub fn workspace_edit(&self, edit: WorkspaceEdit) -> WorkspaceEdit {
        host_workspace_edit(self.store, edit)
    }

    pub fn diagnostic(&self, diagnostic: Diagnostic) -> Option<Diagnostic> {
        let range = self.range(diagnostic.range)?;
        let related_information = diagnostic.related_information.map(|related| {
            related
                .into_iter()
                .filter_map(|info| {
                    Some(DiagnosticRelatedInformation {
                        location: self.location(info.location)?,
                        message: info.message,
                    })
                })
                .collect()
        });
        Some(Diagnostic {
            range,
            related_information,
            ..diagnostic
        })
    }

    pub fn inlay_hint(&self, hint: InlayHint) -> Option<InlayHint> {
        let position = self.position(hint.position)?;
        Some(InlayHint {
            position,
            text_edits: hint.text_edits.map(|edits| self.text_edits(edits)),
            ..hint
        })
    }

    pub fn linked_editing(&self, linked: LinkedEditingRanges) -> Option<LinkedEditingRanges> {
        let ranges = linked
            .ranges
            .into_iter()
            .map(|r| self.range(r))
            .collect::<Option<Vec<_>>>()?;
        Some(LinkedEditingRanges {
            ranges,
            word_pattern: linked.word_pattern,
        })
    }

    pub fn prepare_rename(&self, response: PrepareRenameResponse) -> Option<PrepareRenameResponse> {
        Some(match response {
            PrepareRenameResponse::Range(range) => PrepareRenameResponse::Range(self.range(range)?),
            PrepareRenameResponse::RangeWithPlaceholder { range, placeholder } => {
                PrepareRenameResponse::RangeWithPlaceholder {
                    range: self.range(range)?,
                    placeholder,
                }
            }
            other => other,
        })
    }

    /// Map a completion item and tag it for resolve routing.
    ///
    /// Items whose primary edit cannot be written back are dropped.
    pub fn completion_item(&self, item: CompletionItem) -> Option<CompletionItem> {
        let mut item = self.completion_edits(item)?;
        item.data = self.tag(item.data.take());
        Some(item)
    }

    /// Map the edits of a completion item without touching its data.
    pub fn completion_edits(&self, mut item: CompletionItem) -> Option<CompletionItem> {
        item.text_edit = match item.text_edit.take() {
            Some(CompletionTextEdit::Edit(edit)) => {
                Some(CompletionTextEdit::Edit(self.text_edit(edit)?))
            }
            Some(CompletionTextEdit::InsertAndReplace(edit)) => {
                Some(CompletionTextEdit::InsertAndReplace(InsertReplaceEdit {
                    new_text: edit.new_text,
                    insert: self.edit_range(edit.insert)?,
                    replace: self.edit_range(edit.replace)?,
                }))
            }
            None => None,
        };
        item.additional_text_edits = item
            .additional_text_edits
            .take()
            .map(|edits| self.text_edits(edits));
        Some(item)
    }

    pub fn code_action(&self, mut action: CodeAction) -> CodeAction {
        action = self.code_action_edits(action);
        action.data = self.tag(action.data.take());
        action
    }

    pub fn code_action_edits(&self, mut action: CodeAction) -> CodeAction {
        action.edit = action.edit.map(|e| self.workspace_edit(e));
        action.diagnostics = action
            .diagnostics
            .map(|d| d.into_iter().filter_map(|d| self.diagnostic(d)).collect());
        action
    }

    pub fn code_lens(&self, lens: CodeLens) -> Option<CodeLens> {
        let lens = self.code_lens_range(lens)?;
        Some(CodeLens {
            data: self.tag(lens.data.clone()),
            ..lens
        })
    }

    pub fn code_lens_range(&self, mut lens: CodeLens) -> Option<CodeLens> {
        lens.range = self.range(lens.range)?;
        Some(lens)
    }

    /// Map a call hierarchy item; `tag` marks it for routing follow-up calls.
    pub fn call_item(&self, item: CallHierarchyItem, tag: bool) -> Option<CallHierarchyItem> {
        let (uri, range) = self.range_in(&item.uri, item.range, false)?;
        let (_, selection_range) = self.range_in(&item.uri, item.selection_range, false)?;
        let data = if tag {
            ItemTag::new(
                self.registration.map(Registration::id).unwrap_or_default(),
                &item.uri,
                item.data,
            )
            .wrap()
        } else {
            item.data
        };
        Some(CallHierarchyItem {
            uri,
            range,
            selection_range,
            data,
            ..item
        })
    }

    pub fn incoming_call(&self, call: CallHierarchyIncomingCall) -> Option<CallHierarchyIncomingCall> {
        let source = call.from.uri.clone();
        let from_ranges = call
            .from_ranges
            .into_iter()
            .filter_map(|r| self.range_in(&source, r, false).map(|(_, r)| r))
            .collect();
        Some(CallHierarchyIncomingCall {
            from: self.call_item(call.from, true)?,
            from_ranges,
        })
    }

    pub fn outgoing_call(&self, call: CallHierarchyOutgoingCall) -> Option<CallHierarchyOutgoingCall> {
        let from_ranges = call
            .from_ranges
            .into_iter()
            .filter_map(|r| self.range(r))
            .collect();
        Some(CallHierarchyOutgoingCall {
            to: self.call_item(call.to, true)?,
            from_ranges,
        })
    }

    /// Map a token; tokens that do not land on a single host line are dropped.
    pub fn token(&self, token: AbsoluteToken) -> Option<AbsoluteToken> {
        let start = Position::new(token.line, token.start);
        let end = Position::new(token.line, token.start + token.length);
        let mapped = self.range(Range::new(start, end))?;
        if mapped.start.line != mapped.end.line || mapped.end.character <= mapped.start.character {
            return None;
        }
        Some(AbsoluteToken {
            line: mapped.start.line,
            start: mapped.start.character,
            length: mapped.end.character - mapped.start.character,
            ..token
        })
    }
}

/// Rewrite a workspace edit so that every edit targets a host document.
///
/// Edits on embedded documents are moved to their host; edits that would
/// land in generated text are dropped.
pub(crate) fn host_workspace_edit(store: &DocumentStore, edit: WorkspaceEdit) -> WorkspaceEdit {
    let changes = edit.changes.map(|changes| {
        let mut mapped: HashMap<Url, Vec<TextEdit>> = HashMap::new();
        for (uri, edits) in changes {
            for edit in edits {
                if let Some((host, range)) = store.to_host_range(&uri, edit.range, true) {
                    mapped.entry(host).or_default().push(TextEdit {
                        range,
                        new_text: edit.new_text,
                    });
                }
            }
        }
        mapped
    });

    let document_changes = edit.document_changes.map(|changes| match changes {
        DocumentChanges::Edits(edits) => DocumentChanges::Edits(
            edits
                .into_iter()
                .filter_map(|e| host_document_edit(store, e))
                .collect(),
        ),
        DocumentChanges::Operations(operations) => DocumentChanges::Operations(
            operations
                .into_iter()
                .filter_map(|op| match op {
                    DocumentChangeOperation::Edit(e) => {
                        host_document_edit(store, e).map(DocumentChangeOperation::Edit)
                    }
                    other => Some(other),
                })
                .collect(),
        ),
    });

    WorkspaceEdit {
        changes,
        document_changes,
        change_annotations: edit.change_annotations,
    }
}

fn host_document_edit(store: &DocumentStore, edit: TextDocumentEdit) -> Option<TextDocumentEdit> {
    let uri = edit.text_document.uri;
    if !store.is_embedded(&uri) {
        return Some(TextDocumentEdit {
            text_document: OptionalVersionedTextDocumentIdentifier {
                uri,
                version: edit.text_document.version,
            },
            edits: edit.edits,
        });
    }

    let mut host = None;
    let mut edits = Vec::new();
    for item in edit.edits {
        let range = match &item {
            OneOf::Left(e) => e.range,
            OneOf::Right(e) => e.text_edit.range,
        };
        let Some((host_uri, range)) = store.to_host_range(&uri, range, true) else {
            continue;
        };
        if *host.get_or_insert_with(|| host_uri.clone()) != host_uri {
            continue;
        }
        edits.push(match item {
            OneOf::Left(e) => OneOf::Left(TextEdit { range, ..e }),
            OneOf::Right(mut e) => {
                e.text_edit.range = range;
                OneOf::Right(e)
            }
        });
    }

    let host = host?;
    let version = store.get(&host).map(|n| n.document().version());
    Some(TextDocumentEdit {
        text_document: OptionalVersionedTextDocumentIdentifier { uri: host, version },
        edits,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::document::{all_targets, ComponentLanguage};

    const TEXT: &str = "<style>\na{}\n</style>\n<template>{{ a }}</template>";

    fn store() -> DocumentStore {
        let store = DocumentStore::new(vec![Arc::new(ComponentLanguage::new())]);
        store.open(Url::parse("file:///a.vue").unwrap(), "vue", 3, TEXT.to_string());
        store
    }

    fn edit(line: u32, start: u32, end: u32, text: &str) -> TextEdit {
        TextEdit::new(
            Range::new(Position::new(line, start), Position::new(line, end)),
            text.to_string(),
        )
    }

    #[test]
    fn workspace_edits_move_to_the_host() {
        let store = store();
        let style = Url::parse("file:///a.vue#style0").unwrap();
        let template = Url::parse("file:///a.vue#template").unwrap();
        let other = Url::parse("file:///other.css").unwrap();

        let workspace = WorkspaceEdit::new(HashMap::from([
            (style, vec![edit(1, 0, 1, "b")]),
            (template, vec![edit(0, 1, 4, "b")]),
            (other.clone(), vec![edit(0, 0, 0, "x")]),
        ]));
        let mapped = host_workspace_edit(&store, workspace).changes.unwrap();

        let host = Url::parse("file:///a.vue").unwrap();
        assert_eq!(mapped[&host], vec![edit(1, 0, 1, "b")]);
        assert_eq!(mapped[&other], vec![edit(0, 0, 0, "x")]);
        assert_eq!(mapped.len(), 2);
    }

    #[test]
    fn document_edits_carry_host_version() {
        let store = store();
        let style = Url::parse("file:///a.vue#style0").unwrap();
        let workspace = WorkspaceEdit {
            document_changes: Some(DocumentChanges::Edits(vec![TextDocumentEdit {
                text_document: OptionalVersionedTextDocumentIdentifier {
                    uri: style,
                    version: Some(1),
                },
                edits: vec![OneOf::Left(edit(1, 0, 3, "b{}"))],
            }])),
            ..WorkspaceEdit::default()
        };
        let Some(DocumentChanges::Edits(edits)) =
            host_workspace_edit(&store, workspace).document_changes
        else {
            panic!("expected edits");
        };
        assert_eq!(edits[0].text_document.uri.as_str(), "file:///a.vue");
        assert_eq!(edits[0].text_document.version, Some(3));
        assert_eq!(edits[0].edits, vec![OneOf::Left(edit(1, 0, 3, "b{}"))]);
    }

    #[test]
    fn generated_targets_translate_positions_but_not_edits() {
        let store = store();
        let root = store.get(&Url::parse("file:///a.vue").unwrap()).unwrap();
        let targets = all_targets(&root);
        let template = targets
            .iter()
            .find(|t| t.uri().as_str().ends_with("#template"))
            .unwrap();
        let translator = Translator::new(&store, template, None);

        let range = Range::new(Position::new(0, 1), Position::new(0, 4));
        assert_eq!(
            translator.range(range),
            Some(Range::new(Position::new(3, 12), Position::new(3, 15)))
        );
        assert_eq!(translator.text_edit(edit(0, 1, 4, "b")), None);

        let hover = Hover {
            contents: tower_lsp::lsp_types::HoverContents::Array(vec![]),
            range: Some(Range::new(Position::new(0, 0), Position::new(0, 1))),
        };
        assert!(translator.hover(hover).is_none());
    }

    #[test]
    fn tokens_split_across_lines_are_dropped() {
        let store = store();
        let root = store.get(&Url::parse("file:///a.vue").unwrap()).unwrap();
        let targets = all_targets(&root);
        let translator = Translator::new(&store, &targets[1], None);

        let token = AbsoluteToken {
            line: 1,
            start: 0,
            length: 1,
            token_type: 0,
            token_modifiers: 0,
        };
        assert_eq!(
            translator.token(token),
            Some(AbsoluteToken { line: 1, ..token })
        );
    }
}
