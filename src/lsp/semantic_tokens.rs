//! Semantic tokens across embedded documents.
//!
//! Providers report tokens in absolute coordinates of their own document.
//! They are translated to the host, sorted, and delta-encoded here, so
//! providers never see the encoding and tokens from several documents
//! interleave correctly.

use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::{
    Range, SemanticToken, SemanticTokenModifier, SemanticTokenType, SemanticTokensLegend, Url,
};

use crate::error::Cancelled;
use crate::service::{Capability, LanguageService};

/// Token type indices (must match LEGEND order).
pub mod token_types {
    pub const NAMESPACE: u32 = 0;
    pub const TYPE: u32 = 1;
    pub const CLASS: u32 = 2;
    pub const ENUM: u32 = 3;
    pub const INTERFACE: u32 = 4;
    pub const STRUCT: u32 = 5;
    pub const TYPE_PARAMETER: u32 = 6;
    pub const PARAMETER: u32 = 7;
    pub const VARIABLE: u32 = 8;
    pub const PROPERTY: u32 = 9;
    pub const ENUM_MEMBER: u32 = 10;
    pub const EVENT: u32 = 11;
    pub const FUNCTION: u32 = 12;
    pub const METHOD: u32 = 13;
    pub const MACRO: u32 = 14;
    pub const KEYWORD: u32 = 15;
    pub const MODIFIER: u32 = 16;
    pub const COMMENT: u32 = 17;
    pub const STRING: u32 = 18;
    pub const NUMBER: u32 = 19;
    pub const REGEXP: u32 = 20;
    pub const OPERATOR: u32 = 21;
    pub const DECORATOR: u32 = 22;
}

/// Token modifier bit flags.
pub mod token_modifiers {
    pub const DECLARATION: u32 = 1 << 0;
    pub const DEFINITION: u32 = 1 << 1;
    pub const READONLY: u32 = 1 << 2;
    pub const STATIC: u32 = 1 << 3;
    pub const DEPRECATED: u32 = 1 << 4;
    pub const ABSTRACT: u32 = 1 << 5;
    pub const ASYNC: u32 = 1 << 6;
    pub const MODIFICATION: u32 = 1 << 7;
    pub const DOCUMENTATION: u32 = 1 << 8;
    pub const DEFAULT_LIBRARY: u32 = 1 << 9;
}

/// Get the semantic tokens legend shared by every provider.
pub fn legend() -> SemanticTokensLegend {
    SemanticTokensLegend {
        token_types: vec![
            SemanticTokenType::NAMESPACE,
            SemanticTokenType::TYPE,
            SemanticTokenType::CLASS,
            SemanticTokenType::ENUM,
            SemanticTokenType::INTERFACE,
            SemanticTokenType::STRUCT,
            SemanticTokenType::TYPE_PARAMETER,
            SemanticTokenType::PARAMETER,
            SemanticTokenType::VARIABLE,
            SemanticTokenType::PROPERTY,
            SemanticTokenType::ENUM_MEMBER,
            SemanticTokenType::EVENT,
            SemanticTokenType::FUNCTION,
            SemanticTokenType::METHOD,
            SemanticTokenType::MACRO,
            SemanticTokenType::KEYWORD,
            SemanticTokenType::MODIFIER,
            SemanticTokenType::COMMENT,
            SemanticTokenType::STRING,
            SemanticTokenType::NUMBER,
            SemanticTokenType::REGEXP,
            SemanticTokenType::OPERATOR,
            SemanticTokenType::DECORATOR,
        ],
        token_modifiers: vec![
            SemanticTokenModifier::DECLARATION,
            SemanticTokenModifier::DEFINITION,
            SemanticTokenModifier::READONLY,
            SemanticTokenModifier::STATIC,
            SemanticTokenModifier::DEPRECATED,
            SemanticTokenModifier::ABSTRACT,
            SemanticTokenModifier::ASYNC,
            SemanticTokenModifier::MODIFICATION,
            SemanticTokenModifier::DOCUMENTATION,
            SemanticTokenModifier::DEFAULT_LIBRARY,
        ],
    }
}

/// A token before delta encoding, on one line of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbsoluteToken {
    pub line: u32,
    /// Start column in UTF-16 code units.
    pub start: u32,
    pub length: u32,
    pub token_type: u32,
    pub token_modifiers: u32,
}

impl LanguageService {
    /// Semantic tokens for a whole host document.
    pub async fn semantic_tokens_full(
        &self,
        uri: &Url,
        token: &CancellationToken,
    ) -> Result<Vec<SemanticToken>, Cancelled> {
        let targets: Vec<_> = self
            .targets_of(uri)
            .into_iter()
            .map(|(target, ())| (target, None))
            .collect();
        self.semantic_tokens(&targets, token).await
    }

    /// Semantic tokens intersecting `range` of a host document.
    pub async fn semantic_tokens_range(
        &self,
        uri: &Url,
        range: Range,
        token: &CancellationToken,
    ) -> Result<Vec<SemanticToken>, Cancelled> {
        let targets: Vec<_> = self
            .targets_in(uri, range)
            .into_iter()
            .map(|(target, range)| (target, Some(range)))
            .collect();
        self.semantic_tokens(&targets, token).await
    }

    async fn semantic_tokens(
        &self,
        targets: &[(crate::document::EmbeddedTarget, Option<Range>)],
        token: &CancellationToken,
    ) -> Result<Vec<SemanticToken>, Cancelled> {
        let mut tokens = self
            .collect(
                Capability::SemanticTokens,
                targets,
                token,
                |provider, target, range| provider.semantic_tokens(target.document(), *range, token),
                |translator, tok| translator.token(tok),
            )
            .await?;

        // Stable sort: the first provider wins a contested position
        tokens.sort_by_key(|t| (t.line, t.start));
        Ok(encode_tokens(&drop_overlapping(tokens)))
    }
}

/// Drop every token that starts before the previous kept token ends.
pub(crate) fn drop_overlapping(tokens: Vec<AbsoluteToken>) -> Vec<AbsoluteToken> {
    let mut kept: Vec<AbsoluteToken> = Vec::with_capacity(tokens.len());
    for token in tokens {
        let overlaps = kept
            .last()
            .is_some_and(|last| last.line == token.line && token.start < last.start + last.length);
        if !overlaps {
            kept.push(token);
        }
    }
    kept
}

/// Convert sorted absolute tokens to delta-encoded semantic tokens.
pub(crate) fn encode_tokens(tokens: &[AbsoluteToken]) -> Vec<SemanticToken> {
    let mut result = Vec::with_capacity(tokens.len());
    let mut prev_line = 0u32;
    let mut prev_start = 0u32;

    for token in tokens {
        let delta_line = token.line - prev_line;
        let delta_start = if delta_line == 0 {
            token.start - prev_start
        } else {
            token.start
        };

        result.push(SemanticToken {
            delta_line,
            delta_start,
            length: token.length,
            token_type: token.token_type,
            token_modifiers_bitset: token.token_modifiers,
        });

        prev_line = token.line;
        prev_start = token.start;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tok(line: u32, start: u32, length: u32, token_type: u32) -> AbsoluteToken {
        AbsoluteToken {
            line,
            start,
            length,
            token_type,
            token_modifiers: 0,
        }
    }

    #[test]
    fn legend_matches_constants() {
        let leg = legend();
        assert_eq!(leg.token_types.len(), token_types::DECORATOR as usize + 1);
        assert_eq!(
            leg.token_types[token_types::KEYWORD as usize],
            SemanticTokenType::KEYWORD
        );
        assert_eq!(
            1 << (leg.token_modifiers.len() - 1),
            token_modifiers::DEFAULT_LIBRARY
        );
    }

    #[test]
    fn encodes_deltas_within_and_across_lines() {
        let encoded = encode_tokens(&[
            tok(0, 2, 3, token_types::KEYWORD),
            tok(0, 7, 1, token_types::VARIABLE),
            tok(2, 4, 2, token_types::NUMBER),
        ]);

        let deltas: Vec<(u32, u32, u32)> = encoded
            .iter()
            .map(|t| (t.delta_line, t.delta_start, t.length))
            .collect();
        assert_eq!(deltas, vec![(0, 2, 3), (0, 5, 1), (2, 4, 2)]);
        assert_eq!(encoded[2].token_type, token_types::NUMBER);
    }

    #[test]
    fn overlapping_tokens_keep_the_earliest() {
        let kept = drop_overlapping(vec![
            tok(0, 0, 5, token_types::VARIABLE),
            tok(0, 0, 2, token_types::KEYWORD),
            tok(0, 3, 4, token_types::PROPERTY),
            tok(0, 5, 1, token_types::OPERATOR),
            tok(1, 0, 3, token_types::STRING),
        ]);

        let spans: Vec<(u32, u32, u32)> = kept
            .iter()
            .map(|t| (t.line, t.start, t.token_type))
            .collect();
        assert_eq!(
            spans,
            vec![
                (0, 0, token_types::VARIABLE),
                (0, 5, token_types::OPERATOR),
                (1, 0, token_types::STRING),
            ]
        );
    }
}
