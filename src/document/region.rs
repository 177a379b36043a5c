//! Regions linking spans of a host document to an embedded document.
//!
//! A region is an ordered list of [`Segment`]s. Each segment is an affine,
//! equal-length correspondence between host bytes and embedded bytes. Several
//! segments make a disjoint region (e.g. interpolations collected into one
//! generated script); embedded bytes covered by no segment are synthesised
//! code with no host counterpart.

use tower_lsp::lsp_types::Url;

use super::Span;

/// Whether edits produced against a region can be written back to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// One-to-one copy of host text; safe for edit write-back.
    Exact,
    /// Generated or lossy text; positions translate, edits do not.
    Generated,
}

impl RegionKind {
    pub fn is_editable(self) -> bool {
        matches!(self, Self::Exact)
    }
}

/// Equal-length correspondence between host and embedded bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Byte offset of the segment in the host document.
    pub host: usize,
    /// Byte offset of the segment in the embedded document.
    pub embedded: usize,
    /// Length in bytes, identical on both sides.
    pub len: usize,
}

/// Which end of a span an offset is, used to pick between adjacent segments.
#[derive(Debug, Clone, Copy)]
enum Bias {
    Start,
    End,
}

impl Segment {
    pub fn new(host: usize, embedded: usize, len: usize) -> Self {
        Self {
            host,
            embedded,
            len,
        }
    }

    fn host_end(&self) -> usize {
        self.host + self.len
    }

    fn embedded_end(&self) -> usize {
        self.embedded + self.len
    }

    /// Intersection of `span` with this segment's host bytes.
    ///
    /// An empty span (a cursor) intersects when it lies inside the segment or
    /// on either edge.
    fn clip_host(&self, span: &Span) -> Option<Span> {
        if span.is_empty() {
            return (self.host <= span.start && span.start <= self.host_end())
                .then(|| span.start..span.start);
        }
        let start = span.start.max(self.host);
        let end = span.end.min(self.host_end());
        (start < end).then_some(start..end)
    }

    fn covers_embedded(&self, offset: usize, bias: Bias) -> bool {
        match bias {
            Bias::Start => self.embedded <= offset && offset < self.embedded_end(),
            Bias::End => self.embedded < offset && offset <= self.embedded_end(),
        }
    }

    fn touches_embedded(&self, offset: usize) -> bool {
        self.embedded <= offset && offset <= self.embedded_end()
    }
}

/// A mapped span of a host document belonging to one embedded document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    /// Index of the region in its host's mapping table.
    pub id: usize,
    /// Embedded document this region feeds.
    pub target: Url,
    /// Whether edits may be written back through this region.
    pub kind: RegionKind,
    segments: Vec<Segment>,
}

impl Region {
    pub fn new(id: usize, target: Url, kind: RegionKind, mut segments: Vec<Segment>) -> Self {
        segments.sort_by_key(|s| (s.host, s.embedded));
        Self {
            id,
            target,
            kind,
            segments,
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Host bytes claimed by this region, from its first to its last segment.
    pub fn host_span(&self) -> Option<Span> {
        let start = self.segments.iter().map(|s| s.host).min()?;
        let end = self.segments.iter().map(Segment::host_end).max()?;
        Some(start..end)
    }

    /// Check if this region contains the given host offset.
    ///
    /// The end bound is inclusive so that a cursor at the very end of an
    /// embedded block is still considered inside it.
    pub fn contains_host_offset(&self, offset: usize) -> bool {
        self.segments
            .iter()
            .any(|s| s.host <= offset && offset <= s.host_end())
    }

    /// Clip a host span to this region and translate it to embedded bytes.
    ///
    /// The span is clipped to the intersection with the region, never
    /// extended. Returns None when the span does not touch the region.
    pub fn to_embedded(&self, host: &Span) -> Option<Span> {
        let mut mapped: Option<Span> = None;
        for segment in &self.segments {
            let Some(clip) = segment.clip_host(host) else {
                continue;
            };
            let start = segment.embedded + (clip.start - segment.host);
            let end = segment.embedded + (clip.end - segment.host);
            if host.is_empty() {
                return Some(start..end);
            }
            mapped = Some(match mapped {
                Some(prev) => prev.start.min(start)..prev.end.max(end),
                None => start..end,
            });
        }
        mapped
    }

    /// Translate an embedded span back to host bytes.
    ///
    /// Returns None when either end falls in synthesised text, or when the
    /// ends map out of order (many-to-one generated code).
    pub fn to_host(&self, embedded: &Span) -> Option<Span> {
        let start = self.host_offset(embedded.start, Bias::Start)?;
        let end = if embedded.is_empty() {
            start
        } else {
            self.host_offset(embedded.end, Bias::End)?
        };
        (start <= end).then_some(start..end)
    }

    fn host_offset(&self, offset: usize, bias: Bias) -> Option<usize> {
        self.segments
            .iter()
            .find(|s| s.covers_embedded(offset, bias))
            .or_else(|| self.segments.iter().find(|s| s.touches_embedded(offset)))
            .map(|s| s.host + (offset - s.embedded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri() -> Url {
        Url::parse("file:///a.vue#style0").unwrap()
    }

    fn affine(host: usize, len: usize) -> Region {
        Region::new(0, uri(), RegionKind::Exact, vec![Segment::new(host, 0, len)])
    }

    #[test]
    fn simple_offset_mapping() {
        let region = affine(100, 50);
        assert_eq!(region.to_embedded(&(100..110)), Some(0..10));
        assert_eq!(region.to_embedded(&(120..130)), Some(20..30));
        assert_eq!(region.to_host(&(5..15)), Some(105..115));
    }

    #[test]
    fn round_trip_is_exact() {
        let region = affine(10, 20);
        for span in [10..30, 12..12, 29..30, 30..30, 15..25] {
            let embedded = region.to_embedded(&span).unwrap();
            assert_eq!(region.to_host(&embedded), Some(span));
        }
    }

    #[test]
    fn spans_are_clipped_never_extended() {
        let region = affine(10, 10);
        assert_eq!(region.to_embedded(&(5..15)), Some(0..5));
        assert_eq!(region.to_embedded(&(15..40)), Some(5..10));
        assert_eq!(region.to_embedded(&(0..40)), Some(0..10));
        assert_eq!(region.to_embedded(&(20..40)), None);
        assert_eq!(region.to_embedded(&(0..10)), None);
    }

    #[test]
    fn cursor_on_edges_is_inside() {
        let region = affine(10, 10);
        assert!(region.contains_host_offset(10));
        assert!(region.contains_host_offset(20));
        assert!(!region.contains_host_offset(21));
        assert!(!region.contains_host_offset(9));
        assert_eq!(region.to_embedded(&(20..20)), Some(10..10));
    }

    #[test]
    fn synthesised_text_has_no_host() {
        // Host `{{ a }} {{ bc }}` style interpolations wrapped as `(a);\n(bc);\n`.
        let region = Region::new(
            0,
            uri(),
            RegionKind::Generated,
            vec![Segment::new(3, 1, 1), Segment::new(11, 6, 2)],
        );
        assert_eq!(region.to_host(&(1..2)), Some(3..4));
        assert_eq!(region.to_host(&(6..8)), Some(11..13));
        assert_eq!(region.to_host(&(0..1)), None);
        assert_eq!(region.to_host(&(3..4)), None);
        assert_eq!(region.host_span(), Some(3..13));
    }

    #[test]
    fn disjoint_segments_map_to_one_span() {
        let region = Region::new(
            0,
            uri(),
            RegionKind::Generated,
            vec![Segment::new(11, 6, 2), Segment::new(3, 1, 1)],
        );
        assert_eq!(region.segments()[0].host, 3);
        assert_eq!(region.to_embedded(&(0..20)), Some(1..8));
        assert_eq!(region.to_embedded(&(5..10)), None);
    }
}
