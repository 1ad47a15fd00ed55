use std::fmt::{self, Display};
use std::ops::Range;

/// A region of a read in 0-based, half-open coordinates.
///
/// Reads may vary in length, so a region that runs to the end of the read is kept symbolic
/// and only resolved against a concrete read length in [`Span::resolve`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Span {
    /// A region with a fixed end coordinate.
    Bounded { start: usize, end: usize },
    /// A region running to the end of the read, less `trim` bases taken off the right.
    ToEnd { start: usize, trim: usize },
}

impl Span {
    /// The 0-based start of the region.
    #[must_use]
    pub fn start(&self) -> usize {
        match self {
            Span::Bounded { start, .. } | Span::ToEnd { start, .. } => *start,
        }
    }

    /// Returns a copy of this span with the start moved right by `offset` bases.
    #[must_use]
    pub fn shift_start(&self, offset: usize) -> Self {
        match *self {
            Span::Bounded { start, end } => Span::Bounded { start: start + offset, end },
            Span::ToEnd { start, trim } => Span::ToEnd { start: start + offset, trim },
        }
    }

    /// Returns a copy of this span with `trim` bases removed from the right-hand end.  Bounded
    /// spans are moved inward by `trim`, open spans record the trim for resolution.
    #[must_use]
    pub fn trim_end(&self, trim: usize) -> Self {
        match *self {
            Span::Bounded { start, end } => Span::Bounded { start, end: end.saturating_sub(trim) },
            Span::ToEnd { start, trim: t } => Span::ToEnd { start, trim: t + trim },
        }
    }

    /// True if `other` lies entirely within this span.
    #[must_use]
    pub fn contains(&self, other: &Span) -> bool {
        if other.start() < self.start() {
            return false;
        }
        match (self, other) {
            (Span::ToEnd { .. }, _) => true,
            (Span::Bounded { end, .. }, Span::Bounded { end: other_end, .. }) => other_end <= end,
            (Span::Bounded { .. }, Span::ToEnd { .. }) => false,
        }
    }

    /// Resolves this span against a read of length `len`, returning the byte range to emit.
    ///
    /// A bounded span whose end is at or before its start yields `None`, as does one starting
    /// at or past the end of the read.  Otherwise a bounded end past the end of the read is
    /// treated as running to the end.  An open span always yields a range, which may be empty
    /// when the read is too short.
    #[must_use]
    pub fn resolve(&self, len: usize) -> Option<Range<usize>> {
        match *self {
            Span::Bounded { start, end } if end <= start => None,
            Span::Bounded { start, .. } if start >= len => None,
            Span::Bounded { start, end } => Some(start..end.min(len)),
            Span::ToEnd { start, trim } => {
                let end = len.saturating_sub(trim);
                Some(start.min(end)..end)
            }
        }
    }
}

impl Display for Span {
    /// Displays the span in 1-based inclusive coordinates, e.g. `5-8` or `5-end`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Span::Bounded { start, end } => write!(f, "{}-{}", start + 1, end),
            Span::ToEnd { start, trim: 0 } => write!(f, "{}-end", start + 1),
            Span::ToEnd { start, trim } => write!(f, "{}-(end-{})", start + 1, trim),
        }
    }
}
