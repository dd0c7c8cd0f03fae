use crate::model::*;

// ── Slot generation ──────────────────────────────────────────────

/// Lazy walk over a working window in fixed steps, yielding each candidate
/// session `[cursor, cursor + duration)` that no busy interval overlaps.
///
/// A clone continues from the same position; call `slots` again for a fresh
/// walk. The busy set needs no ordering or merging.
#[derive(Debug, Clone)]
pub struct Slots<'a> {
    cursor: Ms,
    last_start: Ms,
    duration: Ms,
    step: Ms,
    busy: &'a [BusyInterval],
}

/// Candidate starts run from `window.start` while `start + duration <= window.end`.
/// A window shorter than one session yields nothing.
pub fn slots(window: Span, duration: Ms, step: Ms, busy: &[BusyInterval]) -> Slots<'_> {
    // Non-positive step or duration would never terminate or never fit.
    let last_start = if duration > 0 && step > 0 {
        window.end - duration
    } else {
        Ms::MIN
    };
    Slots {
        cursor: window.start,
        last_start,
        duration,
        step,
        busy,
    }
}

impl Iterator for Slots<'_> {
    type Item = Span;

    fn next(&mut self) -> Option<Span> {
        while self.cursor <= self.last_start {
            let candidate = Span::new(self.cursor, self.cursor + self.duration);
            self.cursor += self.step;
            if !self.busy.iter().any(|b| b.span.overlaps(&candidate)) {
                return Some(candidate);
            }
        }
        None
    }
}

/// Merge overlapping/adjacent intervals into a sorted disjoint cover.
pub fn merge_overlapping(spans: &[Span]) -> Vec<Span> {
    let mut sorted = spans.to_vec();
    sorted.sort_by_key(|s| s.start);
    let mut merged: Vec<Span> = Vec::with_capacity(sorted.len());
    for span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}
