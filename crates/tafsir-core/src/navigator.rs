use crate::model::AudioPart;
use tracing::{debug, info};

/// Ordered audio parts of one chapter and the active selection.
///
/// The active index is always in bounds, or `None` when the chapter has no
/// audio. Out-of-range selections clamp; stepping never wraps.
#[derive(Debug, Clone, Default)]
pub struct PartNavigator {
    parts: Vec<AudioPart>,
    current: Option<usize>,
}

impl PartNavigator {
    pub fn new(parts: Vec<AudioPart>) -> Self {
        let current = if parts.is_empty() { None } else { Some(0) };
        Self { parts, current }
    }

    pub fn parts(&self) -> &[AudioPart] {
        &self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current_part(&self) -> Option<&AudioPart> {
        self.current.and_then(|idx| self.parts.get(idx))
    }

    pub fn has_next(&self) -> bool {
        matches!(self.current, Some(idx) if idx + 1 < self.parts.len())
    }

    pub fn has_previous(&self) -> bool {
        matches!(self.current, Some(idx) if idx > 0)
    }

    /// Select `index`, clamped to the last part. Returns the resolved index,
    /// or `None` when there is nothing to select.
    pub fn select_part(&mut self, index: usize) -> Option<usize> {
        if self.parts.is_empty() {
            debug!(index, "Ignoring part selection; chapter has no audio parts");
            return None;
        }
        let clamped = index.min(self.parts.len() - 1);
        if clamped != index {
            debug!(requested = index, clamped, "Clamped part selection");
        }
        self.current = Some(clamped);
        info!(part = clamped, "Selected audio part");
        Some(clamped)
    }

    pub fn next(&mut self) -> bool {
        match self.current {
            Some(idx) if idx + 1 < self.parts.len() => {
                self.current = Some(idx + 1);
                info!(part = idx + 1, "Advanced to next part");
                true
            }
            _ => false,
        }
    }

    pub fn previous(&mut self) -> bool {
        match self.current {
            Some(idx) if idx > 0 => {
                self.current = Some(idx - 1);
                info!(part = idx - 1, "Moved to previous part");
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(count: usize) -> Vec<AudioPart> {
        (0..count)
            .map(|i| AudioPart {
                id: format!("part-{i}"),
                title: format!("Part {}", i + 1),
                url: format!("audio/{i}.mp3"),
                timings: Vec::new(),
            })
            .collect()
    }

    #[test]
    fn starts_on_first_part() {
        let nav = PartNavigator::new(parts(3));
        assert_eq!(nav.current_index(), Some(0));
        assert_eq!(nav.current_part().map(|p| p.id.as_str()), Some("part-0"));
    }

    #[test]
    fn select_clamps_to_last_part() {
        let mut nav = PartNavigator::new(parts(3));
        assert_eq!(nav.select_part(99), Some(2));
        assert_eq!(nav.current_index(), Some(2));
        assert_eq!(nav.select_part(1), Some(1));
    }

    #[test]
    fn next_stops_at_last_part() {
        let mut nav = PartNavigator::new(parts(3));
        nav.select_part(2);
        assert!(!nav.next());
        assert_eq!(nav.current_index(), Some(2));
        assert!(!nav.has_next());
    }

    #[test]
    fn previous_stops_at_first_part() {
        let mut nav = PartNavigator::new(parts(3));
        assert!(!nav.previous());
        assert_eq!(nav.current_index(), Some(0));
        assert!(nav.next());
        assert!(nav.previous());
        assert_eq!(nav.current_index(), Some(0));
    }

    #[test]
    fn empty_chapter_has_no_current_part() {
        let mut nav = PartNavigator::new(Vec::new());
        assert!(nav.current_part().is_none());
        assert_eq!(nav.current_index(), None);
        assert_eq!(nav.select_part(0), None);
        assert!(!nav.next());
        assert!(!nav.previous());
    }
}
