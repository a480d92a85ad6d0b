//! Layout of the conceptually infinite card strip.
//!
//! Slot `s` holds roster entry `s mod n` and is drawn at
//! `s * item_width - offset + viewport/2 - card_width/2`. Only the slots that
//! intersect the viewport, plus one spare on each side, are produced per frame.

use crate::config::StripGeometry;

/// One drawable card position for the current frame
#[derive(Debug, Clone, PartialEq)]
pub struct SlotView {
    pub slot: i64,
    pub roster_index: usize,
    /// Left edge of the card in viewport coordinates
    pub x: f64,
    pub highlighted: bool,
}

/// Roster index shown by `slot`, wrapped to be non-negative
pub fn roster_index(slot: i64, roster_size: usize) -> usize {
    slot.rem_euclid(roster_size as i64) as usize
}

pub fn slot_x(geometry: &StripGeometry, slot: i64, offset: f64) -> f64 {
    slot as f64 * geometry.item_width() - offset + geometry.viewport_width / 2.0
        - geometry.card_width / 2.0
}

/// Offset at which `index`'s card (in the first cycle) sits centred on the indicator
pub fn aligned_offset(geometry: &StripGeometry, index: usize) -> f64 {
    index as f64 * geometry.item_width()
}

/// Roster index currently under the centre indicator
pub fn index_at_indicator(geometry: &StripGeometry, offset: f64, roster_size: usize) -> Option<usize> {
    if roster_size == 0 {
        return None;
    }
    let slot = (offset / geometry.item_width()).round() as i64;
    Some(roster_index(slot, roster_size))
}

/// Visible slots for a frame. `highlight` marks every slot of that roster index.
pub fn visible_slots(
    geometry: &StripGeometry,
    offset: f64,
    roster_size: usize,
    highlight: Option<usize>,
) -> Vec<SlotView> {
    if roster_size == 0 || geometry.item_width() <= 0.0 {
        return Vec::new();
    }

    let item = geometry.item_width();
    let half = geometry.viewport_width / 2.0;
    let first = ((offset - half) / item).floor() as i64 - 1;
    let last = ((offset + half) / item).ceil() as i64 + 1;

    (first..=last)
        .map(|slot| {
            let idx = roster_index(slot, roster_size);
            SlotView {
                slot,
                roster_index: idx,
                x: slot_x(geometry, slot, offset),
                highlighted: highlight == Some(idx),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> StripGeometry {
        StripGeometry {
            card_width: 220.0,
            gap: 40.0,
            viewport_width: 1000.0,
        }
    }

    #[test]
    fn test_negative_slots_wrap() {
        assert_eq!(roster_index(-1, 3), 2);
        assert_eq!(roster_index(-3, 3), 0);
        assert_eq!(roster_index(-4, 3), 2);
        assert_eq!(roster_index(7, 3), 1);
    }

    #[test]
    fn test_aligned_card_is_centred() {
        let g = geometry();
        let offset = aligned_offset(&g, 2) + 5.0 * g.total_width(4);
        let slot = (offset / g.item_width()).round() as i64;
        let centre = slot_x(&g, slot, offset) + g.card_width / 2.0;

        assert!((centre - g.viewport_width / 2.0).abs() < 1e-6);
        assert_eq!(index_at_indicator(&g, offset, 4), Some(2));
    }

    #[test]
    fn test_visible_window_covers_viewport() {
        let g = geometry();
        let slots = visible_slots(&g, 1234.5, 3, None);

        let first = slots.first().unwrap();
        let last = slots.last().unwrap();
        assert!(first.x + g.card_width < 0.0, "needs a spare card on the left");
        assert!(last.x > g.viewport_width, "needs a spare card on the right");
        assert!(slots.windows(2).all(|w| w[1].slot == w[0].slot + 1));
    }

    #[test]
    fn test_highlight_marks_winner_slots() {
        let g = geometry();
        let slots = visible_slots(&g, 0.0, 2, Some(1));
        assert!(slots.iter().any(|s| s.highlighted));
        assert!(slots.iter().filter(|s| s.highlighted).all(|s| s.roster_index == 1));
    }

    #[test]
    fn test_empty_roster_draws_nothing() {
        assert!(visible_slots(&geometry(), 0.0, 0, None).is_empty());
        assert_eq!(index_at_indicator(&geometry(), 0.0, 0), None);
    }
}
