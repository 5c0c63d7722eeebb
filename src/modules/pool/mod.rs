//! Identity pool with draw-without-immediate-repeat selection.

use rand::Rng;

/// Ordered entries plus the index of the current selection, if any.
#[derive(Debug, Clone)]
pub struct IdentityPool<T> {
    entries: Vec<T>,
    selected: Option<usize>,
}

impl<T> Default for IdentityPool<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            selected: None,
        }
    }
}

impl<T> IdentityPool<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<T>) -> Self {
        Self {
            entries,
            selected: None,
        }
    }

    /// Swap in a fresh set of entries and forget the selection.
    pub fn replace(&mut self, entries: Vec<T>) {
        self.entries = entries;
        self.selected = None;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[T] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.entries.get(index)
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.selected
    }

    pub fn selected(&self) -> Option<&T> {
        self.selected.and_then(|index| self.entries.get(index))
    }

    pub fn selected_mut(&mut self) -> Option<&mut T> {
        self.selected.and_then(|index| self.entries.get_mut(index))
    }

    pub fn count_where<F>(&self, filter: F) -> usize
    where
        F: Fn(&T) -> bool,
    {
        self.entries.iter().filter(|entry| filter(*entry)).count()
    }

    /// Select an entry among all of them.
    pub fn draw(&mut self) -> Option<usize> {
        self.draw_where(|_| true)
    }

    /// Select an entry among those passing `filter`.
    ///
    /// With a single candidate that candidate is selected, even if it is the
    /// current selection. With several, the new index always differs from the
    /// previous one.
    pub fn draw_where<F>(&mut self, filter: F) -> Option<usize>
    where
        F: Fn(&T) -> bool,
    {
        let candidates: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| filter(*entry))
            .map(|(index, _)| index)
            .collect();

        let chosen = match candidates.as_slice() {
            [] => return None,
            [only] => *only,
            _ => {
                let mut rng = rand::thread_rng();
                loop {
                    let pick = candidates[rng.gen_range(0..candidates.len())];
                    if Some(pick) != self.selected {
                        break pick;
                    }
                }
            }
        };

        self.selected = Some(chosen);
        Some(chosen)
    }

    /// Remove the entry at `index`.
    ///
    /// Removing the selected entry clears the selection; removing an entry in
    /// front of it shifts the selection so it keeps pointing at the same
    /// element.
    pub fn remove(&mut self, index: usize) -> Option<T> {
        if index >= self.entries.len() {
            return None;
        }
        let removed = self.entries.remove(index);

        self.selected = match self.selected {
            Some(current) if current == index => None,
            Some(current) if current > index => Some(current - 1),
            other => other,
        };

        Some(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn never_repeats_consecutively() {
        let mut pool = IdentityPool::from_entries(vec!["a", "b", "c", "d"]);
        let mut previous = None;
        let mut seen = HashSet::new();

        for _ in 0..1000 {
            let index = pool.draw().unwrap();
            assert_ne!(Some(index), previous);
            seen.insert(index);
            previous = Some(index);
        }

        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn filtered_draw_only_returns_matching_entries() {
        let mut pool = IdentityPool::from_entries(vec![1, 2, 3, 4, 5, 6]);
        let mut previous = None;
        for _ in 0..200 {
            let index = pool.draw_where(|value| value % 2 == 0).unwrap();
            assert_eq!(pool.get(index).unwrap() % 2, 0);
            assert_ne!(Some(index), previous);
            previous = Some(index);
        }
    }

    #[test]
    fn single_candidate_is_always_returned() {
        let mut pool = IdentityPool::from_entries(vec!["only"]);
        for _ in 0..10 {
            assert_eq!(pool.draw(), Some(0));
        }

        let mut mixed = IdentityPool::from_entries(vec![1, 2, 3]);
        for _ in 0..10 {
            assert_eq!(mixed.draw_where(|value| *value == 2), Some(1));
        }
    }

    #[test]
    fn empty_candidates_yield_none_and_keep_selection() {
        let mut pool = IdentityPool::from_entries(vec![1, 3]);
        pool.draw();
        let before = pool.selected_index();
        assert_eq!(pool.draw_where(|value| value % 2 == 0), None);
        assert_eq!(pool.selected_index(), before);
    }

    #[test]
    fn removing_selected_entry_resets_selection() {
        let mut pool = IdentityPool::from_entries(vec!["a", "b", "c"]);
        let index = pool.draw().unwrap();
        let removed = pool.remove(index).unwrap();

        assert_eq!(pool.selected_index(), None);
        for _ in 0..50 {
            let next = pool.draw().unwrap();
            assert_ne!(pool.get(next), Some(&removed));
        }
    }

    #[test]
    fn removing_earlier_entry_shifts_selection() {
        let mut pool = IdentityPool::from_entries(vec!["a", "b", "c"]);
        while pool.draw() != Some(2) {}
        pool.remove(0);
        assert_eq!(pool.selected(), Some(&"c"));
        pool.remove(1);
        assert_eq!(pool.selected(), None);
    }

    #[test]
    fn replace_clears_selection() {
        let mut pool = IdentityPool::from_entries(vec![1, 2]);
        pool.draw();
        pool.replace(vec![3, 4, 5]);
        assert_eq!(pool.selected_index(), None);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn out_of_range_removal_is_ignored() {
        let mut pool: IdentityPool<u8> = IdentityPool::new();
        assert_eq!(pool.remove(0), None);
    }
}
