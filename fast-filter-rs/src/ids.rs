use std::collections::HashMap;

/// A mark: a positive integer naming one object within a stream. Zero is
/// reserved for "not yet allocated".
pub type Mark = u32;

/// Allocator and rename map for the mark namespace shared by every stream a
/// driver processes. Marks are never reused; renames collapse eagerly so
/// `translate` is a single lookup.
#[derive(Debug, Default)]
pub struct IdMap {
  count: Mark,
  // old -> Some(current) for renames, old -> None for dropped objects
  translation: HashMap<Mark, Option<Mark>>,
  // current -> every mark known to resolve to it
  reverse: HashMap<Mark, Vec<Mark>>,
}

impl IdMap {
  pub fn new() -> Self {
    IdMap::default()
  }

  /// Next unused mark. Monotonic, starts at 1.
  pub fn fresh(&mut self) -> Mark {
    self.count += 1;
    self.count
  }

  /// Number of marks handed out so far; doubles as the offset applied to
  /// raw marks of the next input stream.
  pub fn count(&self) -> Mark {
    self.count
  }

  /// Ensure `fresh()` returns values strictly greater than `min_mark`.
  /// Used when an import-marks file already occupies a range.
  pub fn raise_floor(&mut self, min_mark: Mark) {
    if self.count < min_mark {
      self.count = min_mark;
    }
  }

  /// Record that `old` now resolves to `new` (`None` drops the object).
  /// With `transitive`, every mark previously resolving to `old` is rewired
  /// to `new` as well, keeping translation single-hop.
  ///
  /// Renaming to a mark that was never allocated is permitted; it shows up
  /// when a skipped commit redirects references to its parent.
  pub fn record_rename(&mut self, old: Mark, new: Option<Mark>, transitive: bool) {
    if Some(old) == new {
      return;
    }
    self.translation.insert(old, new);
    let mut moved = vec![old];
    if transitive {
      if let Some(pointers) = self.reverse.remove(&old) {
        for &p in &pointers {
          self.translation.insert(p, new);
        }
        moved.extend(pointers);
      }
    }
    if let Some(target) = new {
      self.reverse.entry(target).or_default().extend(moved);
    }
  }

  /// Resolve `mark` under the rename relation. Unseen marks pass through
  /// unchanged; `None` means the object was dropped.
  pub fn translate(&self, mark: Mark) -> Option<Mark> {
    match self.translation.get(&mark) {
      Some(target) => *target,
      None => Some(mark),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fresh_is_monotonic_from_one() {
    let mut ids = IdMap::new();
    assert_eq!(ids.fresh(), 1);
    assert_eq!(ids.fresh(), 2);
    assert_eq!(ids.fresh(), 3);
    assert_eq!(ids.count(), 3);
  }

  #[test]
  fn translate_passes_unknown_marks_through() {
    let ids = IdMap::new();
    assert_eq!(ids.translate(42), Some(42));
  }

  #[test]
  fn rename_and_drop() {
    let mut ids = IdMap::new();
    ids.record_rename(3, Some(1), false);
    ids.record_rename(4, None, false);
    assert_eq!(ids.translate(3), Some(1));
    assert_eq!(ids.translate(4), None);
    assert_eq!(ids.translate(1), Some(1));
  }

  #[test]
  fn self_rename_is_a_no_op() {
    let mut ids = IdMap::new();
    ids.record_rename(5, Some(5), true);
    assert_eq!(ids.translate(5), Some(5));
  }

  #[test]
  fn transitive_rename_collapses_chains() {
    let mut ids = IdMap::new();
    ids.record_rename(2, Some(3), false);
    ids.record_rename(7, Some(3), false);
    // 3 goes away; everything resolving to it must follow in one hop
    ids.record_rename(3, Some(9), true);
    assert_eq!(ids.translate(2), Some(9));
    assert_eq!(ids.translate(7), Some(9));
    assert_eq!(ids.translate(3), Some(9));
    // and a later collapse keeps working
    ids.record_rename(9, None, true);
    assert_eq!(ids.translate(2), None);
    assert_eq!(ids.translate(3), None);
    assert_eq!(ids.translate(7), None);
  }

  #[test]
  fn non_transitive_rename_leaves_pointers_alone() {
    let mut ids = IdMap::new();
    ids.record_rename(2, Some(3), false);
    ids.record_rename(3, Some(9), false);
    // one-hop contract: 2 still resolves to 3
    assert_eq!(ids.translate(2), Some(3));
    assert_eq!(ids.translate(3), Some(9));
  }

  #[test]
  fn raise_floor_reserves_a_range() {
    let mut ids = IdMap::new();
    ids.raise_floor(100);
    assert_eq!(ids.fresh(), 101);
    ids.raise_floor(50); // never lowers
    assert_eq!(ids.fresh(), 102);
  }
}
