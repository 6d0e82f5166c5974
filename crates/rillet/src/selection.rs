//! Prioritized, non-overlapping intervals.
//!
//! A [`Selections`] set holds closed intervals `[from, to]`, each with a
//! priority and an optional notify callback. Inserting an interval carves out
//! the space it needs from the intervals already there, which are truncated,
//! split in two, or deleted. The callbacks of the intervals it overlapped are
//! kept alive by composing them into the new interval's callback.
//!
//! Stream selections are the exception: they never merge, never get carved,
//! and are only removed by a stream removal with the exact same bounds. They
//! are meant for a transient playback window.
//!
//! The set is ordered by insertion. Call [`Selections::sort`] or
//! [`Selections::sort_by`] before relying on any order.

use std::{cmp::Ordering, fmt, sync::Arc};

use crate::error::Error;

/// Callback fired when a selection is satisfied.
pub type Notify = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone, Default)]
pub struct Selection {
    pub from: usize,
    pub to: usize,
    pub offset: usize,
    pub priority: i32,
    pub notify: Option<Notify>,
    pub is_stream: bool,
}

impl fmt::Debug for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selection")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("offset", &self.offset)
            .field("priority", &self.priority)
            .field("notify", &self.notify.is_some())
            .field("is_stream", &self.is_stream)
            .finish()
    }
}

impl Selection {
    pub fn new(from: usize, to: usize) -> Self {
        Self { from, to, ..Default::default() }
    }

    /// A transient, exact-match-only selection.
    pub fn stream(from: usize, to: usize) -> Self {
        Self { from, to, is_stream: true, ..Default::default() }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_notify<F>(mut self, notify: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.notify = Some(Arc::new(notify));
        self
    }

    pub fn contains(&self, index: usize) -> bool {
        self.from <= index && index <= self.to
    }
}

/// `new` starts strictly inside `existing` and ends past it.
///
/// ```text
/// existing: 1-10
/// new:      8-12
/// ```
pub fn is_lower_intersecting(new: &Selection, existing: &Selection) -> bool {
    new.from <= existing.to && new.from > existing.from && new.to > existing.to
}

/// `new` ends strictly inside `existing` and starts before it.
///
/// ```text
/// existing: 20-25
/// new:      15-22
/// ```
pub fn is_upper_intersecting(new: &Selection, existing: &Selection) -> bool {
    new.to >= existing.from && new.to < existing.to && new.from < existing.from
}

/// `new` is contained in `existing` and is smaller than it.
///
/// ```text
/// existing: 10-20 | 10-20
/// new:      12-15 | 15-20
/// ```
pub fn is_inside_existing(new: &Selection, existing: &Selection) -> bool {
    new.from >= existing.from
        && new.to <= existing.to
        && new.to - new.from < existing.to - existing.from
}

/// `new` contains all of `existing`.
///
/// ```text
/// existing: 10-20 | 10-20 | 10-20
/// new:      10-21 | 09-20 | 10-20
/// ```
pub fn is_covering_existing(new: &Selection, existing: &Selection) -> bool {
    new.from <= existing.from && new.to >= existing.to
}

pub fn is_intersecting(new: &Selection, existing: &Selection) -> bool {
    is_lower_intersecting(new, existing)
        || is_upper_intersecting(new, existing)
        || is_inside_existing(new, existing)
        || is_covering_existing(new, existing)
}

#[derive(Debug, Default, Clone)]
pub struct Selections {
    items: Vec<Selection>,
}

impl Selections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the space of `item` from the set.
    ///
    /// A stream `item` removes the first stream selection with the same
    /// bounds and nothing else. A regular `item` truncates, splits or
    /// deletes every regular selection it overlaps, leaving stream
    /// selections untouched.
    pub fn remove(&mut self, item: &Selection) {
        let mut i = 0;

        while i < self.items.len() {
            let existing = &mut self.items[i];

            if existing.is_stream {
                if item.is_stream
                    && existing.from == item.from
                    && existing.to == item.to
                {
                    self.items.remove(i);
                    break;
                }
                i += 1;
                continue;
            }

            if item.is_stream {
                i += 1;
                continue;
            }

            if is_lower_intersecting(item, existing) {
                existing.to = item.from - 1;
            } else if is_upper_intersecting(item, existing) {
                existing.from = item.to + 1;
            } else if is_inside_existing(item, existing) {
                let mut fragments = Vec::with_capacity(2);

                if item.from > existing.from {
                    fragments.push(Selection {
                        to: item.from - 1,
                        ..existing.clone()
                    });
                }
                if item.to < existing.to {
                    fragments.push(Selection {
                        from: item.to + 1,
                        ..existing.clone()
                    });
                }

                let n = fragments.len();
                self.items.splice(i..=i, fragments);
                i += n;
                continue;
            } else if is_covering_existing(item, existing) {
                self.items.remove(i);
                continue;
            }

            i += 1;
        }
    }

    /// Insert `item`, making room for it.
    ///
    /// Regular selections inherit the callbacks of every selection they
    /// overlap: the stored callback runs those first, in set order, and
    /// then the callback `item` came with.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInterval`] when `from > to`. The set is unchanged.
    pub fn insert(&mut self, mut item: Selection) -> Result<(), Error> {
        if item.from > item.to {
            return Err(Error::InvalidInterval { from: item.from, to: item.to });
        }

        if !item.is_stream {
            let inherited: Vec<Notify> = self
                .items
                .iter()
                .filter(|existing| is_intersecting(&item, existing))
                .filter_map(|existing| existing.notify.clone())
                .collect();

            if !inherited.is_empty() {
                let own = item.notify.take();
                item.notify = Some(Arc::new(move || {
                    for f in &inherited {
                        f();
                    }
                    if let Some(f) = &own {
                        f();
                    }
                }));
            }

            self.remove(&item);
        }

        self.items.push(item);
        Ok(())
    }

    /// Sort ascending by `from`.
    pub fn sort(&mut self) {
        self.sort_by(|a, b| a.from.cmp(&b.from));
    }

    /// Stable sort with a custom comparator.
    pub fn sort_by<F>(&mut self, compare: F)
    where
        F: FnMut(&Selection, &Selection) -> Ordering,
    {
        self.items.sort_by(compare);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Selection> {
        self.items.get(index)
    }

    pub fn swap(&mut self, i: usize, j: usize) {
        self.items.swap(i, j);
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Selection> {
        self.items.iter()
    }

    /// Walk the set with the ability to delete the visited entry.
    pub fn cursor(&mut self) -> Cursor<'_> {
        Cursor { items: &mut self.items, next: 0, current: None }
    }
}

/// Mutable walk over a [`Selections`] set.
///
/// ```
/// # use rillet::selection::{Selection, Selections};
/// let mut set = Selections::new();
/// set.insert(Selection::new(0, 3)).unwrap();
/// set.insert(Selection::new(5, 9)).unwrap();
///
/// let mut cursor = set.cursor();
/// while let Some(s) = cursor.next() {
///     if s.from == 0 {
///         cursor.remove_current();
///     }
/// }
/// assert_eq!(set.len(), 1);
/// ```
#[derive(Debug)]
pub struct Cursor<'a> {
    items: &'a mut Vec<Selection>,
    next: usize,
    current: Option<usize>,
}

impl<'a> Cursor<'a> {
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<&mut Selection> {
        let index = self.next;
        if index >= self.items.len() {
            self.current = None;
            return None;
        }
        self.current = Some(index);
        self.next += 1;
        self.items.get_mut(index)
    }

    /// Delete the entry last returned by [`Cursor::next`].
    ///
    /// Only the first call per visited entry has an effect. The walk
    /// continues with the entry that followed the removed one.
    pub fn remove_current(&mut self) -> Option<Selection> {
        let index = self.current.take()?;
        self.next = index;
        Some(self.items.remove(index))
    }
}
