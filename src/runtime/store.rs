//! Task containers: the two shapes behind the tree/DAG split.
//!
//! Tree-shaped search spaces generate each task exactly once, so the
//! container is an ordered sequence and `add` is a plain append. DAG-shaped
//! spaces reach the same task along multiple paths; the container is a hash
//! set and a duplicate insert merges into the stored copy instead.
//!
//! The [`TaskStore`] seam lets the sequential executor (and tests) pick the
//! shape by type parameter; the parallel executors use purpose-built
//! structures but the same insert-or-merge rule.

use crate::contract::Task;
use ahash::RandomState;
use std::collections::HashSet;

/// Container shape selected by the search-space kind.
pub trait TaskStore<T>: Default {
    /// Adds a task; DAG stores merge on duplicate.
    fn add(&mut self, task: T);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes everything, keeping allocations where practical.
    fn clear(&mut self);

    /// Visits each task.
    fn for_each<F: FnMut(&T)>(&self, f: F);

    /// Moves all tasks out.
    fn drain_into(&mut self, out: &mut Vec<T>);
}

/// Ordered sequence for unique (tree) search spaces.
#[derive(Debug, Clone)]
pub struct SeqStore<T> {
    tasks: Vec<T>,
}

impl<T> Default for SeqStore<T> {
    fn default() -> Self {
        Self { tasks: Vec::new() }
    }
}

impl<T> SeqStore<T> {
    pub fn as_slice(&self) -> &[T] {
        &self.tasks
    }
}

impl<T: Task> TaskStore<T> for SeqStore<T> {
    #[inline]
    fn add(&mut self, task: T) {
        self.tasks.push(task);
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }

    fn clear(&mut self) {
        self.tasks.clear();
    }

    fn for_each<F: FnMut(&T)>(&self, mut f: F) {
        for t in &self.tasks {
            f(t);
        }
    }

    fn drain_into(&mut self, out: &mut Vec<T>) {
        out.append(&mut self.tasks);
    }
}

/// Hash set with merge-on-duplicate for DAG search spaces.
///
/// The stored element is the canonical copy; inserting an equal task removes
/// it, merges the newcomer in, and reinserts. Equality and hashing must
/// agree, and `merge` must keep them stable; a merge that changes the hash
/// would strand the task in the wrong bucket.
#[derive(Debug, Clone)]
pub struct SetStore<T> {
    tasks: HashSet<T, RandomState>,
}

impl<T> Default for SetStore<T> {
    fn default() -> Self {
        Self {
            tasks: HashSet::with_hasher(RandomState::new()),
        }
    }
}

impl<T: Task> SetStore<T> {
    /// Looks up the stored copy equal to `probe`.
    pub fn get(&self, probe: &T) -> Option<&T> {
        self.tasks.get(probe)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.tasks.iter()
    }
}

impl<T: Task> TaskStore<T> for SetStore<T> {
    fn add(&mut self, task: T) {
        // take + merge + reinsert: HashSet has no way to mutate in place,
        // and merge may not alter hash/eq anyway.
        match self.tasks.take(&task) {
            Some(mut held) => {
                held.merge(task);
                self.tasks.insert(held);
            }
            None => {
                self.tasks.insert(task);
            }
        }
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }

    fn clear(&mut self) {
        self.tasks.clear();
    }

    fn for_each<F: FnMut(&T)>(&self, mut f: F) {
        for t in &self.tasks {
            f(t);
        }
    }

    fn drain_into(&mut self, out: &mut Vec<T>) {
        out.extend(self.tasks.drain());
    }
}
