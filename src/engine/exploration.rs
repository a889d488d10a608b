//! Resumable depth-first exploration of a ticket's prerequisite graph.
//!
//! Prerequisites form a DAG of data-dependent depth, so the traversal keeps an explicit stack of
//! cursors (one per open graph level) instead of recursing. The caller pulls one prerequisite at
//! a time. Order is post-order: a prerequisite is only presented once everything it depends on
//! has been presented, and each `(ticket, channel)` appears at most once per exploration.
//!
//! For a ticket `T` whose channel 0 lists `[P1, P2]`, with `P2` depending on `P3`, draining
//! `T.discover_prerequisites(0)` yields `P1, P3, P2`.

use crate::engine::job_ticket::{Prerequisite, TicketRef};
use crate::engine::segment::Segment;
use smallvec::SmallVec;
use std::collections::HashSet;
use std::fmt;

#[derive(Clone, Copy)]
enum LevelItems<'a> {
    Listed(&'a [Prerequisite]),
    Root(Prerequisite),
}

#[derive(Clone, Copy)]
struct Level<'a> {
    items: LevelItems<'a>,
    pos: usize,
}

impl Level<'_> {
    fn get(&self) -> Option<Prerequisite> {
        match self.items {
            LevelItems::Listed(items) => items.get(self.pos).copied(),
            LevelItems::Root(p) => (self.pos == 0).then_some(p),
        }
    }
}

/// Cursor over the prerequisites reachable from one ticket channel.
#[derive(Clone)]
pub struct ExplorationState<'a> {
    segment: &'a Segment,
    to_explore: SmallVec<[Level<'a>; 8]>,
    entered: HashSet<Prerequisite>,
    yielded: HashSet<Prerequisite>,
    mark: usize,
}

impl<'a> ExplorationState<'a> {
    /// Exhausted exploration.
    pub fn empty(segment: &'a Segment) -> Self {
        Self {
            segment,
            to_explore: SmallVec::new(),
            entered: HashSet::new(),
            yielded: HashSet::new(),
            mark: 0,
        }
    }

    pub(crate) fn over(segment: &'a Segment, prerequisites: &'a [Prerequisite]) -> Self {
        let mut state = Self::empty(segment);
        if !prerequisites.is_empty() {
            state.to_explore.push(Level {
                items: LevelItems::Listed(prerequisites),
                pos: 0,
            });
            state.settle(true);
        }
        state
    }

    pub(crate) fn rooted(segment: &'a Segment, root: Prerequisite) -> Self {
        let mut state = Self::empty(segment);
        state.to_explore.push(Level {
            items: LevelItems::Root(root),
            pos: 0,
        });
        state.settle(true);
        state
    }

    /// `true` once every reachable prerequisite has been pulled.
    pub fn is_empty(&self) -> bool {
        self.to_explore.is_empty()
    }

    /// Number of graph levels currently open.
    pub fn depth(&self) -> usize {
        self.to_explore.len()
    }

    /// Prerequisite at the cursor, if any.
    pub fn peek(&self) -> Option<Prerequisite> {
        self.to_explore.last().and_then(Level::get)
    }

    /// Prerequisite at the cursor.
    ///
    /// # Panics
    ///
    /// Panics on an exhausted exploration.
    pub fn current_prerequisite(&self) -> Prerequisite {
        match self.peek() {
            Some(p) => p,
            None => panic!("exploration of job prerequisites is exhausted; no current ticket"),
        }
    }

    /// Ticket at the cursor.
    ///
    /// # Panics
    ///
    /// Panics on an exhausted exploration.
    pub fn current(&self) -> TicketRef<'a> {
        self.segment.ticket(self.current_prerequisite().ticket)
    }

    /// Consume the prerequisite at the cursor and move on.
    ///
    /// Exhausted levels are popped until a presentable prerequisite is on top or the stack is
    /// empty.
    ///
    /// # Panics
    ///
    /// Panics when called on an exhausted exploration: the caller violated the iteration
    /// contract.
    pub fn pull_next(&mut self) {
        assert!(
            !self.is_empty(),
            "exploration of job prerequisites floundered: attempt to iterate beyond the end of \
             the prerequisite list"
        );
        let current = self.current_prerequisite();
        self.yielded.insert(current);
        self.advance_top();
        self.settle(true);
    }

    /// Explore `sub` depth-first before returning to the current position.
    ///
    /// All of `sub`'s open levels are stacked on top of this exploration, keeping their relative
    /// order, so the deepest level of `sub` is explored first.
    ///
    /// # Panics
    ///
    /// Panics if `sub` explores a different segment.
    pub fn push(&mut self, sub: ExplorationState<'a>) {
        assert!(
            std::ptr::eq(self.segment, sub.segment),
            "cannot merge explorations of different segments"
        );
        if sub.is_empty() {
            return;
        }
        self.entered.extend(sub.entered);
        self.yielded.extend(sub.yielded);
        // sub's stack is ordered bottom to top, so appending keeps its deepest level on top
        self.to_explore.extend(sub.to_explore);
        self.settle(false);
    }

    /// Record the current depth as reference for [`ExplorationState::orientation`].
    pub fn mark_tree_location(&mut self) {
        self.mark = self.to_explore.len();
    }

    /// Signed level distance to the marked location.
    ///
    /// Positive while exploring deeper than the mark, zero at the marked level, negative once
    /// the exploration has backed out above it.
    pub fn orientation(&self) -> isize {
        self.to_explore.len() as isize - self.mark as isize
    }

    /// `true` when everything opened below the mark has been explored.
    pub fn returned_to_mark(&self) -> bool {
        self.orientation() <= 0
    }

    fn advance_top(&mut self) {
        if let Some(level) = self.to_explore.last_mut() {
            level.pos += 1;
        }
    }

    /// Bring the cursor onto the next presentable prerequisite.
    ///
    /// `fresh` is set when the top cursor has just moved onto an unexamined element; such an
    /// element is first descended into. After an exhausted level is popped, the parent element
    /// below it is presentable as-is.
    fn settle(&mut self, mut fresh: bool) {
        loop {
            let Some(level) = self.to_explore.last() else {
                return;
            };
            let Some(current) = level.get() else {
                self.to_explore.pop();
                fresh = false;
                continue;
            };

            if fresh {
                if !self.entered.insert(current) {
                    self.advance_top();
                    continue;
                }
                let sub = self
                    .segment
                    .ticket(current.ticket)
                    .ticket()
                    .prerequisites(current.channel);
                if !sub.is_empty() {
                    self.to_explore.push(Level {
                        items: LevelItems::Listed(sub),
                        pos: 0,
                    });
                    continue;
                }
            }

            if self.yielded.contains(&current) {
                self.advance_top();
                fresh = true;
                continue;
            }
            return;
        }
    }
}

impl Iterator for ExplorationState<'_> {
    type Item = Prerequisite;

    fn next(&mut self) -> Option<Prerequisite> {
        let current = self.peek()?;
        self.pull_next();
        Some(current)
    }
}

impl std::iter::FusedIterator for ExplorationState<'_> {}

impl fmt::Debug for ExplorationState<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExplorationState")
            .field("depth", &self.to_explore.len())
            .field("current", &self.peek())
            .field("mark", &self.mark)
            .finish()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/engine/exploration.rs"]
mod tests;
