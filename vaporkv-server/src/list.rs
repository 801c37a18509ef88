//! Doubly linked list over nodes owned by an external arena.
//!
//! The record engine keeps every record in a `slab::Slab` and threads each
//! one into two lists at once: its id's version chain and the global
//! eviction list. The list itself stores arena indices only; it never owns
//! or allocates nodes. Insertion at either end and removal of a known node
//! are O(1).

use slab::Slab;
use thiserror::Error;

/// Identifies which pair of link fields on a node a list threads through.
///
/// A record is a member of its version chain and of the eviction list at the
/// same time; each list identity gets its own [`Links`] slot on the node so
/// the two memberships never interfere.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListSlot {
    VersionChain,
    Eviction,
}

/// Link fields for one list membership. Owned by the node, managed
/// exclusively by the list.
#[derive(Clone, Copy, Debug, Default)]
pub struct Links {
    linked: bool,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Arena-allocated node that can be threaded into an [`OrderedList`].
pub trait Node {
    fn links(&self, slot: ListSlot) -> &Links;
    fn links_mut(&mut self, slot: ListSlot) -> &mut Links;
}

/// Misuse of the list. These indicate a bug in the caller; the engine never
/// recovers from them and the HTTP layer maps them to a 500.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ListError {
    #[error("node is already a member of this list")]
    AlreadyLinked,

    #[error("node is not a member of this list")]
    NotLinked,

    #[error("list was modified during traversal")]
    ConcurrentModification,
}

/// Detached traversal position over an [`OrderedList`].
///
/// A cursor holds no borrow of the list, so the list can be mutated while a
/// cursor exists; the generation check in [`OrderedList::next`] is what
/// turns that into an error instead of a stale walk.
#[derive(Debug, Clone, Copy)]
pub struct Cursor {
    at: Option<usize>,
    forward: bool,
    generation: u64,
}

/// Doubly linked list of arena indices, leftmost first.
#[derive(Debug)]
pub struct OrderedList {
    slot: ListSlot,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
    generation: u64,
}

impl OrderedList {
    pub fn new(slot: ListSlot) -> Self {
        Self { slot, head: None, tail: None, len: 0, generation: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Leftmost member, or `None` when the list is empty.
    pub fn front(&self) -> Option<usize> {
        self.head
    }

    /// Rightmost member, or `None` when the list is empty.
    pub fn back(&self) -> Option<usize> {
        self.tail
    }

    /// Insert at the left end.
    pub fn push_front<T: Node>(&mut self, arena: &mut Slab<T>, index: usize) -> Result<(), ListError> {
        if arena[index].links(self.slot).linked {
            return Err(ListError::AlreadyLinked);
        }
        self.generation += 1;

        let old_head = self.head;
        let links = arena[index].links_mut(self.slot);
        *links = Links { linked: true, prev: None, next: old_head };
        match old_head {
            Some(head) => arena[head].links_mut(self.slot).prev = Some(index),
            None => self.tail = Some(index),
        }
        self.head = Some(index);
        self.len += 1;
        Ok(())
    }

    /// Insert at the right end.
    pub fn push_back<T: Node>(&mut self, arena: &mut Slab<T>, index: usize) -> Result<(), ListError> {
        if arena[index].links(self.slot).linked {
            return Err(ListError::AlreadyLinked);
        }
        self.generation += 1;

        let old_tail = self.tail;
        let links = arena[index].links_mut(self.slot);
        *links = Links { linked: true, prev: old_tail, next: None };
        match old_tail {
            Some(tail) => arena[tail].links_mut(self.slot).next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;
        Ok(())
    }

    /// Detach a known member.
    pub fn remove<T: Node>(&mut self, arena: &mut Slab<T>, index: usize) -> Result<(), ListError> {
        let (prev, next) = {
            let links = arena[index].links(self.slot);
            if !links.linked {
                return Err(ListError::NotLinked);
            }
            (links.prev, links.next)
        };
        self.generation += 1;

        match prev {
            Some(prev) => arena[prev].links_mut(self.slot).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => arena[next].links_mut(self.slot).prev = prev,
            None => self.tail = prev,
        }
        *arena[index].links_mut(self.slot) = Links::default();
        self.len -= 1;
        Ok(())
    }

    /// Cursor at the left end, walking rightwards.
    pub fn cursor(&self) -> Cursor {
        Cursor { at: self.head, forward: true, generation: self.generation }
    }

    /// Cursor at the right end, walking leftwards.
    pub fn cursor_back(&self) -> Cursor {
        Cursor { at: self.tail, forward: false, generation: self.generation }
    }

    /// Advance `cursor`, yielding the index it sat on, or `None` past the
    /// end. Fails if the list has mutated since the cursor was created.
    pub fn next<T: Node>(&self, cursor: &mut Cursor, arena: &Slab<T>) -> Result<Option<usize>, ListError> {
        if cursor.generation != self.generation {
            return Err(ListError::ConcurrentModification);
        }
        let Some(index) = cursor.at else {
            return Ok(None);
        };
        let links = arena[index].links(self.slot);
        cursor.at = if cursor.forward { links.next } else { links.prev };
        Ok(Some(index))
    }
}
