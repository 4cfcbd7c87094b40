//! Slot arena with typed integer ids.
//!
//! Processes and threads refer to each other by id; the arena owns them.
//! Removed slots are recycled, so an id is stable only while its value lives.

use alloc::vec::Vec;
use core::fmt;
use core::marker::PhantomData;

/// An id type usable as an arena key.
pub trait ArenaId: Copy + Eq {
    fn from_index(index: u32) -> Self;
    fn index(self) -> u32;
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ProcessId(u32);

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ThreadId(u32);

impl ArenaId for ProcessId {
    #[inline]
    fn from_index(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    fn index(self) -> u32 {
        self.0
    }
}

impl ArenaId for ThreadId {
    #[inline]
    fn from_index(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

pub struct Arena<I: ArenaId, T> {
    slots: Vec<Option<T>>,
    vacant: Vec<u32>,
    _id: PhantomData<I>,
}

impl<I: ArenaId, T> Arena<I, T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            vacant: Vec::new(),
            _id: PhantomData,
        }
    }

    /// Insert the value built by `f`, which receives the id it will live under.
    ///
    /// ### Panics
    /// If more than `u32::MAX` slots would be needed.
    pub fn insert_with(&mut self, f: impl FnOnce(I) -> T) -> I {
        if let Some(index) = self.vacant.pop() {
            let id = I::from_index(index);
            self.slots[index as usize] = Some(f(id));
            return id;
        }
        let Ok(index) = u32::try_from(self.slots.len()) else {
            panic!("arena id space exhausted");
        };
        let id = I::from_index(index);
        self.slots.push(Some(f(id)));
        id
    }

    #[must_use]
    pub fn get(&self, id: I) -> Option<&T> {
        self.slots.get(id.index() as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
        self.slots.get_mut(id.index() as usize)?.as_mut()
    }

    pub fn remove(&mut self, id: I) -> Option<T> {
        let value = self.slots.get_mut(id.index() as usize)?.take()?;
        self.vacant.push(id.index());
        Some(value)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len() - self.vacant.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            let id = I::from_index(u32::try_from(i).ok()?);
            slot.as_ref().map(|v| (id, v))
        })
    }
}

impl<I: ArenaId, T> Default for Arena<I, T> {
    fn default() -> Self {
        Self::new()
    }
}
