//! Generational slot storage for solver-owned entities.
//!
//! ```text
//! slots:  [ gen 0 | T ]  [ gen 2 | - ]  [ gen 1 | T ]
//!              ▲               ▲ free
//!          handle (0, 0)
//! ```
//!
//! Removing an entity empties its slot and bumps the generation, so a stale
//! handle never resolves to whatever reuses the slot later. Iteration always
//! walks slots in index order, which fixes the Gauss-Seidel ordering of every
//! constraint pass.

use std::marker::PhantomData;

use sim_types::Handle;

#[derive(Debug, Clone)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot vector addressed by generational handles.
#[derive(Debug, Clone)]
pub struct Arena<H, T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
    _handle: PhantomData<H>,
}

impl<H: Handle, T> Default for Arena<H, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Handle, T> Arena<H, T> {
    /// Create an empty arena.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            _handle: PhantomData,
        }
    }

    /// Number of live entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Check whether the arena holds no live entries.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert a value, reusing the most recently freed slot if any.
    pub fn insert(&mut self, value: T) -> H {
        self.len += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return H::from_parts(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        H::from_parts(index, 0)
    }

    /// Remove the value behind `handle`.
    ///
    /// Returns `None` if the handle is stale or was never issued.
    pub fn remove(&mut self, handle: H) -> Option<T> {
        let slot = self.slots.get_mut(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }

        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index());
        self.len -= 1;
        Some(value)
    }

    /// Check whether `handle` refers to a live entry.
    #[must_use]
    pub fn contains(&self, handle: H) -> bool {
        self.get(handle).is_some()
    }

    /// Shared access to a live entry.
    #[must_use]
    pub fn get(&self, handle: H) -> Option<&T> {
        self.slots
            .get(handle.index() as usize)
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.value.as_ref())
    }

    /// Mutable access to a live entry.
    pub fn get_mut(&mut self, handle: H) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index() as usize)
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.value.as_mut())
    }

    /// Mutable access to two distinct entries at once.
    ///
    /// Each side resolves independently: a `None`, stale handle yields `None`
    /// on that side. If both handles name the same entry only the first side
    /// is returned.
    pub fn pair_mut(&mut self, a: Option<H>, b: Option<H>) -> (Option<&mut T>, Option<&mut T>) {
        let live = |slots: &[Slot<T>], h: Option<H>| {
            h.filter(|h| {
                slots
                    .get(h.index() as usize)
                    .is_some_and(|s| s.generation == h.generation() && s.value.is_some())
            })
            .map(|h| h.index() as usize)
        };

        match (live(&self.slots, a), live(&self.slots, b)) {
            (None, None) => (None, None),
            (Some(i), None) => (self.slots[i].value.as_mut(), None),
            (None, Some(j)) => (None, self.slots[j].value.as_mut()),
            (Some(i), Some(j)) if i == j => (self.slots[i].value.as_mut(), None),
            (Some(i), Some(j)) if i < j => {
                let (head, tail) = self.slots.split_at_mut(j);
                (head[i].value.as_mut(), tail[0].value.as_mut())
            }
            (Some(i), Some(j)) => {
                let (head, tail) = self.slots.split_at_mut(i);
                (tail[0].value.as_mut(), head[j].value.as_mut())
            }
        }
    }

    /// Iterate live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (H, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.value
                .as_ref()
                .map(|v| (H::from_parts(i as u32, slot.generation), v))
        })
    }

    /// Iterate live entries mutably in slot order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (H, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, slot)| {
            let generation = slot.generation;
            slot.value
                .as_mut()
                .map(|v| (H::from_parts(i as u32, generation), v))
        })
    }

    /// Iterate live values mutably in slot order.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().filter_map(|slot| slot.value.as_mut())
    }

    /// Handles of all live entries in slot order.
    #[must_use]
    pub fn handles(&self) -> Vec<H> {
        self.iter().map(|(h, _)| h).collect()
    }
}
