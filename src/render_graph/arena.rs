//! Dense storage for render passes addressed by stable handles
//!
//! Removing a pass marks its slot free and bumps the slot generation, so a
//! stale handle to a recycled slot is rejected instead of aliasing the new
//! occupant.

/// Stable handle to a pass in a [`PassArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PassHandle {
    index: u32,
    generation: u32,
}

impl PassHandle {
    pub fn index(&self) -> u32 {
        self.index
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

pub struct PassArena<T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
    len: usize,
}

impl<T> PassArena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            len: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> PassHandle {
        self.len += 1;
        match self.free_list.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.value = Some(value);
                PassHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    value: Some(value),
                });
                PassHandle { index, generation: 0 }
            }
        }
    }

    /// Take the pass out and free its slot
    pub fn remove(&mut self, handle: PassHandle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(handle.index);
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, handle: PassHandle) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: PassHandle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Remove every live value, in slot order
    pub fn drain(&mut self) -> Vec<T> {
        let values = self.slots.iter_mut().filter_map(|slot| {
            let value = slot.value.take();
            if value.is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
            value
        });
        let values: Vec<T> = values.collect();
        self.free_list = (0..self.slots.len() as u32).rev().collect();
        self.len = 0;
        values
    }
}

impl<T> Default for PassArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recycled_slot_rejects_stale_handle() {
        let mut arena = PassArena::new();
        let a = arena.insert("frame");
        assert_eq!(arena.remove(a), Some("frame"));

        let b = arena.insert("sky");
        assert_eq!(a.index(), b.index());
        assert!(arena.get(a).is_none());
        assert_eq!(arena.get(b), Some(&"sky"));
        assert!(arena.remove(a).is_none());
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_drain_empties_arena() {
        let mut arena = PassArena::new();
        let a = arena.insert(1);
        arena.insert(2);
        assert_eq!(arena.drain(), vec![1, 2]);
        assert!(arena.is_empty());
        assert!(arena.get(a).is_none());
    }
}
