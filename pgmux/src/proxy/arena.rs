//! Channel storage.
//!
//! Channels live in a fixed number of slots. Each slot carries a
//! generation that changes every time it's freed, so an id (and the
//! poller token derived from it) stops resolving once its channel
//! is gone, even if the slot has been reused since.

use crate::net::Token;

/// Tokens with this bit set belong to listeners.
pub const LISTENER_BIT: u64 = 1 << 63;

const GENERATION_MASK: u32 = 0x7fff_ffff;

/// Identifies a channel for as long as it exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId {
    index: u32,
    generation: u32,
}

impl ChannelId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation: generation & GENERATION_MASK,
        }
    }

    /// Poller token.
    pub fn token(&self) -> Token {
        Token(((self.generation as u64) << 32) | self.index as u64)
    }

    pub fn from_token(token: Token) -> Option<Self> {
        if token.0 & LISTENER_BIT != 0 {
            None
        } else {
            Some(Self::new(token.0 as u32, (token.0 >> 32) as u32))
        }
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    capacity: usize,
    len: usize,
}

impl<T> Arena<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            capacity,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    /// Store a value. Hands it back if every slot is taken.
    pub fn insert(&mut self, value: T) -> Result<ChannelId, T> {
        if self.is_full() {
            return Err(value);
        }

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 1,
                    value: None,
                });
                (self.slots.len() - 1) as u32
            }
        };

        let slot = &mut self.slots[index as usize];
        slot.value = Some(value);
        self.len += 1;

        Ok(ChannelId::new(index, slot.generation))
    }

    fn slot(&self, id: ChannelId) -> Option<&Slot<T>> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
    }

    pub fn get(&self, id: ChannelId) -> Option<&T> {
        self.slot(id).and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, id: ChannelId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Borrow two different entries at once.
    pub fn get2_mut(&mut self, a: ChannelId, b: ChannelId) -> Option<(&mut T, &mut T)> {
        if a.index == b.index {
            return None;
        }

        let (low, high, swapped) = if a.index < b.index {
            (a, b, false)
        } else {
            (b, a, true)
        };

        let (head, tail) = self.slots.split_at_mut(high.index as usize);
        let low_slot = head.get_mut(low.index as usize)?;
        let high_slot = tail.first_mut()?;

        if low_slot.generation != low.generation || high_slot.generation != high.generation {
            return None;
        }

        let low_value = low_slot.value.as_mut()?;
        let high_value = high_slot.value.as_mut()?;

        if swapped {
            Some((high_value, low_value))
        } else {
            Some((low_value, high_value))
        }
    }

    pub fn remove(&mut self, id: ChannelId) -> Option<T> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)?;
        let value = slot.value.take()?;

        slot.generation = slot.generation.wrapping_add(1) & GENERATION_MASK;
        self.free.push(id.index);
        self.len -= 1;

        Some(value)
    }

    /// Ids of all stored values.
    pub fn ids(&self) -> Vec<ChannelId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.value.is_some())
            .map(|(index, slot)| ChannelId::new(index as u32, slot.generation))
            .collect()
    }
}
