//! Chunked LIFO storage shared by the stack arena and the closure stack.
//!
//! Items live in fixed-capacity blocks. Every block below the current one
//! is full, so a flat index maps to `(index / block_size, index % block_size)`
//! and slots never move once pushed. When the current block fills up the
//! next block is reused if a previous pop left one behind; otherwise a new
//! block is appended. When popping empties a block, any spare block after it
//! is released, so at most one empty block is kept around.

/// Position of an item in a [`BlockStack`].
///
/// Only valid while the item is live; a popped slot id may be reused by the
/// next push.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

impl SlotId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

pub struct BlockStack<T> {
    blocks: Vec<Vec<T>>,
    /// Block holding the top item. Only block 0 may be empty while current.
    current: usize,
    block_size: usize,
}

impl<T> BlockStack<T> {
    /// Create an empty stack. No block is allocated until the first push.
    pub fn new(block_size: usize) -> Self {
        BlockStack {
            blocks: Vec::new(),
            current: 0,
            block_size: block_size.max(1),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of allocated blocks, including a retained spare.
    pub fn allocated_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn len(&self) -> usize {
        self.blocks
            .get(self.current)
            .map_or(0, |top| self.current * self.block_size + top.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&mut self, item: T) -> SlotId {
        if self.blocks.is_empty() {
            self.blocks.push(Vec::with_capacity(self.block_size));
            self.current = 0;
        } else if self.blocks[self.current].len() == self.block_size {
            self.current += 1;
            if self.current == self.blocks.len() {
                tracing::trace!(
                    block = self.current,
                    block_size = self.block_size,
                    "appending storage block"
                );
                self.blocks.push(Vec::with_capacity(self.block_size));
            }
        }
        let block = &mut self.blocks[self.current];
        block.push(item);
        SlotId(self.current * self.block_size + block.len() - 1)
    }

    pub fn pop(&mut self) -> Option<T> {
        let block = self.blocks.get_mut(self.current)?;
        let item = block.pop()?;
        if block.is_empty() {
            if self.blocks.len() > self.current + 1 {
                tracing::trace!(block = self.current + 1, "releasing spare storage block");
                self.blocks.truncate(self.current + 1);
            }
            if self.current > 0 {
                self.current -= 1;
            }
        }
        Some(item)
    }

    pub fn top(&self) -> Option<&T> {
        self.blocks.get(self.current).and_then(|b| b.last())
    }

    pub fn top_mut(&mut self) -> Option<&mut T> {
        self.blocks.get_mut(self.current).and_then(|b| b.last_mut())
    }

    pub fn get(&self, slot: SlotId) -> Option<&T> {
        if slot.0 >= self.len() {
            return None;
        }
        self.blocks
            .get(slot.0 / self.block_size)
            .and_then(|b| b.get(slot.0 % self.block_size))
    }

    pub fn get_mut(&mut self, slot: SlotId) -> Option<&mut T> {
        if slot.0 >= self.len() {
            return None;
        }
        self.blocks
            .get_mut(slot.0 / self.block_size)
            .and_then(|b| b.get_mut(slot.0 % self.block_size))
    }

    /// Live items from the most recently pushed down to the oldest.
    pub fn iter_rev(&self) -> impl Iterator<Item = (SlotId, &T)> + '_ {
        self.blocks[..self.blocks.len().min(self.current + 1)]
            .iter()
            .enumerate()
            .rev()
            .flat_map(move |(b, block)| {
                block
                    .iter()
                    .enumerate()
                    .rev()
                    .map(move |(i, item)| (SlotId(b * self.block_size + i), item))
            })
    }

    /// Every live item, oldest first.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> + '_ {
        self.blocks.iter_mut().flat_map(|b| b.iter_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn no_block_until_first_push() {
        let stack: BlockStack<u32> = BlockStack::new(4);
        assert_eq!(stack.allocated_blocks(), 0);
        assert!(stack.is_empty());
    }

    #[test]
    fn grows_by_whole_blocks() {
        let mut stack = BlockStack::new(2);
        for i in 0..5 {
            stack.push(i);
        }
        assert_eq!(stack.len(), 5);
        assert_eq!(stack.allocated_blocks(), 3);
        assert_eq!(stack.top(), Some(&4));
    }

    #[test]
    fn keeps_one_spare_block_and_reuses_it() {
        let mut stack = BlockStack::new(2);
        for i in 0..3 {
            stack.push(i);
        }
        // Popping the only item of block 1 steps back but keeps block 1.
        assert_eq!(stack.pop(), Some(2));
        assert_eq!(stack.allocated_blocks(), 2);

        // The spare is reused instead of allocating.
        stack.push(7);
        assert_eq!(stack.allocated_blocks(), 2);
        assert_eq!(stack.top(), Some(&7));
    }

    #[test]
    fn releases_trailing_spare_when_block_empties() {
        let mut stack = BlockStack::new(2);
        for i in 0..5 {
            stack.push(i);
        }
        // Blocks: [0,1] [2,3] [4]
        stack.pop(); // block 2 empties, kept as spare
        assert_eq!(stack.allocated_blocks(), 3);
        stack.pop();
        stack.pop(); // block 1 empties, block 2 is released
        assert_eq!(stack.allocated_blocks(), 2);
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn slot_ids_stay_addressable() {
        let mut stack = BlockStack::new(3);
        let ids: Vec<SlotId> = (0..7).map(|i| stack.push(i * 10)).collect();
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(stack.get(*id), Some(&(i * 10)));
        }
        stack.pop();
        assert_eq!(stack.get(ids[6]), None);
    }

    #[test]
    fn iter_rev_is_most_recent_first() {
        let mut stack = BlockStack::new(2);
        for i in 0..5 {
            stack.push(i);
        }
        let seen: Vec<i32> = stack.iter_rev().map(|(_, v)| *v).collect();
        assert_eq!(seen, vec![4, 3, 2, 1, 0]);
    }

    #[test]
    fn pop_on_empty_is_none() {
        let mut stack: BlockStack<u8> = BlockStack::new(1);
        assert_eq!(stack.pop(), None);
        stack.push(1);
        assert_eq!(stack.pop(), Some(1));
        assert_eq!(stack.pop(), None);
    }
}
