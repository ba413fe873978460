/// Free-space map over the volume's blocks: one flag per block, `true` means
/// used. Not persisted; the daemon rebuilds it from the directory tree at
/// load and the bootstrap marks the reserved blocks used.
#[derive(Debug, Clone)]
pub struct BlockBitmap {
    bits: Vec<bool>,
    used: u32,
}

impl BlockBitmap {
    pub fn new(total_blocks: u32) -> Self {
        Self {
            bits: vec![false; total_blocks as usize],
            used: 0,
        }
    }

    pub fn total_blocks(&self) -> u32 {
        self.bits.len() as u32
    }

    pub fn free_blocks(&self) -> u32 {
        self.total_blocks() - self.used
    }

    pub fn is_used(&self, block: u32) -> bool {
        self.bits.get(block as usize).copied().unwrap_or(false)
    }

    /// First-fit scan for `count` consecutive free blocks. Marks the run used
    /// and returns its start block, or `None` when no such run exists.
    pub fn allocate(&mut self, count: u32) -> Option<u32> {
        if count == 0 {
            return None;
        }
        let mut run = 0u32;
        let mut start = 0u32;
        for i in 0..self.total_blocks() {
            if self.bits[i as usize] {
                run = 0;
                continue;
            }
            if run == 0 {
                start = i;
            }
            run += 1;
            if run == count {
                self.mark_used(start, count);
                return Some(start);
            }
        }
        None
    }

    /// Clears `count` flags from `start`. Already-free and out-of-range
    /// blocks are skipped without touching the counter.
    pub fn free(&mut self, start: u32, count: u32) {
        for i in start..start.saturating_add(count) {
            if let Some(bit) = self.bits.get_mut(i as usize) {
                if *bit {
                    *bit = false;
                    self.used -= 1;
                }
            }
        }
    }

    /// Sets `count` flags from `start`. Already-used and out-of-range blocks
    /// are skipped without touching the counter.
    pub fn mark_used(&mut self, start: u32, count: u32) {
        for i in start..start.saturating_add(count) {
            if let Some(bit) = self.bits.get_mut(i as usize) {
                if !*bit {
                    *bit = true;
                    self.used += 1;
                }
            }
        }
    }
}
