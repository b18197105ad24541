//! Block boundary accounting for alternating mode.

use plan::Channel;

/// Tracks how many bytes of the current block have been delivered and decides when
/// the receiver should move to the other channel.
pub struct BlockAccountant {
    /// Channels to alternate between.
    channels: [Channel; 2],
    /// Index of the channel receiving the current block.
    active: usize,
    /// Bytes of the current block delivered so far.
    filled: u32,
    /// Number of completed blocks.
    blocks: u64,
}

impl BlockAccountant {
    /// Create a new `BlockAccountant` starting at the beginning of a block on the first
    /// channel.
    pub fn new(channels: [Channel; 2]) -> Self {
        BlockAccountant {
            channels: channels,
            active: 0,
            filled: 0,
            blocks: 0,
        }
    }

    /// Record a delivered chunk of the given length (bytes).
    ///
    /// All bytes in the chunk are attributed to the active channel. If the chunk
    /// completes the block, switch to the other channel and return its frequency.
    pub fn record_chunk(&mut self, len: usize) -> Option<u32> {
        let block = self.channels[self.active].block;

        // Saturate rather than wrap so an oversized chunk still completes the block.
        self.filled = (self.filled as u64 + len as u64).min(block as u64) as u32;

        if self.filled < block {
            return None;
        }

        self.filled = 0;
        self.active ^= 1;
        self.blocks += 1;

        let next = self.channels[self.active];
        debug!("block {} done, switching to channel {} ({} Hz)",
               self.blocks, self.active, next.freq);

        Some(next.freq)
    }

    /// Index of the channel receiving the current block.
    #[cfg(test)]
    pub fn active(&self) -> usize { self.active }

    /// Bytes of the current block delivered so far.
    #[cfg(test)]
    pub fn filled(&self) -> u32 { self.filled }

    /// Number of completed blocks.
    pub fn blocks(&self) -> u64 { self.blocks }
}
