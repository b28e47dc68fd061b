//! Ring of recent send boundaries
//!
//! Each slot holds the first-unsent move index recorded by one outgoing
//! packet. The oldest slot decides where the next packet's move window
//! starts, so every move rides in `N` consecutive packets before the sender
//! stops retransmitting it on its own.

pub const DELIVERY_PIPELINE_DEPTH: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryPipeline<const N: usize = DELIVERY_PIPELINE_DEPTH> {
    slots: [u32; N],
}

impl<const N: usize> Default for DeliveryPipeline<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> DeliveryPipeline<N> {
    pub fn new() -> Self {
        assert!(N > 0, "delivery pipeline needs at least one slot");
        Self { slots: [0; N] }
    }

    pub fn depth(&self) -> usize {
        N
    }

    /// Boundary recorded `N` sends ago
    pub fn oldest(&self) -> u32 {
        self.slots[0]
    }

    /// Records a new send boundary, forgetting the oldest
    pub fn push(&mut self, first_unsent: u32) {
        self.slots.rotate_left(1);
        self.slots[N - 1] = first_unsent;
    }

    /// Forgets history, e.g. after the move indices were re-based
    pub fn reset(&mut self, index: u32) {
        self.slots = [index; N];
    }
}
