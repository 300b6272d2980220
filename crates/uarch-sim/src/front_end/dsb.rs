//! The DSB (Decode Stream Buffer / uop cache): once a block of instructions
//! has been established as cacheable, later passes through it are served
//! here instead of through predecode and the legacy decoder.

use std::collections::HashSet;

use uarch_types::MicroArchConfig;

/// Tracks which `order` positions (indices into `Program::order`) are
/// currently served from the DSB. Population is all-or-nothing per run: see
/// `Dsb::warm_up`, which decides cacheability once for the whole program
/// rather than modeling the incremental fill uiCA's `addNewCacheBlock`
/// performs pass-by-pass (recorded as an Open Question resolution).
#[derive(Debug, Default)]
pub struct Dsb {
    cached_positions: HashSet<usize>,
}

impl Dsb {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decides, once per run, which program positions the DSB will serve.
    /// A position is cacheable when its instruction's containing
    /// `dsb_block_size`-byte-aligned block holds only instructions that
    /// individually qualify (no instruction that must use the complex
    /// decoder and, on cores requiring it, no branch as the block's last
    /// instruction).
    pub fn warm_up(
        &mut self,
        cfg: &MicroArchConfig,
        instrs: &[uarch_types::Instr],
        order: &[u32],
        addresses: &[u64],
    ) {
        self.cached_positions.clear();
        let block_size = u64::from(cfg.dsb_block_size);
        let mut block_start = 0usize;
        while block_start < order.len() {
            let base_addr = addresses[block_start] - addresses[block_start] % block_size;
            let mut end = block_start;
            let mut block_ok = true;
            while end < order.len() && addresses[end] < base_addr + block_size {
                let instr = &instrs[order[end] as usize];
                if instr.uses_complex_decoder {
                    block_ok = false;
                }
                end += 1;
            }
            if end > block_start {
                let last_instr = &instrs[order[end - 1] as usize];
                if last_instr.is_branch && !cfg.branch_can_be_last_instr_in_cached_block {
                    block_ok = false;
                }
            }
            if block_ok {
                self.cached_positions.extend(block_start..end);
            }
            block_start = end.max(block_start + 1);
        }
    }

    #[must_use]
    pub fn covers(&self, order_position: usize) -> bool {
        self.cached_positions.contains(&order_position)
    }

    /// Whether every position in `0..order_len` is DSB-cacheable — the
    /// whole-program cacheability bar the LSD's first-round admission
    /// requires before it will ever replay a loop.
    #[must_use]
    pub fn all_covered(&self, order_len: usize) -> bool {
        (0..order_len).all(|p| self.cached_positions.contains(&p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uarch_types::Instr;

    #[test]
    fn warms_up_a_fully_simple_block() {
        let cfg = MicroArchConfig::haswell_like();
        let instrs = vec![Instr::unknown("add", 1, &cfg.all_ports)];
        let order = vec![0u32; 4];
        let addresses = vec![0u64, 1, 2, 3];
        let mut dsb = Dsb::new();
        dsb.warm_up(&cfg, &instrs, &order, &addresses);
        assert!(dsb.covers(0));
    }

    #[test]
    fn complex_decoder_instruction_blocks_caching() {
        let cfg = MicroArchConfig::haswell_like();
        let mut complex = Instr::unknown("enter", 1, &cfg.all_ports);
        complex.uses_complex_decoder = true;
        let instrs = vec![complex];
        let order = vec![0u32; 2];
        let addresses = vec![0u64, 1];
        let mut dsb = Dsb::new();
        dsb.warm_up(&cfg, &instrs, &order, &addresses);
        assert!(!dsb.covers(0));
    }
}
