//! The legacy (MITE) decoder: turns predecoded instructions into laminated
//! uops at up to `n_decoders` instructions per cycle, subject to the
//! single-complex-decoder rule and decode-group termination.

use uarch_types::{Instr, MicroArchConfig};

use crate::front_end::predecoder::{PredecodedInstr, PreDecoder};
use crate::uop::{InstanceId, LaminatedUopId, UopArena};

/// Decodes as many eligible instructions as `n_decoders` and the
/// complex-decoder/decode-group rules allow, appending their laminated uops
/// (in program order) to `out`. Returns the instances decoded this cycle.
pub fn decode_cycle(
    cfg: &MicroArchConfig,
    predecoder: &mut PreDecoder,
    arena: &UopArena,
    instrs: &[Instr],
    cycle: u64,
    out: &mut Vec<LaminatedUopId>,
) -> Vec<InstanceId> {
    let mut decoded = Vec::new();
    let mut lanes_used = 0u32;
    let mut complex_decoder_used = false;

    while lanes_used < cfg.n_decoders {
        let Some(next) = predecoder.peek_front(cycle) else {
            break;
        };
        let instr = instr_of(arena, instrs, next.instance);

        if instr.uses_complex_decoder {
            if complex_decoder_used {
                break;
            }
            complex_decoder_used = true;
        }

        let PredecodedInstr {
            instance,
            ends_decode_group,
            stack_sync,
            ..
        } = predecoder.pop_eligible(cycle).expect("just peeked Some");

        if let Some(sync_lam) = stack_sync {
            out.push(sync_lam);
        }
        out.extend(arena.instance(instance).laminated_uops.iter().copied());
        decoded.push(instance);
        lanes_used += 1;

        if ends_decode_group {
            break;
        }
    }

    decoded
}

fn instr_of<'a>(arena: &UopArena, instrs: &'a [Instr], instance: InstanceId) -> &'a Instr {
    &instrs[arena.instance(instance).instr_index as usize]
}
