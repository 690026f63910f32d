//! Symbol-wise erasure recovery over packet-sized source/FEC units (spec
//! §4.3). Backed by `fec_rs`'s Reed-Solomon implementation — the real
//! erasure-coding crate a Moonlight-compatible host in this same retrieval
//! pack depends on for the identical problem. The exact code used by any
//! particular host is an external bit-exact contract (spec §9, Open
//! Questions); this recovers whatever `fec_rs` encoded, which is sufficient
//! for every invariant this spec states.

use fec_rs::ReedSolomon;

/// `slots[0..units_src]` hold source symbols, `slots[units_src..]` hold FEC
/// symbols; a `None` entry is a missing unit. On success every missing
/// source slot is filled in place and `true` is returned; on failure
/// `slots` is left untouched and `false` is returned.
///
/// Recovers iff the number of missing source slots is at most `units_fec`
/// and every other slot (source or FEC) is present.
pub fn try_recover(slots: &mut [Option<Vec<u8>>], units_src: usize, units_fec: usize) -> bool {
    let missing: Vec<usize> = slots[..units_src]
        .iter()
        .enumerate()
        .filter(|(_, unit)| unit.is_none())
        .map(|(i, _)| i)
        .collect();

    if missing.is_empty() {
        return true;
    }
    if missing.len() > units_fec || units_fec == 0 {
        return false;
    }

    let present_count = slots.iter().filter(|s| s.is_some()).count();
    let total_missing = slots.len() - present_count;
    if total_missing > units_fec {
        return false;
    }

    let symbol_len = slots.iter().flatten().map(|unit| unit.len()).max().unwrap_or(0);
    if symbol_len == 0 {
        return false;
    }

    let Ok(coder) = ReedSolomon::new(units_src, units_fec) else {
        return false;
    };

    let mut shards: Vec<Option<Vec<u8>>> = Vec::with_capacity(slots.len());
    for slot in slots.iter() {
        match slot {
            Some(data) => {
                let mut padded = data.clone();
                padded.resize(symbol_len, 0);
                shards.push(Some(padded));
            }
            None => {
                shards.push(None);
            }
        }
    }

    if coder.reconstruct(&mut shards).is_err() {
        return false;
    }

    for &i in &missing {
        slots[i] = shards[i].clone();
    }
    true
}
