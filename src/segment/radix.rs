//! Radix sort over packed 64-bit keys
//!
//! MSD byte-wise radix sort examining the top `key_bits` bits of each
//! item's key, with a comparison fallback for small buckets and for runs
//! whose radixed bits are exhausted. The comparator must be a total order
//! consistent with the key prefix; it resolves whatever the radix phase
//! leaves tied (for terms, the bytes past the 4-byte prefix; for
//! positions, the low doc-id byte and the term position).

use std::cmp::Ordering;

/// Below this bucket size a comparison sort wins over another radix pass
const INSERTION_THRESHOLD: usize = 16;

/// Sort `items` by the top `key_bits` bits of `key`, breaking ties with
/// `cmp`. `key_bits` must be a positive multiple of 8, at most 64.
pub fn radix_sort_by_key<T, K, C>(items: &mut [T], key: &K, cmp: &C, key_bits: u32)
where
    T: Copy,
    K: Fn(&T) -> u64,
    C: Fn(&T, &T) -> Ordering,
{
    debug_assert!(key_bits > 0 && key_bits <= 64 && key_bits % 8 == 0);
    if items.len() <= 1 {
        return;
    }

    let mut scratch = Vec::with_capacity(items.len());
    let min_shift = 64 - key_bits as i32;
    sort_range(items, &mut scratch, key, cmp, 56, min_shift);
}

fn sort_range<T, K, C>(
    items: &mut [T],
    scratch: &mut Vec<T>,
    key: &K,
    cmp: &C,
    shift: i32,
    min_shift: i32,
) where
    T: Copy,
    K: Fn(&T) -> u64,
    C: Fn(&T, &T) -> Ordering,
{
    if items.len() <= INSERTION_THRESHOLD || shift < min_shift {
        items.sort_unstable_by(|a, b| cmp(a, b));
        return;
    }

    let radix = |item: &T| ((key(item) >> shift) & 0xFF) as usize;

    let mut counts = [0usize; 256];
    for item in items.iter() {
        counts[radix(item)] += 1;
    }

    // Exclusive prefix sum: starts[b] = first slot of bucket b
    let mut starts = [0usize; 256];
    let mut sum = 0;
    for (b, count) in counts.iter().enumerate() {
        starts[b] = sum;
        sum += count;
    }

    scratch.clear();
    scratch.extend_from_slice(items);
    let mut cursors = starts;
    for item in scratch.iter() {
        let b = radix(item);
        items[cursors[b]] = *item;
        cursors[b] += 1;
    }

    for b in 0..256 {
        let start = starts[b];
        let end = start + counts[b];
        if end - start > 1 {
            sort_range(&mut items[start..end], scratch, key, cmp, shift - 8, min_shift);
        }
    }
}
