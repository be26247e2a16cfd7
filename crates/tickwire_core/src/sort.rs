//! # Priority Sort
//!
//! Least-significant-digit radix sort over decimal digits of a priority.
//! Linear in the number of items, deterministic, and stable for ties.

/// Anything carrying a replication priority.
pub trait Prioritized {
    /// Sort key. Higher sorts first.
    fn priority(&self) -> u32;
}

impl Prioritized for u32 {
    fn priority(&self) -> u32 {
        *self
    }
}

#[inline]
fn digit(value: u32, exp: u64) -> usize {
    ((u64::from(value) / exp) % 10) as usize
}

/// Sorts `items` by priority, highest first.
///
/// Runs a counting sort per decimal digit over the reversed input, then
/// reverses the result; items with equal priority keep their relative order.
pub fn radix_sort_descending<T: Prioritized>(items: &mut Vec<T>) {
    if items.len() < 2 {
        return;
    }

    let keys: Vec<u32> = items.iter().map(Prioritized::priority).collect();
    let max = keys.iter().copied().max().unwrap_or(0);

    // Ascending stable passes over the reversed order, so that the final
    // reversal restores the input order among ties.
    let mut order: Vec<usize> = (0..items.len()).rev().collect();
    let mut scratch = vec![0usize; items.len()];

    let mut exp: u64 = 1;
    while u64::from(max) / exp > 0 {
        let mut counts = [0usize; 10];
        for &index in &order {
            counts[digit(keys[index], exp)] += 1;
        }
        for d in 1..10 {
            counts[d] += counts[d - 1];
        }
        for &index in order.iter().rev() {
            let d = digit(keys[index], exp);
            counts[d] -= 1;
            scratch[counts[d]] = index;
        }
        std::mem::swap(&mut order, &mut scratch);
        exp *= 10;
    }

    order.reverse();

    let mut slots: Vec<Option<T>> = items.drain(..).map(Some).collect();
    items.extend(order.iter().filter_map(|&index| slots[index].take()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Tagged(u32, char);

    impl Prioritized for Tagged {
        fn priority(&self) -> u32 {
            self.0
        }
    }

    #[test]
    fn test_sorts_descending() {
        let mut values = vec![5u32, 170, 45, 75, 90, 802, 24, 2, 66];
        radix_sort_descending(&mut values);
        assert_eq!(values, vec![802, 170, 90, 75, 66, 45, 24, 5, 2]);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let mut values = vec![
            Tagged(3, 'a'),
            Tagged(10, 'b'),
            Tagged(3, 'c'),
            Tagged(10, 'd'),
            Tagged(0, 'e'),
            Tagged(3, 'f'),
        ];
        radix_sort_descending(&mut values);

        let tags: String = values.iter().map(|t| t.1).collect();
        assert_eq!(tags, "bdacfe");
    }

    #[test]
    fn test_all_zero_keeps_order() {
        let mut values = vec![Tagged(0, 'x'), Tagged(0, 'y'), Tagged(0, 'z')];
        radix_sort_descending(&mut values);
        let tags: String = values.iter().map(|t| t.1).collect();
        assert_eq!(tags, "xyz");
    }

    #[test]
    fn test_large_priorities() {
        let mut values = vec![u32::MAX, 0, 4_000_000_000, 1];
        radix_sort_descending(&mut values);
        assert_eq!(values, vec![u32::MAX, 4_000_000_000, 1, 0]);
    }
}
