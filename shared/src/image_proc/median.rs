//! Median by partition-based selection.
//!
//! Quickselect with median-of-three pivoting, average-case O(n). The input
//! slice is reordered, so callers that need the original order pass a scratch
//! copy. For even lengths the lower of the two central elements is returned,
//! i.e. element `(n - 1) / 2` of the sorted sequence.

use ndarray::ArrayView2;

/// Select the element that would sit at index `k` if `values` were sorted.
///
/// Reorders `values` in place. Panics if `k` is out of bounds.
pub fn select_nth<T: PartialOrd + Copy>(values: &mut [T], k: usize) -> T {
    assert!(k < values.len(), "selection index out of bounds");

    let mut low = 0usize;
    let mut high = values.len() - 1;

    loop {
        if high <= low {
            return values[k];
        }

        if high == low + 1 {
            if values[low] > values[high] {
                values.swap(low, high);
            }
            return values[k];
        }

        // Median of three: leaves values[middle] <= values[low] <= values[high]
        let middle = low + (high - low) / 2;
        if values[middle] > values[high] {
            values.swap(middle, high);
        }
        if values[low] > values[high] {
            values.swap(low, high);
        }
        if values[middle] > values[low] {
            values.swap(middle, low);
        }

        // Pivot is values[low]; park the smallest of the three at low + 1
        values.swap(middle, low + 1);

        let mut ll = low + 1;
        let mut hh = high;
        loop {
            loop {
                ll += 1;
                if values[low] <= values[ll] {
                    break;
                }
            }
            loop {
                hh -= 1;
                if values[hh] <= values[low] {
                    break;
                }
            }
            if hh < ll {
                break;
            }
            values.swap(ll, hh);
        }

        values.swap(low, hh);

        if hh <= k {
            low = ll;
        }
        if hh >= k {
            high = hh - 1;
        }
    }
}

/// Median of a mutable slice, reordering it. `None` when empty.
pub fn median_in_place<T: PartialOrd + Copy>(values: &mut [T]) -> Option<T> {
    if values.is_empty() {
        return None;
    }
    let k = (values.len() - 1) / 2;
    Some(select_nth(values, k))
}

/// Median pixel value of an image.
///
/// `scratch` is cleared and refilled with the pixels, so repeated calls reuse
/// its allocation.
pub fn image_median(pixels: &ArrayView2<u16>, scratch: &mut Vec<f64>) -> Option<f64> {
    scratch.clear();
    scratch.extend(pixels.iter().map(|&p| f64::from(p)));
    median_in_place(scratch.as_mut_slice())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn sorted_median(values: &[f64]) -> f64 {
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        sorted[(sorted.len() - 1) / 2]
    }

    #[test]
    fn test_median_empty() {
        let mut empty: [f64; 0] = [];
        assert_eq!(median_in_place(&mut empty), None);
    }

    #[test]
    fn test_median_small_cases() {
        assert_eq!(median_in_place(&mut [7.0]), Some(7.0));
        assert_eq!(median_in_place(&mut [9.0, 3.0]), Some(3.0));
        assert_eq!(median_in_place(&mut [5.0, 1.0, 3.0]), Some(3.0));
        assert_eq!(median_in_place(&mut [4, 4, 4, 4]), Some(4));
    }

    #[test]
    fn test_median_even_length_takes_lower_middle() {
        let mut values = [10.0, 40.0, 20.0, 30.0];
        assert_eq!(median_in_place(&mut values), Some(20.0));
    }

    #[test]
    fn test_median_invariant_under_shuffle() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        for len in [1usize, 2, 3, 7, 64, 101, 1024] {
            let original: Vec<f64> = (0..len)
                .map(|_| f64::from(rng.random_range(0u16..4096)))
                .collect();
            let expected = sorted_median(&original);

            for _ in 0..5 {
                let mut shuffled = original.clone();
                shuffled.shuffle(&mut rng);
                assert_eq!(median_in_place(&mut shuffled), Some(expected), "len {len}");
            }
        }
    }

    #[test]
    fn test_select_nth_matches_sorted_order() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let original: Vec<i32> = (0..200).map(|_| rng.random_range(-50..50)).collect();
        let mut sorted = original.clone();
        sorted.sort();

        for k in [0, 1, 50, 99, 100, 199] {
            let mut work = original.clone();
            assert_eq!(select_nth(&mut work, k), sorted[k]);
        }
    }

    #[test]
    fn test_image_median_reuses_scratch() {
        let mut image = Array2::<u16>::from_elem((8, 8), 500);
        image[[3, 3]] = 60000;
        image[[4, 4]] = 0;

        let mut scratch = Vec::new();
        assert_eq!(image_median(&image.view(), &mut scratch), Some(500.0));
        let capacity = scratch.capacity();
        assert_eq!(image_median(&image.view(), &mut scratch), Some(500.0));
        assert_eq!(scratch.capacity(), capacity);
    }
}
