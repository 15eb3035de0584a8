/// Reverses the byte order of every `width`-byte element of `buffer` in place.
///
/// A trailing partial element is left untouched. Widths 0 and 1 are no-ops.
pub fn swap_in_place(buffer: &mut [u8], width: usize) {
	if width < 2 {
		return;
	}
	for element in buffer.chunks_exact_mut(width) {
		element.reverse();
	}
}

/// Swap only when `order` differs from the machine's.
pub fn swap_to_native(buffer: &mut [u8], width: usize, order: crate::types::ByteOrder) {
	if !order.is_native() {
		swap_in_place(buffer, width);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::{rngs::StdRng, Rng, SeedableRng};

	#[test]
	fn test_swap_u32() {
		let mut buf = vec![1, 2, 3, 4, 5, 6, 7, 8];
		swap_in_place(&mut buf, 4);
		assert_eq!(buf, vec![4, 3, 2, 1, 8, 7, 6, 5]);
	}

	#[test]
	fn test_swap_is_involution() {
		let mut rng = StdRng::seed_from_u64(7);
		for width in [1usize, 2, 4, 8] {
			let original: Vec<u8> = (0..width * 37).map(|_| rng.gen()).collect();
			let mut buf = original.clone();
			swap_in_place(&mut buf, width);
			swap_in_place(&mut buf, width);
			assert_eq!(buf, original);
		}
	}

	#[test]
	fn test_partial_tail_untouched() {
		let mut buf = vec![1, 2, 3];
		swap_in_place(&mut buf, 2);
		assert_eq!(buf, vec![2, 1, 3]);
	}
}
