//! Raster configurations: the 2^n n! ways an n-dimensional array can be laid
//! out on disk (axis permutation plus a direction per axis).
//!
//! A configuration is written either as its number `D` (1 is canonical,
//! axis 1 fastest and every axis forward) or as an order array. Entry `k` of
//! the order array names the coordinate that the `k`-th fastest stored index
//! runs along, negative when it runs backward. For two dimensions:
//!
//! ```text
//! 1 ( 1, 2)   2 (-1, 2)   3 ( 1,-2)   4 (-1,-2)
//! 5 ( 2, 1)   6 ( 2,-1)   7 (-2, 1)   8 (-2,-1)
//! ```
//!
//! A negative configuration number denotes the inverse configuration.

use crate::error::{BdfError, Result};

/// Largest rank whose configurations can all be numbered in an `i64`.
pub const MAX_RASTER_DIMENSION: usize = 16;

/// Number of configurations of an `n`-dimensional array, `2^n n!`.
///
/// Returns 0 above [`MAX_RASTER_DIMENSION`].
pub fn raster_numbers(n: usize) -> i64 {
	if n > MAX_RASTER_DIMENSION {
		return 0;
	}
	(1..=n as i64).fold(1, |acc, i| acc * 2 * i)
}

/// 1-based position of `value` among the entries whose magnitude is at most
/// `n`; negative when it appears inverted, 0 when absent.
fn value_index(order: &[i64], n: i64, value: i64) -> i64 {
	let mut index = 1;
	for &o in order {
		if o.abs() <= n {
			if o == value {
				return index;
			} else if o == -value {
				return -index;
			}
			index += 1;
		}
	}
	0
}

/// Writes `value` into the `index`-th still empty cell.
fn place_value(order: &mut [i64], mut index: i64, value: i64) {
	for cell in order.iter_mut().filter(|c| **c == 0) {
		index -= 1;
		if index == 0 {
			*cell = value;
			return;
		}
	}
}

/// Order array of configuration `number` for an `n`-dimensional array.
pub fn number_to_order(n: usize, number: i64) -> Option<Vec<i64>> {
	if n == 0 || number == 0 {
		return None;
	}
	let mut order = vec![0i64; n];
	let mut d = number.abs();
	let mut rank = n;
	if n > MAX_RASTER_DIMENSION {
		if d > raster_numbers(MAX_RASTER_DIMENSION) {
			return None;
		}
		for (i, cell) in order.iter_mut().enumerate().skip(MAX_RASTER_DIMENSION) {
			*cell = i as i64 + 1;
		}
		rank = MAX_RASTER_DIMENSION;
	}
	let mut an = raster_numbers(rank);
	if d > an {
		return None;
	}
	for k in (1..=rank as i64).rev() {
		let an_m1 = an / (2 * k);
		let m = (d - 1) / (2 * an_m1);
		d -= m * 2 * an_m1;
		let index = k - m;
		let value = if d <= an_m1 {
			k
		} else {
			d -= an_m1;
			-k
		};
		place_value(&mut order[..rank], index, value);
		an = an_m1;
	}
	if number < 0 {
		order = order_inversion(&order);
	}
	Some(order)
}

/// Configuration number of an order array, 0 if it is not a valid order.
pub fn order_to_number(order: &[i64]) -> i64 {
	let mut n = order.len();
	if n > MAX_RASTER_DIMENSION {
		if order.iter().enumerate().skip(MAX_RASTER_DIMENSION).any(|(i, &o)| o != i as i64 + 1) {
			return 0;
		}
		n = MAX_RASTER_DIMENSION;
	}
	let mut d = 1;
	let mut an_m1 = 1;
	for i in 1..=n as i64 {
		let index = value_index(order, i, i);
		if index == 0 {
			return 0;
		}
		d += if index > 0 {
			(i - index) * 2 * an_m1
		} else {
			(i + index) * 2 * an_m1 + an_m1
		};
		an_m1 *= 2 * i;
	}
	d
}

/// `a` with `a * x = 1`.
pub fn order_inversion(x: &[i64]) -> Vec<i64> {
	let n = x.len() as i64;
	let mut a = vec![0i64; x.len()];
	for (i, &o) in x.iter().enumerate() {
		if o.abs() <= n && o != 0 {
			let sign = o.signum();
			a[(o.abs() - 1) as usize] = sign * (i as i64 + 1);
		}
	}
	a
}

/// Applies transformation `a` to configuration `x`.
pub fn order_multiplication(a: &[i64], x: &[i64]) -> Vec<i64> {
	a.iter()
		.map(|&i| match x.get((i.unsigned_abs() as usize).wrapping_sub(1)) {
			Some(&v) if i != 0 => i.signum() * v,
			_ => 0,
		})
		.collect()
}

/// Configuration number of `a * x`, 0 on invalid input.
pub fn raster_multiplication(a: i64, x: i64) -> i64 {
	match (
		number_to_order(MAX_RASTER_DIMENSION, a),
		number_to_order(MAX_RASTER_DIMENSION, x),
	) {
		(Some(a), Some(x)) => order_to_number(&order_multiplication(&a, &x)),
		_ => 0,
	}
}

/// Number of the configuration that maps `x` back to 1.
pub fn raster_inversion(x: i64) -> i64 {
	number_to_order(MAX_RASTER_DIMENSION, x)
		.map(|order| order_to_number(&order_inversion(&order)))
		.unwrap_or(0)
}

/// Walks stored element positions in order and yields, for each, the element
/// index inside the canonical array.
struct CanonicalIndex {
	loops: Vec<usize>,
	steps: Vec<isize>,
	counters: Vec<usize>,
	offset: isize,
	remaining: usize,
}

impl CanonicalIndex {
	fn new(dims: &[usize], order: &[i64]) -> Result<Self> {
		let n = dims.len();
		if order.len() != n || order_to_number(order) == 0 && n <= MAX_RASTER_DIMENSION {
			return Err(BdfError::DataConversionFailed(format!(
				"bad raster order {:?} for {} dimensions",
				order, n
			)));
		}
		let mut loops = Vec::with_capacity(n);
		let mut steps = Vec::with_capacity(n);
		let mut offset = 0isize;
		for &o in order {
			let axis = o.unsigned_abs() as usize;
			if axis == 0 || axis > n {
				return Err(BdfError::DataConversionFailed(format!("bad raster order {:?}", order)));
			}
			let wrap: usize = dims[..axis - 1].iter().product();
			let extent = dims[axis - 1];
			loops.push(extent);
			if o < 0 {
				offset += (extent as isize - 1) * wrap as isize;
				steps.push(-(wrap as isize));
			} else {
				steps.push(wrap as isize);
			}
		}
		Ok(Self {
			remaining: dims.iter().product(),
			counters: vec![0; n],
			loops,
			steps,
			offset,
		})
	}
}

impl Iterator for CanonicalIndex {
	type Item = usize;

	fn next(&mut self) -> Option<usize> {
		if self.remaining == 0 {
			return None;
		}
		self.remaining -= 1;
		let current = self.offset as usize;
		for k in 0..self.counters.len() {
			self.counters[k] += 1;
			if self.counters[k] < self.loops[k] {
				self.offset += self.steps[k];
				break;
			}
			self.counters[k] = 0;
			self.offset -= self.steps[k] * (self.loops[k] as isize - 1);
		}
		Some(current)
	}
}

fn check_lengths(dest: &[u8], src: &[u8], dims: &[usize], item: usize) -> Result<()> {
	let required = dims.iter().product::<usize>() * item;
	if dims.is_empty() || required == 0 {
		return Err(BdfError::DataConversionFailed("no or zero dimension".to_string()));
	}
	if src.len() < required || dest.len() < required {
		return Err(BdfError::DataBufferTooSmall { required, available: src.len().min(dest.len()) });
	}
	Ok(())
}

/// Reorders `src`, stored with configuration `raster`, into canonical `dest`.
///
/// `dims` are the canonical extents. The buffers must not overlap, which the
/// borrow rules already guarantee.
pub fn normalize(dest: &mut [u8], src: &[u8], dims: &[usize], raster: i64, item: usize) -> Result<()> {
	check_lengths(dest, src, dims, item)?;
	if raster == 1 {
		let len = dims.iter().product::<usize>() * item;
		dest[..len].copy_from_slice(&src[..len]);
		return Ok(());
	}
	let order = number_to_order(dims.len(), raster)
		.ok_or_else(|| BdfError::DataConversionFailed(format!("bad raster configuration {}", raster)))?;
	for (stored, canonical) in CanonicalIndex::new(dims, &order)?.enumerate() {
		dest[canonical * item..(canonical + 1) * item].copy_from_slice(&src[stored * item..(stored + 1) * item]);
	}
	Ok(())
}

/// Inverse of [`normalize`]: lays canonical `src` out with configuration `raster`.
pub fn denormalize(dest: &mut [u8], src: &[u8], dims: &[usize], raster: i64, item: usize) -> Result<()> {
	check_lengths(dest, src, dims, item)?;
	if raster == 1 {
		let len = dims.iter().product::<usize>() * item;
		dest[..len].copy_from_slice(&src[..len]);
		return Ok(());
	}
	let order = number_to_order(dims.len(), raster)
		.ok_or_else(|| BdfError::DataConversionFailed(format!("bad raster configuration {}", raster)))?;
	for (stored, canonical) in CanonicalIndex::new(dims, &order)?.enumerate() {
		dest[stored * item..(stored + 1) * item].copy_from_slice(&src[canonical * item..(canonical + 1) * item]);
	}
	Ok(())
}

/// Extents of the array as it is stored under configuration `raster`.
pub fn stored_dims(dims: &[usize], raster: i64) -> Option<Vec<usize>> {
	let order = number_to_order(dims.len(), raster)?;
	order.iter().map(|o| dims.get((o.unsigned_abs() as usize).checked_sub(1)?).copied()).collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::{rngs::StdRng, Rng, SeedableRng};

	#[test]
	fn test_numbers() {
		assert_eq!(raster_numbers(0), 1);
		assert_eq!(raster_numbers(1), 2);
		assert_eq!(raster_numbers(2), 8);
		assert_eq!(raster_numbers(3), 48);
		assert_eq!(raster_numbers(17), 0);
	}

	#[test]
	fn test_two_dimensional_table() {
		let expected = [
			[1, 2],
			[-1, 2],
			[1, -2],
			[-1, -2],
			[2, 1],
			[2, -1],
			[-2, 1],
			[-2, -1],
		];
		for (i, order) in expected.iter().enumerate() {
			let number = i as i64 + 1;
			assert_eq!(number_to_order(2, number).unwrap(), order.to_vec());
			assert_eq!(order_to_number(order), number);
		}
		assert!(number_to_order(2, 9).is_none());
	}

	#[test]
	fn test_three_dimensional_samples() {
		assert_eq!(number_to_order(3, 13).unwrap(), vec![2, 1, -3]);
		assert_eq!(number_to_order(3, 17).unwrap(), vec![1, 3, 2]);
		assert_eq!(number_to_order(3, 33).unwrap(), vec![3, 1, 2]);
		assert_eq!(number_to_order(3, 48).unwrap(), vec![-3, -2, -1]);
		for d in 1..=48 {
			assert_eq!(order_to_number(&number_to_order(3, d).unwrap()), d);
		}
	}

	#[test]
	fn test_inversion_composes_to_identity() {
		for x in 1..=48 {
			let a = raster_inversion(x);
			assert_eq!(raster_multiplication(a, x), 1, "x = {}", x);
		}
		assert_eq!(number_to_order(2, -6).unwrap(), order_inversion(&[2, -1]));
	}

	#[test]
	fn test_normalize_transpose() {
		// stored with the fast index running along axis 2: dims are 2 x 3
		let dims = [2usize, 3];
		let stored: Vec<u8> = vec![1, 3, 5, 2, 4, 6];
		let mut canonical = vec![0u8; 6];
		normalize(&mut canonical, &stored, &dims, 5, 1).unwrap();
		assert_eq!(canonical, vec![1, 2, 3, 4, 5, 6]);
	}

	#[test]
	fn test_normalize_mirror() {
		let dims = [3usize, 2];
		let stored: Vec<u8> = vec![3, 2, 1, 6, 5, 4];
		let mut canonical = vec![0u8; 6];
		normalize(&mut canonical, &stored, &dims, 2, 1).unwrap();
		assert_eq!(canonical, vec![1, 2, 3, 4, 5, 6]);
	}

	#[test]
	fn test_denormalize_inverts_normalize() {
		let mut rng = StdRng::seed_from_u64(3);
		let dims = [4usize, 3, 2];
		let item = 2;
		let canonical: Vec<u8> = (0..24 * item).map(|_| rng.gen()).collect();
		for raster in [1, 2, 5, 13, 22, 48, -7] {
			let mut stored = vec![0u8; canonical.len()];
			let mut back = vec![0u8; canonical.len()];
			denormalize(&mut stored, &canonical, &dims, raster, item).unwrap();
			normalize(&mut back, &stored, &dims, raster, item).unwrap();
			assert_eq!(back, canonical, "raster {}", raster);
		}
	}

	#[test]
	fn test_inverse_configuration_normalizes() {
		// normalizing with x then storing with inversion(x) equals the original layout
		let dims = [3usize, 3];
		let data: Vec<u8> = (1..=9).collect();
		for x in 1..=8 {
			let mut once = vec![0u8; 9];
			let mut twice = vec![0u8; 9];
			normalize(&mut once, &data, &dims, x, 1).unwrap();
			normalize(&mut twice, &once, &dims, raster_inversion(x), 1).unwrap();
			assert_eq!(twice, data, "raster {}", x);
		}
	}

	#[test]
	fn test_stored_dims() {
		assert_eq!(stored_dims(&[2, 3], 5).unwrap(), vec![3, 2]);
		assert_eq!(stored_dims(&[2, 3], 2).unwrap(), vec![2, 3]);
	}

	#[test]
	fn test_bad_configuration() {
		let mut out = vec![0u8; 4];
		assert!(normalize(&mut out, &[0u8; 4], &[2, 2], 9, 1).is_err());
		assert!(normalize(&mut out, &[0u8; 2], &[2, 2], 1, 1).is_err());
	}
}
