//! Numeric conversion between the ten payload element types.
//!
//! Buffers handled here are always in machine byte order. Values pass through
//! a wide intermediate (`i128` or `f64`), get the value offset added, and are
//! then clipped to the destination range.

use crate::error::{BdfError, Result};
use crate::types::DataType;
use byteorder::{ByteOrder as _, NativeEndian};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Value {
	Int(i128),
	Float(f64),
}

fn integer_range(data_type: DataType) -> (i128, i128) {
	match data_type {
		DataType::U8 => (0, u8::MAX as i128),
		DataType::I8 => (i8::MIN as i128, i8::MAX as i128),
		DataType::U16 => (0, u16::MAX as i128),
		DataType::I16 => (i16::MIN as i128, i16::MAX as i128),
		DataType::U32 => (0, u32::MAX as i128),
		DataType::I32 => (i32::MIN as i128, i32::MAX as i128),
		DataType::U64 => (0, u64::MAX as i128),
		DataType::I64 => (i64::MIN as i128, i64::MAX as i128),
		DataType::F32 | DataType::F64 => (i128::MIN, i128::MAX),
	}
}

fn decode(data_type: DataType, bytes: &[u8]) -> Value {
	match data_type {
		DataType::U8 => Value::Int(bytes[0] as i128),
		DataType::I8 => Value::Int(bytes[0] as i8 as i128),
		DataType::U16 => Value::Int(NativeEndian::read_u16(bytes) as i128),
		DataType::I16 => Value::Int(NativeEndian::read_i16(bytes) as i128),
		DataType::U32 => Value::Int(NativeEndian::read_u32(bytes) as i128),
		DataType::I32 => Value::Int(NativeEndian::read_i32(bytes) as i128),
		DataType::U64 => Value::Int(NativeEndian::read_u64(bytes) as i128),
		DataType::I64 => Value::Int(NativeEndian::read_i64(bytes) as i128),
		DataType::F32 => Value::Float(NativeEndian::read_f32(bytes) as f64),
		DataType::F64 => Value::Float(NativeEndian::read_f64(bytes)),
	}
}

fn clip(data_type: DataType, value: Value) -> i128 {
	let (min, max) = integer_range(data_type);
	match value {
		Value::Int(v) => v.clamp(min, max),
		Value::Float(f) if f.is_nan() => min,
		Value::Float(f) => {
			if f <= min as f64 {
				min
			} else if f >= max as f64 {
				max
			} else {
				// f64::round is half away from zero
				(f.round() as i128).clamp(min, max)
			}
		}
	}
}

fn encode(data_type: DataType, value: Value, out: &mut [u8]) {
	match data_type {
		DataType::F32 => {
			let f = match value {
				Value::Int(v) => v as f32,
				Value::Float(f) => f as f32,
			};
			NativeEndian::write_f32(out, f);
		}
		DataType::F64 => {
			let f = match value {
				Value::Int(v) => v as f64,
				Value::Float(f) => f,
			};
			NativeEndian::write_f64(out, f);
		}
		DataType::U8 => out[0] = clip(data_type, value) as u8,
		DataType::I8 => out[0] = clip(data_type, value) as i8 as u8,
		DataType::U16 => NativeEndian::write_u16(out, clip(data_type, value) as u16),
		DataType::I16 => NativeEndian::write_i16(out, clip(data_type, value) as i16),
		DataType::U32 => NativeEndian::write_u32(out, clip(data_type, value) as u32),
		DataType::I32 => NativeEndian::write_i32(out, clip(data_type, value) as i32),
		DataType::U64 => NativeEndian::write_u64(out, clip(data_type, value) as u64),
		DataType::I64 => NativeEndian::write_i64(out, clip(data_type, value) as i64),
	}
}

fn biased(value: Value, offset: i64) -> Value {
	if offset == 0 {
		return value;
	}
	match value {
		Value::Int(v) => Value::Int(v + offset as i128),
		Value::Float(f) => Value::Float(f + offset as f64),
	}
}

fn element_count(len: usize, data_type: DataType) -> Result<usize> {
	let width = data_type.size_of();
	if len % width != 0 {
		return Err(BdfError::DataConversionFailed(format!(
			"buffer of {} bytes is not a whole number of {} elements",
			len, data_type
		)));
	}
	Ok(len / width)
}

/// Converts `buffer` from `from` to `to` elements in place, adding `offset`.
///
/// The buffer grows or shrinks to the converted size. Narrowing walks the
/// elements upward and widening walks them downward, so no element is
/// overwritten before it is read.
pub fn convert_in_place(buffer: &mut Vec<u8>, from: DataType, to: DataType, offset: i64) -> Result<()> {
	if from == to && offset == 0 {
		return Ok(());
	}
	let count = element_count(buffer.len(), from)?;
	let (sw, dw) = (from.size_of(), to.size_of());
	if dw > sw {
		buffer.resize(count * dw, 0);
		for i in (0..count).rev() {
			let value = biased(decode(from, &buffer[i * sw..(i + 1) * sw]), offset);
			encode(to, value, &mut buffer[i * dw..(i + 1) * dw]);
		}
	} else {
		for i in 0..count {
			let value = biased(decode(from, &buffer[i * sw..(i + 1) * sw]), offset);
			encode(to, value, &mut buffer[i * dw..(i + 1) * dw]);
		}
		buffer.truncate(count * dw);
	}
	Ok(())
}

/// Converting copy of `src` into a fresh machine-order buffer.
pub fn convert(src: &[u8], from: DataType, to: DataType, offset: i64) -> Result<Vec<u8>> {
	let count = element_count(src.len(), from)?;
	if from == to && offset == 0 {
		return Ok(src.to_vec());
	}
	let (sw, dw) = (from.size_of(), to.size_of());
	let mut out = vec![0u8; count * dw];
	for (s, d) in src.chunks_exact(sw).zip(out.chunks_exact_mut(dw)) {
		encode(to, biased(decode(from, s), offset), d);
	}
	Ok(out)
}

/// Resolves historical type names, failing for anything outside the ten types.
pub fn convert_named(src: &[u8], from: &str, to: &str, offset: i64) -> Result<Vec<u8>> {
	let unsupported = || BdfError::ConversionUnsupported { from: from.to_string(), to: to.to_string() };
	let from_type: DataType = from.parse().map_err(|_| unsupported())?;
	let to_type: DataType = to.parse().map_err(|_| unsupported())?;
	convert(src, from_type, to_type, offset)
}

/// A primitive that can live in a payload.
pub trait Element: Copy + Default + PartialEq + std::fmt::Debug + 'static {
	const TYPE: DataType;
	fn put(self, out: &mut [u8]);
	fn get(bytes: &[u8]) -> Self;
	fn wrap(values: Vec<Self>) -> DataArray;
	fn unwrap(array: DataArray) -> Option<Vec<Self>>;
}

macro_rules! impl_element {
	($t:ty, $variant:ident, $put:expr, $get:expr) => {
		impl Element for $t {
			const TYPE: DataType = DataType::$variant;
			fn put(self, out: &mut [u8]) {
				$put(out, self)
			}
			fn get(bytes: &[u8]) -> Self {
				$get(bytes)
			}
			fn wrap(values: Vec<Self>) -> DataArray {
				DataArray::$variant(values)
			}
			fn unwrap(array: DataArray) -> Option<Vec<Self>> {
				match array {
					DataArray::$variant(values) => Some(values),
					_ => None,
				}
			}
		}
	};
}

impl_element!(u8, U8, |out: &mut [u8], v: u8| out[0] = v, |b: &[u8]| b[0]);
impl_element!(i8, I8, |out: &mut [u8], v: i8| out[0] = v as u8, |b: &[u8]| b[0] as i8);
impl_element!(u16, U16, NativeEndian::write_u16, NativeEndian::read_u16);
impl_element!(i16, I16, NativeEndian::write_i16, NativeEndian::read_i16);
impl_element!(u32, U32, NativeEndian::write_u32, NativeEndian::read_u32);
impl_element!(i32, I32, NativeEndian::write_i32, NativeEndian::read_i32);
impl_element!(u64, U64, NativeEndian::write_u64, NativeEndian::read_u64);
impl_element!(i64, I64, NativeEndian::write_i64, NativeEndian::read_i64);
impl_element!(f32, F32, NativeEndian::write_f32, NativeEndian::read_f32);
impl_element!(f64, F64, NativeEndian::write_f64, NativeEndian::read_f64);

pub fn to_bytes<T: Element>(values: &[T]) -> Vec<u8> {
	let width = T::TYPE.size_of();
	let mut out = vec![0u8; values.len() * width];
	for (v, chunk) in values.iter().zip(out.chunks_exact_mut(width)) {
		v.put(chunk);
	}
	out
}

pub fn from_bytes<T: Element>(bytes: &[u8]) -> Result<Vec<T>> {
	let count = element_count(bytes.len(), T::TYPE)?;
	let width = T::TYPE.size_of();
	let mut out = Vec::with_capacity(count);
	out.extend(bytes.chunks_exact(width).map(T::get));
	Ok(out)
}

/// A typed payload buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum DataArray {
	U8(Vec<u8>),
	I8(Vec<i8>),
	U16(Vec<u16>),
	I16(Vec<i16>),
	U32(Vec<u32>),
	I32(Vec<i32>),
	U64(Vec<u64>),
	I64(Vec<i64>),
	F32(Vec<f32>),
	F64(Vec<f64>),
}

macro_rules! each_array {
	($array:expr, $values:ident => $body:expr) => {
		match $array {
			DataArray::U8($values) => $body,
			DataArray::I8($values) => $body,
			DataArray::U16($values) => $body,
			DataArray::I16($values) => $body,
			DataArray::U32($values) => $body,
			DataArray::I32($values) => $body,
			DataArray::U64($values) => $body,
			DataArray::I64($values) => $body,
			DataArray::F32($values) => $body,
			DataArray::F64($values) => $body,
		}
	};
}

impl DataArray {
	pub fn data_type(&self) -> DataType {
		match self {
			DataArray::U8(_) => DataType::U8,
			DataArray::I8(_) => DataType::I8,
			DataArray::U16(_) => DataType::U16,
			DataArray::I16(_) => DataType::I16,
			DataArray::U32(_) => DataType::U32,
			DataArray::I32(_) => DataType::I32,
			DataArray::U64(_) => DataType::U64,
			DataArray::I64(_) => DataType::I64,
			DataArray::F32(_) => DataType::F32,
			DataArray::F64(_) => DataType::F64,
		}
	}

	pub fn len(&self) -> usize {
		each_array!(self, v => v.len())
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn to_native_bytes(&self) -> Vec<u8> {
		each_array!(self, v => to_bytes(v))
	}

	pub fn from_native_bytes(data_type: DataType, bytes: &[u8]) -> Result<Self> {
		Ok(match data_type {
			DataType::U8 => DataArray::U8(from_bytes(bytes)?),
			DataType::I8 => DataArray::I8(from_bytes(bytes)?),
			DataType::U16 => DataArray::U16(from_bytes(bytes)?),
			DataType::I16 => DataArray::I16(from_bytes(bytes)?),
			DataType::U32 => DataArray::U32(from_bytes(bytes)?),
			DataType::I32 => DataArray::I32(from_bytes(bytes)?),
			DataType::U64 => DataArray::U64(from_bytes(bytes)?),
			DataType::I64 => DataArray::I64(from_bytes(bytes)?),
			DataType::F32 => DataArray::F32(from_bytes(bytes)?),
			DataType::F64 => DataArray::F64(from_bytes(bytes)?),
		})
	}

	/// Converts into another element type, adding `offset` to every value.
	pub fn convert(&self, to: DataType, offset: i64) -> Result<Self> {
		let bytes = convert(&self.to_native_bytes(), self.data_type(), to, offset)?;
		Self::from_native_bytes(to, &bytes)
	}

	pub fn into_vec<T: Element>(self) -> Option<Vec<T>> {
		T::unwrap(self)
	}
}

impl<T: Element> From<Vec<T>> for DataArray {
	fn from(values: Vec<T>) -> Self {
		T::wrap(values)
	}
}
