pub mod bswap;
pub mod compress;
pub mod convert;
pub mod raster;

pub use bswap::{swap_in_place, swap_to_native};
pub use compress::{deflate, inflate, inflate_into, inflate_reader};
pub use convert::{convert, convert_in_place, DataArray, Element};
pub use raster::{
	denormalize, normalize, number_to_order, order_to_number, raster_inversion, raster_multiplication,
	raster_numbers,
};
