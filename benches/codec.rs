use bdfio::codec::{convert, denormalize, normalize};
use bdfio::{open, DataArray, DataType, Dimensions, OpenMode};
use criterion::{criterion_group, criterion_main, Criterion, Throughput};

const SIDE: usize = 1024;

fn frame() -> Vec<u16> {
	(0..SIDE * SIDE).map(|i| (i % 65521) as u16).collect()
}

fn bench_convert(c: &mut Criterion) {
	let data = DataArray::from(frame()).to_native_bytes();
	let mut group = c.benchmark_group("convert");
	group.throughput(Throughput::Bytes(data.len() as u64));
	group.bench_function("u16_to_f32", |b| {
		b.iter(|| convert(&data, DataType::U16, DataType::F32, 0).unwrap());
	});
	group.bench_function("u16_to_i32_offset", |b| {
		b.iter(|| convert(&data, DataType::U16, DataType::I32, -100).unwrap());
	});
	group.finish();
}

fn bench_raster(c: &mut Criterion) {
	let data = DataArray::from(frame()).to_native_bytes();
	let mut out = vec![0u8; data.len()];
	let mut group = c.benchmark_group("raster");
	group.throughput(Throughput::Bytes(data.len() as u64));
	group.bench_function("normalize_transposed", |b| {
		b.iter(|| normalize(&mut out, &data, &[SIDE, SIDE], 5, 2).unwrap());
	});
	group.bench_function("denormalize_flipped", |b| {
		b.iter(|| denormalize(&mut out, &data, &[SIDE, SIDE], 4, 2).unwrap());
	});
	group.finish();
}

fn bench_block(c: &mut Criterion) {
	let dir = tempfile::TempDir::new().unwrap();
	let data = DataArray::from(frame());
	let dims = Dimensions::new(vec![SIDE, SIDE]);
	let mut group = c.benchmark_group("block");
	group.throughput(Throughput::Bytes((SIDE * SIDE * 2) as u64));
	group.sample_size(20);
	for compression in ["None", "GzipCompression"] {
		let path = dir.path().join(format!("{}.edf", compression));
		group.bench_function(format!("write_read_{}", compression), |b| {
			b.iter(|| {
				let mut file = open(&path, OpenMode::New).unwrap();
				file.write_symbol("Image.Psd", "1", "Compression", compression).unwrap();
				file.write_data("Image.Psd", "1", &dims, &data).unwrap();
				file.close().unwrap();
				let mut file = open(&path, OpenMode::Read).unwrap();
				file.read_data("Image.Psd", "1", None).unwrap()
			});
		});
	}
	group.finish();
}

criterion_group!(benches, bench_convert, bench_raster, bench_block);
criterion_main!(benches);
