use bdfio::{BdfError, DataArray, Dimensions, Engine, EngineConfig, OpenMode};
use std::path::Path;
use tempfile::TempDir;

fn engine() -> Engine {
	Engine::new(EngineConfig::default())
}

fn block(extra: &str, payload: &[u8]) -> Vec<u8> {
	let mut bytes = format!("{{\r\nEDF_DataBlockID = 1.Image.Psd ;\r\n{}DataType = UnsignedByte ;\r\n}}\n", extra).into_bytes();
	bytes.extend_from_slice(payload);
	bytes
}

#[test]
fn writable_open_of_foreign_files() {
	let dir = TempDir::new().unwrap();
	let index = dir.path().join("X00.000");
	let text = b"A\nB\n2 2 1 0 0 0 0 0 0 0\nX01.000\n".to_vec();
	std::fs::write(&index, &text).unwrap();
	let binary = dir.path().join("frame.tif");
	let tiff = vec![0x49, 0x49, 0x2a, 0x00, 0x08, 0x00, 0x00, 0x00];
	std::fs::write(&binary, &tiff).unwrap();

	let mut engine = engine();
	for (path, original) in [(&index, &text), (&binary, &tiff)] {
		for mode in [OpenMode::Old, OpenMode::Any] {
			let err = engine.open(path, mode).unwrap_err();
			assert!(matches!(err, BdfError::ErrorLocatingBlocks { offset: 0, .. }), "{:?}", err);
			assert_eq!(&std::fs::read(path).unwrap(), original);
		}
	}
	assert!(engine.search_stream(&index).is_none());
	let s = engine.open(&index, OpenMode::Read).unwrap();
	engine.close(s).unwrap();
	assert_eq!(std::fs::read(&index).unwrap(), text);
}

#[test]
fn overflowing_binary_size() {
	let dir = TempDir::new().unwrap();
	let path = dir.path().join("size.edf");
	std::fs::write(&path, block("EDF_BinarySize = 18446744073709551615 ;\r\nDim_1 = 2 ;\r\n", &[1, 2])).unwrap();
	let mut engine = engine();
	let s = engine.open(&path, OpenMode::Read).unwrap();
	assert!(!engine.test_header(s, 1, 1).unwrap());
	assert!(engine.read_data(s, 1, 1, None).unwrap_err().is_not_found());
}

#[test]
fn overflowing_dimensions() {
	let dir = TempDir::new().unwrap();
	let path = dir.path().join("dims.edf");
	std::fs::write(
		&path,
		block("EDF_BinarySize = 4 ;\r\nDim_1 = 4294967296 ;\r\nDim_2 = 4294967296 ;\r\n", &[1, 2, 3, 4]),
	)
	.unwrap();
	let mut engine = engine();
	let s = engine.open(&path, OpenMode::Read).unwrap();
	assert!(engine.test_header(s, 1, 1).unwrap());
	assert!(matches!(engine.read_dimensions(s, 1, 1), Err(BdfError::CouldNotReadDimension { .. })));
	assert!(matches!(engine.read_data(s, 1, 1, None), Err(BdfError::CouldNotReadDimension { .. })));
	assert_eq!(engine.read_header_string(s, 1, 1, "Dim_2").unwrap(), "4294967296");
}

#[test]
fn overflowing_binary_file_position() {
	let dir = TempDir::new().unwrap();
	std::fs::write(dir.path().join("frame.raw"), [7u8; 4]).unwrap();
	let path = dir.path().join("external.edf");
	std::fs::write(
		&path,
		block(
			"EDF_BinaryFileName = frame.raw ;\r\nEDF_BinaryFilePosition = 18446744073709551612 ;\r\nEDF_BinaryFileSize = 4 ;\r\nDim_1 = 4 ;\r\n",
			&[],
		),
	)
	.unwrap();
	let mut engine = engine();
	let s = engine.open(&path, OpenMode::Read).unwrap();
	assert_eq!(engine.read_dimensions(s, 1, 1).unwrap().extents(), &[4]);
	assert!(matches!(engine.read_data(s, 1, 1, None), Err(BdfError::ReadDataError { .. })));
}

#[test]
fn non_numeric_critical_keys() {
	let dir = TempDir::new().unwrap();
	let path = dir.path().join("words.edf");
	std::fs::write(&path, block("EDF_BinarySize = 2 ;\r\nDim_1 = two ;\r\n", &[1, 2])).unwrap();
	let mut engine = engine();
	let s = engine.open(&path, OpenMode::Read).unwrap();
	assert!(matches!(engine.read_data(s, 1, 1, None), Err(BdfError::CouldNotReadDimension { .. })));
	assert!(matches!(
		engine.read_header_long(s, 1, 1, "DataType"),
		Err(BdfError::NumberConversionFailed { .. })
	));
}

fn header_positions(path: &Path, keys: &[&str]) -> Vec<usize> {
	let text = String::from_utf8_lossy(&std::fs::read(path).unwrap()).into_owned();
	let start = text.find("EDF_DataBlockID = 1.Image.Psd").unwrap();
	keys.iter()
		.map(|key| start + text[start..].find(&format!("\r\n{} = ", key)).unwrap())
		.collect()
}

#[test]
fn custom_key_order_on_disk() {
	let dir = TempDir::new().unwrap();
	let keys = ["Alpha", "Beta", "Zeta", "Title"];
	let write = |engine: &mut Engine, path: &Path| {
		let s = engine.open(path, OpenMode::New).unwrap();
		for key in keys {
			engine.write_header_string(s, 1, 1, key, "x").unwrap();
		}
		engine.write_data(s, 1, 1, &Dimensions::new(vec![2]), &DataArray::from(vec![1u8, 2])).unwrap();
		engine.close(s).unwrap();
	};

	let mut engine = engine();
	let custom = dir.path().join("custom.edf");
	engine.set_key_order(&["Zeta", "Alpha"]);
	write(&mut engine, &custom);
	let at = header_positions(&custom, &["Zeta", "Alpha", "Beta", "Title", "DataType"]);
	// binary description first, then the table, then everything else
	assert!(at[4] < at[0], "{:?}", at);
	assert!(at[0] < at[1] && at[1] < at[2] && at[2] < at[3], "{:?}", at);

	let default = dir.path().join("default.edf");
	engine.reset_key_order();
	write(&mut engine, &default);
	let at = header_positions(&default, &["Title", "Alpha", "Beta", "Zeta"]);
	assert!(at[0] < at[1] && at[1] < at[2] && at[2] < at[3], "{:?}", at);

	let s = engine.open(&custom, OpenMode::Read).unwrap();
	assert_eq!(engine.read_header_string(s, 1, 1, "Zeta").unwrap(), "x");
	let (_, data) = engine.read_data(s, 1, 1, None).unwrap();
	assert_eq!(data.into_vec::<u8>().unwrap(), vec![1, 2]);
}
