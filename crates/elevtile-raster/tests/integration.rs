//! Integration tests for the GeoTIFF tile store, using tiles written to a
//! scratch directory.

use elevtile_raster::{GeoTiffTileStore, TileAddress, TileRange, TileStore};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("elevtile-raster-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

fn write_plain_tile(path: &Path, width: u32, height: u32, data: &[f32]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let file = File::create(path).unwrap();
    let mut tiff = TiffEncoder::new(file).unwrap();
    tiff.write_image::<colortype::Gray32Float>(width, height, data)
        .unwrap();
}

fn write_georeferenced_tile(path: &Path, width: u32, height: u32, data: &[f32], origin: (f64, f64), scale: f64) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let file = File::create(path).unwrap();
    let mut tiff = TiffEncoder::new(file).unwrap();
    let mut image = tiff.new_image::<colortype::Gray32Float>(width, height).unwrap();
    image
        .encoder()
        .write_tag(Tag::Unknown(33922), &[0.0f64, 0.0, 0.0, origin.0, origin.1, 0.0][..])
        .unwrap();
    image
        .encoder()
        .write_tag(Tag::Unknown(33550), &[scale, scale, 0.0f64][..])
        .unwrap();
    image.encoder().write_tag(Tag::Unknown(42113), "-9999").unwrap();
    image.write_data(data).unwrap();
}

#[test]
fn test_fetch_plain_tile_uses_address_extent() {
    let root = scratch_dir("plain");
    let store = GeoTiffTileStore::new(&root);
    let address = TileAddress::new(2, 1, 1).unwrap();

    write_plain_tile(&store.tile_path(&address), 2, 2, &[1.0, 3.0, 5.0, 7.0]);

    let grid = store.fetch(&address).unwrap().expect("tile should exist");
    assert_eq!(grid.width(), 2);
    assert_eq!(grid.height(), 2);
    assert_eq!(grid.data(), &[1.0, 3.0, 5.0, 7.0]);
    // No GDAL_NODATA tag: every finite sample is valid
    assert_eq!(grid.valid_values().count(), 4);

    let b = grid.bounds();
    let expected = address.bounds();
    assert!((b.min_x - expected.min_x).abs() < 1e-6);
    assert!((b.max_y - expected.max_y).abs() < 1e-6);

    // Second fetch is served from the cache
    assert_eq!(store.cached_tile_count(), 1);
    assert_eq!(store.fetch(&address).unwrap().unwrap(), grid);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn test_fetch_georeferenced_tile_reads_tags() {
    let root = scratch_dir("geo");
    let store = GeoTiffTileStore::new(&root);
    let address = TileAddress::new(5, 3, 7).unwrap();

    write_georeferenced_tile(
        &store.tile_path(&address),
        3,
        2,
        &[10.0, -9999.0, 30.0, 40.0, 50.0, 60.0],
        (1000.0, 2000.0),
        30.0,
    );

    let grid = store.fetch(&address).unwrap().expect("tile should exist");
    let t = grid.transform();
    assert_eq!(t.origin_x, 1000.0);
    assert_eq!(t.origin_y, 2000.0);
    assert_eq!(t.pixel_size_x, 30.0);
    assert_eq!(t.pixel_size_y, -30.0);
    assert_eq!(grid.nodata(), -9999.0);
    assert_eq!(grid.valid_values().count(), 5);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn test_corrupt_tile_is_an_error_not_absence() {
    let root = scratch_dir("corrupt");
    let store = GeoTiffTileStore::new(&root);
    let address = TileAddress::new(1, 0, 0).unwrap();
    let path = store.tile_path(&address);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, b"not a tiff").unwrap();

    assert!(store.contains(&address));
    assert!(store.fetch(&address).is_err());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn test_addresses_in_lists_tiles_on_disk() {
    let root = scratch_dir("index");
    let store = GeoTiffTileStore::new(&root);
    for (x, y) in [(3, 4), (3, 6), (9, 1), (0, 0)] {
        let address = TileAddress::new(5, x, y).unwrap();
        write_plain_tile(&store.tile_path(&address), 1, 1, &[1.0]);
    }
    // Entries that are not tiles are ignored
    fs::write(root.join("5").join("3").join("notes.txt"), b"x").unwrap();
    fs::write(root.join("5").join("3").join("x.tif"), b"x").unwrap();
    fs::create_dir_all(root.join("5").join("overviews")).unwrap();

    let range = TileRange {
        zoom: 5,
        min_x: 1,
        max_x: 5,
        min_y: 0,
        max_y: 5,
    };
    assert_eq!(store.addresses_in(&range).unwrap(), vec![TileAddress::new(5, 3, 4).unwrap()]);

    let other_zoom = TileRange { zoom: 6, ..range };
    assert!(store.addresses_in(&other_zoom).unwrap().is_empty());

    let _ = fs::remove_dir_all(&root);
}
