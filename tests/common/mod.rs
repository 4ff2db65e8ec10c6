#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;

use image_classification::dataset::{write_manifest, LabeledSample};

/// 単色のPNG画像を書き出す
pub fn write_png(path: &Path, color: [u8; 3]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let img = image::RgbImage::from_pixel(12, 12, image::Rgb(color));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    std::fs::write(path, bytes).unwrap();
}

/// `metal` と `plastic` を交互に並べたデータセットを作り、マニフェストのパスを返す
pub fn build_dataset(root: &Path, count: usize) -> Vec<LabeledSample> {
    let mut samples = Vec::new();
    for i in 0..count {
        let (label, color) = if i % 2 == 0 {
            ("metal", [210, 210, 215])
        } else {
            ("plastic", [20, 140, 40])
        };
        let rel = format!("{}/{:02}.png", label, i);
        write_png(&root.join(&rel), color);
        samples.push(LabeledSample::new(rel, label));
    }
    write_manifest(&root.join("tags.tsv"), &samples).unwrap();
    samples
}
