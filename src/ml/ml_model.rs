//! 機械学習モデルの共通定義
//!
//! 残差ブロックによるバックボーン（ResNet系）と、ラベル数に合わせて付け替える分類ヘッド、
//! および生画像バイト列から入力テンソル用データへの変換を提供します。

use std::path::Path;

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    tensor::{activation::softmax, backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use crate::error::ClassifierError;

/// ImageNetの平均（RGB）
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNetの標準偏差（RGB）
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// バックボーンの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Architecture {
    /// 3ステージ・各1ブロック（16/32/64ch）。小規模データ・CPU向け
    ResNetMini,
    /// 4ステージ・各2ブロック（64/128/256/512ch）
    ResNet18,
}

impl Architecture {
    /// 各ステージのチャネル数
    pub fn stage_widths(&self) -> &'static [usize] {
        match self {
            Architecture::ResNetMini => &[16, 32, 64],
            Architecture::ResNet18 => &[64, 128, 256, 512],
        }
    }

    /// ステージあたりの残差ブロック数
    pub fn blocks_per_stage(&self) -> usize {
        match self {
            Architecture::ResNetMini => 1,
            Architecture::ResNet18 => 2,
        }
    }

    /// ステム直後にプーリングで解像度を半分にするか
    fn stem_pool(&self) -> bool {
        matches!(self, Architecture::ResNet18)
    }

    /// ワークスペース内の事前学習済みバックボーンのファイル名（拡張子なし）
    pub fn backbone_file_stem(&self) -> &'static str {
        match self {
            Architecture::ResNetMini => "resnet_mini_backbone",
            Architecture::ResNet18 => "resnet18_backbone",
        }
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Architecture::ResNetMini => write!(f, "ResNetMini"),
            Architecture::ResNet18 => write!(f, "ResNet18"),
        }
    }
}

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// バックボーン
    pub architecture: Architecture,
    /// ドロップアウト率
    #[config(default = 0.2)]
    pub dropout: f64,
    /// 入力画像サイズ（正方形）
    #[config(default = 224)]
    pub image_size: usize,
}

impl ModelConfig {
    /// バックボーンのみ初期化
    pub fn init_backbone<B: Backend>(&self, device: &B::Device) -> Backbone<B> {
        let widths = self.architecture.stage_widths();
        let stem_width = widths[0];

        let mut blocks = Vec::new();
        let mut in_channels = stem_width;
        for (stage, &width) in widths.iter().enumerate() {
            for block in 0..self.architecture.blocks_per_stage() {
                // 2ステージ目以降の先頭ブロックで解像度を半分にする
                let stride = if stage > 0 && block == 0 { 2 } else { 1 };
                blocks.push(ResidualBlock::new(in_channels, width, stride, device));
                in_channels = width;
            }
        }

        Backbone {
            stem_conv: Conv2dConfig::new([3, stem_width], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            stem_bn: BatchNormConfig::new(stem_width).init(device),
            stem_pool: self
                .architecture
                .stem_pool()
                .then(|| MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init()),
            blocks,
            activation: Relu::new(),
        }
    }

    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> ImageClassifier<B> {
        self.init_with_backbone(self.init_backbone(device), device)
    }

    /// 既存のバックボーンに新しい分類ヘッドを付けて初期化
    pub fn init_with_backbone<B: Backend>(
        &self,
        backbone: Backbone<B>,
        device: &B::Device,
    ) -> ImageClassifier<B> {
        let features = *self
            .architecture
            .stage_widths()
            .last()
            .unwrap_or(&0);

        ImageClassifier {
            backbone,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout: DropoutConfig::new(self.dropout).init(),
            head: LinearConfig::new(features, self.num_classes).init(device),
        }
    }
}

/// 解像度・チャネル数を合わせるためのショートカット
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
}

/// 残差ブロック（3x3 Conv ×2 + ショートカット）
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B>,
    downsample: Option<Downsample<B>>,
    activation: Relu,
}

impl<B: Backend> ResidualBlock<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let downsample = (stride != 1 || in_channels != out_channels).then(|| Downsample {
            conv: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                .with_stride([stride, stride])
                .with_bias(false)
                .init(device),
            bn: BatchNormConfig::new(out_channels).init(device),
        });

        Self {
            conv1: Conv2dConfig::new([in_channels, out_channels], [3, 3])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            bn1: BatchNormConfig::new(out_channels).init(device),
            conv2: Conv2dConfig::new([out_channels, out_channels], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            bn2: BatchNormConfig::new(out_channels).init(device),
            downsample,
            activation: Relu::new(),
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(down) => down.bn.forward(down.conv.forward(input.clone())),
            None => input.clone(),
        };

        let x = self.conv1.forward(input);
        let x = self.bn1.forward(x);
        let x = self.activation.forward(x);
        let x = self.conv2.forward(x);
        let x = self.bn2.forward(x);

        self.activation.forward(x + identity)
    }
}

/// 特徴抽出部（事前学習済み重みの保存・読み込み単位）
#[derive(Module, Debug)]
pub struct Backbone<B: Backend> {
    stem_conv: Conv2d<B>,
    stem_bn: BatchNorm<B>,
    stem_pool: Option<MaxPool2d>,
    blocks: Vec<ResidualBlock<B>>,
    activation: Relu,
}

impl<B: Backend> Backbone<B> {
    /// [batch, 3, H, W] -> [batch, C, h, w]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.stem_conv.forward(images);
        let x = self.stem_bn.forward(x);
        let mut x = self.activation.forward(x);

        if let Some(pool) = &self.stem_pool {
            x = pool.forward(x);
        }

        for block in &self.blocks {
            x = block.forward(x);
        }
        x
    }
}

/// 画像分類モデル（バックボーン + 分類ヘッド）
///
/// # アーキテクチャ
/// - Stem: Conv 3x3 + BN + ReLU（ResNet18のみ MaxPool 2x2）
/// - 残差ブロック × ステージ数 × ブロック数
/// - Global Average Pooling
/// - Dropout + FC: C -> num_classes
/// - Softmax（推論時）
#[derive(Module, Debug)]
pub struct ImageClassifier<B: Backend> {
    backbone: Backbone<B>,
    pool: AdaptiveAvgPool2d,
    dropout: Dropout,
    head: Linear<B>,
}

impl<B: Backend> ImageClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.backbone.forward(images);
        let x = self.pool.forward(x);

        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.dropout.forward(x);
        self.head.forward(x)
    }

    /// クラスごとの確率 [batch_size, num_classes]
    pub fn forward_softmax(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// 順伝播と損失計算（学習用）
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

/// 生画像バイト列をデコードし、リサイズ・正規化する
///
/// ImageNetの平均と標準偏差で正規化し、(C, H, W) の順で平坦化したデータを返します。
/// `source` はエラーメッセージ用の元ファイルパスです。
pub fn load_and_normalize_image_bytes(
    bytes: &[u8],
    image_size: usize,
    source: &Path,
) -> crate::error::Result<Vec<f32>> {
    let img = image::load_from_memory(bytes).map_err(|e| ClassifierError::ImageDecode {
        path: source.to_path_buf(),
        reason: e.to_string(),
    })?;

    let size = image_size as u32;
    let img = img.resize_exact(size, size, FilterType::Triangle).to_rgb8();

    let num_pixels = image_size * image_size;
    let mut data = vec![0.0f32; 3 * num_pixels];

    for (i, pixel) in img.pixels().enumerate() {
        for channel in 0..3 {
            let value = pixel[channel] as f32 / 255.0;
            data[channel * num_pixels + i] = (value - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel];
        }
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use std::io::Cursor;

    type TestBackend = NdArray<f32>;

    fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb(color));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_normalize_resizes_and_uses_chw_layout() {
        let bytes = png_bytes(20, 10, [255, 0, 0]);
        let data = load_and_normalize_image_bytes(&bytes, 8, Path::new("red.png")).unwrap();

        assert_eq!(data.len(), 3 * 8 * 8);
        let red = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        let green = (0.0 - IMAGENET_MEAN[1]) / IMAGENET_STD[1];
        assert!((data[0] - red).abs() < 1e-5);
        assert!((data[63] - red).abs() < 1e-5);
        assert!((data[64] - green).abs() < 1e-5);
    }

    #[test]
    fn test_undecodable_bytes() {
        let err = load_and_normalize_image_bytes(b"not an image", 8, Path::new("x.jpg")).unwrap_err();
        match err {
            ClassifierError::ImageDecode { path, .. } => assert_eq!(path, Path::new("x.jpg")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();
        for architecture in [Architecture::ResNetMini, Architecture::ResNet18] {
            let model = ModelConfig::new(3, architecture)
                .with_image_size(16)
                .init::<TestBackend>(&device);

            let images = Tensor::<TestBackend, 4>::zeros([2, 3, 16, 16], &device);
            let probs = model.forward_softmax(images);
            assert_eq!(probs.dims(), [2, 3]);

            let sums: Vec<f32> = probs.sum_dim(1).into_data().to_vec().unwrap();
            for sum in sums {
                assert!((sum - 1.0).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_architecture_layout() {
        assert_eq!(Architecture::ResNet18.stage_widths(), &[64, 128, 256, 512]);
        assert_eq!(Architecture::ResNet18.blocks_per_stage(), 2);
        assert_eq!(Architecture::ResNetMini.to_string(), "ResNetMini");
        let json = serde_json::to_string(&Architecture::ResNet18).unwrap();
        assert_eq!(json, "\"ResNet18\"");
    }
}
