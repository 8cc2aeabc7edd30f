use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
    tensor::{
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
// internally — do NOT add them again or you get conflicting impls.
#[derive(Config, Debug)]
pub struct UNetConfig {
    /// Input image channels (3 for RGB)
    pub n_channels: usize,
    /// Output logit channels; 1 means binary segmentation
    pub n_classes: usize,
    /// Upsample with bilinear interpolation instead of transposed convs
    #[config(default = false)]
    pub bilinear: bool,
    /// Width of the first double conv; doubles at every down step
    #[config(default = 64)]
    pub base_channels: usize,
}

impl UNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> UNet<B> {
        let c = self.base_channels;
        // Bilinear upsampling keeps channel counts, so the bottom half is halved
        let factor = if self.bilinear { 2 } else { 1 };

        UNet {
            inc:   DoubleConv::new(self.n_channels, c, c, device),
            down1: Down::new(c,     c * 2, device),
            down2: Down::new(c * 2, c * 4, device),
            down3: Down::new(c * 4, c * 8, device),
            down4: Down::new(c * 8, c * 16 / factor, device),
            up1:   Up::new(c * 16, c * 8 / factor, self.bilinear, device),
            up2:   Up::new(c * 8,  c * 4 / factor, self.bilinear, device),
            up3:   Up::new(c * 4,  c * 2 / factor, self.bilinear, device),
            up4:   Up::new(c * 2,  c,              self.bilinear, device),
            outc:  Conv2dConfig::new([c, self.n_classes], [1, 1]).init(device),
            n_channels: self.n_channels,
            n_classes:  self.n_classes,
        }
    }
}

/// (conv 3x3 → batch norm → ReLU) twice.
#[derive(Module, Debug)]
pub struct DoubleConv<B: Backend> {
    conv1: Conv2d<B>,
    norm1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    norm2: BatchNorm<B, 2>,
    activation: Relu,
}

impl<B: Backend> DoubleConv<B> {
    fn new(in_ch: usize, out_ch: usize, mid_ch: usize, device: &B::Device) -> Self {
        let conv = |i, o| {
            Conv2dConfig::new([i, o], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device)
        };
        Self {
            conv1: conv(in_ch, mid_ch),
            norm1: BatchNormConfig::new(mid_ch).init(device),
            conv2: conv(mid_ch, out_ch),
            norm2: BatchNormConfig::new(out_ch).init(device),
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.activation.forward(self.norm1.forward(self.conv1.forward(x)));
        self.activation.forward(self.norm2.forward(self.conv2.forward(x)))
    }
}

/// Max-pool by 2, then a double conv.
#[derive(Module, Debug)]
pub struct Down<B: Backend> {
    pool: MaxPool2d,
    conv: DoubleConv<B>,
}

impl<B: Backend> Down<B> {
    fn new(in_ch: usize, out_ch: usize, device: &B::Device) -> Self {
        Self {
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            conv: DoubleConv::new(in_ch, out_ch, out_ch, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.conv.forward(self.pool.forward(x))
    }
}

/// Upsample by 2, pad to the skip connection, concatenate, double conv.
#[derive(Module, Debug)]
pub struct Up<B: Backend> {
    /// None when upsampling bilinearly
    transposed: Option<ConvTranspose2d<B>>,
    conv: DoubleConv<B>,
}

impl<B: Backend> Up<B> {
    fn new(in_ch: usize, out_ch: usize, bilinear: bool, device: &B::Device) -> Self {
        if bilinear {
            Self {
                transposed: None,
                conv: DoubleConv::new(in_ch, out_ch, in_ch / 2, device),
            }
        } else {
            Self {
                transposed: Some(
                    ConvTranspose2dConfig::new([in_ch, in_ch / 2], [2, 2])
                        .with_stride([2, 2])
                        .init(device),
                ),
                conv: DoubleConv::new(in_ch, out_ch, out_ch, device),
            }
        }
    }

    pub fn forward(&self, x1: Tensor<B, 4>, x2: Tensor<B, 4>) -> Tensor<B, 4> {
        let x1 = match &self.transposed {
            Some(up) => up.forward(x1),
            None => {
                let [_, _, h, w] = x1.dims();
                interpolate(
                    x1,
                    [h * 2, w * 2],
                    InterpolateOptions::new(InterpolateMode::Bilinear),
                )
            }
        };

        // Odd input sizes leave the upsampled map a pixel short
        let [_, _, h1, w1] = x1.dims();
        let [_, _, h2, w2] = x2.dims();
        let (dy, dx) = (h2.saturating_sub(h1), w2.saturating_sub(w1));
        let x1 = if dy > 0 || dx > 0 {
            x1.pad((dx / 2, dx - dx / 2, dy / 2, dy - dy / 2), 0.0)
        } else {
            x1
        };

        self.conv.forward(Tensor::cat(vec![x2, x1], 1))
    }
}

#[derive(Module, Debug)]
pub struct UNet<B: Backend> {
    inc:   DoubleConv<B>,
    down1: Down<B>,
    down2: Down<B>,
    down3: Down<B>,
    down4: Down<B>,
    up1:   Up<B>,
    up2:   Up<B>,
    up3:   Up<B>,
    up4:   Up<B>,
    outc:  Conv2d<B>,
    pub n_channels: usize,
    pub n_classes:  usize,
}

impl<B: Backend> UNet<B> {
    /// images: [batch, n_channels, H, W] → logits: [batch, n_classes, H, W]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let x1 = self.inc.forward(images);
        let x2 = self.down1.forward(x1.clone());
        let x3 = self.down2.forward(x2.clone());
        let x4 = self.down3.forward(x3.clone());
        let x5 = self.down4.forward(x4.clone());

        let x = self.up1.forward(x5, x4);
        let x = self.up2.forward(x, x3);
        let x = self.up3.forward(x, x2);
        let x = self.up4.forward(x, x1);
        self.outc.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_output_shape_matches_input() {
        let device = Default::default();
        let model: UNet<NdArray> = UNetConfig::new(3, 2).with_base_channels(4).init(&device);
        let out = model.forward(Tensor::zeros([2, 3, 16, 16], &device));
        assert_eq!(out.dims(), [2, 2, 16, 16]);
    }

    #[test]
    fn test_odd_sizes_are_padded() {
        let device = Default::default();
        let model: UNet<NdArray> = UNetConfig::new(1, 1).with_base_channels(2).init(&device);
        let out = model.forward(Tensor::zeros([1, 1, 20, 18], &device));
        assert_eq!(out.dims(), [1, 1, 20, 18]);
    }

    #[test]
    fn test_bilinear_output_shape_matches_input() {
        let device = Default::default();
        let model: UNet<NdArray> = UNetConfig::new(3, 2)
            .with_bilinear(true)
            .with_base_channels(4)
            .init(&device);
        let out = model.forward(Tensor::zeros([2, 3, 16, 16], &device));
        assert_eq!(out.dims(), [2, 2, 16, 16]);

        let out = model.forward(Tensor::zeros([1, 3, 20, 18], &device));
        assert_eq!(out.dims(), [1, 2, 20, 18]);
    }
}
