// Renders one sample's logits as a black/white mask for snapshots.

use burn::{prelude::*, tensor::activation::sigmoid};

use crate::domain::run::ExportMode;

/// logits: [C, H, W] of a single sample → H·W bytes, 255 = foreground.
///
/// Binary models follow `mode`; multiclass models show every
/// non-background argmax as foreground.
pub fn render_prediction<B: Backend>(mode: ExportMode, logits: Tensor<B, 3>) -> Vec<u8> {
    let [classes, height, width] = logits.dims();

    let foreground: Tensor<B, 2, Bool> = if classes > 1 {
        logits.argmax(0).squeeze::<2>(0).equal_elem(0).bool_not()
    } else {
        let plane = logits.reshape([height, width]);
        match mode {
            ExportMode::Sigmoid => sigmoid(plane).greater_elem(0.5),
            ExportMode::Mean => {
                let threshold = plane.clone().clamp_min(0.0).mean().into_scalar().elem::<f32>();
                plane.greater_elem(threshold)
            }
        }
    };

    foreground
        .int()
        .into_data()
        .iter::<i64>()
        .map(|v| if v != 0 { 255 } else { 0 })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    fn sample(values: &[f32], shape: [usize; 3]) -> Tensor<NdArray, 3> {
        Tensor::<NdArray, 1>::from_floats(values, &Default::default()).reshape(shape)
    }

    #[test]
    fn test_sigmoid_threshold() {
        let out = render_prediction(ExportMode::Sigmoid, sample(&[-1.0, 0.5, 3.0, -0.1], [1, 2, 2]));
        assert_eq!(out, vec![0, 255, 255, 0]);
    }

    #[test]
    fn test_mean_threshold() {
        // positive part [0, 0.5, 3, 0] → mean 0.875
        let out = render_prediction(ExportMode::Mean, sample(&[-1.0, 0.5, 3.0, -0.1], [1, 2, 2]));
        assert_eq!(out, vec![0, 0, 255, 0]);
    }

    #[test]
    fn test_multiclass_argmax() {
        let out = render_prediction(
            ExportMode::Sigmoid,
            sample(&[5.0, 0.0, 0.0, 5.0], [2, 1, 2]),
        );
        assert_eq!(out, vec![0, 255]);
    }
}
