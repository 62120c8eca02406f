// ============================================================
// Layer 5 — Sequence Batch (Burn bridge)
// ============================================================
// Turns one packed minibatch into Burn tensors.
//
// The reader hands out column-major stream matrices whose
// columns are the layout cells in time-major order:
//
//   column c = step * parallel + sequence
//
// so a flat copy of the matrix reshapes straight into
//
//   features: [steps, parallel, dim]
//   mask:     [steps, parallel]      1 = real frame, 0 = padding
//   starts:   [steps, parallel]      1 = an utterance begins here
//
// which is the layout a recurrent model walks step by step
// (reset its state where `starts` is 1, ignore the output where
// `mask` is 0).
//
// Reference: Burn Book §4 (Batcher)

use burn::prelude::*;

use crate::data::arena::StreamMatrix;
use crate::domain::layout::{MinibatchLayout, PackingFlags};

// ─── SequenceBatch ────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct SequenceBatch<B: Backend> {
    /// Input frames — shape: [steps, parallel, feature_dim]
    pub features: Tensor<B, 3>,

    /// Target vectors — shape: [steps, parallel, target_dim]
    pub targets: Option<Tensor<B, 3>>,

    /// Validity — shape: [steps, parallel]
    pub mask: Tensor<B, 2, Int>,

    /// Sequence starts — shape: [steps, parallel]
    pub starts: Tensor<B, 2, Int>,
}

impl<B: Backend> SequenceBatch<B> {
    /// Number of real (non-padding) frames.
    pub fn valid_frames(&self) -> i64 {
        self.mask.clone().sum().into_scalar().elem::<i64>()
    }

    /// Sum of all feature values on real frames.
    pub fn masked_feature_sum(&self) -> f64 {
        let [_, _, dim] = self.features.dims();
        let mask = self.mask.clone().float().unsqueeze_dim::<3>(2).repeat_dim(2, dim);
        (self.features.clone() * mask).sum().into_scalar().elem::<f64>()
    }
}

// ─── SequenceBatcher ──────────────────────────────────────────────────────────
/// Holds the target device so tensors are created in the right place.
#[derive(Clone, Debug)]
pub struct SequenceBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> SequenceBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    pub fn batch(
        &self,
        layout:   &MinibatchLayout,
        features: &StreamMatrix<f32>,
        targets:  Option<&StreamMatrix<f32>>,
    ) -> SequenceBatch<B> {
        let steps    = layout.num_time_steps();
        let parallel = layout.num_parallel_sequences();

        let mask_flat: Vec<i32> = layout
            .validity_mask()
            .into_iter()
            .map(i32::from)
            .collect();
        let starts_flat: Vec<i32> = (0..steps)
            .flat_map(|t| (0..parallel).map(move |s| (t, s)))
            .map(|(t, s)| i32::from(layout.get(s, t).contains(PackingFlags::SEQUENCE_START)))
            .collect();

        let features = self.stream(features, steps, parallel);
        let targets  = targets.map(|m| self.stream(m, steps, parallel));

        let mask = Tensor::<B, 1, Int>::from_ints(mask_flat.as_slice(), &self.device)
            .reshape([steps, parallel]);
        let starts = Tensor::<B, 1, Int>::from_ints(starts_flat.as_slice(), &self.device)
            .reshape([steps, parallel]);

        SequenceBatch { features, targets, mask, starts }
    }

    fn stream(&self, matrix: &StreamMatrix<f32>, steps: usize, parallel: usize) -> Tensor<B, 3> {
        Tensor::<B, 1>::from_floats(matrix.as_slice(), &self.device)
            .reshape([steps, parallel, matrix.rows()])
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    type TestBackend = burn::backend::NdArray;

    fn packed() -> (MinibatchLayout, StreamMatrix<f32>) {
        // 2 sequences x 3 steps: row 0 full, row 1 two frames
        let mut layout = MinibatchLayout::new();
        layout.init_sequence_mode(2, 3);
        layout.set_sentence_range(0, 0, 3);
        layout.set_sentence_range(1, 0, 2);
        layout.set_no_input(1, 2, 3);

        // dim 2, columns in time-major cell order
        let values = [
            1.0, 1.0, 10.0, 10.0, // step 0
            2.0, 2.0, 20.0, 20.0, // step 1
            3.0, 3.0, 0.0, 0.0,   // step 2
        ];
        let mut features = StreamMatrix::new();
        features.assign(2, 6, &values);
        (layout, features)
    }

    #[test]
    fn test_shapes_follow_layout() {
        let (layout, features) = packed();
        let batcher = SequenceBatcher::<TestBackend>::new(Default::default());
        let batch = batcher.batch(&layout, &features, Some(&features));

        assert_eq!(batch.features.dims(), [3, 2, 2]);
        assert_eq!(batch.mask.dims(), [3, 2]);
        assert!(batch.targets.is_some());
    }

    #[test]
    fn test_mask_counts_valid_frames() {
        let (layout, features) = packed();
        let batcher = SequenceBatcher::<TestBackend>::new(Default::default());
        let batch = batcher.batch(&layout, &features, None);

        assert_eq!(batch.valid_frames(), 5);
        assert_eq!(batch.starts.clone().sum().into_scalar().elem::<i64>(), 2);
        assert_eq!(batch.masked_feature_sum(), 2.0 * (1.0 + 2.0 + 3.0 + 10.0 + 20.0));
    }

    #[test]
    fn test_sequence_values_land_in_their_row() {
        let (layout, features) = packed();
        let batcher = SequenceBatcher::<TestBackend>::new(Default::default());
        let batch = batcher.batch(&layout, &features, None);

        // sequence 1 across all steps, first feature dim
        let row: Vec<f32> = batch
            .features
            .slice([0..3, 1..2, 0..1])
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert_eq!(row, vec![10.0, 20.0, 0.0]);
    }
}
