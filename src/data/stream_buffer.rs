// ============================================================
// Layer 4 — Named Stream Buffer
// ============================================================
// Growable typed storage for one feature or label stream.
//
// Buffers are created once per loop and then REUSED for every
// utterance / minibatch. Capacity only ever grows, so after the
// first few long utterances no further allocation happens.
//
// Source frames always arrive as f32. The buffer element type
// may be f32 or f64:
//   - f32 → f32 is a straight slice copy (memcpy)
//   - f32 → f64 widens value by value
// Both produce numerically identical results.

use std::fmt::Debug;

/// Numeric element of the produced tensors.
pub trait FrameElement: Copy + Default + PartialEq + Debug + Send + Sync + 'static {
    const ZERO: Self;
    const ONE: Self;

    fn from_f32(v: f32) -> Self;

    /// Convert a block of source values into `dst`.
    fn copy_from_f32(dst: &mut [Self], src: &[f32]) {
        for (d, s) in dst.iter_mut().zip(src) {
            *d = Self::from_f32(*s);
        }
    }
}

impl FrameElement for f32 {
    const ZERO: f32 = 0.0;
    const ONE: f32 = 1.0;

    fn from_f32(v: f32) -> Self {
        v
    }

    fn copy_from_f32(dst: &mut [f32], src: &[f32]) {
        dst.copy_from_slice(src);
    }
}

impl FrameElement for f64 {
    const ZERO: f64 = 0.0;
    const ONE: f64 = 1.0;

    fn from_f32(v: f32) -> Self {
        f64::from(v)
    }
}

// ─── NamedStreamBuffer ────────────────────────────────────────────────────────
#[derive(Debug, Clone, Default)]
pub struct NamedStreamBuffer<E> {
    data: Vec<E>,
}

impl<E: FrameElement> NamedStreamBuffer<E> {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Grow to at least `elements`; never shrinks.
    pub fn ensure_capacity(&mut self, elements: usize) {
        if self.data.len() < elements {
            self.data.resize(elements, E::ZERO);
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Copy a block of same-typed values at `offset`.
    pub fn write(&mut self, offset: usize, src: &[E]) {
        self.data[offset..offset + src.len()].copy_from_slice(src);
    }

    /// Copy a block of source values at `offset`, converting as needed.
    pub fn write_f32(&mut self, offset: usize, src: &[f32]) {
        E::copy_from_f32(&mut self.data[offset..offset + src.len()], src);
    }

    pub fn fill(&mut self, offset: usize, len: usize, value: E) {
        self.data[offset..offset + len].fill(value);
    }

    pub fn set(&mut self, offset: usize, value: E) {
        self.data[offset] = value;
    }

    pub fn as_slice(&self) -> &[E] {
        &self.data
    }

    /// `len` elements starting at `offset`.
    pub fn slice(&self, offset: usize, len: usize) -> &[E] {
        &self.data[offset..offset + len]
    }
}
