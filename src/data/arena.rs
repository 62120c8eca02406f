// ============================================================
// Layer 4 — Minibatch Arena
// ============================================================
// Owned storage for the minibatch being assembled, one buffer
// per requested stream. It is DISJOINT from the channel buffers:
// frames are always copied channel → arena, never aliased.
//
// Tensor layout is time-major. With P parallel sequences and
// `dim` values per frame, the value d of the frame at
// (step t, sequence s) lives at
//
//   ((t * P) + s) * dim + d
//
// i.e. every cell of the layout grid is one `dim`-long column,
// and column c corresponds to layout cell c.
//
// Every minibatch starts from an all-zero arena, so padding
// cells always read as zero.

use crate::data::channel::ChannelBuffer;
use crate::data::stream_buffer::{FrameElement, NamedStreamBuffer};
use crate::domain::stream::{RequestedStream, StreamRegistry};

// ─── StreamMatrix ─────────────────────────────────────────────────────────────
/// Caller-owned output of one stream: `rows` = frame dimension,
/// `cols` = layout cells, column-major.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamMatrix<E> {
    rows: usize,
    cols: usize,
    data: Vec<E>,
}

impl<E: FrameElement> StreamMatrix<E> {
    pub fn new() -> Self {
        Self { rows: 0, cols: 0, data: Vec::new() }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Replace the contents with `rows × cols` values.
    pub fn assign(&mut self, rows: usize, cols: usize, values: &[E]) {
        debug_assert_eq!(values.len(), rows * cols);
        self.rows = rows;
        self.cols = cols;
        self.data.clear();
        self.data.extend_from_slice(values);
    }

    pub fn column(&self, col: usize) -> &[E] {
        &self.data[col * self.rows..(col + 1) * self.rows]
    }

    pub fn as_slice(&self) -> &[E] {
        &self.data
    }
}

// ─── PackInput ────────────────────────────────────────────────────────────────
/// What every packer needs from the reader for one call.
pub struct PackInput<'a, S> {
    pub registry:  &'a StreamRegistry,
    pub source:    &'a mut S,
    pub requested: &'a [RequestedStream],
}

// ─── MinibatchArena ───────────────────────────────────────────────────────────
#[derive(Debug, Clone, Default)]
pub struct MinibatchArena<E> {
    /// One buffer per requested stream, in request order
    buffers:  Vec<NamedStreamBuffer<E>>,
    dims:     Vec<usize>,
    steps:    usize,
    parallel: usize,
}

impl<E: FrameElement> MinibatchArena<E> {
    pub fn new() -> Self {
        Self { buffers: Vec::new(), dims: Vec::new(), steps: 0, parallel: 0 }
    }

    pub fn cells(&self) -> usize {
        self.steps * self.parallel
    }

    /// Shape the arena for a new minibatch and zero it.
    pub fn prepare(&mut self, requested: &[RequestedStream], steps: usize, parallel: usize) {
        self.steps    = steps;
        self.parallel = parallel;
        self.buffers.resize_with(requested.len(), NamedStreamBuffer::new);
        self.dims.clear();

        let cells = steps * parallel;
        for (buffer, stream) in self.buffers.iter_mut().zip(requested) {
            buffer.ensure_capacity(cells * stream.dim);
            buffer.fill(0, cells * stream.dim, E::ZERO);
            self.dims.push(stream.dim);
        }
    }

    /// Copy `frames` frames of a channel, starting at its frame
    /// `src_frame`, into sequence `dst_seq` from step `dst_step` on.
    pub fn place(
        &mut self,
        requested: &[RequestedStream],
        channel:   &ChannelBuffer<E>,
        src_frame: usize,
        frames:    usize,
        dst_seq:   usize,
        dst_step:  usize,
    ) {
        debug_assert!(dst_step + frames <= self.steps && dst_seq < self.parallel);
        for (buffer, stream) in self.buffers.iter_mut().zip(requested) {
            let dim = stream.dim;
            for f in 0..frames {
                let cell = (dst_step + f) * self.parallel + dst_seq;
                buffer.write(cell * dim, channel.frame(stream.id, dim, src_frame + f));
            }
        }
    }

    /// Values of the `k`-th requested stream.
    pub fn stream(&self, k: usize) -> &[E] {
        self.buffers[k].slice(0, self.cells() * self.dims[k])
    }

    /// Hand the `k`-th requested stream to the caller.
    pub fn export(&self, k: usize, out: &mut StreamMatrix<E>) {
        out.assign(self.dims[k], self.cells(), self.stream(k));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stream::StreamId;

    fn requested() -> Vec<RequestedStream> {
        vec![RequestedStream { name: "f".into(), id: StreamId::feature(0), dim: 2 }]
    }

    fn channel(values: &[f32]) -> ChannelBuffer<f32> {
        let mut r = StreamRegistry::new();
        r.add_feature("f", 2).unwrap();
        let mut ch = ChannelBuffer::new(&r);
        ch.stream_mut(StreamId::feature(0)).ensure_capacity(values.len());
        ch.stream_mut(StreamId::feature(0)).write(0, values);
        ch.total_frames = values.len() / 2;
        ch
    }

    #[test]
    fn test_place_is_time_major() {
        let req = requested();
        let mut arena = MinibatchArena::<f32>::new();
        arena.prepare(&req, 3, 2);
        let ch = channel(&[1.0, 1.0, 2.0, 2.0]);
        arena.place(&req, &ch, 0, 2, 1, 1);

        let mut out = StreamMatrix::new();
        arena.export(0, &mut out);
        assert_eq!((out.rows(), out.cols()), (2, 6));
        // step 1 / seq 1 → cell 3, step 2 / seq 1 → cell 5
        assert_eq!(out.column(3), &[1.0, 1.0]);
        assert_eq!(out.column(5), &[2.0, 2.0]);
        assert_eq!(out.column(0), &[0.0, 0.0]);
    }

    #[test]
    fn test_prepare_zeroes_previous_minibatch() {
        let req = requested();
        let mut arena = MinibatchArena::<f32>::new();
        arena.prepare(&req, 2, 1);
        arena.place(&req, &channel(&[5.0, 5.0, 6.0, 6.0]), 0, 2, 0, 0);
        arena.prepare(&req, 2, 1);
        assert!(arena.stream(0).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_place_reads_from_cursor() {
        let req = requested();
        let mut arena = MinibatchArena::<f32>::new();
        arena.prepare(&req, 1, 1);
        arena.place(&req, &channel(&[1.0, 1.0, 2.0, 2.0, 3.0, 3.0]), 2, 1, 0, 0);
        assert_eq!(arena.stream(0), &[3.0, 3.0]);
    }
}
