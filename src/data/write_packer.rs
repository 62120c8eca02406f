// ============================================================
// Layer 4 — Write-Mode Packer
// ============================================================
// Feature extraction / writing runs one utterance at a time:
// every minibatch is exactly one whole utterance laid out as a
// single sequence of `frames` steps,
//
//   S . . . . E      (a 1-frame utterance is a single B)
//
// Only feature streams are produced. This packer shares no state
// with the training packers; the reader picks one of them once
// when the loop starts.

use crate::data::arena::{MinibatchArena, PackInput};
use crate::data::channel::ChannelBuffer;
use crate::data::refill::UtteranceRefill;
use crate::data::stream_buffer::FrameElement;
use crate::domain::error::ReaderResult;
use crate::domain::layout::MinibatchLayout;
use crate::domain::stream::StreamRegistry;
use crate::domain::traits::UtteranceSource;

#[derive(Debug, Clone)]
pub struct WritePacker<E> {
    channel: ChannelBuffer<E>,
    refill:  UtteranceRefill,
    arena:   MinibatchArena<E>,
    layout:  MinibatchLayout,
}

impl<E: FrameElement> WritePacker<E> {
    pub fn new(registry: &StreamRegistry) -> Self {
        Self {
            channel: ChannelBuffer::new(registry),
            refill:  UtteranceRefill::new(),
            arena:   MinibatchArena::new(),
            layout:  MinibatchLayout::new(),
        }
    }

    pub fn begin<S: UtteranceSource>(
        &mut self,
        registry: &StreamRegistry,
        source:   &mut S,
    ) -> ReaderResult<()> {
        self.refill.start(registry, source, std::slice::from_mut(&mut self.channel))
    }

    pub fn layout(&self) -> &MinibatchLayout {
        &self.layout
    }

    pub fn arena(&self) -> &MinibatchArena<E> {
        &self.arena
    }

    pub fn channel(&self) -> &ChannelBuffer<E> {
        &self.channel
    }

    pub fn next<S: UtteranceSource>(&mut self, input: PackInput<'_, S>) -> ReaderResult<bool> {
        let PackInput { registry, source, requested } = input;

        let frames = self.channel.remaining();
        if frames == 0 {
            return Ok(false);
        }

        self.layout.init_sequence_mode(1, frames);
        self.arena.prepare(requested, frames, 1);
        self.arena.place(requested, &self.channel, self.channel.processed_frames(), frames, 0, 0);
        self.layout.set_sentence_range(0, 0, frames);

        self.channel.consume_all();
        self.refill.refill(registry, source, &mut self.channel)?;

        tracing::debug!("Write minibatch: {} frames", frames);
        Ok(true)
    }
}
