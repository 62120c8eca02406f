// ============================================================
// Layer 4 — Utterance Refill Policy
// ============================================================
// Pulls the source's current utterance into one channel and then
// moves the source on to the next NON-EMPTY utterance.
//
// For one refill:
//   1. every feature stream → copy frames, all streams must
//      agree on the frame count
//   2. every label stream   → expand each label index into a
//      one-hot column, or into its mapped target vector
//   3. lattice side data    → captured when the source has it
//   4. advance the source, skipping zero-frame utterances
//
// When the source runs dry the policy raises its "no more data"
// flag. From then on every refill returns Ok(false) and leaves
// the channel untouched, however often it is called.

use crate::data::channel::{ChannelBuffer, ChannelState};
use crate::data::stream_buffer::FrameElement;
use crate::domain::error::{ReaderError, ReaderResult};
use crate::domain::stream::StreamRegistry;
use crate::domain::traits::UtteranceSource;

#[derive(Debug, Clone, Default)]
pub struct UtteranceRefill {
    no_data: bool,
}

impl UtteranceRefill {
    pub fn new() -> Self {
        Self { no_data: false }
    }

    pub fn no_more_data(&self) -> bool {
        self.no_data
    }

    /// Skip leading empty utterances of a freshly started epoch.
    pub fn prime<S: UtteranceSource>(&mut self, source: &mut S) {
        while source.has_more() && source.current_frame_count() == 0 {
            source.advance();
        }
        self.no_data = !source.has_more();
    }

    /// Prime the source and give every channel its first utterance.
    pub fn start<S, E>(
        &mut self,
        registry: &StreamRegistry,
        source:   &mut S,
        channels: &mut [ChannelBuffer<E>],
    ) -> ReaderResult<()>
    where
        S: UtteranceSource,
        E: FrameElement,
    {
        self.prime(source);
        let mut filled = 0;
        for channel in channels.iter_mut() {
            if self.refill(registry, source, channel)? {
                filled += 1;
            }
        }
        if filled < channels.len() {
            tracing::warn!(
                "Source exhausted after filling {} of {} channels",
                filled,
                channels.len()
            );
        }
        Ok(())
    }

    /// Load the next utterance into `channel`.
    ///
    /// Returns Ok(true) when the channel was refilled and Ok(false)
    /// when the source is exhausted.
    pub fn refill<S, E>(
        &mut self,
        registry: &StreamRegistry,
        source:   &mut S,
        channel:  &mut ChannelBuffer<E>,
    ) -> ReaderResult<bool>
    where
        S: UtteranceSource,
        E: FrameElement,
    {
        if self.no_data {
            return Ok(false);
        }

        let frames = load_features(registry, source, channel)?;
        load_labels(registry, source, channel, frames)?;

        // lattice side data only travels with utterances that have it
        channel.phone_boundaries.clear();
        channel.label_ids.clear();
        if source.has_lattice() {
            channel.lattice = source.lattice();
            channel.phone_boundaries.extend_from_slice(source.phone_boundaries());
            if !registry.labels().is_empty() {
                channel.label_ids.extend_from_slice(source.label_indices(0));
            }
        } else {
            channel.lattice = None;
        }

        channel.total_frames     = frames;
        channel.processed_frames = 0;
        channel.state            = ChannelState::Filling;

        loop {
            source.advance();
            if !source.has_more() || source.current_frame_count() > 0 {
                break;
            }
        }
        if !source.has_more() {
            tracing::debug!("Utterance source exhausted");
            self.no_data = true;
        }

        Ok(true)
    }
}

/// Copy every feature stream and return the shared frame count.
fn load_features<S, E>(
    registry: &StreamRegistry,
    source:   &S,
    channel:  &mut ChannelBuffer<E>,
) -> ReaderResult<usize>
where
    S: UtteranceSource,
    E: FrameElement,
{
    let mut frames: Option<usize> = None;

    for info in registry.features() {
        let view = source.feature_frames(info.id.index);
        if view.dim != info.dim {
            return Err(ReaderError::StreamDimMismatch {
                stream:   info.name.clone(),
                expected: info.dim,
                found:    view.dim,
            });
        }

        let n = view.frames();
        match frames {
            None => frames = Some(n),
            Some(expected) if expected != n => {
                return Err(ReaderError::InconsistentFrameCount {
                    stream: info.name.clone(),
                    expected,
                    found:  n,
                });
            }
            Some(_) => {}
        }

        let offset = channel.start_offset(info.id);
        let buffer = channel.stream_mut(info.id);
        buffer.ensure_capacity(offset + n * info.dim);
        buffer.write_f32(offset, &view.data[..n * info.dim]);
    }

    // label-only sources take their frame count from the utterance
    Ok(frames.unwrap_or_else(|| source.current_frame_count()))
}

fn load_labels<S, E>(
    registry: &StreamRegistry,
    source:   &S,
    channel:  &mut ChannelBuffer<E>,
    frames:   usize,
) -> ReaderResult<()>
where
    S: UtteranceSource,
    E: FrameElement,
{
    for info in registry.labels() {
        let indices = source.label_indices(info.id.index);
        if indices.len() != frames {
            return Err(ReaderError::InconsistentFrameCount {
                stream:   info.name.clone(),
                expected: frames,
                found:    indices.len(),
            });
        }

        let dim    = info.dim;
        let offset = channel.start_offset(info.id);
        let buffer = channel.stream_mut(info.id);
        buffer.ensure_capacity(offset + frames * dim);
        buffer.fill(offset, frames * dim, E::ZERO);

        for (k, &label) in indices.iter().enumerate() {
            let column = offset + k * dim;
            match &info.target_map {
                Some(map) => {
                    let target = map.target(label).ok_or_else(|| ReaderError::LabelOutOfRange {
                        stream: info.name.clone(),
                        label,
                        dim:    map.label_count(),
                    })?;
                    buffer.write_f32(column, target);
                }
                None => {
                    if label >= dim {
                        return Err(ReaderError::LabelOutOfRange {
                            stream: info.name.clone(),
                            label,
                            dim,
                        });
                    }
                    buffer.set(column + label, E::ONE);
                }
            }
        }
    }
    Ok(())
}
