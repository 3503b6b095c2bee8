//! Minibatch carriers handed in by corpus code.
//!
//! Token grids are stored flattened with `index = position * batch_size + sequence`,
//! which is the emulated `[batch, time]` layout.

use std::ops::Index;

use crate::error::{Error, Result};

/// Common size accessors of batch types.
pub trait Batch {
    /// Number of sentences.
    fn size(&self) -> usize;

    /// Number of valid (non-padding) tokens.
    fn words(&self) -> usize;
}

/// One padded, masked stream of token ids.
#[derive(Debug, Clone, PartialEq)]
pub struct SubBatch {
    indices: Vec<u32>,
    mask: Vec<f32>,
    size: usize,
    width: usize,
    words: usize,
}

impl SubBatch {
    /// All-padding grid of `size` sentences by `width` positions.
    pub fn new(size: usize, width: usize) -> Self {
        SubBatch {
            indices: vec![0; size * width],
            mask: vec![0.0; size * width],
            size,
            width,
            words: 0,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.size
    }

    pub fn batch_width(&self) -> usize {
        self.width
    }

    pub fn batch_words(&self) -> usize {
        self.words
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn indices_mut(&mut self) -> &mut [u32] {
        &mut self.indices
    }

    pub fn mask(&self) -> &[f32] {
        &self.mask
    }

    pub fn mask_mut(&mut self) -> &mut [f32] {
        &mut self.mask
    }

    pub fn set_words(&mut self, words: usize) {
        self.words = words;
    }

    /// Flat offset of `(position, sequence)`.
    pub fn locate(&self, position: usize, sequence: usize) -> usize {
        position * self.size + sequence
    }
}

impl Batch for SubBatch {
    fn size(&self) -> usize {
        self.size
    }

    fn words(&self) -> usize {
        self.words
    }
}

/// Aligned streams (source first, target last) of one minibatch.
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusBatch {
    sub_batches: Vec<SubBatch>,
    sentence_ids: Vec<usize>,
    guided_alignment: Vec<f32>,
}

impl CorpusBatch {
    pub fn new(sub_batches: Vec<SubBatch>) -> Self {
        CorpusBatch {
            sub_batches,
            sentence_ids: Vec::new(),
            guided_alignment: Vec::new(),
        }
    }

    pub fn sets(&self) -> usize {
        self.sub_batches.len()
    }

    pub fn sub_batches(&self) -> &[SubBatch] {
        &self.sub_batches
    }

    pub fn front(&self) -> Option<&SubBatch> {
        self.sub_batches.first()
    }

    pub fn back(&self) -> Option<&SubBatch> {
        self.sub_batches.last()
    }

    pub fn sentence_ids(&self) -> &[usize] {
        &self.sentence_ids
    }

    pub fn set_sentence_ids(&mut self, ids: Vec<usize>) {
        self.sentence_ids = ids;
    }

    /// Flattened reference alignment, emulated `[trg, src, 1, batch]`.
    pub fn guided_alignment(&self) -> &[f32] {
        &self.guided_alignment
    }

    pub fn set_guided_alignment(&mut self, alignment: Vec<f32>) {
        self.guided_alignment = alignment;
    }

    /// Splitting a batch into smaller ones is not supported.
    pub fn split(&self, _n: usize) -> Result<Vec<CorpusBatch>> {
        Err(Error::Unimplemented("split"))
    }

    /// All-valid batch with one stream per entry of `lengths`. With
    /// `guided_alignment` a zero alignment of `batch * src * trg` is attached.
    pub fn fake_batch(lengths: &[usize], batch_size: usize, guided_alignment: bool) -> Self {
        let sub_batches = lengths
            .iter()
            .map(|&len| {
                let mut sb = SubBatch::new(batch_size, len);
                sb.mask_mut().fill(1.0);
                sb.set_words(batch_size * len);
                sb
            })
            .collect();

        let mut batch = CorpusBatch::new(sub_batches);
        batch.set_sentence_ids((0..batch_size).collect());

        if guided_alignment {
            let src = batch.front().map_or(0, SubBatch::batch_width);
            let trg = batch.back().map_or(0, SubBatch::batch_width);
            batch.set_guided_alignment(vec![0.0; batch_size * src * trg]);
        }
        batch
    }
}

impl Index<usize> for CorpusBatch {
    type Output = SubBatch;

    fn index(&self, index: usize) -> &SubBatch {
        &self.sub_batches[index]
    }
}

impl Batch for CorpusBatch {
    fn size(&self) -> usize {
        self.front().map_or(0, SubBatch::batch_size)
    }

    /// Valid tokens of the source stream.
    fn words(&self) -> usize {
        self.front().map_or(0, SubBatch::batch_words)
    }
}
