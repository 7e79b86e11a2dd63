//! Chunked batch iteration
//!
//! Long documents are split into fixed-length chunks fed across successive
//! batches. Every batch slot works through one document at a time, in order,
//! and its reset flag is raised exactly on the first chunk of each document.
//! Slots with nothing left to read receive empty (fully masked) chunks until
//! every slot is exhausted.

use std::collections::VecDeque;

use kglm_core::{Result, Vocabularies};

use crate::batch::Batch;
use crate::encoder::KglmInstance;

/// Splits instances into slot-stable chunked batches
#[derive(Debug, Clone, Copy)]
pub struct ChunkedBatcher {
    batch_size: usize,
    chunk_length: usize,
}

impl ChunkedBatcher {
    /// Create a batcher; zero sizes are raised to 1
    pub fn new(batch_size: usize, chunk_length: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            chunk_length: chunk_length.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn chunk_length(&self) -> usize {
        self.chunk_length
    }

    /// Iterate over batches built from `instances` in order
    pub fn batches<'v>(
        &self,
        instances: Vec<KglmInstance>,
        vocabs: &'v Vocabularies,
    ) -> ChunkedBatches<'v> {
        ChunkedBatches {
            vocabs,
            queue: instances.into_iter().filter(|i| !i.is_empty()).collect(),
            slots: (0..self.batch_size).map(|_| None).collect(),
            chunk_length: self.chunk_length,
        }
    }
}

#[derive(Debug)]
struct SlotCursor {
    instance: KglmInstance,
    position: usize,
    fresh: bool,
}

impl SlotCursor {
    fn exhausted(&self) -> bool {
        self.position >= self.instance.len()
    }
}

/// Iterator produced by [`ChunkedBatcher::batches`]
pub struct ChunkedBatches<'v> {
    vocabs: &'v Vocabularies,
    queue: VecDeque<KglmInstance>,
    slots: Vec<Option<SlotCursor>>,
    chunk_length: usize,
}

impl ChunkedBatches<'_> {
    fn refill(&mut self) {
        for slot in &mut self.slots {
            if slot.as_ref().map_or(true, SlotCursor::exhausted) {
                *slot = self.queue.pop_front().map(|instance| SlotCursor {
                    instance,
                    position: 0,
                    fresh: true,
                });
            }
        }
    }
}

impl Iterator for ChunkedBatches<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.refill();

        // Any live slot serves as the template for empty chunks.
        let template = self.slots.iter().flatten().next()?.instance.clone();

        let mut chunks = Vec::with_capacity(self.slots.len());
        let mut reset = Vec::with_capacity(self.slots.len());
        for slot in &mut self.slots {
            match slot {
                Some(cursor) => {
                    let chunk = cursor.instance.chunk(cursor.position, self.chunk_length);
                    cursor.position += chunk.len();
                    reset.push(cursor.fresh);
                    cursor.fresh = false;
                    chunks.push(chunk);
                }
                None => {
                    chunks.push(template.chunk(template.len(), 0));
                    reset.push(false);
                }
            }
        }

        Some(Batch::collate(&chunks, self.vocabs, reset))
    }
}
