//! Streaming batcher.
//!
//! [`Batcher`] adapts any iterator of validated [`Record`]s into an iterator of [`Batch`]es of at
//! most `batch_size` records, in input order. It pulls lazily from the upstream iterator and
//! holds at most one in-progress batch, so memory is bounded by the batch size and not by the
//! size of the source.

use crate::types::{Batch, BatchTag, Record};

/// How records receive their batch tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagAssignment {
    /// Every record gets this tag, replacing any tag the source carried.
    Override(BatchTag),
    /// Records keep a tag supplied by the source; untagged records get this one.
    Inherit(BatchTag),
}

/// Upper bound on the up-front allocation for one batch; larger batches grow as records arrive.
const PREALLOCATE_LIMIT: usize = 4096;

/// Groups records into bounded, ordered batches.
pub struct Batcher<I> {
    records: I,
    batch_size: usize,
    tags: TagAssignment,
    next_index: usize,
}

impl<I> Batcher<I>
where
    I: Iterator<Item = Record>,
{
    /// # Panics
    ///
    /// Panics if `batch_size == 0`.
    pub fn new(records: I, batch_size: usize, tags: TagAssignment) -> Self {
        assert!(batch_size > 0, "batch_size must be > 0");
        Self {
            records,
            batch_size,
            tags,
            next_index: 0,
        }
    }

    fn tag(&self, record: &mut Record) {
        match &self.tags {
            TagAssignment::Override(tag) => record.batch_tag = Some(tag.clone()),
            TagAssignment::Inherit(default) => {
                if record.batch_tag.is_none() {
                    record.batch_tag = Some(default.clone());
                }
            }
        }
    }
}

impl<I> Iterator for Batcher<I>
where
    I: Iterator<Item = Record>,
{
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        let mut records = Vec::with_capacity(self.batch_size.min(PREALLOCATE_LIMIT));
        while records.len() < self.batch_size {
            match self.records.next() {
                Some(mut record) => {
                    self.tag(&mut record);
                    records.push(record);
                }
                None => break,
            }
        }
        if records.is_empty() {
            return None;
        }

        // Every record was tagged above, so the first one always carries a tag.
        let tag = records[0]
            .batch_tag
            .clone()
            .unwrap_or_else(|| match &self.tags {
                TagAssignment::Override(t) | TagAssignment::Inherit(t) => t.clone(),
            });
        let index = self.next_index;
        self.next_index += 1;
        Some(Batch { index, tag, records })
    }
}
