//! DSM message collection.
//!
//! This module contains the [`CollectDsm`] struct, which is used to collect
//! the DSM blocks of DSM messages and recompose the messages. Blocks of
//! different DSM IDs can be interleaved, since each ID is collected
//! separately.

use crate::bitfields::{DsmHeader, DsmType};
use crate::types::{DsmBlock, DSM_BLOCK_BYTES};
use std::collections::BTreeMap;

const MAX_DSM_BLOCKS: usize = 16;

/// DSM message.
///
/// A complete DSM message, recomposed from its blocks.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Dsm {
    id: u8,
    dsm_type: DsmType,
    data: Vec<u8>,
}

impl Dsm {
    /// Gives the DSM ID of the DSM.
    pub fn id(&self) -> u8 {
        self.id
    }

    /// Gives the type of the DSM.
    pub fn dsm_type(&self) -> DsmType {
        self.dsm_type
    }

    /// Returns a slice containing the data of the DSM.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
struct PartialDsm {
    dsm_type: DsmType,
    blocks: [Option<DsmBlock>; MAX_DSM_BLOCKS],
    done: bool,
}

impl PartialDsm {
    fn new(dsm_type: DsmType) -> PartialDsm {
        PartialDsm {
            dsm_type,
            blocks: [None; MAX_DSM_BLOCKS],
            done: false,
        }
    }

    fn size_in_blocks(&self) -> Option<usize> {
        let first = self.blocks[0].as_ref()?;
        let nb = first[0] >> 4;
        let n = match (self.dsm_type, nb) {
            (DsmType::Kroot, 1..=8) => usize::from(nb) + 6,
            (DsmType::Pkr, 7..=10) => usize::from(nb) + 6,
            _ => {
                // never completes; a new message with this ID replaces it
                log::error!("reserved NB value {nb} for {:?}", self.dsm_type);
                return None;
            }
        };
        Some(n)
    }

    fn assemble(&self) -> Option<Vec<u8>> {
        let n = self.size_in_blocks()?;
        let missing = self.blocks[..n].iter().filter(|b| b.is_none()).count();
        log::trace!("DSM size = {n} blocks. missing {missing} blocks");
        if missing != 0 {
            return None;
        }
        Some(self.blocks[..n].iter().flatten().flatten().copied().collect())
    }
}

/// DSM message collector.
///
/// This struct collects DSM blocks and produces a complete DSM message when
/// all the blocks of the message have been collected.
#[derive(Debug, Clone, Default, Eq, PartialEq, Hash)]
pub struct CollectDsm {
    partial: BTreeMap<u8, PartialDsm>,
}

impl CollectDsm {
    /// Constructs a new, empty DSM collector.
    pub fn new() -> CollectDsm {
        CollectDsm::default()
    }

    /// Feed a new block into the DSM collector.
    ///
    /// If this block completes a DSM message, the recomposed message is
    /// returned. Otherwise, this returns `None`. A completed message is only
    /// returned once, even if its blocks keep being received.
    ///
    /// The `header` parameter contains the DSM header of the block, and the
    /// `block` parameter contains the 13-byte DSM block.
    ///
    /// A block that differs from the block already stored in the same
    /// position means that a new message with the same DSM ID is being
    /// broadcast. The old data is discarded and collection starts again.
    pub fn feed(&mut self, header: DsmHeader, block: &DsmBlock) -> Option<Dsm> {
        log::trace!("feeding header = {header:?}, block = {block:02x?}");
        let id = header.dsm_id();
        let block_id = usize::from(header.dsm_block_id());
        let partial = self
            .partial
            .entry(id)
            .or_insert_with(|| PartialDsm::new(header.dsm_type()));
        match &partial.blocks[block_id] {
            Some(stored) if stored == block => {
                log::trace!("block {block_id} of DSM {id} already stored");
                return None;
            }
            Some(stored) => {
                log::warn!(
                    "block {block_id} of DSM {id} differs from stored block \
                     (stored = {stored:02x?}). restarting DSM collection"
                );
                *partial = PartialDsm::new(header.dsm_type());
            }
            None => {
                if partial.done {
                    log::trace!("DSM {id} is complete. ignoring extra block {block_id}");
                    return None;
                }
            }
        }
        partial.blocks[block_id] = Some(*block);
        log::trace!("stored block {block_id} of DSM {id}");
        let data = partial.assemble()?;
        partial.done = true;
        log::info!(
            "completed DSM with id = {id}, size = {} bytes",
            data.len()
        );
        log::trace!("DSM contents {data:02x?}");
        debug_assert_eq!(data.len() % DSM_BLOCK_BYTES, 0);
        Some(Dsm {
            id,
            dsm_type: partial.dsm_type,
            data,
        })
    }

    /// Discards all partially collected messages.
    pub fn reset(&mut self) {
        self.partial.clear();
    }
}
