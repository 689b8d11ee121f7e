//! Hand-off of closed shard archives

use std::path::Path;
use std::sync::Arc;

use super::descriptor::FileDescriptor;
use super::errors::ShardResult;
use super::merge::MergeProcessor;

/// Moves a shard archive towards the stores it feeds
///
/// The archive at `archive` is deleted once `store_part` returns, so an
/// implementation must copy or send it before returning.
pub trait ShardTransport: Send + Sync {
    fn store_part(
        &self,
        descriptor: &FileDescriptor,
        archive: &Path,
        synchronise_merge: bool,
    ) -> ShardResult<()>;
}

/// Stages archives in a local receive directory
///
/// With `synchronise_merge` set the archive is merged before `store_part`
/// returns; otherwise it waits for [`MergeProcessor::merge_pending`].
pub struct DirectoryTransport {
    processor: Arc<MergeProcessor>,
}

impl DirectoryTransport {
    pub fn new(processor: Arc<MergeProcessor>) -> Self {
        Self { processor }
    }

    pub fn processor(&self) -> &Arc<MergeProcessor> {
        &self.processor
    }
}

impl ShardTransport for DirectoryTransport {
    fn store_part(
        &self,
        descriptor: &FileDescriptor,
        archive: &Path,
        synchronise_merge: bool,
    ) -> ShardResult<()> {
        let staged = self.processor.receive(descriptor, archive)?;
        if synchronise_merge {
            self.processor.merge_staged(descriptor, &staged)?;
        }
        Ok(())
    }
}
