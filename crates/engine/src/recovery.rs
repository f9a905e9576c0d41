//! Log replay: the cold-start path that rebuilds the committed tree.

use crate::{Options, Result, Shared};

/// Decodes records until end-of-stream, applying each changeset to the
/// committed tree in file order and tracking the highest index seen.
/// Returns the record count.
///
/// Later records override earlier ones, whole-bucket deletions included. A
/// compaction snapshot needs no special handling here: it is applied like
/// any other record, and a compacted file contains nothing before it.
///
/// Any decode error other than end-of-stream is returned, which aborts the
/// open; a partially replayed tree is never exposed.
pub(crate) fn load(shared: &mut Shared, opts: &Options) -> Result<usize> {
    let mut replayed = 0;
    while let Some(record) = shared.backend.decode()? {
        shared.root.apply(&record.changeset, opts.copy_on_set);
        shared.max_index = record.index;
        replayed += 1;
    }
    Ok(replayed)
}
