//! Directory transfer between local disk and remote storage

use crate::endpoint::Endpoint;
use crate::error::{Result, StorageError};
use crate::filter::IncludeFilter;
use crate::progress::Progress;
use futures_util::StreamExt;
use indicatif::HumanBytes;
use object_store::path::Path;
use object_store::{ObjectMeta, ObjectStore, PutPayload, WriteMultipart};

/// Parts in flight per object
const MAX_CONCURRENT_PARTS: usize = 4;

/// What a transfer moved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSummary {
    pub files: usize,
    pub bytes: u64,
}

/// Copy every object under `source` selected by `include` to `destination`
///
/// `include` is validated before either endpoint is touched; existing
/// destination objects are overwritten.
pub async fn transfer(source: &str, destination: &str, include: &str) -> Result<TransferSummary> {
    let filter = IncludeFilter::new(include)?;

    let source = Endpoint::resolve(source, false).await?;
    let destination = Endpoint::resolve(destination, true).await?;

    let selected: Vec<(ObjectMeta, String)> = source
        .list()
        .await?
        .into_iter()
        .filter_map(|meta| {
            let relative = source.relative(&meta.location)?;
            filter.matches(&relative).then_some((meta, relative))
        })
        .collect();

    let total: u64 = selected.iter().map(|(meta, _)| meta.size as u64).sum();
    tracing::info!(
        "Transferring {} ({} files) from {} to {}",
        HumanBytes(total),
        selected.len(),
        source.location(),
        destination.location()
    );

    let progress = Progress::start(total);
    for (meta, relative) in &selected {
        copy_object(
            source.store().as_ref(),
            meta,
            destination.store().as_ref(),
            &destination.child(relative)?,
            &progress,
        )
        .await?;
    }

    Ok(TransferSummary {
        files: selected.len(),
        bytes: progress.transferred(),
    })
}

/// Stream one object into `to`, recording every chunk as it is written
async fn copy_object(
    source: &dyn ObjectStore,
    meta: &ObjectMeta,
    destination: &dyn ObjectStore,
    to: &Path,
    progress: &Progress,
) -> Result<()> {
    if meta.size == 0 {
        destination.put(to, PutPayload::default()).await?;
        return Ok(());
    }

    let mut chunks = source.get(&meta.location).await?.into_stream();
    let mut upload = WriteMultipart::new(destination.put_multipart(to).await?);
    while let Some(chunk) = chunks.next().await {
        let written = match chunk {
            Ok(chunk) => upload
                .wait_for_capacity(MAX_CONCURRENT_PARTS)
                .await
                .map(|()| {
                    upload.write(&chunk);
                    chunk.len() as u64
                }),
            Err(err) => Err(err),
        };
        match written {
            Ok(len) => progress.record(len),
            Err(err) => return Err(abort(upload, to, err.into()).await),
        }
    }
    upload.finish().await?;
    Ok(())
}

async fn abort(upload: WriteMultipart, to: &Path, err: StorageError) -> StorageError {
    if let Err(abort) = upload.abort().await {
        tracing::warn!("Failed to abort upload of {}: {}", to, abort);
    }
    err
}
