//! Garbage collection.
//!
//! Two independent sweeps:
//!
//! - **Container blob GC**: mark-and-sweep over the manifest
//!   reference graph. Tags (and, within the retention window,
//!   recently deleted tags) are roots; anything unreachable is
//!   deleted from the database and the store. The registry is held
//!   read-only for the duration of the pass.
//! - **Soft-remove sweep**: hard-deletes rows (and files) that were
//!   soft-deleted before the retention cutoff.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use chrono::{Duration as ChronoDuration, Utc};
use futures::future::join_all;
use sea_orm::entity::prelude::*;
use sea_orm::TransactionTrait;
use tokio::sync::Semaphore;
use tokio::time;
use tracing::instrument;

use crate::config::Config;
use crate::container::manifest::{is_manifest_media_type, Manifest};
use crate::database::entity::asset::Entity as Asset;
use crate::database::entity::blob::{self, Entity as Blob};
use crate::database::entity::package::{self, Entity as Package};
use crate::database::entity::version::{self, Entity as Version};
use crate::database::entity::PackageFormat;
use crate::database::{list_assets_with_blobs, AssetExtendBlob};
use crate::error::{ServerError, ServerResult};
use crate::storage::store::blob_path;
use crate::storage::ContentStore;
use crate::{State, StateInner};
use depot::util::Finally;

/// Hard cap on one container GC pass.
const CONTAINER_GC_MAX_DURATION: Duration = Duration::from_secs(15 * 60);

/// Hard cap on one soft-remove sweep.
const SOFT_REMOVE_MAX_DURATION: Duration = Duration::from_secs(5 * 60);

/// Number of concurrent storage deletions.
const CONCURRENT_DELETES: usize = 20;

/// Retries before a failed pass is given up until the next tick.
const MAX_RETRIES: usize = 1;

/// One digest's rows and its reference count during marking.
struct DigestRef {
    count: u64,
    rows: Vec<AssetExtendBlob>,
}

/// Per-tag capacity report.
#[derive(Debug, Default)]
struct TagCapacity {
    exclusive_size: i64,
    exclusive_refs: u64,
    total_size: i64,
    total_refs: u64,
}

/// Runs garbage collection periodically.
pub async fn run_garbage_collection(config: Config) {
    let interval = config.garbage_collection.interval;

    if interval == Duration::ZERO {
        // disabled
        return;
    }

    loop {
        // We don't stop even if it errors
        if let Err(e) = run_garbage_collection_once(config.clone()).await {
            tracing::warn!("Garbage collection failed: {}", e);
        }

        time::sleep(interval).await;
    }
}

/// Runs garbage collection once.
#[instrument(skip_all)]
pub async fn run_garbage_collection_once(config: Config) -> Result<()> {
    let uid = job_uid();
    tracing::info!(%uid, "Running garbage collection...");

    let state = StateInner::new(config).await;

    for attempt in 0..=MAX_RETRIES {
        match run_container_gc(&state).await {
            Ok(()) => break,
            Err(e) if attempt < MAX_RETRIES => {
                tracing::warn!("Container GC failed, retrying: {}", e)
            }
            Err(e) => return Err(e),
        }
    }

    run_soft_remove(&state).await?;

    Ok(())
}

/// Non-colliding job UID, so re-triggers never collide.
fn job_uid() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);

    format!("artifact-gc-{}", nanos)
}

/// Runs the container mark-and-sweep under the read-only gate.
#[instrument(skip_all)]
pub async fn run_container_gc(state: &State) -> Result<()> {
    let database = state.database().await?;

    // All pushes refuse while the gate is set; it is cleared on
    // every exit path, including timeout and panic.
    state.readonly.set(database, true).await?;

    let cleanup = Finally::new({
        let state = state.clone();
        async move {
            tracing::warn!("Container GC aborted - clearing the read-only gate");

            match state.database().await {
                Ok(database) => {
                    if let Err(e) = state.readonly.set(database, false).await {
                        tracing::warn!("Failed to clear the read-only gate: {}", e);
                    }
                }
                Err(e) => tracing::warn!("Failed to clear the read-only gate: {}", e),
            }
        }
    });

    let result = time::timeout(CONTAINER_GC_MAX_DURATION, container_gc_pass(state)).await;

    state.readonly.set(database, false).await?;
    cleanup.cancel();

    match result {
        Ok(inner) => inner.map_err(|e| anyhow!(e)),
        Err(_) => Err(anyhow!("Container GC exceeded its time budget")),
    }
}

async fn container_gc_pass(state: &State) -> ServerResult<()> {
    let database = state.database().await?;
    let store = state.store().await?;
    let registry = &state.manifests;

    let retention = state.config.garbage_collection.container_retention_period;
    let now = Utc::now();

    // Every container asset, live or not, grouped by digest
    let entries = list_assets_with_blobs(database, Some(PackageFormat::Container)).await?;

    let mut digest_refs: HashMap<String, DigestRef> = HashMap::new();
    for entry in entries {
        digest_refs
            .entry(entry.asset.path.clone())
            .or_insert_with(|| DigestRef {
                count: 0,
                rows: Vec::new(),
            })
            .rows
            .push(entry);
    }

    // Roots: tagged manifests, plus recently deleted tags within
    // the retention window
    let retention_cutoff = if retention > Duration::ZERO {
        let period = ChronoDuration::from_std(retention)
            .map_err(|e| ServerError::RequestError(anyhow!(e)))?;
        now.checked_sub_signed(period)
    } else {
        None
    };

    let tags: Vec<AssetExtendBlob> = digest_refs
        .values()
        .flat_map(|r| r.rows.iter())
        .filter(|e| e.asset.version_id.is_some())
        .filter(|e| match (&e.asset.deleted_at, retention_cutoff) {
            (None, _) => true,
            (Some(deleted), Some(cutoff)) => *deleted > cutoff,
            (Some(_), None) => false,
        })
        .cloned()
        .collect();

    tracing::info!(
        "Marking {} tags over {} container digests",
        tags.len(),
        digest_refs.len()
    );

    let mut reports: Vec<(String, Vec<String>)> = Vec::new();

    for tag in &tags {
        let digest = tag.asset.path.clone();

        if let Some(entry) = digest_refs.get_mut(&digest) {
            entry.count += 1;
        }

        let mut referenced = Vec::new();
        let mut visited = HashSet::new();

        if let Err(e) = mark_manifest(
            store,
            registry,
            &mut digest_refs,
            &tag.asset.content_type,
            &tag.blob.blob_ref,
            &mut visited,
            &mut referenced,
        )
        .await
        {
            // An unreadable manifest must not cause its references
            // to be swept; give up the pass.
            return Err(e);
        }

        reports.push((digest, referenced));
    }

    // Per-tag capacity accounting: the last tag sharing a digest
    // takes the exclusive credit
    for (tag_digest, referenced) in &reports {
        let mut capacity = TagCapacity::default();

        for digest in referenced {
            let Some(entry) = digest_refs.get_mut(digest) else {
                continue;
            };
            let size: i64 = entry.rows.iter().map(|r| r.blob.size).max().unwrap_or(0);

            capacity.total_size += size;
            capacity.total_refs += 1;

            if entry.count == 1 {
                capacity.exclusive_size += size;
                capacity.exclusive_refs += 1;
            } else if entry.count > 1 {
                entry.count -= 1;
            }
        }

        tracing::info!(
            tag = %tag_digest,
            exclusive_size = capacity.exclusive_size,
            exclusive_refs = capacity.exclusive_refs,
            total_size = capacity.total_size,
            total_refs = capacity.total_refs,
            "Tag capacity"
        );
    }

    // Sweep: everything unreachable from any root
    let unreachable: Vec<AssetExtendBlob> = digest_refs
        .into_values()
        .filter(|entry| entry.count == 0)
        .flat_map(|entry| entry.rows)
        .collect();

    tracing::info!("Deleting {} unreachable container blobs", unreachable.len());

    delete_entries(database, store, unreachable).await?;

    Ok(())
}

/// Marks every digest reachable from a manifest, recursing into
/// child manifests.
#[allow(clippy::too_many_arguments)]
async fn mark_manifest(
    store: &Arc<ContentStore>,
    registry: &crate::container::manifest::ManifestRegistry,
    digest_refs: &mut HashMap<String, DigestRef>,
    media_type: &str,
    manifest_blob_ref: &str,
    visited: &mut HashSet<String>,
    referenced: &mut Vec<String>,
) -> ServerResult<()> {
    let bytes = store.get(&blob_path(manifest_blob_ref)).await?;
    let manifest = registry.parse(media_type, &bytes)?;

    let children: Vec<(String, String)> = manifest
        .references()
        .into_iter()
        .map(|d| (d.digest.to_string(), d.media_type.clone()))
        .collect();
    let is_index = matches!(manifest, Manifest::Index(_));

    for (digest, child_media_type) in children {
        if !visited.insert(digest.clone()) {
            continue;
        }

        let child_blob_ref = match digest_refs.get_mut(&digest) {
            Some(entry) => {
                entry.count += 1;
                referenced.push(digest.clone());
                entry.rows.first().map(|r| r.blob.blob_ref.clone())
            }
            None => None,
        };

        // Child manifests of an index are walked in turn
        if is_index && is_manifest_media_type(&child_media_type) {
            if let Some(child_blob_ref) = child_blob_ref {
                Box::pin(mark_manifest(
                    store,
                    registry,
                    digest_refs,
                    &child_media_type,
                    &child_blob_ref,
                    visited,
                    referenced,
                ))
                .await?;
            }
        }
    }

    Ok(())
}

/// Runs the soft-remove sweep.
#[instrument(skip_all)]
pub async fn run_soft_remove(state: &State) -> Result<()> {
    match time::timeout(SOFT_REMOVE_MAX_DURATION, soft_remove_pass(state)).await {
        Ok(inner) => inner.map_err(|e| anyhow!(e)),
        Err(_) => Err(anyhow!("Soft-remove sweep exceeded its time budget")),
    }
}

async fn soft_remove_pass(state: &State) -> ServerResult<()> {
    let database = state.database().await?;
    let store = state.store().await?;

    let retention = state.config.garbage_collection.retention_period;
    let period = ChronoDuration::from_std(retention)
        .map_err(|e| ServerError::RequestError(anyhow!(e)))?;
    let cutoff = Utc::now()
        .checked_sub_signed(period)
        .ok_or_else(|| ServerError::RequestError(anyhow!("retention period underflow")))?;

    // Assets soft-deleted before the cutoff, with their blobs
    let entries = list_assets_with_blobs(database, None).await?;

    let mut delete_list = Vec::new();
    let mut live_size = 0i64;

    for entry in entries {
        if entry.asset.format == PackageFormat::Container {
            continue;
        }

        match entry.asset.deleted_at {
            Some(deleted) if deleted < cutoff => delete_list.push(entry),
            Some(_) => {}
            None => live_size += entry.blob.size,
        }
    }

    tracing::info!(
        "Sweeping {} expired assets ({} bytes live)",
        delete_list.len(),
        live_size
    );

    delete_entries(database, store, delete_list).await?;

    // Replaced blobs are soft-deleted without their asset; reclaim
    // them directly
    let orphans = Blob::find()
        .filter(blob::Column::DeletedAt.lt(cutoff))
        .all(database)
        .await
        .map_err(ServerError::database_error)?;

    let delete_limit = Arc::new(Semaphore::new(CONCURRENT_DELETES));
    let futures: Vec<_> = orphans
        .into_iter()
        .map(|orphan| {
            let delete_limit = delete_limit.clone();
            let store = store.clone();
            async move {
                let _permit = delete_limit.acquire().await.unwrap();

                match store.delete(&blob_path(&orphan.blob_ref)).await {
                    Ok(()) | Err(ServerError::PathNotFound { .. }) => {}
                    Err(e) => return Err(e),
                }

                Ok(orphan.id)
            }
        })
        .collect();

    // Deletions can result in spurious failures, tolerate them
    let deleted_blob_ids: Vec<i64> = join_all(futures)
        .await
        .into_iter()
        .filter_map(|r| match r {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!("Blob deletion failed: {}", e);
                None
            }
        })
        .collect();

    if !deleted_blob_ids.is_empty() {
        let deletion = Blob::delete_many()
            .filter(blob::Column::Id.is_in(deleted_blob_ids))
            .exec(database)
            .await
            .map_err(ServerError::database_error)?;

        tracing::info!("Reclaimed {} replaced blobs", deletion.rows_affected);
    }

    // Expired versions and packages are hard-deleted in one
    // transaction
    let versions = Version::find()
        .filter(version::Column::DeletedAt.lt(cutoff))
        .all(database)
        .await
        .map_err(ServerError::database_error)?;
    let packages = Package::find()
        .filter(package::Column::DeletedAt.lt(cutoff))
        .all(database)
        .await
        .map_err(ServerError::database_error)?;

    let mut version_ids = Vec::new();
    for version in &versions {
        version_ids.push(version.id);
    }
    let mut package_ids = Vec::new();
    for package in &packages {
        package_ids.push(package.id);
    }

    if !version_ids.is_empty() || !package_ids.is_empty() {
        let txn = database
            .begin()
            .await
            .map_err(ServerError::database_error)?;

        Version::delete_many()
            .filter(version::Column::Id.is_in(version_ids.clone()))
            .exec(&txn)
            .await
            .map_err(ServerError::database_error)?;
        Package::delete_many()
            .filter(package::Column::Id.is_in(package_ids.clone()))
            .exec(&txn)
            .await
            .map_err(ServerError::database_error)?;

        txn.commit().await.map_err(ServerError::database_error)?;

        tracing::info!(
            "Hard-deleted {} versions and {} packages",
            version_ids.len(),
            package_ids.len()
        );
    }

    Ok(())
}

/// Deletes asset+blob pairs and their files, each in its own
/// transaction, with bounded concurrency on the storage side.
async fn delete_entries(
    database: &sea_orm::DatabaseConnection,
    store: &Arc<ContentStore>,
    entries: Vec<AssetExtendBlob>,
) -> ServerResult<()> {
    let delete_limit = Arc::new(Semaphore::new(CONCURRENT_DELETES));

    let futures: Vec<_> = entries
        .into_iter()
        .map(|entry| {
            let delete_limit = delete_limit.clone();
            let database = database.clone();
            let store = store.clone();

            async move {
                let _permit = delete_limit.acquire().await.unwrap();

                let txn = database
                    .begin()
                    .await
                    .map_err(ServerError::database_error)?;

                Asset::delete_by_id(entry.asset.id)
                    .exec(&txn)
                    .await
                    .map_err(ServerError::database_error)?;
                Blob::delete_by_id(entry.blob.id)
                    .exec(&txn)
                    .await
                    .map_err(ServerError::database_error)?;

                match store.delete(&blob_path(&entry.blob.blob_ref)).await {
                    Ok(()) | Err(ServerError::PathNotFound { .. }) => {}
                    Err(e) => return Err(e),
                }

                txn.commit().await.map_err(ServerError::database_error)?;

                Ok(())
            }
        })
        .collect();

    for result in join_all(futures).await {
        if let Err(e) = result {
            tracing::warn!("Deletion failed: {}", e);
        }
    }

    Ok(())
}
