//! Upload request coordinators.
//!
//! An upload gathers the file writers produced while the request
//! body is served, then commits the model and the files together: the
//! row-level changes run in a transaction, and the writers are only
//! committed inside that scope, so a storage failure rolls the rows
//! back and a database failure leaves only partial files for the
//! caller to cancel.

use sea_orm::{DatabaseConnection, TransactionTrait};

use super::{sync, AssetDescriptor, SyncOutcome};
use crate::database::entity::view::ViewModel;
use crate::error::{ServerError, ServerResult};
use crate::storage::FileWriter;

enum Phase {
    Serving,
    Finalized,
}

/// A single artifact upload in flight.
pub struct UploadRequest {
    view: ViewModel,
    descriptor: Option<AssetDescriptor>,
    writers: Vec<Box<dyn FileWriter>>,
    phase: Phase,
}

impl UploadRequest {
    pub fn new(view: ViewModel) -> Self {
        Self {
            view,
            descriptor: None,
            writers: Vec::new(),
            phase: Phase::Serving,
        }
    }

    pub fn view(&self) -> &ViewModel {
        &self.view
    }

    /// Adopts a writer produced while serving the body.
    pub fn register_writer(&mut self, writer: Box<dyn FileWriter>) {
        self.writers.push(writer);
    }

    /// Sets the descriptor decided by the format adapter.
    pub fn set_descriptor(&mut self, descriptor: AssetDescriptor) {
        self.descriptor = Some(descriptor);
    }

    pub fn descriptor(&self) -> ServerResult<&AssetDescriptor> {
        self.descriptor
            .as_ref()
            .ok_or(ServerError::InternalServerError)
    }

    /// Commits the upload: model sync, then writer commits, inside
    /// one transaction.
    ///
    /// When the payload turns out byte-identical to the stored one,
    /// the new files are cancelled and the stored state is left
    /// untouched.
    pub async fn commit(&mut self, database: &DatabaseConnection) -> ServerResult<SyncOutcome> {
        if matches!(self.phase, Phase::Finalized) {
            return Err(ServerError::WriterFinalized);
        }

        let descriptor = self.descriptor()?.clone();

        let txn = database
            .begin()
            .await
            .map_err(ServerError::database_error)?;

        let outcome = match sync(&txn, &self.view, &descriptor).await {
            Ok(outcome) => outcome,
            Err(ServerError::FileNotChanged) => {
                drop(txn);
                self.cancel().await?;

                // No-op success: nothing to swap in.
                let existing = self
                    .reload_unchanged(database, &descriptor)
                    .await?;
                return Ok(existing);
            }
            Err(e) => {
                drop(txn);
                return Err(e);
            }
        };

        for writer in self.writers.iter_mut() {
            writer.commit().await?;
            writer.close().await?;
        }

        txn.commit().await.map_err(ServerError::database_error)?;
        self.phase = Phase::Finalized;

        Ok(outcome)
    }

    /// Cancels every writer, surfacing the first error after trying
    /// them all.
    pub async fn cancel(&mut self) -> ServerResult<()> {
        if matches!(self.phase, Phase::Finalized) {
            return Ok(());
        }
        self.phase = Phase::Finalized;

        let mut first_error = None;

        for writer in self.writers.iter_mut() {
            if let Err(e) = writer.cancel().await {
                tracing::warn!("Failed to cancel upload writer: {}", e);
                first_error.get_or_insert(e);
            }
            let _ = writer.close().await;
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn reload_unchanged(
        &self,
        database: &DatabaseConnection,
        descriptor: &AssetDescriptor,
    ) -> ServerResult<SyncOutcome> {
        use super::AssetAttr;
        use crate::database::{
            find_asset_by_version_path, find_asset_index, find_asset_isolated, find_package,
            find_version,
        };

        let (version, asset) = match descriptor.attr {
            AssetAttr::Isolated => (
                None,
                find_asset_isolated(database, &descriptor.main_asset.path, descriptor.format)
                    .await?,
            ),
            AssetAttr::Index => (
                None,
                find_asset_index(
                    database,
                    self.view.id,
                    &descriptor.main_asset.path,
                    descriptor.format,
                )
                .await?,
            ),
            AssetAttr::Normal | AssetAttr::Exclusive => {
                let package = find_package(
                    database,
                    &descriptor.space,
                    &descriptor.namespace,
                    &descriptor.name,
                    descriptor.format,
                )
                .await?
                .ok_or(ServerError::NoSuchPackage)?;
                let version = find_version(database, package.id, self.view.id, &descriptor.version)
                    .await?
                    .ok_or(ServerError::NoSuchVersion)?;
                let asset =
                    find_asset_by_version_path(database, version.id, &descriptor.main_asset.path)
                        .await?;

                (Some(version), asset)
            }
        };

        Ok(SyncOutcome {
            version,
            asset: asset.ok_or(ServerError::NoSuchAsset)?,
            changed: false,
        })
    }
}
