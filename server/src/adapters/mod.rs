//! Format adapters.
//!
//! One adapter per artifact format. An adapter serves the request
//! body (streaming it into a fresh blob file while hashing),
//! validates the result semantically, and leaves a descriptor on the
//! upload request for the model manager; the controller then commits
//! or cancels the whole upload.

pub mod container;
pub mod helm;
pub mod helm_index;
pub mod raw;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ServerError, ServerResult};
use crate::model::upload::UploadRequest;
use crate::storage::store::blob_path;
use crate::storage::ContentStore;
use depot::hash::{random_ref, ChecksumSet, MultiHasher};

/// Read buffer size for streaming uploads.
const UPLOAD_BUFFER_SIZE: usize = 64 * 1024;

/// Payload coordinates produced by streaming a body into the store.
pub struct StreamedBlob {
    pub blob_ref: String,
    pub check_sum: ChecksumSet,
    pub size: i64,
}

/// Streams a request body into a fresh random-ref blob file.
///
/// The writer is registered on the upload request, so the partial
/// file is cancelled with the rest of the upload on error. Read
/// failures are attributed to the client going away; write failures
/// to storage.
pub async fn stream_to_blob(
    upload: &mut UploadRequest,
    store: &ContentStore,
    reader: &mut (dyn AsyncRead + Unpin + Send),
) -> ServerResult<StreamedBlob> {
    let blob_ref = random_ref();
    let mut writer = store.writer(&blob_path(&blob_ref), false).await?;

    let mut hasher = MultiHasher::new();
    let mut buf = vec![0u8; UPLOAD_BUFFER_SIZE];

    loop {
        let read = match reader.read(&mut buf).await {
            Ok(read) => read,
            Err(e) => {
                tracing::debug!("Client went away mid-upload: {}", e);
                upload.register_writer(writer);
                return Err(ServerError::ClientClosed);
            }
        };

        if read == 0 {
            break;
        }

        if let Err(e) = writer.write(&buf[..read]).await {
            upload.register_writer(writer);
            return Err(e);
        }
        hasher.update(&buf[..read]);
    }

    let size = hasher.bytes_written() as i64;
    let check_sum = hasher.sum();

    upload.register_writer(writer);

    Ok(StreamedBlob {
        blob_ref,
        check_sum,
        size,
    })
}

/// Writes an in-memory payload into a fresh random-ref blob file.
pub async fn bytes_to_blob(
    upload: &mut UploadRequest,
    store: &ContentStore,
    bytes: &[u8],
) -> ServerResult<StreamedBlob> {
    let mut reader: &[u8] = bytes;
    stream_to_blob(upload, store, &mut reader).await
}
