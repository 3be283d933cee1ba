use std::fmt::Debug;
use std::future::Future;
use std::io::Cursor;

use chrono::Utc;
use google_drive3::{api::File, api::Scope, DriveHub};
use mime::Mime;
use tokio::runtime::{Handle, Runtime, RuntimeFlavor};

use super::domain::ImageLocator;

/// Blob storage for submission photos: store bytes, get back a locator.
pub trait FileStorage: Send + Sync {
    fn store(&self, bytes: &[u8], content_type: &Mime) -> Result<ImageLocator, StorageError>;
    fn delete(&self, locator: &ImageLocator) -> Result<(), StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("file storage operation failed: {0}")]
    Backend(String),
    #[error("file storage runtime unavailable: {0}")]
    Runtime(String),
}

/// Drive-backed photo storage. The program operations are synchronous, so each call blocks
/// on the Drive client through a runtime handle. Call it from a blocking-pool thread, a
/// multi-threaded runtime worker, or a thread outside any runtime.
pub struct GoogleDriveStorage<C>
where
    C: google_drive3::common::Connector + Send + Sync + 'static,
{
    hub: DriveHub<C>,
    handle: Handle,
    // Set when the adapter built the runtime behind `handle` itself.
    _runtime: Option<Runtime>,
    folder_id: String,
}

impl<C> GoogleDriveStorage<C>
where
    C: google_drive3::common::Connector + Send + Sync + 'static,
{
    /// Uses the runtime the service already runs on.
    pub fn new(hub: DriveHub<C>, handle: Handle, folder_id: impl Into<String>) -> Self {
        Self {
            hub,
            handle,
            _runtime: None,
            folder_id: folder_id.into(),
        }
    }

    /// Owns a dedicated runtime; for callers outside any tokio runtime.
    pub fn with_runtime(
        hub: DriveHub<C>,
        folder_id: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let runtime = Runtime::new().map_err(|err| StorageError::Runtime(err.to_string()))?;
        Ok(Self {
            hub,
            handle: runtime.handle().clone(),
            _runtime: Some(runtime),
            folder_id: folder_id.into(),
        })
    }

    fn map_error<E: std::fmt::Display>(err: E) -> StorageError {
        StorageError::Backend(err.to_string())
    }
}

impl<C> Debug for GoogleDriveStorage<C>
where
    C: google_drive3::common::Connector + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleDriveStorage")
            .field("folder_id", &self.folder_id)
            .finish_non_exhaustive()
    }
}

impl<C> FileStorage for GoogleDriveStorage<C>
where
    C: google_drive3::common::Connector + Send + Sync + 'static,
{
    fn store(&self, bytes: &[u8], content_type: &Mime) -> Result<ImageLocator, StorageError> {
        let metadata = File {
            name: Some(format!(
                "submission-{}",
                Utc::now().format("%Y%m%dT%H%M%S%.3fZ")
            )),
            mime_type: Some(content_type.essence_str().to_string()),
            parents: Some(vec![self.folder_id.clone()]),
            ..File::default()
        };

        let cursor = Cursor::new(bytes.to_vec());

        let result = block_on_handle(&self.handle, async {
            self.hub
                .files()
                .create(metadata)
                .param("fields", "id")
                .supports_all_drives(true)
                .add_scope(Scope::File)
                .upload(cursor, content_type.clone())
                .await
        });

        let (_, file) = result.map_err(GoogleDriveStorage::<C>::map_error)?;
        file.id
            .filter(|id| !id.is_empty())
            .map(ImageLocator)
            .ok_or_else(|| StorageError::Backend("drive returned no file id".to_string()))
    }

    fn delete(&self, locator: &ImageLocator) -> Result<(), StorageError> {
        let result = block_on_handle(&self.handle, async {
            self.hub
                .files()
                .delete(locator.as_str())
                .supports_all_drives(true)
                .add_scope(Scope::File)
                .doit()
                .await
        });

        result
            .map(|_| ())
            .map_err(GoogleDriveStorage::<C>::map_error)
    }
}

/// Drives `future` from synchronous code. On a multi-threaded runtime worker the worker is
/// handed off with `block_in_place` first; a current-thread runtime must be left through
/// `spawn_blocking` before calling this.
pub(crate) fn block_on_handle<T>(handle: &Handle, future: impl Future<Output = T>) -> T {
    match Handle::try_current() {
        Ok(current) if current.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| handle.block_on(future))
        }
        _ => handle.block_on(future),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::runtime::Builder;

    async fn uploaded_id() -> String {
        tokio::task::yield_now().await;
        "drive-file-1".to_string()
    }

    #[test]
    fn blocks_from_a_thread_outside_any_runtime() {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("runtime");

        assert_eq!(block_on_handle(runtime.handle(), uploaded_id()), "drive-file-1");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocks_from_a_runtime_worker() {
        let handle = Handle::current();

        assert_eq!(block_on_handle(&handle, uploaded_id()), "drive-file-1");
    }

    #[tokio::test]
    async fn blocks_from_the_blocking_pool() {
        let handle = Handle::current();

        let id = tokio::task::spawn_blocking(move || block_on_handle(&handle, uploaded_id()))
            .await
            .expect("blocking task joins");

        assert_eq!(id, "drive-file-1");
    }
}
