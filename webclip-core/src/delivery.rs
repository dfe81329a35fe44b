use tracing::info;

use crate::config::StorageSection;
use crate::output::OutputDescriptor;
use crate::storage::{ObjectStore, StorageResult, StoredObject};

/// How a finished artifact leaves the gateway: raw bytes on the response
/// body, or an upload receipt after the bytes went to object storage.
pub enum Delivery {
    Inline {
        bytes: Vec<u8>,
        descriptor: OutputDescriptor,
    },
    Remote(StoredObject),
}

/// Routes artifacts to object storage when a store is configured and the
/// resolved destination names a bucket, falling back to inline delivery
/// otherwise.
pub struct DeliveryDispatcher {
    store: Option<ObjectStore>,
}

impl DeliveryDispatcher {
    pub fn new(storage: Option<&StorageSection>) -> StorageResult<Self> {
        let store = match storage {
            Some(section) => Some(ObjectStore::new(section)?),
            None => None,
        };
        Ok(Self { store })
    }

    pub async fn dispatch(
        &self,
        bytes: Vec<u8>,
        descriptor: OutputDescriptor,
    ) -> StorageResult<Delivery> {
        let upload = match (&self.store, &descriptor.bucket) {
            (Some(store), Some(bucket)) if !bytes.is_empty() => Some((store, bucket)),
            _ => None,
        };
        let Some((store, bucket)) = upload else {
            return Ok(Delivery::Inline { bytes, descriptor });
        };

        let key = descriptor
            .name
            .split_once('/')
            .map(|(_, rest)| rest)
            .unwrap_or(&descriptor.name);
        let stored = store.put(bucket, key, &bytes, &descriptor.mime).await?;
        info!(bucket, key, size = stored.size, "artifact uploaded");
        Ok(Delivery::Remote(stored))
    }
}
