//! Images and snapshots

use crate::api::OpenStackApi;
use crate::provider::OpenStackConnector;
use cirrus_cloud::{CloudError, Credential, ImageInfo, ImageUri, Infrastructure, Result};

impl OpenStackConnector {
    /// Snapshots the boot disk of `vm_id` into a new image
    ///
    /// Only disk 0 can be snapshotted. With `auto_delete` the image is
    /// recorded on the infrastructure and deleted with its last VM.
    pub(crate) async fn snapshot_disk(
        &self,
        infra: &mut Infrastructure,
        vm_id: &str,
        disk: usize,
        image_name: &str,
        auto_delete: bool,
        credentials: &[Credential],
    ) -> Result<String> {
        if disk != 0 {
            return Err(CloudError::UnsupportedOperation(format!(
                "snapshot of disk {}, only the boot disk can be snapshotted",
                disk
            )));
        }

        let api = self.get_driver(credentials).await?;
        let node_id = infra
            .vm(vm_id)
            .map(|vm| vm.id.clone())
            .ok_or_else(|| CloudError::NotFound(format!("VM {}", vm_id)))?;

        let image = api.create_image(&node_id, image_name).await?;
        let uri = ImageUri::for_site(&self.site, image.id).to_string();
        tracing::info!(node = %node_id, image = %uri, "Snapshot created");

        if auto_delete {
            infra.snapshots.push(uri.clone());
        }
        Ok(uri)
    }

    pub(crate) async fn remove_image(&self, api: &dyn OpenStackApi, image_uri: &str) -> Result<()> {
        let uri = ImageUri::parse_for(image_uri, &self.site)?;
        let image = api.get_image(&uri.id).await?;
        api.delete_image(&image.id).await?;
        tracing::info!(image = %image_uri, "Image deleted");
        Ok(())
    }

    pub(crate) async fn image_catalog(&self, api: &dyn OpenStackApi) -> Result<Vec<ImageInfo>> {
        let images = api.list_images().await?;
        Ok(images
            .into_iter()
            .map(|image| ImageInfo {
                uri: ImageUri::for_site(&self.site, image.id).to_string(),
                name: image.name,
            })
            .collect())
    }
}
