//! Block devices and volumes

use crate::api::{BlockDeviceMapping, DestinationType, Node, OpenStackApi, SourceType, Volume};
use crate::error::OpenStackError;
use crate::provider::Pacing;
use cirrus_cloud::{CloudError, CloudSite, Disk, ImageUri, Result, System};

const DEFAULT_FSTYPE: &str = "ext3";
const AVAILABLE: &str = "available";
const IN_USE: &str = "in-use";

/// Maps a declared device name to the virtio naming the provider uses
///
/// `hdb` and `sdb` become `vdb`; a `/dev/` prefix is dropped.
pub fn provider_device(device: &str) -> String {
    let device = device.strip_prefix("/dev/").unwrap_or(device);
    match device.get(..2) {
        Some("hd") | Some("sd") | Some("xv") => {
            let rest = if device.starts_with("xvd") {
                &device[3..]
            } else {
                &device[2..]
            };
            format!("vd{}", rest)
        }
        _ => device.to_string(),
    }
}

/// Device name of the disk at `index` when none is declared (`vda`, `vdb`, ...)
pub fn default_device(index: usize) -> String {
    let letter = (b'a' + (index % 26) as u8) as char;
    format!("vd{}", letter)
}

fn disk_device(disk: &Disk) -> String {
    disk.device
        .as_deref()
        .map(provider_device)
        .unwrap_or_else(|| default_device(disk.index))
}

/// Block device mappings for `system`, in disk order
///
/// The boot image comes first, followed by blank volumes (deleted with the
/// node) and existing volumes (kept). Boot indexes follow the mapping order.
pub async fn block_device_mappings(
    api: &dyn OpenStackApi,
    site: &CloudSite,
    system: &System,
) -> Result<Vec<BlockDeviceMapping>> {
    let boot = system.boot_disk().and_then(|d| d.image_url.as_deref()).ok_or_else(|| {
        CloudError::InvalidConfig(format!("system {} has no boot image", system.name))
    })?;
    let image = ImageUri::parse_for(boot, site)?;
    api.get_image(&image.id).await?;

    let mut mappings = vec![BlockDeviceMapping {
        source_type: SourceType::Image,
        destination_type: None,
        uuid: Some(image.id),
        boot_index: 0,
        volume_size: None,
        device_name: None,
        guest_format: None,
        delete_on_termination: false,
    }];

    for disk in system.disks.iter().filter(|d| d.index > 0) {
        let boot_index = mappings.len() as u32;
        let mapping = match (&disk.image_url, disk.size_gb) {
            (Some(url), _) => {
                let volume = ImageUri::parse_for(url, site)?;
                api.get_volume(&volume.id).await?;
                BlockDeviceMapping {
                    source_type: SourceType::Volume,
                    destination_type: Some(DestinationType::Volume),
                    uuid: Some(volume.id),
                    boot_index,
                    volume_size: None,
                    device_name: Some(disk_device(disk)),
                    guest_format: None,
                    delete_on_termination: false,
                }
            }
            (None, Some(size)) => BlockDeviceMapping {
                source_type: SourceType::Blank,
                destination_type: Some(DestinationType::Volume),
                uuid: None,
                boot_index,
                volume_size: Some(size),
                device_name: Some(disk_device(disk)),
                guest_format: Some(
                    disk.fstype.clone().unwrap_or_else(|| DEFAULT_FSTYPE.to_string()),
                ),
                delete_on_termination: true,
            },
            (None, None) => {
                tracing::warn!(disk = disk.index, "Disk without size or volume, ignored");
                continue;
            }
        };
        mappings.push(mapping);
    }

    Ok(mappings)
}

fn attachment_device(volume: &Volume, node_id: &str) -> Option<String> {
    volume
        .attachments
        .iter()
        .find(|a| a.server_id == node_id)
        .map(|a| a.device.strip_prefix("/dev/").unwrap_or(&a.device).to_string())
}

/// Writes the devices and volume URIs of attached volumes back into `system`
///
/// The boot disk is left alone. A volume is matched to the disk declaring
/// its device, or to the disk whose default device it occupies.
pub async fn reconcile_attached_volumes(
    api: &dyn OpenStackApi,
    site: &CloudSite,
    node: &Node,
    system: &mut System,
) -> Result<()> {
    for volume_id in &node.volumes_attached {
        let volume = match api.get_volume(volume_id).await {
            Ok(volume) => volume,
            Err(OpenStackError::NotFound(_)) => continue,
            Err(e) => return Err(e.into()),
        };
        let Some(device) = attachment_device(&volume, &node.id) else {
            continue;
        };

        let index = system
            .disks
            .iter()
            .find(|d| d.index > 0 && d.device.as_deref().map(provider_device) == Some(device.clone()))
            .or_else(|| {
                system
                    .disks
                    .iter()
                    .find(|d| d.index > 0 && default_device(d.index) == device)
            })
            .map(|d| d.index);

        match index {
            Some(index) => {
                let disk = system.disk_mut(index);
                disk.device = Some(device);
                disk.image_url = Some(ImageUri::for_site(site, volume.id).to_string());
            }
            None => tracing::debug!(volume = %volume.id, device = %device, "Unmatched volume"),
        }
    }
    Ok(())
}

/// Creates a volume and attaches it to `node_id`
///
/// Returns the volume id and the device it was attached as. A volume that
/// cannot be attached is deleted again.
pub async fn add_volume(
    api: &dyn OpenStackApi,
    pacing: &Pacing,
    node_id: &str,
    size_gb: u64,
    name: &str,
    device: Option<&str>,
) -> Result<(String, String)> {
    let volume = pacing
        .retry("create_volume", || async {
            Ok(api.create_volume(size_gb, name).await?)
        })
        .await?;
    tracing::info!(volume = %volume.id, size_gb = size_gb, "Volume created");

    match attach_new_volume(api, pacing, node_id, &volume.id, device).await {
        Ok(device) => Ok((volume.id, device)),
        Err(e) => {
            tracing::warn!(volume = %volume.id, error = %e, "Attach failed, deleting volume");
            if let Err(cleanup) = api.delete_volume(&volume.id).await {
                tracing::warn!(volume = %volume.id, error = %cleanup, "Could not delete volume");
            }
            Err(e)
        }
    }
}

async fn attach_new_volume(
    api: &dyn OpenStackApi,
    pacing: &Pacing,
    node_id: &str,
    volume_id: &str,
    device: Option<&str>,
) -> Result<String> {
    wait_for_state(api, pacing, volume_id, AVAILABLE).await?;

    let device = device.map(provider_device);
    api.attach_volume(node_id, volume_id, device.as_deref()).await?;

    let attached = wait_for_state(api, pacing, volume_id, IN_USE).await?;
    attachment_device(&attached, node_id)
        .or(device)
        .ok_or_else(|| CloudError::ApiError(format!("volume {} has no attachment", volume_id)))
}

async fn wait_for_state(
    api: &dyn OpenStackApi,
    pacing: &Pacing,
    volume_id: &str,
    state: &str,
) -> Result<Volume> {
    pacing
        .poll(&format!("volume {} {}", volume_id, state), || async {
            let volume = api.get_volume(volume_id).await?;
            if volume.state == "error" {
                return Err(CloudError::ApiError(format!("volume {} in error state", volume_id)));
            }
            Ok((volume.state == state).then_some(volume))
        })
        .await
}

/// Detaches and deletes a volume the VM owns
///
/// An absent volume counts as released.
pub async fn release_volume(api: &dyn OpenStackApi, pacing: &Pacing, volume_id: &str) -> Result<()> {
    let volume = match api.get_volume(volume_id).await {
        Ok(volume) => volume,
        Err(OpenStackError::NotFound(_)) => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    if !volume.attachments.is_empty() || volume.state == IN_USE {
        match api.detach_volume(volume_id).await {
            Ok(()) | Err(OpenStackError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        match wait_for_state(api, pacing, volume_id, AVAILABLE).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        }
    }

    // deletion may race the detach finishing
    match pacing
        .retry_conflicts("delete_volume", || api.delete_volume(volume_id))
        .await
    {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}
