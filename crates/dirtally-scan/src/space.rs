//! Volume capacity lookup via `sysinfo`.

use std::path::Path;

use dirtally_core::VolumeSpace;
use dirtally_core::path::is_within;
use sysinfo::Disks;

use crate::source::{SpaceQuery, VolumeInfo};

/// Space query backed by the mounted disk list.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoSpace;

impl SpaceQuery for SysinfoSpace {
    fn volume_of(&self, path: &Path) -> Option<VolumeInfo> {
        let disks = Disks::new_with_refreshed_list();
        // the deepest mount point containing the path wins
        disks
            .list()
            .iter()
            .filter(|disk| is_within(path, disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().components().count())
            .map(|disk| VolumeInfo {
                mount_point: disk.mount_point().to_path_buf(),
                space: VolumeSpace {
                    total_bytes: disk.total_space(),
                    free_bytes: disk.available_space(),
                },
                file_system: disk.file_system().to_string_lossy().to_string(),
            })
    }
}
