pub mod devino;
pub mod hardlink;
pub mod read;
pub mod write;

pub use devino::{BlobIdentity, DevInoCache};
pub use hardlink::{CheckoutHardlinkTracker, HardlinkTracker};
pub use read::{read_symlink_target, read_xattrs, FileMetadata, FileType};
pub use write::{
    apply_metadata, clear_directory, create_block_device, create_char_device, create_fifo,
    create_hardlink, create_socket_placeholder, create_symlink, ensure_writable_dir, remove_path,
};
