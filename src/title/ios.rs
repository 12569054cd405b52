// title/ios.rs from wadforge
//
// Implements patching out the access checks in IOS so that modified titles can be installed
// and launched.

use thiserror::Error;
use crate::title::{Title, TitleError};

#[derive(Debug, Error)]
pub enum IOSError {
    #[error("title with Title ID {0} is not an IOS and cannot be patched")]
    NotIOS(String),
    #[error("an error occurred while processing the title being patched")]
    Title(#[from] TitleError),
}

struct Patch {
    pattern: &'static [u8],
    replacement: &'static [u8],
}

// The signature check in ES, which compares hashes with strncmp. Patching the comparison
// length to zero makes every (fake)signature pass.
const HASH_CHECK_PATCHES: &[Patch] = &[
    Patch {
        pattern: &[0x20, 0x07, 0x23, 0xA2],
        replacement: &[0x20, 0x00, 0x23, 0xA2],
    },
    Patch {
        pattern: &[0x20, 0x07, 0x4B, 0x0B],
        replacement: &[0x20, 0x00, 0x4B, 0x0B],
    },
];

// The check in ES_Identify that restricts which titles may identify as another title.
const ES_IDENTIFY_PATCHES: &[Patch] = &[Patch {
    pattern: &[0x28, 0x03, 0xD1, 0x23],
    replacement: &[0x00, 0x00, 0x00, 0x00],
}];

// The permission check guarding raw NAND access from outside IOS.
const NAND_ACCESS_PATCHES: &[Patch] = &[Patch {
    pattern: &[0x42, 0x8B, 0xD0, 0x01, 0x25, 0x66],
    replacement: &[0x42, 0x8B, 0xE0, 0x01, 0x25, 0x66],
}];

// The conditional branch that refuses to install a title older than the installed version.
const VERSION_DOWNGRADING_PATCHES: &[Patch] = &[Patch {
    pattern: &[0xD2, 0x01, 0x4E, 0x56],
    replacement: &[0xE0, 0x01, 0x4E, 0x56],
}];

fn apply_patch(data: &mut [u8], patch: &Patch) -> usize {
    let mut count = 0;
    let mut offset = 0;
    while offset + patch.pattern.len() <= data.len() {
        if data[offset..offset + patch.pattern.len()] == *patch.pattern {
            data[offset..offset + patch.pattern.len()].copy_from_slice(patch.replacement);
            count += 1;
            offset += patch.pattern.len();
        } else {
            offset += 1;
        }
    }
    count
}

/// A structure that applies the well-known IOS patches to a loaded IOS title. Patched contents
/// are re-encrypted in place, their records are updated with the new hashes, and the TMD is
/// fakesigned so that the patched IOS still installs.
pub struct IOSPatcher<'a> {
    title: &'a mut Title,
}

impl<'a> IOSPatcher<'a> {
    /// Creates a new IOSPatcher for a title. The title must actually be an IOS, since these
    /// patches only make sense inside the ES module.
    pub fn new(title: &'a mut Title) -> Result<Self, IOSError> {
        let title_id = title.tmd.title_id;
        let tid_low = u32::from_be_bytes(title_id[4..].try_into().unwrap());
        if title_id[..4] != [0, 0, 0, 1] || !(3..=255).contains(&tid_low) {
            return Err(IOSError::NotIOS(hex::encode(title_id)));
        }
        Ok(IOSPatcher { title })
    }

    fn apply_patches(&mut self, patches: &[Patch]) -> Result<usize, IOSError> {
        let mut total = 0;
        let num_contents = self.title.tmd.num_contents() as usize;
        for index in 0..num_contents {
            let mut content = self.title.get_content_by_index(index)?;
            let mut applied = 0;
            for patch in patches {
                applied += apply_patch(&mut content, patch);
            }
            if applied > 0 {
                self.title.set_content(&content, index)?;
                total += applied;
            }
        }
        if total > 0 {
            self.title.fakesign()?;
        }
        Ok(total)
    }

    /// Patches the signature hash check so that fakesigned titles pass it. Returns the number
    /// of patched sites; an IOS without the expected code yields zero.
    pub fn patch_fakesigning(&mut self) -> Result<usize, IOSError> {
        self.apply_patches(HASH_CHECK_PATCHES)
    }

    /// Patches the identification check in ES_Identify. Returns the number of patched sites.
    pub fn patch_es_identify(&mut self) -> Result<usize, IOSError> {
        self.apply_patches(ES_IDENTIFY_PATCHES)
    }

    /// Patches the NAND permission check to allow raw filesystem access. Returns the number of
    /// patched sites.
    pub fn patch_nand_access(&mut self) -> Result<usize, IOSError> {
        self.apply_patches(NAND_ACCESS_PATCHES)
    }

    /// Patches the version check that blocks downgrading installed titles. Returns the number
    /// of patched sites.
    pub fn patch_version_downgrading(&mut self) -> Result<usize, IOSError> {
        self.apply_patches(VERSION_DOWNGRADING_PATCHES)
    }

    /// Applies every known patch. Returns the total number of patched sites.
    pub fn patch_all(&mut self) -> Result<usize, IOSError> {
        let mut total = 0;
        total += self.patch_fakesigning()?;
        total += self.patch_es_identify()?;
        total += self.patch_nand_access()?;
        total += self.patch_version_downgrading()?;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::title::crypto::sha1_hash;
    use crate::title::tests::sample_title;

    const IOS_TID: [u8; 8] = [0, 0, 0, 1, 0, 0, 0, 0x23];

    #[test]
    fn non_ios_titles_are_rejected() {
        let mut title = sample_title([0, 0, 1, 0, 0x41, 0x41, 0x41, 0x41], &[b"data"]);
        assert!(matches!(IOSPatcher::new(&mut title), Err(IOSError::NotIOS(_))));
        let mut system_menu = sample_title([0, 0, 0, 1, 0, 0, 0, 2], &[b"data"]);
        assert!(IOSPatcher::new(&mut system_menu).is_err());
    }

    #[test]
    fn fakesigning_patch_rewrites_content() {
        let es_module = [
            b"filler".as_slice(),
            &[0x20, 0x07, 0x23, 0xA2],
            b"more filler",
            &[0x20, 0x07, 0x4B, 0x0B],
        ]
        .concat();
        let mut title = sample_title(IOS_TID, &[b"kernel", &es_module]);
        let mut patcher = IOSPatcher::new(&mut title).unwrap();
        assert_eq!(patcher.patch_fakesigning().unwrap(), 2);
        let patched = title.get_content_by_index(1).unwrap();
        assert_eq!(patched.len(), es_module.len());
        assert_eq!(&patched[6..10], &[0x20, 0x00, 0x23, 0xA2]);
        assert_eq!(
            title.tmd.content_record(1).unwrap().content_hash,
            sha1_hash(&patched)
        );
        assert!(title.is_fakesigned());
    }

    #[test]
    fn unmatched_patches_leave_title_alone() {
        let mut title = sample_title(IOS_TID, &[b"no checks in here"]);
        let before = title.tmd.content_record(0).unwrap().content_hash;
        let mut patcher = IOSPatcher::new(&mut title).unwrap();
        assert_eq!(patcher.patch_all().unwrap(), 0);
        assert_eq!(title.tmd.content_record(0).unwrap().content_hash, before);
        assert!(!title.is_fakesigned());
    }

    #[test]
    fn patch_all_covers_every_family() {
        let es_module = [
            [0x28, 0x03, 0xD1, 0x23].as_slice(),
            &[0xD2, 0x01, 0x4E, 0x56],
            &[0x42, 0x8B, 0xD0, 0x01, 0x25, 0x66],
        ]
        .concat();
        let mut title = sample_title(IOS_TID, &[&es_module]);
        let mut patcher = IOSPatcher::new(&mut title).unwrap();
        assert_eq!(patcher.patch_all().unwrap(), 3);
        let patched = title.get_content_by_index(0).unwrap();
        assert_eq!(&patched[..4], &[0x00, 0x00, 0x00, 0x00]);
        assert_eq!(patched[4], 0xE0);
        assert_eq!(patched[10], 0xE0);
    }
}
