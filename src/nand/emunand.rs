// nand/emunand.rs from wadforge
//
// Implements the structures and methods required for managing Wii EmuNANDs.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use crate::nand::sys::{UidSys, UidSysError};
use crate::title::content::{ContentError, SharedContentMap};
use crate::title::tmd::ContentType;
use crate::title::{Title, TitleError};

#[derive(Debug, Error)]
pub enum EmuNANDError {
    #[error("EmuNAND requires the directory `{0}`, but a file with that name already exists")]
    DirectoryNameConflict(String),
    #[error("specified EmuNAND root does not exist")]
    RootNotFound,
    #[error("no title with Title ID {0} is installed to this EmuNAND")]
    TitleNotInstalled(String),
    #[error("uid.sys processing error")]
    UidSys(#[from] UidSysError),
    #[error("content processing error")]
    Content(#[from] ContentError),
    #[error("title processing error")]
    Title(#[from] TitleError),
    #[error("io error occurred during EmuNAND operation")]
    IO(#[from] std::io::Error),
}

fn safe_create_dir(dir: &PathBuf) -> Result<(), EmuNANDError> {
    if !dir.exists() {
        fs::create_dir(dir)?;
    } else if !dir.is_dir() {
        return Err(EmuNANDError::DirectoryNameConflict(
            dir.to_string_lossy().to_string(),
        ));
    }
    Ok(())
}

/// An EmuNAND object that allows for creating and modifying the directory layout that mirrors a
/// Wii's internal NAND filesystem.
pub struct EmuNAND {
    emunand_root: PathBuf,
    emunand_dirs: HashMap<String, PathBuf>,
}

impl EmuNAND {
    /// Opens an existing EmuNAND root in an EmuNAND instance that can be used to interact with
    /// it. The standard directory structure is created if it is not already there.
    pub fn open(emunand_root: PathBuf) -> Result<Self, EmuNANDError> {
        if !emunand_root.exists() {
            return Err(EmuNANDError::RootNotFound);
        }
        let mut emunand_dirs: HashMap<String, PathBuf> = HashMap::new();
        for dir in [
            "import", "meta", "shared1", "shared2", "sys", "ticket", "title", "tmp", "wfs",
        ] {
            let path = emunand_root.join(dir);
            safe_create_dir(&path)?;
            emunand_dirs.insert(String::from(dir), path);
        }
        Ok(EmuNAND {
            emunand_root,
            emunand_dirs,
        })
    }

    pub fn root(&self) -> &PathBuf {
        &self.emunand_root
    }

    /// Installs the provided title to the EmuNAND, mimicking a WAD installation performed by ES:
    /// the Ticket, the TMD, decrypted normal contents, shared contents tracked through
    /// `content.map`, the footer, and a `uid.sys` entry.
    pub fn install_title(&self, title: &Title) -> Result<(), EmuNANDError> {
        let tid_high = hex::encode(&title.tmd.title_id[0..4]);
        let tid_low = hex::encode(&title.tmd.title_id[4..8]);
        // Tickets land at /ticket/<tid_high>/<tid_low>.tik.
        let ticket_dir = self.emunand_dirs["ticket"].join(&tid_high);
        safe_create_dir(&ticket_dir)?;
        fs::write(
            ticket_dir.join(format!("{tid_low}.tik")),
            title.ticket.to_bytes().map_err(TitleError::IO)?,
        )?;
        // The TMD and non-shared contents land in /title/<tid_high>/<tid_low>/content/, as
        // title.tmd and <cid>.app, next to an empty data directory.
        let mut title_dir = self.emunand_dirs["title"].join(&tid_high);
        safe_create_dir(&title_dir)?;
        title_dir = title_dir.join(&tid_low);
        safe_create_dir(&title_dir)?;
        safe_create_dir(&title_dir.join("data"))?;
        title_dir = title_dir.join("content");
        if title_dir.exists() {
            fs::remove_dir_all(&title_dir)?;
        }
        fs::create_dir(&title_dir)?;
        fs::write(
            title_dir.join("title.tmd"),
            title.tmd.to_bytes().map_err(TitleError::TMD)?,
        )?;
        let records = title.tmd.content_records.borrow().clone();
        for (i, record) in records.iter().enumerate() {
            if record.content_type == ContentType::Normal {
                let content_path = title_dir.join(format!("{:08x}.app", record.content_id));
                fs::write(content_path, title.get_content_by_index(i)?)?;
            }
        }
        // Shared contents land in /shared1/ under incremental names handed out by content.map.
        let content_map_path = self.emunand_dirs["shared1"].join("content.map");
        let mut content_map = if content_map_path.exists() {
            SharedContentMap::from_bytes(&fs::read(&content_map_path)?)?
        } else {
            SharedContentMap::new()
        };
        for (i, record) in records.iter().enumerate() {
            if record.content_type == ContentType::Shared {
                if let Some(file_name) = content_map.add(&record.content_hash) {
                    let content_path = self.emunand_dirs["shared1"].join(format!("{file_name}.app"));
                    fs::write(content_path, title.get_content_by_index(i)?)?;
                }
            }
        }
        fs::write(&content_map_path, content_map.to_bytes()?)?;
        // The footer (officially "meta") lands at /meta/<tid_high>/<tid_low>/title.met.
        let meta_data = title.meta();
        if !meta_data.is_empty() {
            let mut meta_dir = self.emunand_dirs["meta"].join(&tid_high);
            safe_create_dir(&meta_dir)?;
            meta_dir = meta_dir.join(&tid_low);
            safe_create_dir(&meta_dir)?;
            fs::write(meta_dir.join("title.met"), meta_data)?;
        }
        // uid.sys needs an entry for the new title before the System Menu will list it.
        let uid_sys_path = self.emunand_dirs["sys"].join("uid.sys");
        let mut uid_sys = if uid_sys_path.exists() {
            UidSys::from_bytes(&fs::read(&uid_sys_path)?)?
        } else {
            UidSys::new()
        };
        uid_sys.add(&title.tmd.title_id);
        fs::write(&uid_sys_path, uid_sys.to_bytes()?)?;
        Ok(())
    }

    /// Uninstalls the title with the provided Title ID from the EmuNAND: its Ticket, its title
    /// directory, and its footer. Shared contents and the `uid.sys` entry stay behind, just as
    /// they do on a real console.
    pub fn uninstall_title(&self, title_id: [u8; 8]) -> Result<(), EmuNANDError> {
        let tid_high = hex::encode(&title_id[0..4]);
        let tid_low = hex::encode(&title_id[4..8]);
        let ticket_path = self.emunand_dirs["ticket"].join(&tid_high).join(format!("{tid_low}.tik"));
        let title_dir = self.emunand_dirs["title"].join(&tid_high).join(&tid_low);
        let meta_dir = self.emunand_dirs["meta"].join(&tid_high).join(&tid_low);
        if !ticket_path.exists() && !title_dir.exists() {
            return Err(EmuNANDError::TitleNotInstalled(hex::encode(title_id)));
        }
        if ticket_path.exists() {
            fs::remove_file(&ticket_path)?;
        }
        if title_dir.exists() {
            fs::remove_dir_all(&title_dir)?;
        }
        if meta_dir.exists() {
            fs::remove_dir_all(&meta_dir)?;
        }
        Ok(())
    }

    /// Gets the Title IDs of every title with content installed to this EmuNAND.
    pub fn get_installed_tids(&self) -> Result<Vec<String>, EmuNANDError> {
        let mut tids = Vec::new();
        for high_entry in fs::read_dir(&self.emunand_dirs["title"])? {
            let high_entry = high_entry?;
            if !high_entry.path().is_dir() {
                continue;
            }
            for low_entry in fs::read_dir(high_entry.path())? {
                let low_entry = low_entry?;
                if low_entry.path().join("content").join("title.tmd").exists() {
                    tids.push(format!(
                        "{}{}",
                        high_entry.file_name().to_string_lossy(),
                        low_entry.file_name().to_string_lossy()
                    ));
                }
            }
        }
        tids.sort();
        Ok(tids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::title::tests::sample_title;

    #[test]
    fn missing_root_is_rejected() {
        let root = PathBuf::from("/nonexistent/emunand/root");
        assert!(matches!(EmuNAND::open(root), Err(EmuNANDError::RootNotFound)));
    }

    #[test]
    fn open_creates_standard_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let emunand = EmuNAND::open(tmp.path().to_path_buf()).unwrap();
        for dir in ["import", "meta", "shared1", "sys", "ticket", "title", "tmp"] {
            assert!(tmp.path().join(dir).is_dir());
        }
        assert!(emunand.get_installed_tids().unwrap().is_empty());
    }

    #[test]
    fn install_and_uninstall_title() {
        let tmp = tempfile::tempdir().unwrap();
        let emunand = EmuNAND::open(tmp.path().to_path_buf()).unwrap();
        let mut title = sample_title([0, 0, 0, 1, 0, 0, 0, 2], &[b"boot content", b"shared asset"]);
        title.tmd.content_records.borrow_mut()[1].content_type = ContentType::Shared;
        emunand.install_title(&title).unwrap();

        let content_dir = tmp.path().join("title/00000001/00000002/content");
        assert_eq!(
            fs::read(content_dir.join("title.tmd")).unwrap(),
            title.tmd.to_bytes().unwrap()
        );
        assert_eq!(fs::read(content_dir.join("00000020.app")).unwrap(), b"boot content");
        assert!(tmp.path().join("ticket/00000001/00000002.tik").exists());
        // The shared content goes to shared1 under its mapped name instead.
        assert!(!content_dir.join("00000021.app").exists());
        assert_eq!(
            fs::read(tmp.path().join("shared1/00000000.app")).unwrap(),
            b"shared asset"
        );
        let map = SharedContentMap::from_bytes(&fs::read(tmp.path().join("shared1/content.map")).unwrap()).unwrap();
        assert_eq!(map.entries.len(), 1);
        let uid_sys = UidSys::from_bytes(&fs::read(tmp.path().join("sys/uid.sys")).unwrap()).unwrap();
        assert_eq!(uid_sys.get_uid(&[0, 0, 0, 1, 0, 0, 0, 2]), Some(0x1000));
        assert_eq!(emunand.get_installed_tids().unwrap(), vec!["0000000100000002"]);

        emunand.uninstall_title([0, 0, 0, 1, 0, 0, 0, 2]).unwrap();
        assert!(!tmp.path().join("title/00000001/00000002").exists());
        assert!(!tmp.path().join("ticket/00000001/00000002.tik").exists());
        // Shared content survives an uninstall.
        assert!(tmp.path().join("shared1/00000000.app").exists());
        assert!(emunand.get_installed_tids().unwrap().is_empty());
        assert!(matches!(
            emunand.uninstall_title([0, 0, 0, 1, 0, 0, 0, 2]),
            Err(EmuNANDError::TitleNotInstalled(_))
        ));
    }

    #[test]
    fn reinstall_replaces_content() {
        let tmp = tempfile::tempdir().unwrap();
        let emunand = EmuNAND::open(tmp.path().to_path_buf()).unwrap();
        let mut title = sample_title([0, 0, 0, 1, 0, 0, 0, 0x23], &[b"version one"]);
        emunand.install_title(&title).unwrap();
        title.set_content(b"version two", 0).unwrap();
        emunand.install_title(&title).unwrap();
        let content_dir = tmp.path().join("title/00000001/00000023/content");
        assert_eq!(fs::read(content_dir.join("00000020.app")).unwrap(), b"version two");
        let uid_sys = UidSys::from_bytes(&fs::read(tmp.path().join("sys/uid.sys")).unwrap()).unwrap();
        assert_eq!(uid_sys.entries.len(), 1);
    }
}
