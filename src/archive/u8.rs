// archive/u8.rs from wadforge
//
// Implements the structures and methods required for parsing and building U8 archives.

use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum U8Error {
    #[error("invalid file name at offset {0}")]
    InvalidFileName(u64),
    #[error("this does not appear to be a U8 archive (missing magic number)")]
    NotU8Data,
    #[error("U8 data is not in a valid format")]
    IO(#[from] std::io::Error),
}

const U8_MAGIC: [u8; 4] = [0x55, 0xAA, 0x38, 0x2D];
const IMET_MAGIC: [u8; 4] = [0x49, 0x4D, 0x45, 0x54];

#[derive(Clone, Debug)]
struct U8Node {
    // 0 for files, 1 for directories.
    node_type: u8,
    name_offset: u32,
    data_offset: u32,
    size: u32,
}

#[derive(Debug)]
/// A structure that represents a U8 archive: a tree of named nodes with the file data packed
/// after the node and string tables.
pub struct U8Archive {
    u8_nodes: Vec<U8Node>,
    file_names: Vec<String>,
    file_data: Vec<Vec<u8>>,
    padding: [u8; 16],
}

impl U8Archive {
    /// Creates a new U8Archive instance from the binary data of a U8 file. Channel banners wrap
    /// their U8 data in an IMET header, which is recognized and skipped.
    pub fn from_bytes(data: &[u8]) -> Result<Self, U8Error> {
        let mut buf = Cursor::new(data);
        let mut magic = [0u8; 4];
        buf.read_exact(&mut magic)?;
        // Node offsets are relative to wherever the archive starts, which is only the start of
        // the file when no IMET header wraps it.
        let mut u8_start: u64 = 0;
        if magic != U8_MAGIC {
            u8_start = data_start_past_imet(&mut buf)?;
            buf.seek(SeekFrom::Start(u8_start))?;
            buf.read_exact(&mut magic)?;
            if magic != U8_MAGIC {
                return Err(U8Error::NotU8Data);
            }
        }
        let _root_node_offset = buf.read_u32::<BigEndian>()?;
        let _header_size = buf.read_u32::<BigEndian>()?;
        let _data_offset = buf.read_u32::<BigEndian>()?;
        let mut padding = [0u8; 16];
        buf.read_exact(&mut padding)?;
        // The root node's size field is the total node count, so it has to be read before the
        // rest of the table.
        let root_node_type = buf.read_u8()?;
        let root_node_name_offset = buf.read_u24::<BigEndian>()?;
        let root_node_data_offset = buf.read_u32::<BigEndian>()?;
        let root_node_size = buf.read_u32::<BigEndian>()?;
        let mut u8_nodes = vec![U8Node {
            node_type: root_node_type,
            name_offset: root_node_name_offset,
            data_offset: root_node_data_offset,
            size: root_node_size,
        }];
        for _ in 1..root_node_size {
            let node_type = buf.read_u8()?;
            let name_offset = buf.read_u24::<BigEndian>()?;
            let data_offset = buf.read_u32::<BigEndian>()?;
            let size = buf.read_u32::<BigEndian>()?;
            u8_nodes.push(U8Node {
                node_type,
                name_offset,
                data_offset,
                size,
            });
        }
        // The string table follows the node table directly; file data offsets are absolute.
        let base_name_offset = buf.position();
        let mut file_names = Vec::with_capacity(u8_nodes.len());
        let mut file_data = Vec::with_capacity(u8_nodes.len());
        for node in &u8_nodes {
            buf.seek(SeekFrom::Start(base_name_offset + node.name_offset as u64))?;
            let mut name_bin = Vec::new();
            loop {
                let byte = buf.read_u8()?;
                if byte == b'\0' {
                    break;
                }
                name_bin.push(byte);
            }
            let name = String::from_utf8(name_bin)
                .map_err(|_| U8Error::InvalidFileName(base_name_offset + node.name_offset as u64))?;
            file_names.push(name);
            if node.node_type == 0 {
                buf.seek(SeekFrom::Start(u8_start + node.data_offset as u64))?;
                let mut data = vec![0u8; node.size as usize];
                buf.read_exact(&mut data)?;
                file_data.push(data);
            } else {
                file_data.push(Vec::new());
            }
        }
        Ok(U8Archive {
            u8_nodes,
            file_names,
            file_data,
            padding,
        })
    }

    /// Dumps the data in a U8Archive instance back into binary data that can be written to a
    /// file. Offsets are recalculated so that file data follows node order.
    pub fn to_bytes(&self) -> Result<Vec<u8>, U8Error> {
        // The header size covers the node table and string table but not the file header.
        let mut header_size: u32 = self.u8_nodes.len() as u32 * 12;
        for file_name in &self.file_names {
            header_size += file_name.len() as u32 + 1;
        }
        let data_offset: u32 = (header_size + 32).next_multiple_of(64);
        let mut current_data_offset = data_offset;
        let mut current_name_offset: u32 = 0;
        let mut u8_nodes = self.u8_nodes.clone();
        for (i, node) in u8_nodes.iter_mut().enumerate() {
            if node.node_type == 0 {
                node.data_offset = current_data_offset.next_multiple_of(32);
                current_data_offset += node.size.next_multiple_of(32);
            }
            node.name_offset = current_name_offset;
            current_name_offset += self.file_names[i].len() as u32 + 1;
        }
        let mut buf: Vec<u8> = Vec::new();
        buf.write_all(&U8_MAGIC)?;
        buf.write_u32::<BigEndian>(0x20)?;
        buf.write_u32::<BigEndian>(header_size)?;
        buf.write_u32::<BigEndian>(data_offset)?;
        buf.write_all(&self.padding)?;
        for node in &u8_nodes {
            buf.write_u8(node.node_type)?;
            buf.write_u24::<BigEndian>(node.name_offset)?;
            buf.write_u32::<BigEndian>(node.data_offset)?;
            buf.write_u32::<BigEndian>(node.size)?;
        }
        for file_name in &self.file_names {
            buf.write_all(file_name.as_bytes())?;
            buf.write_u8(b'\0')?;
        }
        buf.resize(buf.len().next_multiple_of(64), 0);
        // File data is aligned to 32 bytes after each entry.
        for data in &self.file_data {
            buf.write_all(data)?;
            buf.resize(buf.len().next_multiple_of(32), 0);
        }
        Ok(buf)
    }

    /// Gets the names of every node in the archive, in node order. Directory nodes keep their
    /// names; the root node's name is empty.
    pub fn file_names(&self) -> &[String] {
        &self.file_names
    }

    /// Gets the data of the file with the specified name, if a file node with that name exists.
    pub fn get_file(&self, name: &str) -> Option<&[u8]> {
        self.u8_nodes
            .iter()
            .enumerate()
            .find(|(i, node)| node.node_type == 0 && self.file_names[*i] == name)
            .map(|(i, _)| self.file_data[i].as_slice())
    }
}

// Banners hide the U8 magic behind an IMET header either right at the start of the file or
// after a 64-byte build tag; the archive then starts at 0x600 or 0x640 respectively.
fn data_start_past_imet<R: Read + Seek>(buf: &mut R) -> Result<u64, U8Error> {
    let mut magic = [0u8; 4];
    buf.seek(SeekFrom::Start(0x40))?;
    buf.read_exact(&mut magic)?;
    if magic == IMET_MAGIC {
        return Ok(0x600);
    }
    buf.seek(SeekFrom::Start(0x80))?;
    buf.read_exact(&mut magic)?;
    if magic == IMET_MAGIC {
        return Ok(0x640);
    }
    Err(U8Error::NotU8Data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_archive() -> U8Archive {
        let file_a = b"opening.bnr data".to_vec();
        let file_b = b"icon data, somewhat longer than the first file".to_vec();
        U8Archive {
            u8_nodes: vec![
                U8Node {
                    node_type: 1,
                    name_offset: 0,
                    data_offset: 0,
                    size: 3,
                },
                U8Node {
                    node_type: 0,
                    name_offset: 0,
                    data_offset: 0,
                    size: file_a.len() as u32,
                },
                U8Node {
                    node_type: 0,
                    name_offset: 0,
                    data_offset: 0,
                    size: file_b.len() as u32,
                },
            ],
            file_names: vec![
                String::new(),
                String::from("banner.bin"),
                String::from("icon.bin"),
            ],
            file_data: vec![Vec::new(), file_a, file_b],
            padding: [0; 16],
        }
    }

    #[test]
    fn round_trip_preserves_files() {
        let archive = sample_archive();
        let raw = archive.to_bytes().unwrap();
        let parsed = U8Archive::from_bytes(&raw).unwrap();
        assert_eq!(parsed.file_names(), archive.file_names());
        assert_eq!(parsed.get_file("banner.bin").unwrap(), b"opening.bnr data");
        assert_eq!(
            parsed.get_file("icon.bin").unwrap(),
            b"icon data, somewhat longer than the first file"
        );
        assert!(parsed.get_file("missing.bin").is_none());
        assert_eq!(parsed.to_bytes().unwrap(), raw);
    }

    #[test]
    fn imet_wrapped_archive_is_found() {
        let archive = sample_archive();
        let raw = archive.to_bytes().unwrap();
        // Wrap the archive the way a banner with no build tag does: IMET magic at 0x40, U8
        // data at 0x600.
        let mut wrapped = vec![0u8; 0x600];
        wrapped[0x40..0x44].copy_from_slice(&IMET_MAGIC);
        wrapped.extend_from_slice(&raw);
        let parsed = U8Archive::from_bytes(&wrapped).unwrap();
        assert_eq!(parsed.get_file("banner.bin").unwrap(), b"opening.bnr data");
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            U8Archive::from_bytes(&[0u8; 0x200]),
            Err(U8Error::NotU8Data)
        ));
    }
}
