//! GeoSheet 原生文件格式（.geos）
//!
//! 16 字节文件头之后是 Zstd 压缩的 MessagePack 文档：
//! - 魔数 `GEOS`
//! - 格式版本（u32，小端）
//! - 标志位（u32，预留）
//! - 压缩后数据长度（u32）

use crate::document::Document;
use crate::error::FileError;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// 文件魔数 "GEOS"
const MAGIC: &[u8; 4] = b"GEOS";

/// 当前文件格式版本
const FORMAT_VERSION: u32 = 1;

/// Zstd 压缩级别（1-22，3 是默认值）
const COMPRESSION_LEVEL: i32 = 3;

/// 文件扩展名
pub const EXTENSION: &str = "geos";

/// 文件头（16 字节）
#[derive(Debug)]
struct FileHeader {
    magic: [u8; 4],
    version: u32,
    /// 标志位（预留）
    flags: u32,
    compressed_size: u32,
}

impl FileHeader {
    fn new(compressed_size: u32) -> Self {
        Self {
            magic: *MAGIC,
            version: FORMAT_VERSION,
            flags: 0,
            compressed_size,
        }
    }

    fn write(&self, writer: &mut impl Write) -> Result<(), std::io::Error> {
        writer.write_all(&self.magic)?;
        writer.write_all(&self.version.to_le_bytes())?;
        writer.write_all(&self.flags.to_le_bytes())?;
        writer.write_all(&self.compressed_size.to_le_bytes())?;
        Ok(())
    }

    fn read(reader: &mut impl Read) -> Result<Self, FileError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;

        if &magic != MAGIC {
            return Err(FileError::InvalidFormat(
                "Invalid magic number, not a GeoSheet file".to_string(),
            ));
        }

        let mut buf = [0u8; 4];

        reader.read_exact(&mut buf)?;
        let version = u32::from_le_bytes(buf);

        reader.read_exact(&mut buf)?;
        let flags = u32::from_le_bytes(buf);

        reader.read_exact(&mut buf)?;
        let compressed_size = u32::from_le_bytes(buf);

        Ok(Self {
            magic,
            version,
            flags,
            compressed_size,
        })
    }
}

/// 编码为原生格式字节
pub fn to_bytes(document: &Document) -> Result<Vec<u8>, FileError> {
    let msgpack_data = rmp_serde::to_vec_named(document)?;
    let compressed_data = zstd::encode_all(msgpack_data.as_slice(), COMPRESSION_LEVEL)?;
    let compressed_size = u32::try_from(compressed_data.len())
        .map_err(|_| FileError::InvalidFormat("document too large".to_string()))?;

    let mut bytes = Vec::with_capacity(16 + compressed_data.len());
    FileHeader::new(compressed_size).write(&mut bytes)?;
    bytes.extend_from_slice(&compressed_data);
    Ok(bytes)
}

/// 从原生格式读取
pub fn from_reader(reader: &mut impl Read) -> Result<Document, FileError> {
    let header = FileHeader::read(reader)?;

    if header.version > FORMAT_VERSION {
        return Err(FileError::UnsupportedVersion(format!(
            "File version {} is newer than supported version {}",
            header.version, FORMAT_VERSION
        )));
    }
    if header.flags != 0 {
        tracing::warn!("ignoring unknown file flags {:#x}", header.flags);
    }

    let mut compressed_data = vec![0u8; header.compressed_size as usize];
    reader.read_exact(&mut compressed_data).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FileError::Corruption(format!(
                "expected {} bytes of compressed data",
                header.compressed_size
            ))
        } else {
            FileError::Io(e)
        }
    })?;

    let msgpack_data = zstd::decode_all(compressed_data.as_slice())?;
    Ok(rmp_serde::from_slice(&msgpack_data)?)
}

/// 保存文档到文件
pub fn save(document: &Document, path: &Path) -> Result<(), FileError> {
    let bytes = to_bytes(document)?;

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&bytes)?;
    writer.flush()?;

    tracing::info!(
        "Saved '{}' ({} macros) to {} ({} bytes)",
        document.metadata.title,
        document.macros.len(),
        path.display(),
        bytes.len()
    );
    Ok(())
}

/// 从文件加载文档
pub fn load(path: &Path) -> Result<Document, FileError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let document = from_reader(&mut reader)?;

    tracing::info!(
        "Loaded '{}' ({} lines) from {}",
        document.metadata.title,
        document.body.lines().count(),
        path.display()
    );
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geosheet_core::worksheet::{Macro, Worksheet};

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.geos");

        let mut sheet = Worksheet::new();
        sheet.execute("A = (1, 5)").unwrap();
        sheet.execute("c = Circle(A, 2)").unwrap();
        sheet.add_macro("grow", Macro::new("c.radius = c.radius + 1"));
        let mut doc = Document::from_worksheet(&sheet);
        doc.metadata.title = "Test Document".to_string();

        save(&doc, &path).unwrap();

        let mut reader = BufReader::new(File::open(&path).unwrap());
        let header = FileHeader::read(&mut reader).unwrap();
        assert_eq!(&header.magic, MAGIC);
        assert_eq!(header.version, FORMAT_VERSION);

        let loaded = load(&path).unwrap();
        assert_eq!(loaded, doc);
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = b"XXXX".to_vec();
        bytes.extend_from_slice(&[0u8; 12]);
        assert!(matches!(
            from_reader(&mut bytes.as_slice()),
            Err(FileError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_newer_version_is_rejected() {
        let mut bytes = to_bytes(&Document::new()).unwrap();
        bytes[4..8].copy_from_slice(&(FORMAT_VERSION + 1).to_le_bytes());
        assert!(matches!(
            from_reader(&mut bytes.as_slice()),
            Err(FileError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_truncated_payload() {
        let bytes = to_bytes(&Document::new()).unwrap();
        let truncated = &bytes[..bytes.len() - 4];
        assert!(matches!(
            from_reader(&mut &truncated[..]),
            Err(FileError::Corruption(_))
        ));
    }
}
