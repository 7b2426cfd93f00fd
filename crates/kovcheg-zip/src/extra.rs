//! Extra fields.
//!
//! Every header may carry a block of `(id, size, data)` triples. Two ids
//! matter to the codec: ZIP64 extended information and WinZip AES. Anything
//! else is kept as an opaque blob and written back byte for byte.

use std::collections::BTreeMap;

use kovcheg_common::{uint, BinaryReader, BinaryWriter};
use tracing::warn;

use crate::crypto::{AesVendorVersion, KeyStrength};
use crate::zip::central_dir::extra_field;
use crate::{Error, Result};

/// Size of the `(id, size)` prefix of each extra field.
pub const HEADER_SIZE: usize = 4;

/// ZIP64 extended information: a run of 8-byte values.
///
/// Which values are present depends on which 32-bit header fields overflowed,
/// so the field itself does not know what each value means.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Zip64Info {
    data: Vec<u8>,
}

impl Zip64Info {
    pub fn from_values(values: &[u64]) -> Self {
        let mut writer = BinaryWriter::with_capacity(values.len() * 8);
        for &value in values {
            writer.put_u64(value);
        }
        Self {
            data: writer.into_inner(),
        }
    }

    /// Number of complete 8-byte values.
    pub fn len(&self) -> usize {
        self.data.len() / 8
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `index`-th 8-byte value.
    pub fn value(&self, index: usize) -> Option<u64> {
        kovcheg_common::le::read_u64(&self.data, index.checked_mul(8)?).ok()
    }
}

/// WinZip AES extra field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WinZipAesInfo {
    pub vendor_version: AesVendorVersion,
    pub key_strength: KeyStrength,
    /// Compression method applied before encryption.
    pub method: u16,
}

impl WinZipAesInfo {
    /// Fixed data size.
    pub const DATA_SIZE: usize = 7;
    const VENDOR_ID: [u8; 2] = *b"AE";

    fn read(data: &[u8]) -> Result<Self> {
        if data.len() != Self::DATA_SIZE {
            return Err(Error::malformed(
                "WinZip AES extra field",
                format!("expected {} bytes, got {}", Self::DATA_SIZE, data.len()),
            ));
        }
        let mut reader = BinaryReader::new(data);
        let vendor_version = match reader.read_u16()? {
            1 => AesVendorVersion::Ae1,
            2 => AesVendorVersion::Ae2,
            other => {
                return Err(Error::malformed(
                    "WinZip AES extra field",
                    format!("unknown vendor version {other}"),
                ))
            }
        };
        if reader.read_bytes(2)? != Self::VENDOR_ID {
            return Err(Error::malformed(
                "WinZip AES extra field",
                "vendor id is not \"AE\"",
            ));
        }
        let key_strength = KeyStrength::from_code(reader.read_u8()?)?;
        let method = reader.read_u16()?;
        Ok(Self {
            vendor_version,
            key_strength,
            method,
        })
    }

    fn write(&self, writer: &mut BinaryWriter) {
        writer.put_u16(self.vendor_version as u16);
        writer.put_bytes(&Self::VENDOR_ID);
        writer.put_u8(self.key_strength.code());
        writer.put_u16(self.method);
    }
}

impl Default for WinZipAesInfo {
    fn default() -> Self {
        Self {
            vendor_version: AesVendorVersion::Ae1,
            key_strength: KeyStrength::default(),
            method: 0,
        }
    }
}

/// One extra field, keyed by its header id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraField {
    Zip64(Zip64Info),
    WinZipAes(WinZipAesInfo),
    /// Any id this codec does not interpret.
    Opaque { id: u16, data: Vec<u8> },
}

impl ExtraField {
    /// An empty field of the variant registered for `id`.
    pub fn create(id: u16) -> Self {
        match id {
            extra_field::ZIP64 => Self::Zip64(Zip64Info::default()),
            extra_field::WINZIP_AES => Self::WinZipAes(WinZipAesInfo::default()),
            id => Self::Opaque {
                id,
                data: Vec::new(),
            },
        }
    }

    pub fn header_id(&self) -> u16 {
        match self {
            Self::Zip64(_) => extra_field::ZIP64,
            Self::WinZipAes(_) => extra_field::WINZIP_AES,
            Self::Opaque { id, .. } => *id,
        }
    }

    /// Size of the data block, excluding the 4-byte prefix.
    pub fn data_size(&self) -> usize {
        match self {
            Self::Zip64(info) => info.data.len(),
            Self::WinZipAes(_) => WinZipAesInfo::DATA_SIZE,
            Self::Opaque { data, .. } => data.len(),
        }
    }

    /// Replace this field's content with the given data block.
    pub fn read_from(&mut self, data: &[u8]) -> Result<()> {
        uint::check_u16(data.len() as u64, "extra field data size")?;
        match self {
            Self::Zip64(info) => info.data = data.to_vec(),
            Self::WinZipAes(info) => *info = WinZipAesInfo::read(data)?,
            Self::Opaque { data: blob, .. } => *blob = data.to_vec(),
        }
        Ok(())
    }

    /// Append the data block, without the prefix.
    pub fn write_to(&self, writer: &mut BinaryWriter) {
        match self {
            Self::Zip64(info) => writer.put_bytes(&info.data),
            Self::WinZipAes(info) => info.write(writer),
            Self::Opaque { data, .. } => writer.put_bytes(data),
        }
    }
}

/// Extra fields of one header, ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraFields {
    fields: BTreeMap<u16, ExtraField>,
}

impl ExtraFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a back-to-back list of fields.
    ///
    /// The declared sizes must partition `data` exactly.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut fields = BTreeMap::new();
        let mut reader = BinaryReader::new(data);
        while !reader.is_empty() {
            if reader.remaining() < HEADER_SIZE {
                return Err(Error::malformed(
                    "extra field",
                    format!("{} trailing bytes after last field", reader.remaining()),
                ));
            }
            let id = reader.read_u16()?;
            let size = reader.read_u16()? as usize;
            if size > reader.remaining() {
                return Err(Error::ExtraFieldOverrun {
                    id,
                    declared: size,
                    available: reader.remaining(),
                });
            }
            let mut field = ExtraField::create(id);
            field.read_from(reader.read_bytes(size)?)?;
            if let Some(previous) = fields.insert(id, field) {
                warn!(
                    id,
                    dropped = previous.data_size(),
                    "repeated extra field, keeping the later one"
                );
            }
        }
        Ok(Self { fields })
    }

    pub fn get(&self, id: u16) -> Option<&ExtraField> {
        self.fields.get(&id)
    }

    /// Insert a field, replacing any field with the same id.
    pub fn insert(&mut self, field: ExtraField) -> Option<ExtraField> {
        self.fields.insert(field.header_id(), field)
    }

    pub fn remove(&mut self, id: u16) -> Option<ExtraField> {
        self.fields.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExtraField> {
        self.fields.values()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn zip64(&self) -> Option<&Zip64Info> {
        match self.get(extra_field::ZIP64) {
            Some(ExtraField::Zip64(info)) => Some(info),
            _ => None,
        }
    }

    pub fn winzip_aes(&self) -> Option<&WinZipAesInfo> {
        match self.get(extra_field::WINZIP_AES) {
            Some(ExtraField::WinZipAes(info)) => Some(info),
            _ => None,
        }
    }

    /// Encoded size of all fields including their prefixes.
    pub fn encoded_len(&self) -> usize {
        self.fields
            .values()
            .map(|field| HEADER_SIZE + field.data_size())
            .sum()
    }

    /// Serialize all fields in id order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::with_capacity(self.encoded_len());
        self.write_to(&mut writer);
        writer.into_inner()
    }

    pub fn write_to(&self, writer: &mut BinaryWriter) {
        for field in self.fields.values() {
            writer.put_u16(field.header_id());
            writer.put_u16(field.data_size() as u16);
            field.write_to(writer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_field(id: u16, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&id.to_le_bytes());
        out.extend_from_slice(&(data.len() as u16).to_le_bytes());
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn test_create_by_id() {
        assert!(matches!(ExtraField::create(0x0001), ExtraField::Zip64(_)));
        assert!(matches!(ExtraField::create(0x9901), ExtraField::WinZipAes(_)));
        assert!(matches!(
            ExtraField::create(0x5455),
            ExtraField::Opaque { id: 0x5455, .. }
        ));
    }

    #[test]
    fn test_unknown_fields_pass_through() {
        let mut data = raw_field(0x7875, &[1, 4, 0xe8, 3, 0, 0, 4, 0xe8, 3, 0, 0]);
        data.extend(raw_field(0x5455, &[3, 0x10, 0x20, 0x30, 0x40]));
        let fields = ExtraFields::parse(&data).unwrap();
        // Output is id ordered, so 0x5455 comes first.
        let mut expected = raw_field(0x5455, &[3, 0x10, 0x20, 0x30, 0x40]);
        expected.extend(raw_field(0x7875, &[1, 4, 0xe8, 3, 0, 0, 4, 0xe8, 3, 0, 0]));
        assert_eq!(fields.to_bytes(), expected);
        assert_eq!(fields.encoded_len(), expected.len());
    }

    #[test]
    fn test_repeated_id_keeps_later_field() {
        let mut data = raw_field(0x5455, &[1, 0xAA]);
        data.extend(raw_field(0x5455, &[1, 0xBB]));
        let fields = ExtraFields::parse(&data).unwrap();
        assert_eq!(fields.to_bytes(), raw_field(0x5455, &[1, 0xBB]));
    }

    #[test]
    fn test_sizes_must_partition() {
        let mut data = raw_field(0x5455, &[1, 2, 3]);
        data.push(0);
        assert!(matches!(
            ExtraFields::parse(&data),
            Err(Error::Malformed { .. })
        ));

        let mut overrun = raw_field(0x5455, &[1, 2, 3]);
        overrun[2] = 9;
        assert!(matches!(
            ExtraFields::parse(&overrun),
            Err(Error::ExtraFieldOverrun {
                id: 0x5455,
                declared: 9,
                available: 3
            })
        ));
    }

    #[test]
    fn test_winzip_aes_field() {
        let data = raw_field(0x9901, &[2, 0, b'A', b'E', 3, 8, 0]);
        let fields = ExtraFields::parse(&data).unwrap();
        let aes = fields.winzip_aes().unwrap();
        assert_eq!(aes.vendor_version, AesVendorVersion::Ae2);
        assert_eq!(aes.key_strength, KeyStrength::Aes256);
        assert_eq!(aes.method, 8);
        assert_eq!(fields.to_bytes(), data);

        let bad_vendor = raw_field(0x9901, &[2, 0, b'X', b'E', 3, 8, 0]);
        assert!(ExtraFields::parse(&bad_vendor).is_err());
    }

    #[test]
    fn test_zip64_values() {
        let info = Zip64Info::from_values(&[0x1_0000_0000, 7]);
        assert_eq!(info.len(), 2);
        assert_eq!(info.value(0), Some(0x1_0000_0000));
        assert_eq!(info.value(1), Some(7));
        assert_eq!(info.value(2), None);
    }
}
