use semver::Version;

use super::{payload_of, NvmFileCodec};
use crate::error::{NvmError, Result};
use crate::nvm3::NvmObject;

pub const PROTOCOL_VERSION_KEY: u32 = 0x50000;
pub const APPLICATION_VERSION_KEY: u32 = 0x51000;

/// Body shared by the protocol and application version files
///
/// ```text
/// 0 patch  1 minor  2 major  3 file format
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionFile {
    pub format: u8,
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl VersionFile {
    pub fn new(format: u8, version: &Version) -> Result<Self> {
        let component = |value: u64| {
            u8::try_from(value).map_err(|_| {
                NvmError::InvalidJson(format!("Version {} cannot be stored in NVM", version))
            })
        };
        Ok(VersionFile {
            format,
            major: component(version.major)?,
            minor: component(version.minor)?,
            patch: component(version.patch)?,
        })
    }

    pub fn version(&self) -> Version {
        Version::new(self.major.into(), self.minor.into(), self.patch.into())
    }

    fn decode(object: &NvmObject) -> Result<Self> {
        let payload = payload_of(object, 4)?;
        Ok(VersionFile {
            patch: payload[0],
            minor: payload[1],
            major: payload[2],
            format: payload[3],
        })
    }

    fn to_object(self, key: u32) -> NvmObject {
        NvmObject::data(key, vec![self.patch, self.minor, self.major, self.format])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersionFile(pub VersionFile);

impl NvmFileCodec for ProtocolVersionFile {
    fn decode(object: &NvmObject, _version: &Version) -> Result<Self> {
        VersionFile::decode(object).map(ProtocolVersionFile)
    }

    fn encode(&self, _version: &Version) -> Result<NvmObject> {
        Ok(self.0.to_object(PROTOCOL_VERSION_KEY))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplicationVersionFile(pub VersionFile);

impl NvmFileCodec for ApplicationVersionFile {
    fn decode(object: &NvmObject, _version: &Version) -> Result<Self> {
        VersionFile::decode(object).map(ApplicationVersionFile)
    }

    fn encode(&self, _version: &Version) -> Result<NvmObject> {
        Ok(self.0.to_object(APPLICATION_VERSION_KEY))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_file_layout() -> Result<()> {
        let file = ProtocolVersionFile(VersionFile::new(4, &Version::new(7, 18, 1))?);
        let object = file.encode(&Version::new(7, 18, 1))?;
        assert_eq!(object.key, PROTOCOL_VERSION_KEY);
        assert_eq!(object.data.as_deref(), Some(&[1, 18, 7, 4][..]));

        let decoded = ProtocolVersionFile::decode(&object, &Version::new(7, 18, 1))?;
        assert_eq!(decoded, file);
        assert_eq!(decoded.0.version(), Version::new(7, 18, 1));
        Ok(())
    }

    #[test]
    fn test_unrepresentable_version() {
        assert!(VersionFile::new(0, &Version::new(300, 0, 0)).is_err());
    }

    #[test]
    fn test_short_payload() {
        let object = NvmObject::data(APPLICATION_VERSION_KEY, vec![1, 2]);
        assert!(matches!(
            ApplicationVersionFile::decode(&object, &Version::new(7, 0, 0)),
            Err(NvmError::InvalidFormat(_))
        ));
    }
}
