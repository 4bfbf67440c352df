use super::{read_str, truncated, write_str, CACHE_VERSION};
use crate::core::config::CacheEnvironment;
use crate::core::error::{RegistryError, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Leading section of the `.table` file
///
/// Every other cache file is only trusted after this header matches the
/// running environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableHeader {
    pub version: i32,
    /// Stamp of the installation that wrote the cache
    pub install_stamp: i64,
    /// Stamp of the module set, 0 when not checked
    pub registry_stamp: i64,
    pub os: String,
    pub ws: String,
    pub nl: String,
}

impl TableHeader {
    pub fn new(env: &CacheEnvironment, registry_stamp: i64) -> Self {
        TableHeader {
            version: CACHE_VERSION,
            install_stamp: env.install_stamp,
            registry_stamp,
            os: env.os.clone(),
            ws: env.ws.clone(),
            nl: env.nl.clone(),
        }
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_i32::<BigEndian>(self.version)?;
        out.write_i64::<BigEndian>(self.install_stamp)?;
        out.write_i64::<BigEndian>(self.registry_stamp)?;
        write_str(out, &self.os)?;
        write_str(out, &self.ws)?;
        write_str(out, &self.nl)?;
        Ok(())
    }

    pub fn read_from<R: Read>(input: &mut R) -> Result<Self> {
        let version = input.read_i32::<BigEndian>().map_err(truncated)?;
        if version != CACHE_VERSION {
            // Later fields may have another layout; stop here
            return Err(RegistryError::CacheInvalid(format!(
                "cache version {} (expected {})",
                version, CACHE_VERSION
            )));
        }
        Ok(TableHeader {
            version,
            install_stamp: input.read_i64::<BigEndian>().map_err(truncated)?,
            registry_stamp: input.read_i64::<BigEndian>().map_err(truncated)?,
            os: read_str(input)?,
            ws: read_str(input)?,
            nl: read_str(input)?,
        })
    }

    /// Check the header against the running environment
    ///
    /// `expected_registry_stamp == 0` skips the registry stamp comparison.
    pub fn validate(&self, env: &CacheEnvironment, expected_registry_stamp: i64) -> Result<()> {
        if self.version != CACHE_VERSION {
            return Err(RegistryError::CacheInvalid(format!(
                "cache version {} (expected {})",
                self.version, CACHE_VERSION
            )));
        }

        if self.install_stamp != env.install_stamp {
            return Err(RegistryError::CacheInvalid(format!(
                "install stamp {} (expected {})",
                self.install_stamp, env.install_stamp
            )));
        }

        if expected_registry_stamp != 0 && self.registry_stamp != expected_registry_stamp {
            return Err(RegistryError::CacheInvalid(format!(
                "registry stamp {} (expected {})",
                self.registry_stamp, expected_registry_stamp
            )));
        }

        for (field, found, expected) in [
            ("os", &self.os, &env.os),
            ("ws", &self.ws, &env.ws),
            ("nl", &self.nl, &env.nl),
        ] {
            if found != expected {
                return Err(RegistryError::CacheInvalid(format!(
                    "{} '{}' (expected '{}')",
                    field, found, expected
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn env() -> CacheEnvironment {
        CacheEnvironment::new(42, "linux", "gtk", "en_US")
    }

    #[test]
    fn test_header_round_trip() {
        let header = TableHeader::new(&env(), 7);
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(&buf[..4], &[0, 0, 0, 1]);

        let read = TableHeader::read_from(&mut Cursor::new(buf)).unwrap();
        assert_eq!(read, header);
        read.validate(&env(), 7).unwrap();
    }

    #[test]
    fn test_locale_mismatch_rejected() {
        let header = TableHeader::new(&env(), 0);
        let err = header
            .validate(&env().with_locale("fr_FR"), 0)
            .unwrap_err();
        assert!(matches!(err, RegistryError::CacheInvalid(msg) if msg.contains("nl")));
    }

    #[test]
    fn test_zero_registry_stamp_not_compared() {
        let header = TableHeader::new(&env(), 99);
        header.validate(&env(), 0).unwrap();
        assert!(header.validate(&env(), 100).is_err());
    }

    #[test]
    fn test_install_stamp_mismatch_rejected() {
        let header = TableHeader::new(&env(), 0);
        let other = CacheEnvironment::new(43, "linux", "gtk", "en_US");
        assert!(matches!(
            header.validate(&other, 0),
            Err(RegistryError::CacheInvalid(_))
        ));
    }

    #[test]
    fn test_unknown_version_rejected_on_read() {
        let mut buf = Vec::new();
        buf.write_i32::<BigEndian>(2).unwrap();
        assert!(matches!(
            TableHeader::read_from(&mut Cursor::new(buf)),
            Err(RegistryError::CacheInvalid(_))
        ));
    }
}
