use maxminddb::{self, geoip2};
use std::{net::IpAddr, path::PathBuf};

use crate::errors::UpdateError;

/// A GeoLite2 database opened for lookups.
///
/// Updates validate candidate databases through this same type, so anything
/// the updater accepts is something the lookup path can open.
#[derive(Default)]
pub struct GeoIp {
    reader: Option<maxminddb::Reader<Vec<u8>>>,
}

impl GeoIp {
    pub fn builder() -> GeoIpBuilder {
        GeoIpBuilder::default()
    }

    /// The `database_type` recorded in the database metadata, e.g. `GeoLite2-Country`.
    pub fn database_type(&self) -> Option<&str> {
        self.reader
            .as_ref()
            .map(|reader| reader.metadata.database_type.as_str())
    }

    pub fn locate(&self, ip: IpAddr) -> Result<Option<Location>, UpdateError> {
        let country: Option<geoip2::Country> = self
            .reader
            .as_ref()
            .ok_or_else(|| UpdateError::Lookup("No geoip database available".to_owned()))?
            .lookup(ip)?;

        Ok(country.map(|info| {
            let anonymous = info
                .traits
                .as_ref()
                .and_then(|traits| traits.is_anonymous_proxy)
                .unwrap_or(false);
            if anonymous {
                return Location {
                    iso_code: "A1".to_owned(),
                    name: "Anonymous Proxy".to_owned(),
                };
            }
            let country = info.country;
            Location {
                iso_code: country
                    .as_ref()
                    .and_then(|c| c.iso_code)
                    .unwrap_or_default()
                    .to_owned(),
                name: country
                    .and_then(|c| c.names)
                    .and_then(|names| names.get("en").copied())
                    .unwrap_or_default()
                    .to_owned(),
            }
        }))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub iso_code: String,
    pub name: String,
}

#[derive(Default)]
pub struct GeoIpBuilder {
    path: Option<PathBuf>,
}

impl GeoIpBuilder {
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<GeoIp, UpdateError> {
        let reader = match self.path {
            Some(path) => Some(maxminddb::Reader::open_readfile(path)?),
            None => None,
        };

        Ok(GeoIp { reader })
    }
}

#[cfg(test)]
pub mod tests {
    use std::{fs, io, path::Path};

    /// A tiny encoder for the MaxMind DB data format.
    #[derive(Default)]
    struct Encoder(Vec<u8>);

    impl Encoder {
        fn map(&mut self, len: u8) -> &mut Self {
            self.0.push(0xe0 | len);
            self
        }

        fn str(&mut self, value: &str) -> &mut Self {
            self.0.push(0x40 | value.len() as u8);
            self.0.extend_from_slice(value.as_bytes());
            self
        }

        fn bool(&mut self, value: bool) -> &mut Self {
            // extended type 14
            self.0.extend_from_slice(&[value as u8, 14 - 7]);
            self
        }

        fn u16(&mut self, value: u16) -> &mut Self {
            self.0.push(0xa2);
            self.0.extend_from_slice(&value.to_be_bytes());
            self
        }

        fn u32(&mut self, value: u32) -> &mut Self {
            self.0.push(0xc4);
            self.0.extend_from_slice(&value.to_be_bytes());
            self
        }

        fn u64(&mut self, value: u64) -> &mut Self {
            // extended type 9
            self.0.extend_from_slice(&[8, 9 - 7]);
            self.0.extend_from_slice(&value.to_be_bytes());
            self
        }

        fn array(&mut self, len: u8) -> &mut Self {
            // extended type 11
            self.0.extend_from_slice(&[len, 11 - 7]);
            self
        }

        fn country(&mut self, iso_code: &str, name: &str) -> &mut Self {
            self.str("country")
                .map(2)
                .str("iso_code")
                .str(iso_code)
                .str("names")
                .map(1)
                .str("en")
                .str(name)
        }
    }

    #[derive(Clone, Copy)]
    enum Record {
        Empty,
        Node(usize),
        Data(usize),
    }

    /// Write a small IPv4 database of type `database_type`.
    ///
    /// `1.0.0.0/8` is in the United States, `81.0.0.0/8` in the United
    /// Kingdom and `2.0.0.0/8` is an anonymous proxy. Nothing else is found.
    pub fn write_test_database(path: &Path, database_type: &str) -> io::Result<()> {
        let mut data = Encoder::default();
        let us = data.0.len();
        data.map(1).country("US", "United States");
        let gb = data.0.len();
        data.map(1).country("GB", "United Kingdom");
        let proxy = data.0.len();
        data.map(2)
            .country("FR", "France")
            .str("traits")
            .map(1)
            .str("is_anonymous_proxy")
            .bool(true);

        // one node per bit of the first octet
        let mut nodes = vec![[Record::Empty; 2]];
        for (octet, offset) in [(1u8, us), (81, gb), (2, proxy)] {
            let mut node = 0;
            for depth in 0..8 {
                let bit = usize::from((octet >> (7 - depth)) & 1);
                if depth == 7 {
                    nodes[node][bit] = Record::Data(offset);
                    break;
                }
                let record = nodes[node][bit];
                node = match record {
                    Record::Node(next) => next,
                    _ => {
                        nodes.push([Record::Empty; 2]);
                        let next = nodes.len() - 1;
                        nodes[node][bit] = Record::Node(next);
                        next
                    }
                };
            }
        }

        let node_count = nodes.len();
        let mut buf = Vec::new();
        for record in nodes.iter().flatten() {
            let value = match *record {
                Record::Empty => node_count,
                Record::Node(next) => next,
                Record::Data(offset) => node_count + 16 + offset,
            };
            // 24-bit records
            buf.extend_from_slice(&(value as u32).to_be_bytes()[1..]);
        }
        buf.extend_from_slice(&[0; 16]);
        buf.extend_from_slice(&data.0);

        let mut metadata = Encoder::default();
        metadata
            .map(9)
            .str("binary_format_major_version")
            .u16(2)
            .str("binary_format_minor_version")
            .u16(0)
            .str("build_epoch")
            .u64(1_700_000_000)
            .str("database_type")
            .str(database_type)
            .str("description")
            .map(1)
            .str("en")
            .str("geoip-lookup test data")
            .str("ip_version")
            .u16(4)
            .str("languages")
            .array(1)
            .str("en")
            .str("node_count")
            .u32(node_count as u32)
            .str("record_size")
            .u16(24);
        buf.extend_from_slice(b"\xab\xcd\xefMaxMind.com");
        buf.extend_from_slice(&metadata.0);

        fs::write(path, buf)
    }

    #[test]
    fn garbage_database_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("GeoLite2-Country.mmdb");
        fs::write(&path, b"this is not a maxmind database")?;

        assert!(super::GeoIp::builder().path(&path).build().is_err());
        Ok(())
    }

    #[test]
    fn locate_without_database_fails() -> Result<(), Box<dyn std::error::Error>> {
        let geoip = super::GeoIp::default();
        assert!(geoip.database_type().is_none());
        assert!(geoip.locate("1.2.3.4".parse()?).is_err());
        Ok(())
    }

    #[test]
    fn geoip_works() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("GeoLite2-Country.mmdb");
        write_test_database(&path, "GeoLite2-Country")?;

        let geoip = super::GeoIp::builder().path(&path).build()?;
        assert_eq!(geoip.database_type(), Some("GeoLite2-Country"));

        let location = geoip.locate("1.2.3.4".parse()?)?;
        assert_eq!(
            location,
            Some(super::Location {
                iso_code: "US".to_owned(),
                name: "United States".to_owned(),
            })
        );
        let location = geoip.locate("81.2.69.160".parse()?)?;
        assert_eq!(location.map(|l| l.iso_code), Some("GB".to_owned()));

        assert_eq!(geoip.locate("127.0.0.1".parse()?)?, None);
        Ok(())
    }

    #[test]
    fn anonymous_proxies_are_reported_as_a1() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("GeoLite2-Country.mmdb");
        write_test_database(&path, "GeoLite2-Country")?;

        let geoip = super::GeoIp::builder().path(&path).build()?;
        assert_eq!(
            geoip.locate("2.2.2.2".parse()?)?,
            Some(super::Location {
                iso_code: "A1".to_owned(),
                name: "Anonymous Proxy".to_owned(),
            })
        );
        Ok(())
    }
}
