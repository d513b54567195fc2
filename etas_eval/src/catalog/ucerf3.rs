// src/catalog/ucerf3.rs
//
// Reader for UCERF3-ETAS binary stochastic event sets
// (results_complete.bin / results_complete.bin.gz).
//
// Layout, all big-endian:
//   i32 num_catalogs
//   per catalog:
//     i16 file_version, i32 catalog_size
//     catalog_size records:
//       i32 rupture_id, i32 parent_id, i16 generation, i64 origin_time_ms,
//       f64 latitude, f64 longitude, f64 depth, f64 magnitude,
//       f64 dist_to_parent, i32 erf_index, i32 fss_index, i32 grid_node_index
//       [version >= 2] f64 etas_k
//
// Catalogs are decoded one at a time so callers can filter while streaming.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use super::Event;
use crate::forecast::ForecastError;

/// Highest record version understood by the reader.
pub const UCERF3_MAX_VERSION: i16 = 2;

/// Record size in bytes for a given file version.
pub fn record_size(version: i16) -> Option<usize> {
    match version {
        1 => Some(70),
        2 => Some(78),
        _ => None,
    }
}

/// Big-endian primitive reader.
struct BinaryReader<R> {
    inner: R,
}

impl<R: Read> BinaryReader<R> {
    fn read_array<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_i16(&mut self) -> io::Result<i16> {
        Ok(i16::from_be_bytes(self.read_array()?))
    }

    fn read_i32(&mut self) -> io::Result<i32> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    fn read_i64(&mut self) -> io::Result<i64> {
        Ok(i64::from_be_bytes(self.read_array()?))
    }

    fn read_f64(&mut self) -> io::Result<f64> {
        Ok(f64::from_be_bytes(self.read_array()?))
    }
}

/// Streaming reader over the catalogs of a UCERF3-ETAS binary file.
pub struct Ucerf3Reader<R> {
    reader: BinaryReader<R>,
    num_catalogs: usize,
    next_catalog: usize,
    failed: bool,
}

impl Ucerf3Reader<Box<dyn Read>> {
    /// Open a forecast file; `.gz` files are decompressed on the fly.
    pub fn open(path: &Path) -> Result<Self, ForecastError> {
        let file = File::open(path).map_err(|source| ForecastError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let is_gzip = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("gz"))
            .unwrap_or(false);
        let inner: Box<dyn Read> = if is_gzip {
            Box::new(MultiGzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        Self::new(inner)
    }
}

impl<R: Read> Ucerf3Reader<R> {
    /// Wrap a raw (already decompressed) byte stream and read its header.
    pub fn new(inner: R) -> Result<Self, ForecastError> {
        let mut reader = BinaryReader { inner };
        let raw = reader
            .read_i32()
            .map_err(|e| ForecastError::InvalidHeader {
                message: format!("unable to read catalog count: {}", e),
            })?;
        let num_catalogs = usize::try_from(raw).map_err(|_| ForecastError::InvalidHeader {
            message: format!("negative catalog count {}", raw),
        })?;
        Ok(Self {
            reader,
            num_catalogs,
            next_catalog: 0,
            failed: false,
        })
    }

    /// Number of catalogs declared in the file header.
    pub fn num_catalogs(&self) -> usize {
        self.num_catalogs
    }

    fn read_catalog(&mut self) -> Result<Vec<Event>, ForecastError> {
        let catalog = self.next_catalog;
        let truncated = |e: io::Error| ForecastError::Truncated {
            catalog,
            detail: e.to_string(),
        };

        let version = self.reader.read_i16().map_err(truncated)?;
        if record_size(version).is_none() {
            return Err(ForecastError::UnsupportedVersion { catalog, version });
        }
        let size = self.reader.read_i32().map_err(truncated)?;
        let size = usize::try_from(size).map_err(|_| ForecastError::InvalidHeader {
            message: format!("catalog {} has negative size {}", catalog, size),
        })?;

        let mut events = Vec::with_capacity(size.min(1 << 16));
        for _ in 0..size {
            events.push(self.read_record(version).map_err(truncated)?);
        }
        Ok(events)
    }

    fn read_record(&mut self, version: i16) -> io::Result<Event> {
        let r = &mut self.reader;
        let _rupture_id = r.read_i32()?;
        let _parent_id = r.read_i32()?;
        let _generation = r.read_i16()?;
        let origin_time = r.read_i64()?;
        let latitude = r.read_f64()?;
        let longitude = r.read_f64()?;
        let depth = r.read_f64()?;
        let magnitude = r.read_f64()?;
        let _dist_to_parent = r.read_f64()?;
        let _erf_index = r.read_i32()?;
        let _fss_index = r.read_i32()?;
        let _grid_node_index = r.read_i32()?;
        if version >= 2 {
            let _etas_k = r.read_f64()?;
        }
        Ok(Event {
            event_id: None,
            origin_time,
            latitude,
            longitude,
            depth,
            magnitude,
        })
    }
}

impl<R: Read> Iterator for Ucerf3Reader<R> {
    type Item = Result<Vec<Event>, ForecastError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next_catalog >= self.num_catalogs {
            return None;
        }
        let result = self.read_catalog();
        self.failed = result.is_err();
        self.next_catalog += 1;
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn encode(catalogs: &[Vec<(i64, f64, f64, f64)>], version: i16) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(catalogs.len() as i32).to_be_bytes());
        for cat in catalogs {
            buf.extend_from_slice(&version.to_be_bytes());
            buf.extend_from_slice(&(cat.len() as i32).to_be_bytes());
            for (i, &(t, lat, lon, mw)) in cat.iter().enumerate() {
                buf.extend_from_slice(&(i as i32).to_be_bytes());
                buf.extend_from_slice(&(-1i32).to_be_bytes());
                buf.extend_from_slice(&0i16.to_be_bytes());
                buf.extend_from_slice(&t.to_be_bytes());
                buf.extend_from_slice(&lat.to_be_bytes());
                buf.extend_from_slice(&lon.to_be_bytes());
                buf.extend_from_slice(&7.0f64.to_be_bytes());
                buf.extend_from_slice(&mw.to_be_bytes());
                buf.extend_from_slice(&0.0f64.to_be_bytes());
                buf.extend_from_slice(&(-1i32).to_be_bytes());
                buf.extend_from_slice(&(-1i32).to_be_bytes());
                buf.extend_from_slice(&(-1i32).to_be_bytes());
                if version >= 2 {
                    buf.extend_from_slice(&1.0f64.to_be_bytes());
                }
            }
        }
        buf
    }

    #[test]
    fn test_record_sizes_match_layout() {
        let one = encode(&[vec![(0, 34.0, -118.0, 3.0)]], 1);
        assert_eq!(one.len(), 4 + 6 + record_size(1).unwrap());
        let two = encode(&[vec![(0, 34.0, -118.0, 3.0)]], 2);
        assert_eq!(two.len(), 4 + 6 + record_size(2).unwrap());
    }

    #[test]
    fn test_reads_catalogs_in_order() {
        for version in [1, 2] {
            let bytes = encode(
                &[
                    vec![(10, 34.0, -118.0, 3.0), (20, 35.0, -117.0, 4.5)],
                    vec![],
                    vec![(30, 36.0, -119.0, 2.7)],
                ],
                version,
            );
            let reader = Ucerf3Reader::new(bytes.as_slice()).unwrap();
            assert_eq!(reader.num_catalogs(), 3);
            let catalogs: Vec<Vec<Event>> = reader.collect::<Result<_, _>>().unwrap();
            assert_eq!(catalogs.len(), 3);
            assert_eq!(catalogs[0].len(), 2);
            assert!(catalogs[1].is_empty());
            assert_eq!(catalogs[0][1].origin_time, 20);
            assert_eq!(catalogs[0][1].magnitude, 4.5);
            assert_eq!(catalogs[2][0].latitude, 36.0);
            assert_eq!(catalogs[2][0].longitude, -119.0);
            assert_eq!(catalogs[2][0].depth, 7.0);
        }
    }

    #[test]
    fn test_truncated_stream() {
        let mut bytes = encode(&[vec![(10, 34.0, -118.0, 3.0)], vec![(11, 34.0, -118.0, 3.0)]], 1);
        bytes.truncate(bytes.len() - 5);
        let mut reader = Ucerf3Reader::new(bytes.as_slice()).unwrap();
        assert!(reader.next().unwrap().is_ok());
        let err = reader.next().unwrap().unwrap_err();
        assert!(matches!(err, ForecastError::Truncated { catalog: 1, .. }));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_unsupported_version() {
        let bytes = encode(&[vec![(10, 34.0, -118.0, 3.0)]], 1);
        let mut patched = bytes.clone();
        patched[4..6].copy_from_slice(&7i16.to_be_bytes());
        let mut reader = Ucerf3Reader::new(patched.as_slice()).unwrap();
        let err = reader.next().unwrap().unwrap_err();
        assert!(matches!(
            err,
            ForecastError::UnsupportedVersion { catalog: 0, version: 7 }
        ));
    }

    #[test]
    fn test_open_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results_complete.bin.gz");
        let bytes = encode(&[vec![(10, 34.0, -118.0, 3.0)]], 2);
        let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        enc.write_all(&bytes).unwrap();
        enc.finish().unwrap();

        let reader = Ucerf3Reader::open(&path).unwrap();
        let catalogs: Vec<Vec<Event>> = reader.collect::<Result<_, _>>().unwrap();
        assert_eq!(catalogs.len(), 1);
        assert_eq!(catalogs[0][0].origin_time, 10);
    }

    #[test]
    fn test_empty_header() {
        let err = Ucerf3Reader::new(&[0u8, 1][..]).err().unwrap();
        assert!(matches!(err, ForecastError::InvalidHeader { .. }));
    }
}
