use crate::{
    key::InternalKey,
    meta::{FileMeta, FileNum},
    serde::{Deserializable, DeserializeError, Serializable, SerializeError},
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use quick_cache::sync::Cache;
use serde::{Deserialize, Serialize};
use std::{
    io::{Read, Write},
    sync::Arc,
};

/// Properties collected for one table file
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct TableProperties {
    /// How many underlying sorted segments a read through this file
    /// touches in the worst case
    pub read_amp: u64,
}

/// One file reference inside a map element
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LinkedFile {
    /// Referenced file number
    pub num: FileNum,

    /// Bytes of the referenced file this element resolves to
    pub size: u64,
}

/// A decoded map-SST index entry ("map element")
///
/// Describes one key range and the files that hold its data.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MapElement {
    /// Smallest key of the range
    pub smallest: InternalKey,

    /// Largest key of the range
    pub largest: InternalKey,

    /// Whether the smallest key itself belongs to the range
    pub include_smallest: bool,

    /// Whether the largest key itself belongs to the range
    pub include_largest: bool,

    /// Files this range resolves to, with per-file byte counts
    pub links: Vec<LinkedFile>,
}

impl MapElement {
    /// Estimated payload bytes of this element, summed over its links
    #[must_use]
    pub fn link_size(&self) -> u64 {
        self.links.iter().map(|l| l.size).sum()
    }
}

impl Serializable for MapElement {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), SerializeError> {
        self.smallest.serialize(writer)?;
        self.largest.serialize(writer)?;

        let flags = u8::from(self.include_smallest) | (u8::from(self.include_largest) << 1);
        writer.write_u8(flags)?;

        // NOTE: Truncation is okay and actually needed
        #[allow(clippy::cast_possible_truncation)]
        writer.write_u32::<BigEndian>(self.links.len() as u32)?;

        for link in &self.links {
            writer.write_u64::<BigEndian>(link.num)?;
            writer.write_u64::<BigEndian>(link.size)?;
        }

        Ok(())
    }
}

impl Deserializable for MapElement {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self, DeserializeError> {
        let smallest = InternalKey::deserialize(reader)?;
        let largest = InternalKey::deserialize(reader)?;

        let flags = reader.read_u8()?;
        if flags > 3 {
            return Err(DeserializeError::InvalidTag(flags));
        }

        let link_count = reader.read_u32::<BigEndian>()?;
        let mut links = Vec::with_capacity(link_count as usize);

        for _ in 0..link_count {
            let num = reader.read_u64::<BigEndian>()?;
            let size = reader.read_u64::<BigEndian>()?;
            links.push(LinkedFile { num, size });
        }

        Ok(Self {
            smallest,
            largest,
            include_smallest: flags & 1 != 0,
            include_largest: flags & 2 != 0,
            links,
        })
    }
}

/// Iterator over the undecoded index entries of a map file, in key order
pub type MapEntryIter<'a> = Box<dyn Iterator<Item = crate::Result<Vec<u8>>> + 'a>;

/// Seam to the table reader: property lookup and map-index iteration
///
/// Implementations may do I/O; the picker treats lookups as fast,
/// thread-safe reads and tolerates failures by skipping the file.
pub trait TableSource {
    /// Loads the collected properties of a file
    fn properties(&self, file: &FileMeta) -> crate::Result<TableProperties>;

    /// Opens an iterator over the raw index entries of a map file
    fn map_entries(&self, file: &FileMeta) -> crate::Result<MapEntryIter<'_>>;
}

/// Table-properties cache
///
/// Caches property lookups by file number so repeated picks do not
/// hit the table reader every cycle. Map-index iteration is passed
/// through uncached; the composite planner reads each index once
/// per pick.
pub struct TableCache {
    source: Arc<dyn TableSource + Send + Sync>,
    properties: Cache<FileNum, Arc<TableProperties>>,
}

impl TableCache {
    /// Creates a new cache over the given source with room for `n` entries.
    #[must_use]
    pub fn new(source: Arc<dyn TableSource + Send + Sync>, n: usize) -> Self {
        Self {
            source,
            properties: Cache::new(n),
        }
    }

    /// Returns the properties of a file, reading through on miss.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the underlying source fails.
    pub fn properties(&self, file: &FileMeta) -> crate::Result<Arc<TableProperties>> {
        if let Some(props) = self.properties.get(&file.num) {
            return Ok(props);
        }

        let props = Arc::new(self.source.properties(file)?);
        self.properties.insert(file.num, props.clone());

        Ok(props)
    }

    /// Reads and decodes all index entries of a map file, in key order.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the source fails or an entry is corrupt.
    pub fn map_elements(&self, file: &FileMeta) -> crate::Result<Vec<MapElement>> {
        let mut elements = Vec::new();

        for entry in self.source.map_entries(file)? {
            let bytes = entry?;
            elements.push(MapElement::deserialize(&mut &bytes[..])?);
        }

        Ok(elements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::Purpose;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use test_log::test;

    fn fixture_file(num: FileNum) -> FileMeta {
        FileMeta {
            num,
            path_id: 0,
            file_size: 1,
            compensated_size: 1,
            smallest: InternalKey::new(&b"a"[..], 0),
            largest: InternalKey::new(&b"z"[..], 0),
            seqnos: (0, 0),
            purpose: Purpose::Map,
            dependents: Vec::new(),
            marked_for_compaction: false,
        }
    }

    struct CountingSource {
        loads: AtomicUsize,
    }

    impl TableSource for CountingSource {
        fn properties(&self, file: &FileMeta) -> crate::Result<TableProperties> {
            self.loads.fetch_add(1, Ordering::Relaxed);
            Ok(TableProperties {
                read_amp: file.num,
            })
        }

        fn map_entries(&self, _: &FileMeta) -> crate::Result<MapEntryIter<'_>> {
            let element = MapElement {
                smallest: InternalKey::new(&b"a"[..], 2),
                largest: InternalKey::new(&b"m"[..], 1),
                include_smallest: true,
                include_largest: true,
                links: vec![LinkedFile { num: 7, size: 100 }],
            };

            let mut bytes = Vec::new();
            element.serialize(&mut bytes).expect("should serialize");

            Ok(Box::new([Ok(bytes)].into_iter()))
        }
    }

    #[test]
    fn element_roundtrip() -> crate::Result<()> {
        let element = MapElement {
            smallest: InternalKey::new(&b"abc"[..], 7),
            largest: InternalKey::new(&b"xyz"[..], 3),
            include_smallest: true,
            include_largest: false,
            links: vec![
                LinkedFile { num: 1, size: 500 },
                LinkedFile { num: 2, size: 300 },
            ],
        };

        let mut bytes = Vec::new();
        element.serialize(&mut bytes)?;

        let decoded = MapElement::deserialize(&mut &bytes[..])?;
        assert_eq!(element, decoded);
        assert_eq!(800, decoded.link_size());

        Ok(())
    }

    #[test]
    fn corrupt_element_is_rejected() {
        let bytes = [0, 1, b'a', 0, 0, 0, 0, 0, 0, 0, 0];
        let result = MapElement::deserialize(&mut &bytes[..]);
        assert!(result.is_err());
    }

    #[test]
    fn properties_are_cached() -> crate::Result<()> {
        let source = Arc::new(CountingSource {
            loads: AtomicUsize::new(0),
        });
        let cache = TableCache::new(source.clone(), 100);

        let file = fixture_file(5);

        assert_eq!(5, cache.properties(&file)?.read_amp);
        assert_eq!(5, cache.properties(&file)?.read_amp);
        assert_eq!(1, source.loads.load(Ordering::Relaxed));

        Ok(())
    }

    #[test]
    fn map_elements_decode() -> crate::Result<()> {
        let source = Arc::new(CountingSource {
            loads: AtomicUsize::new(0),
        });
        let cache = TableCache::new(source, 100);

        let elements = cache.map_elements(&fixture_file(5))?;
        assert_eq!(1, elements.len());
        assert_eq!(100, elements[0].link_size());

        Ok(())
    }
}
