//! Minimal CAR v1 reader: a varint-prefixed header followed by
//! varint-prefixed `cid ++ block` sections. The header (version and roots) is
//! skipped since commit processing only looks blocks up by CID.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use cid::Cid;

use crate::error::CarError;

fn read_uvarint(r: &mut impl Read) -> Result<u64, CarError> {
    let mut value: u64 = 0;
    for i in 0..10 {
        let mut byte = [0u8; 1];
        r.read_exact(&mut byte).map_err(|_| CarError::Truncated)?;
        let b = byte[0];
        value |= u64::from(b & 0x7f) << (7 * i);
        if b & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(CarError::VarintOverflow)
}

fn section_end(start: usize, len: u64, total: usize) -> Result<usize, CarError> {
    usize::try_from(len)
        .ok()
        .and_then(|len| start.checked_add(len))
        .filter(|end| *end <= total)
        .ok_or(CarError::Truncated)
}

pub fn read_blocks(car: &[u8]) -> Result<HashMap<Cid, Vec<u8>>, CarError> {
    let mut reader = Cursor::new(car);
    let header_len = read_uvarint(&mut reader)?;
    let header_end = section_end(reader.position() as usize, header_len, car.len())?;
    reader.set_position(header_end as u64);

    let mut blocks = HashMap::new();
    while (reader.position() as usize) < car.len() {
        let len = read_uvarint(&mut reader)?;
        let end = section_end(reader.position() as usize, len, car.len())?;
        let cid = Cid::read_bytes(&mut reader)?;
        let data_start = reader.position() as usize;
        let data = car.get(data_start..end).ok_or(CarError::Truncated)?;
        blocks.insert(cid, data.to_vec());
        reader.set_position(end as u64);
    }
    Ok(blocks)
}

#[cfg(test)]
pub(crate) mod testing {
    use cid::Cid;
    use multihash_codetable::{Code, MultihashDigest};

    pub const DAG_CBOR: u64 = 0x71;

    pub fn write_uvarint(out: &mut Vec<u8>, mut v: u64) {
        while v >= 0x80 {
            out.push((v as u8) | 0x80);
            v >>= 7;
        }
        out.push(v as u8);
    }

    pub fn cid_for(data: &[u8]) -> Cid {
        Cid::new_v1(DAG_CBOR, Code::Sha2_256.digest(data))
    }

    /// archive with an opaque header and the given blocks
    pub fn write_car(blocks: &[(Cid, Vec<u8>)]) -> Vec<u8> {
        let header = b"\xa2eroots\x80gversion\x01";
        let mut out = vec![];
        write_uvarint(&mut out, header.len() as u64);
        out.extend_from_slice(header);
        for (cid, data) in blocks {
            let cid_bytes = cid.to_bytes();
            write_uvarint(&mut out, (cid_bytes.len() + data.len()) as u64);
            out.extend_from_slice(&cid_bytes);
            out.extend_from_slice(data);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_varint() {
        for v in [0u64, 1, 127, 128, 300, 16384, u32::MAX as u64] {
            let mut buf = vec![];
            write_uvarint(&mut buf, v);
            assert_eq!(read_uvarint(&mut Cursor::new(&buf)).unwrap(), v);
        }
        let too_long = [0xffu8; 11];
        assert!(matches!(
            read_uvarint(&mut Cursor::new(&too_long[..])),
            Err(CarError::VarintOverflow)
        ));
    }

    #[test]
    fn test_read_blocks() {
        let a = b"first block".to_vec();
        let b = b"second".to_vec();
        let car = write_car(&[(cid_for(&a), a.clone()), (cid_for(&b), b.clone())]);
        let blocks = read_blocks(&car).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[&cid_for(&a)], a);
        assert_eq!(blocks[&cid_for(&b)], b);
    }

    #[test]
    fn test_header_only() {
        let car = write_car(&[]);
        assert!(read_blocks(&car).unwrap().is_empty());
    }

    #[test]
    fn test_truncated() {
        let a = b"some block content".to_vec();
        let car = write_car(&[(cid_for(&a), a)]);
        let cut = &car[..car.len() - 3];
        assert!(matches!(read_blocks(cut), Err(CarError::Truncated)));
        assert!(matches!(read_blocks(&[]), Err(CarError::Truncated)));
    }
}
