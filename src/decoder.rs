//! `.bi5` tick payload decoding.
//!
//! A payload is an LZMA stream of packed big-endian records, 20 bytes each:
//! `u32 ms_offset, u32 ask*1000, u32 bid*1000, f32 ask_volume, f32 bid_volume`.

use chrono::{Duration, NaiveDate, TimeZone, Utc};

use crate::error::DecodeError;
use crate::types::{DayTable, TickRecord};

pub const RECORD_LEN: usize = 20;

/// Divisor applied to the raw integer ask/bid fields.
pub const PRICE_SCALE: f64 = 1000.0;

/// Decode a raw (compressed) payload for `day`.
///
/// Empty input is the upstream's "no data" and yields an empty table.
/// A payload that is present but does not decompress, or leaves a partial
/// record, is an error.
pub fn decode(day: NaiveDate, compressed: &[u8]) -> Result<DayTable, DecodeError> {
    if compressed.is_empty() {
        return Ok(DayTable::empty(day));
    }
    let raw = decompress(compressed)?;
    parse_records(day, &raw)
}

fn decompress(compressed: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut input = compressed;
    let mut out = Vec::with_capacity(compressed.len() * 4);
    lzma_rs::lzma_decompress(&mut input, &mut out)
        .map_err(|e| DecodeError::Decompress(e.to_string()))?;
    Ok(out)
}

/// Parse decompressed bytes into ticks, preserving record order.
pub fn parse_records(day: NaiveDate, raw: &[u8]) -> Result<DayTable, DecodeError> {
    let remainder = raw.len() % RECORD_LEN;
    if remainder != 0 {
        return Err(DecodeError::TrailingBytes { len: raw.len(), remainder });
    }

    let midnight = Utc.from_utc_datetime(&day.and_time(chrono::NaiveTime::MIN));
    let mut ticks = Vec::with_capacity(raw.len() / RECORD_LEN);

    for rec in raw.chunks_exact(RECORD_LEN) {
        let offset = be_u32(&rec[0..4]);
        ticks.push(TickRecord {
            time: midnight + Duration::milliseconds(i64::from(offset)),
            ask: f64::from(be_u32(&rec[4..8])) / PRICE_SCALE,
            bid: f64::from(be_u32(&rec[8..12])) / PRICE_SCALE,
            ask_volume: f32::from_bits(be_u32(&rec[12..16])),
            bid_volume: f32::from_bits(be_u32(&rec[16..20])),
        });
    }

    Ok(DayTable { day, ticks })
}

#[inline]
fn be_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Timelike;

    /// Raw fields of one record, before scaling.
    pub(crate) type RawTick = (u32, u32, u32, f32, f32);

    pub(crate) fn pack(ticks: &[RawTick]) -> Vec<u8> {
        let mut out = Vec::with_capacity(ticks.len() * RECORD_LEN);
        for &(ms, ask, bid, ask_vol, bid_vol) in ticks {
            out.extend_from_slice(&ms.to_be_bytes());
            out.extend_from_slice(&ask.to_be_bytes());
            out.extend_from_slice(&bid.to_be_bytes());
            out.extend_from_slice(&ask_vol.to_be_bytes());
            out.extend_from_slice(&bid_vol.to_be_bytes());
        }
        out
    }

    pub(crate) fn compress(raw: &[u8]) -> Vec<u8> {
        let mut input = raw;
        let mut out = Vec::new();
        lzma_rs::lzma_compress(&mut input, &mut out).unwrap();
        out
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
    }

    #[test]
    fn empty_input_is_empty_table() {
        let table = decode(day(), b"").unwrap();
        assert!(table.is_empty());
        assert_eq!(table.day, day());
    }

    #[test]
    fn encoded_records_decode_exactly() {
        let raw: Vec<RawTick> = vec![
            (0, 1_102_340, 1_102_310, 1.5, 2.25),
            (1_250, 1_102_350, 1_102_320, 0.75, 1.0),
            (86_399_999, 1_099_000, 1_098_990, 3.0, 0.5),
        ];
        let table = decode(day(), &compress(&pack(&raw))).unwrap();

        assert_eq!(table.len(), 3);
        let first = &table.ticks[0];
        assert_eq!(first.time, Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap());
        assert_eq!(first.ask, 1102.34);
        assert_eq!(first.bid, 1102.31);
        assert_eq!(first.ask_volume, 1.5);
        assert_eq!(first.bid_volume, 2.25);

        let second = &table.ticks[1];
        assert_eq!(second.time.second(), 1);
        assert_eq!(second.time.timestamp_subsec_millis(), 250);

        let last = &table.ticks[2];
        assert_eq!(last.time, Utc.with_ymd_and_hms(2024, 3, 5, 23, 59, 59).unwrap() + Duration::milliseconds(999));
        assert_eq!(last.ask, 1099.0);
    }

    #[test]
    fn record_order_is_preserved() {
        // Out-of-order offsets are kept as delivered.
        let raw: Vec<RawTick> = vec![(500, 1, 1, 0.0, 0.0), (100, 2, 2, 0.0, 0.0)];
        let table = decode(day(), &compress(&pack(&raw))).unwrap();
        assert!(table.ticks[0].time > table.ticks[1].time);
    }

    #[test]
    fn valid_stream_with_no_records_is_empty() {
        let table = decode(day(), &compress(&[])).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn garbage_is_a_decompress_error() {
        let err = decode(day(), &[0xFF; 32]).unwrap_err();
        assert!(matches!(err, DecodeError::Decompress(_)), "got {err:?}");
    }

    #[test]
    fn partial_record_is_an_error() {
        let mut raw = pack(&[(0, 1, 1, 0.0, 0.0)]);
        raw.push(0x01);
        let err = decode(day(), &compress(&raw)).unwrap_err();
        assert_eq!(err, DecodeError::TrailingBytes { len: 21, remainder: 1 });
    }

    #[test]
    fn offset_past_midnight_rolls_into_next_day() {
        let raw = pack(&[(86_400_000 + 1_500, 1, 1, 0.0, 0.0)]);
        let table = parse_records(day(), &raw).unwrap();
        assert_eq!(
            table.ticks[0].time,
            Utc.with_ymd_and_hms(2024, 3, 6, 0, 0, 1).unwrap() + Duration::milliseconds(500)
        );
    }
}
