use proptest::prelude::*;
use tmx_value::packing::{pack, packed_width, unpack, BitReader, BitWriter};

#[test]
fn test_pack_rtcm3_header_word() {
    // preamble 0xD3, reserved 0, length 19 -> the 24-bit RTCM v3 header
    let word = pack(&[(0xD3, 8), (0, 6), (19, 10)]);
    assert_eq!(word, 0xD30013);
    assert_eq!(packed_width(&[(0xD3, 8), (0, 6), (19, 10)]), 24);

    let fields = unpack(word, &[8, 6, 10]);
    assert_eq!(fields, vec![0xD3, 0, 19]);
}

#[test]
fn test_pack_masks_overwide_values() {
    // A value wider than its declared field is truncated, not smeared
    // into the neighboring field.
    let word = pack(&[(0xFFF, 8), (1, 4)]);
    assert_eq!(word, 0xFF1);
}

#[test]
fn test_unpack_full_width() {
    let v = pack(&[(u64::MAX as u128, 64), (0xAA, 8)]);
    let fields = unpack(v, &[64, 8]);
    assert_eq!(fields[0], u64::MAX as u128);
    assert_eq!(fields[1], 0xAA);
}

#[test]
fn test_bit_writer_msb_first() {
    let mut w = BitWriter::new();
    w.write_bits(0b101, 3);
    w.write_bits(0b01, 2);
    w.write_bits(0b110, 3);
    assert_eq!(w.as_bytes(), &[0b1010_1110]);
    assert_eq!(w.bit_len(), 8);
}

#[test]
fn test_bit_writer_unaligned_bytes() {
    let mut w = BitWriter::new();
    w.write_bits(0b1, 1);
    w.write_bytes(&[0xFF]);
    w.align();
    assert_eq!(w.as_bytes(), &[0b1111_1111, 0b1000_0000]);
}

#[test]
fn test_bit_reader_round_trip() {
    let mut w = BitWriter::new();
    w.write_bits(1005, 12);
    w.write_bits(2003, 12);
    let bytes = w.into_bytes();

    let mut r = BitReader::new(&bytes);
    assert_eq!(r.read_bits(12), Some(1005));
    assert_eq!(r.read_bits(12), Some(2003));
    assert_eq!(r.remaining_bits(), 0);
    assert_eq!(r.read_bits(1), None);
}

#[test]
fn test_bit_reader_exhaustion_is_not_partial() {
    let data = [0xAB];
    let mut r = BitReader::new(&data);
    assert_eq!(r.read_bits(4), Some(0xA));
    // Asking for more than remains fails without consuming anything.
    assert_eq!(r.read_bits(8), None);
    assert_eq!(r.read_bits(4), Some(0xB));
}

proptest! {
    #[test]
    fn prop_pack_unpack_round_trip(
        a in 0u128..(1 << 12),
        b in 0u128..(1 << 12),
        c in 0u128..(1 << 10),
        d in 0u128..(1 << 30),
    ) {
        let widths = [12u8, 12, 10, 30];
        let packed = pack(&[(a, 12), (b, 12), (c, 10), (d, 30)]);
        let fields = unpack(packed, &widths);
        prop_assert_eq!(fields, vec![a, b, c, d]);
    }

    #[test]
    fn prop_bit_stream_round_trip(values in prop::collection::vec((0u64..=u32::MAX as u64, 1u8..=32), 1..16)) {
        let mut w = BitWriter::new();
        for &(v, bits) in &values {
            w.write_bits(v, bits);
        }
        let bytes = w.into_bytes();
        let mut r = BitReader::new(&bytes);
        for &(v, bits) in &values {
            let mask = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
            prop_assert_eq!(r.read_bits(bits), Some(v & mask));
        }
    }
}
