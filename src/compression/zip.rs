use super::*;

// Channel compression methods 2 and 3: the plane is deflated
// as a single zlib stream. Method 3 additionally stores each scanline
// as horizontal differences, which speeds up deflate on photographic data.


/// Inflate a zlib stream to at most the expected plane size.
/// The size limit keeps a forged length field from allocating unboundedly.
pub fn decompress_bytes(data: Bytes<'_>, expected_byte_size: usize) -> Result<ByteVec> {
    let options = zune_inflate::DeflateOptions::default()
        .set_limit(expected_byte_size)
        .set_size_hint(expected_byte_size);

    zune_inflate::DeflateDecoder::new_with_options(data, options)
        .decode_zlib()
        .map_err(|_| Error::invalid("zlib-compressed channel data is malformed"))
}

/// Deflate a plane into a zlib stream.
/// The decoding direction inverts this exactly; used by fixture builders.
pub fn compress_bytes(data: Bytes<'_>) -> ByteVec {
    miniz_oxide::deflate::compress_to_vec_zlib(data, 4)
}


/// Integrate over the differences in each scanline to reconstruct 8-bit samples.
/// Wraps at 255 back to 0, matching the encoder's modular arithmetic.
pub fn samples_from_differences_u8(buffer: &mut [u8], bytes_per_row: usize) {
    if bytes_per_row == 0 { return; }

    for row in buffer.chunks_mut(bytes_per_row) {
        for index in 1 .. row.len() {
            row[index] = row[index].wrapping_add(row[index - 1]);
        }
    }
}

/// Derive each scanline of 8-bit samples into differences to the previous sample.
pub fn differences_from_samples_u8(buffer: &mut [u8], bytes_per_row: usize) {
    if bytes_per_row == 0 { return; }

    for row in buffer.chunks_mut(bytes_per_row) {
        for index in (1 .. row.len()).rev() {
            row[index] = row[index].wrapping_sub(row[index - 1]);
        }
    }
}

/// Integrate over the differences in each scanline to reconstruct
/// big-endian 16-bit samples. Wraps at 65535 back to 0.
pub fn samples_from_differences_u16(buffer: &mut [u8], bytes_per_row: usize) {
    if bytes_per_row == 0 { return; }

    for row in buffer.chunks_mut(bytes_per_row) {
        let mut previous = 0_u16;

        for (index, sample) in row.chunks_exact_mut(2).enumerate() {
            let difference = u16::from_be_bytes([sample[0], sample[1]]);
            let value = if index == 0 { difference } else { previous.wrapping_add(difference) };

            sample.copy_from_slice(&value.to_be_bytes());
            previous = value;
        }
    }
}

/// Derive each scanline of big-endian 16-bit samples into differences.
pub fn differences_from_samples_u16(buffer: &mut [u8], bytes_per_row: usize) {
    if bytes_per_row == 0 { return; }

    for row in buffer.chunks_mut(bytes_per_row) {
        let mut previous = 0_u16;

        for (index, sample) in row.chunks_exact_mut(2).enumerate() {
            let value = u16::from_be_bytes([sample[0], sample[1]]);
            let difference = if index == 0 { value } else { value.wrapping_sub(previous) };

            sample.copy_from_slice(&difference.to_be_bytes());
            previous = value;
        }
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip_zlib() {
        let data: Vec<u8> = (0 .. 4096_u32).map(|index| (index * 7) as u8).collect();
        let compressed = compress_bytes(&data);
        let decompressed = decompress_bytes(&compressed, data.len()).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn malformed_zlib_is_an_error() {
        assert!(decompress_bytes(&[0, 1, 2, 3], 64).is_err());
    }

    #[test]
    fn roundtrip_differences_u8() {
        let source = vec![0, 1, 2, 7, 4, 5, 255, 7, 13, 9, 10, 0];
        let mut modified = source.clone();

        differences_from_samples_u8(&mut modified, 4);
        samples_from_differences_u8(&mut modified, 4);

        assert_eq!(source, modified);
    }

    #[test]
    fn differences_u8_wrap_around() {
        // 255 + 1 wraps to 0 instead of saturating
        let mut row = vec![255, 1];
        samples_from_differences_u8(&mut row, 2);
        assert_eq!(row, vec![255, 0]);
    }

    #[test]
    fn roundtrip_differences_u16() {
        let mut source = Vec::new();
        for sample in [0_u16, 1, 65535, 40000, 2, 65534, 12345, 0] {
            source.extend_from_slice(&sample.to_be_bytes());
        }

        let mut modified = source.clone();
        differences_from_samples_u16(&mut modified, 8);
        samples_from_differences_u16(&mut modified, 8);

        assert_eq!(source, modified);
    }

    #[test]
    fn differences_u16_wrap_around() {
        // 65535 + 1 wraps to 0
        let mut row = Vec::new();
        row.extend_from_slice(&65535_u16.to_be_bytes());
        row.extend_from_slice(&1_u16.to_be_bytes());

        samples_from_differences_u16(&mut row, 4);

        assert_eq!(row[0 .. 2], 65535_u16.to_be_bytes());
        assert_eq!(row[2 .. 4], 0_u16.to_be_bytes());
    }

    #[test]
    fn roundtrip_random_rows() {
        use rand::prelude::*;
        let mut random = rand::rngs::StdRng::seed_from_u64(3141592);

        for _ in 0 .. 64 {
            let width = random.random_range(1 .. 64_usize);
            let height = random.random_range(1 .. 8_usize);
            let source: Vec<u8> = (0 .. width * height).map(|_| random.random()).collect();

            let mut modified = source.clone();
            differences_from_samples_u8(&mut modified, width);
            samples_from_differences_u8(&mut modified, width);
            assert_eq!(source, modified);
        }
    }
}
