use super::*;
use crate::io::{Data, SliceRead};

// PackBits, as used for channel compression method 1.
// Each scanline is an independent stream; the streams are preceded
// by a table containing the byte length of every stream.

const MIN_RUN_LENGTH: usize = 3;
const MAX_RUN_LENGTH: usize = 128;


/// Decompress a whole channel: the scanline table, then one stream per scanline.
/// PSB files use four-byte table entries where PSD files use two bytes.
pub fn decompress_channel(
    data: Bytes<'_>,
    row_count: usize, bytes_per_row: usize,
    long_row_lengths: bool,
) -> Result<ByteVec> {
    let mut read = SliceRead::new(data);

    let mut row_lengths = Vec::with_capacity(row_count);
    for _ in 0 .. row_count {
        let length = if long_row_lengths { u32::read(&mut read, "packbits scanline table")? as usize }
        else { u16::read(&mut read, "packbits scanline table")? as usize };

        row_lengths.push(length);
    }

    let mut decompressed = Vec::with_capacity(row_count * bytes_per_row);

    for length in row_lengths {
        let row = read.take_bytes(length, "packbits scanline")
            .map_err(|_| Error::MalformedRle("scanline table points past the channel data"))?;

        decompress_row(row, bytes_per_row, &mut decompressed)?;
    }

    Ok(decompressed)
}

/// Decode a single PackBits stream, appending exactly `expected_byte_size`
/// bytes to `decompressed`. A control byte of 0..=127 copies that many
/// literals plus one, a negative control byte repeats the following byte,
/// and -128 is a no-op left behind by some writers.
pub fn decompress_row(mut remaining: Bytes<'_>, expected_byte_size: usize, decompressed: &mut ByteVec) -> Result<()> {
    let target_len = decompressed.len() + expected_byte_size;

    while decompressed.len() < target_len {
        let control = take_1(&mut remaining)? as i8;

        if control >= 0 {
            // copy the next 'control + 1' bytes as-is
            let count = control as usize + 1;
            if decompressed.len() + count > target_len {
                return Err(Error::MalformedRle("literal run overruns its scanline"));
            }

            decompressed.extend_from_slice(take_n(&mut remaining, count)?);
        }
        else if control != -128 {
            // repeat the next byte '1 - control' times
            let count = (1 - control as isize) as usize;
            if decompressed.len() + count > target_len {
                return Err(Error::MalformedRle("repeated run overruns its scanline"));
            }

            let value = take_1(&mut remaining)?;
            decompressed.resize(decompressed.len() + count, value);
        }

        // -128 does not produce any output
    }

    Ok(())
}

/// Encode one scanline with PackBits.
/// The decoding direction inverts this exactly; used by fixture builders.
pub fn compress_row(data: Bytes<'_>) -> ByteVec {
    let mut compressed = Vec::with_capacity(data.len() + data.len() / MAX_RUN_LENGTH + 1);
    let mut run_start = 0;

    while run_start < data.len() {
        let mut run_end = run_start + 1;
        while run_end < data.len()
            && data[run_end] == data[run_start]
            && run_end - run_start < MAX_RUN_LENGTH
        {
            run_end += 1;
        }

        if run_end - run_start >= MIN_RUN_LENGTH {
            compressed.push((1 - (run_end - run_start) as i32) as u8);
            compressed.push(data[run_start]);
            run_start = run_end;
        }
        else {
            // collect literals until a run of at least three identical bytes begins
            let mut literal_end = run_start + 1;
            while literal_end < data.len()
                && literal_end - run_start < MAX_RUN_LENGTH
                && !(
                    literal_end + 2 < data.len()
                        && data[literal_end] == data[literal_end + 1]
                        && data[literal_end] == data[literal_end + 2]
                )
            {
                literal_end += 1;
            }

            compressed.push((literal_end - run_start - 1) as u8);
            compressed.extend_from_slice(&data[run_start .. literal_end]);
            run_start = literal_end;
        }
    }

    compressed
}

fn take_1(slice: &mut Bytes<'_>) -> Result<u8> {
    if !slice.is_empty() {
        let result = slice[0];
        *slice = &slice[1..];
        Ok(result)

    } else {
        Err(Error::MalformedRle("scanline stream ends inside a run"))
    }
}

fn take_n<'s>(slice: &mut Bytes<'s>, n: usize) -> Result<Bytes<'s>> {
    if n <= slice.len() {
        let (front, back) = slice.split_at(n);
        *slice = back;
        Ok(front)

    } else {
        Err(Error::MalformedRle("scanline stream ends inside a run"))
    }
}


#[cfg(test)]
mod test {
    use super::*;

    fn roundtrip(data: &[u8]) {
        let compressed = compress_row(data);
        let mut decompressed = Vec::new();
        decompress_row(&compressed, data.len(), &mut decompressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn roundtrip_simple() {
        roundtrip(&[0, 23, 4, 4, 4, 4, 4, 4, 4, 4, 4, 5, 0, 0, 0, 1, 23, 43, 4]);
    }

    #[test]
    fn roundtrip_empty() {
        roundtrip(&[]);
    }

    #[test]
    fn roundtrip_maximum_run() {
        roundtrip(&[7_u8; 128]);
        roundtrip(&[7_u8; 129]);
        roundtrip(&[7_u8; 500]);
    }

    #[test]
    fn roundtrip_alternating_runs() {
        let mut data = Vec::new();
        for index in 0 .. 64 {
            data.push(index as u8); // literal
            data.extend_from_slice(&[200; 5]); // run
        }

        roundtrip(&data);
    }

    #[test]
    fn roundtrip_random() {
        use rand::prelude::*;

        let mut random = rand::rngs::StdRng::seed_from_u64(92817465);

        for _ in 0 .. 256 {
            let length = random.random_range(0 .. 600);
            let data: Vec<u8> = (0 .. length)
                .map(|_| if random.random_bool(0.7) { 42 } else { random.random() })
                .collect();

            roundtrip(&data);
        }
    }

    #[test]
    fn no_op_control_byte_is_skipped() {
        // -128 between runs must decode to nothing
        let stream = [0x80, 2, b'a', b'b', b'c', 0x80, (1_i32 - 3) as u8, b'z'];
        let mut decompressed = Vec::new();
        decompress_row(&stream, 6, &mut decompressed).unwrap();
        assert_eq!(decompressed, b"abczzz");
    }

    #[test]
    fn overrunning_run_is_rejected() {
        // a run of 4 into a scanline of 3 remaining bytes
        let stream = [(1_i32 - 4) as u8, 9];
        let mut decompressed = Vec::new();
        assert!(matches!(
            decompress_row(&stream, 3, &mut decompressed),
            Err(Error::MalformedRle(_))
        ));

        // stream that ends before the scanline is filled
        let mut decompressed = Vec::new();
        assert!(matches!(
            decompress_row(&[], 3, &mut decompressed),
            Err(Error::MalformedRle(_))
        ));
    }

    #[test]
    fn channel_rows_with_table() {
        let rows: [&[u8]; 3] = [&[1, 1, 1, 1], &[9, 8, 7, 6], &[0, 0, 0, 0]];

        let mut data = Vec::new();
        let streams: Vec<ByteVec> = rows.iter().map(|row| compress_row(row)).collect();
        for stream in &streams { data.extend_from_slice(&(stream.len() as u16).to_be_bytes()); }
        for stream in &streams { data.extend_from_slice(stream); }

        let decompressed = decompress_channel(&data, 3, 4, false).unwrap();
        assert_eq!(decompressed, vec![1, 1, 1, 1, 9, 8, 7, 6, 0, 0, 0, 0]);
    }
}
