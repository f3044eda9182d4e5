//! Demonstrates the type-erased vector with byte-sized records, insertion and sorting.

use opaque_vec::{Error, OpaqueVec};
use xoshiro_rng::XoshiroRng;

const RECORD_SIZE: usize = 4;

fn record(id: u16, score: u16) -> [u8; RECORD_SIZE] {
    let [id_hi, id_lo] = id.to_be_bytes();
    let [score_hi, score_lo] = score.to_be_bytes();
    [id_hi, id_lo, score_hi, score_lo]
}

fn main() -> Result<(), Error> {
    let mut records = OpaqueVec::with_capacity(4, RECORD_SIZE)?;
    let mut rng = XoshiroRng::new(7);

    for id in 0..10 {
        records.push_bytes(&record(id, rng.next_u16() % 100))?;
    }

    println!(
        "{} records, capacity {} after automatic growth",
        records.len(),
        records.capacity()
    );

    let mut late_arrivals = OpaqueVec::with_capacity(2, RECORD_SIZE)?;
    late_arrivals.push_bytes(&record(100, 50))?;
    late_arrivals.push_bytes(&record(101, 75))?;

    records.insert_from(0, &late_arrivals)?;

    // Sort by the big-endian score stored in the last two bytes.
    records.sort_by(|a, b| a.get(2..).cmp(&b.get(2..)))?;

    for chunk in records.as_bytes().chunks_exact(RECORD_SIZE) {
        if let [id_hi, id_lo, score_hi, score_lo] = *chunk {
            let id = u16::from_be_bytes([id_hi, id_lo]);
            let score = u16::from_be_bytes([score_hi, score_lo]);
            println!("record {id:>3}: score {score:>2}");
        }
    }

    records.shrink_to_fit()?;
    println!("capacity after shrink: {}", records.capacity());

    records.release()?;
    assert_eq!(records.release(), Err(Error::Unallocated));

    Ok(())
}
