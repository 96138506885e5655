use ledger_pdf::{
    chunk_plan::{ChunkPlan, chunk},
    error::GenerateError,
};

#[test]
fn concatenation_reproduces_input() {
    let rows: Vec<u32> = (0..97).collect();
    for size in [1, 2, 7, 96, 97, 98, 1000] {
        let batches = chunk(&rows, size).unwrap();
        assert_eq!(batches.concat(), rows, "size {size}");
        assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= size));
        assert_eq!(batches.len(), rows.len().div_ceil(size));
    }
}

#[test]
fn empty_input_has_no_chunks() {
    let rows: Vec<u32> = Vec::new();
    assert!(chunk(&rows, 3).unwrap().is_empty());
    assert!(ChunkPlan::from_row_count(0, 3).unwrap().is_empty());
}

#[test]
fn zero_size_is_invalid() {
    assert!(matches!(
        chunk(&[1u8], 0),
        Err(GenerateError::InvalidArgument(_))
    ));
}

#[test]
fn three_rows_by_two() {
    let rows = vec!["1x", "2y", "3z"];
    let batches = chunk(&rows, 2).unwrap();
    assert_eq!(batches, vec![vec!["1x", "2y"], vec!["3z"]]);

    let plan = ChunkPlan::from_row_count(3, 2).unwrap();
    assert_eq!(plan.chunks[0].start_row, 0);
    assert_eq!(plan.chunks.last().unwrap().end_row, 3);
}
