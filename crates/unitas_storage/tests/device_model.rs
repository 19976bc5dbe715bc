//! Model-based checks of storage devices against a plain byte vector.

use proptest::prelude::*;
use unitas_storage::{InMemoryBackend, StorageBackend, StorageError};

#[derive(Debug, Clone)]
enum Op {
    Append(Vec<u8>),
    Truncate(u64),
    Read(u64, usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => prop::collection::vec(any::<u8>(), 0..64).prop_map(Op::Append),
        1 => (0u64..256).prop_map(Op::Truncate),
        2 => (0u64..256, 0usize..64).prop_map(|(offset, len)| Op::Read(offset, len)),
    ]
}

proptest! {
    #[test]
    fn in_memory_device_matches_vec_model(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let mut device = InMemoryBackend::new();
        let mut model: Vec<u8> = Vec::new();

        for op in ops {
            match op {
                Op::Append(data) => {
                    let offset = device.append(&data).unwrap();
                    prop_assert_eq!(offset, model.len() as u64);
                    model.extend_from_slice(&data);
                }
                Op::Truncate(new_size) => {
                    let result = device.truncate(new_size);
                    if new_size > model.len() as u64 {
                        let is_beyond_end = matches!(result, Err(StorageError::TruncateBeyondEnd { .. }));
                        prop_assert!(is_beyond_end);
                    } else {
                        prop_assert!(result.is_ok());
                        model.truncate(new_size as usize);
                    }
                }
                Op::Read(offset, len) => {
                    let result = device.read_at(offset, len);
                    let end = offset as usize + len;
                    if end <= model.len() {
                        prop_assert_eq!(result.unwrap(), model[offset as usize..end].to_vec());
                    } else {
                        let is_out_of_bounds = matches!(result, Err(StorageError::OutOfBounds { .. }));
                        prop_assert!(is_out_of_bounds);
                    }
                }
            }
            prop_assert_eq!(device.size().unwrap(), model.len() as u64);
        }
        prop_assert_eq!(device.read_all().unwrap(), model.clone());
        prop_assert_eq!(device.snapshot(), model);
    }
}
