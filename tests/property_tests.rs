use std::sync::Arc;

use proptest::prelude::*;

use burrow::{
    ColumnType, Instruction, InstructionLog, Mixed, Result as StoreResult, Store, StoreError,
    StoreOptions, Table,
};

#[derive(Debug, Clone)]
enum Op {
    SetInt(i64),
    SetStr(String),
    SetNullInt,
    AddInt(i64),
    Commit,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<i64>().prop_map(Op::SetInt),
        "[a-z]{0,12}".prop_map(Op::SetStr),
        Just(Op::SetNullInt),
        any::<i64>().prop_map(Op::AddInt),
        Just(Op::Commit),
    ]
}

fn schema(store: &Store) -> (Arc<Table>, burrow::ColKey, burrow::ColKey) {
    let table = store.add_table("t").unwrap();
    let n = table.add_column("n", ColumnType::Int, true).unwrap();
    let s = table.add_column("s", ColumnType::String, true).unwrap();
    (table, n, s)
}

/// Applies a recorded instruction stream to an empty replica.
fn replay(table: &Arc<Table>, instrs: &[Instruction]) -> StoreResult<()> {
    for instr in instrs {
        match instr {
            Instruction::CreateObject { key, .. } => {
                let obj = table.create_object()?;
                assert_eq!(obj.key(), *key);
            }
            Instruction::RemoveObject { key, .. } => {
                table.remove_object(*key)?;
            }
            Instruction::Set { col, key, value, .. }
            | Instruction::SetDefault { col, key, value, .. } => match value {
                Mixed::Null => {
                    table.get_object(*key)?.set_null(*col)?;
                }
                other => {
                    table.get_object(*key)?.set(*col, other.clone())?;
                }
            },
            Instruction::SetNull { col, key, .. } => {
                table.get_object(*key)?.set_null(*col)?;
            }
            Instruction::AddInt { col, key, value, .. } => {
                table.get_object(*key)?.add_int(*col, *value)?;
            }
            Instruction::NullifyLink { .. }
            | Instruction::LinkListNullify { .. }
            | Instruction::ListErase { .. } => {}
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn reads_always_see_the_last_write(ops in prop::collection::vec(arb_op(), 1..60)) {
        let store = Store::default();
        let (table, n, s) = schema(&store);
        let obj = table.create_object().unwrap();

        let mut model_n: Option<i64> = None;
        let mut model_s: Option<String> = None;
        for op in ops {
            match op {
                Op::SetInt(v) => {
                    obj.set(n, v).unwrap();
                    model_n = Some(v);
                }
                Op::SetStr(v) => {
                    obj.set(s, v.clone()).unwrap();
                    model_s = Some(v);
                }
                Op::SetNullInt => {
                    obj.set_null(n).unwrap();
                    model_n = None;
                }
                Op::AddInt(delta) => match model_n {
                    Some(old) => {
                        obj.add_int(n, delta).unwrap();
                        model_n = Some(old.wrapping_add(delta));
                    }
                    None => {
                        prop_assert!(matches!(
                            obj.add_int(n, delta),
                            Err(StoreError::IllegalCombination)
                        ));
                    }
                },
                Op::Commit => store.commit(),
            }
            prop_assert_eq!(obj.get::<Option<i64>>(n).unwrap(), model_n);
            prop_assert_eq!(obj.get::<Option<String>>(s).unwrap(), model_s.clone());
        }
    }

    #[test]
    fn add_int_matches_wrapping_arithmetic(
        start in any::<i64>(),
        deltas in prop::collection::vec(any::<i64>(), 1..20),
    ) {
        let store = Store::default();
        let table = store.add_table("t").unwrap();
        let n = table.add_column("n", ColumnType::Int, false).unwrap();
        let obj = table.create_object().unwrap();

        obj.set(n, start).unwrap();
        let mut expected = start;
        for delta in deltas {
            obj.add_int(n, delta).unwrap();
            expected = expected.wrapping_add(delta);
        }
        prop_assert_eq!(obj.get::<i64>(n).unwrap(), expected);
    }

    #[test]
    fn replaying_the_instruction_log_reproduces_state(
        ops in prop::collection::vec(arb_op(), 1..40),
        removes in prop::collection::vec(any::<bool>(), 4),
    ) {
        let log = Arc::new(InstructionLog::new());
        let store = Store::new(StoreOptions::new().replication(log.clone()));
        let (table, n, s) = schema(&store);

        let mut objs = Vec::new();
        for _ in 0..4 {
            objs.push(table.create_object().unwrap());
        }
        for (pos, op) in ops.iter().enumerate() {
            let obj = &objs[pos % objs.len()];
            match op {
                Op::SetInt(v) => {
                    obj.set(n, *v).unwrap();
                }
                Op::SetStr(v) => {
                    obj.set(s, v.clone()).unwrap();
                }
                Op::SetNullInt => {
                    obj.set_null(n).unwrap();
                }
                Op::AddInt(delta) => {
                    let _ = obj.add_int(n, *delta);
                }
                Op::Commit => store.commit(),
            }
        }
        for (obj, remove) in objs.iter().zip(removes) {
            if remove {
                obj.remove().unwrap();
            }
        }

        let replica = Store::default();
        let (replica_table, _, _) = schema(&replica);
        replay(&replica_table, &log.snapshot()).unwrap();

        let keys = table.keys().unwrap();
        prop_assert_eq!(&replica_table.keys().unwrap(), &keys);
        for key in keys {
            let original = table.get_object(key).unwrap().to_json_string().unwrap();
            let replayed = replica_table
                .get_object(key)
                .unwrap()
                .to_json_string()
                .unwrap();
            prop_assert_eq!(original, replayed);
        }
    }

    #[test]
    fn cascade_outcome_is_independent_of_removal_order(
        order in prop::collection::vec(0usize..6, 6),
        keep_mask in 0u8..64,
    ) {
        let store = Store::default();
        let parent = store.add_table("parent").unwrap();
        let child = store.add_embedded_table("child").unwrap();
        let l = parent.add_link_column("l", &child).unwrap();

        let mut parents = Vec::new();
        let mut children = Vec::new();
        for _ in 0..6 {
            let p = parent.create_object().unwrap();
            children.push(p.create_and_set_linked_object(l).unwrap());
            parents.push(p);
        }

        // Remove the parents outside the keep mask in an arbitrary
        // visiting order; repeated visits are no-ops.
        let mut removed = [false; 6];
        for ndx in order {
            if keep_mask & (1 << ndx) == 0 && !removed[ndx] {
                parents[ndx].remove().unwrap();
                removed[ndx] = true;
            }
        }
        for ndx in 0..6 {
            if removed[ndx] {
                prop_assert!(!parents[ndx].is_valid());
                prop_assert!(!children[ndx].is_valid());
            } else {
                prop_assert!(parents[ndx].is_valid());
                prop_assert!(children[ndx].is_valid());
            }
        }
    }
}
