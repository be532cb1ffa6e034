use std::sync::Arc;

use burrow::{
    ColumnType, InstructionLog, Mixed, Result, Store, StoreError, StoreOptions, Timestamp,
};

fn store_with_log() -> (Store, Arc<InstructionLog>) {
    let log = Arc::new(InstructionLog::new());
    let store = Store::new(StoreOptions::new().replication(log.clone()));
    (store, log)
}

#[test]
fn set_get_roundtrip_with_null_handling() -> Result<()> {
    let store = Store::default();
    let person = store.add_table("person")?;
    let age = person.add_column("age", ColumnType::Int, true)?;
    let obj = person.create_object()?;

    obj.set(age, 42i64)?;
    assert_eq!(obj.get::<Option<i64>>(age)?, Some(42));
    assert_eq!(obj.get::<i64>(age)?, 42);

    obj.set_null(age)?;
    assert!(obj.is_null(age)?);
    assert_eq!(obj.get::<Option<i64>>(age)?, None);
    assert!(matches!(obj.get::<i64>(age), Err(StoreError::NullValue)));
    Ok(())
}

#[test]
fn typed_reads_and_writes_are_checked() -> Result<()> {
    let store = Store::default();
    let table = store.add_table("mixed_bag")?;
    let count = table.add_column("count", ColumnType::Int, false)?;
    let name = table.add_column("name", ColumnType::String, true)?;
    let obj = table.create_object()?;

    assert!(matches!(
        obj.set(count, "nope"),
        Err(StoreError::WrongType)
    ));
    assert!(matches!(obj.get::<bool>(count), Err(StoreError::WrongType)));
    assert!(matches!(
        obj.set(count, Mixed::Null),
        Err(StoreError::NotNullable)
    ));
    assert!(matches!(obj.set_null(count), Err(StoreError::NotNullable)));

    obj.set(name, "ada")?;
    assert_eq!(obj.get::<String>(name)?, "ada");
    // Non-nullable columns read their defaults, not null.
    assert_eq!(obj.get::<i64>(count)?, 0);
    assert!(!obj.is_null(count)?);
    Ok(())
}

#[test]
fn string_and_binary_size_caps() -> Result<()> {
    let mut opts = StoreOptions::new();
    opts.max_string_size = 8;
    opts.max_binary_size = 4;
    let store = Store::new(opts);
    let table = store.add_table("blob")?;
    let text = table.add_column("text", ColumnType::String, true)?;
    let data = table.add_column("data", ColumnType::Binary, true)?;
    let obj = table.create_object()?;

    assert!(matches!(
        obj.set(text, "way too long for the cap"),
        Err(StoreError::StringTooBig)
    ));
    assert!(matches!(
        obj.set(data, vec![0u8; 16]),
        Err(StoreError::BinaryTooBig)
    ));
    obj.set(text, "short")?;
    obj.set(data, vec![1u8, 2, 3])?;
    Ok(())
}

#[test]
fn add_int_wraps_at_the_boundary() -> Result<()> {
    let (store, log) = store_with_log();
    let table = store.add_table("counter")?;
    let n = table.add_column("n", ColumnType::Int, false)?;
    let obj = table.create_object()?;

    obj.set(n, i64::MAX)?;
    obj.add_int(n, 1)?;
    assert_eq!(obj.get::<i64>(n)?, i64::MIN);

    obj.set(n, 10)?;
    obj.add_int(n, -3)?;
    assert_eq!(obj.get::<i64>(n)?, 7);

    // The increment replicates as its own commutative instruction.
    let saw_add = log.snapshot().iter().any(|instr| {
        matches!(
            instr,
            burrow::Instruction::AddInt { value: 1, .. }
        )
    });
    assert!(saw_add);
    Ok(())
}

#[test]
fn add_int_on_null_is_rejected() -> Result<()> {
    let store = Store::default();
    let table = store.add_table("counter")?;
    let n = table.add_column("n", ColumnType::Int, true)?;
    let s = table.add_column("s", ColumnType::String, true)?;
    let obj = table.create_object()?;

    assert!(matches!(
        obj.add_int(n, 1),
        Err(StoreError::IllegalCombination)
    ));
    assert!(matches!(obj.add_int(s, 1), Err(StoreError::IllegalType)));
    obj.set(n, 1i64)?;
    obj.add_int(n, 1)?;
    assert_eq!(obj.get::<i64>(n)?, 2);
    Ok(())
}

#[test]
fn accessors_survive_commit_boundaries() -> Result<()> {
    let store = Store::default();
    let table = store.add_table("person")?;
    let age = table.add_column("age", ColumnType::Int, false)?;
    let obj = table.create_object()?;
    obj.set(age, 1i64)?;

    let before = store.storage_version();
    store.commit();
    assert!(store.storage_version() > before);

    // The accessor re-resolves against the new version and the write
    // lands in a fresh copy, leaving the snapshot untouched.
    assert_eq!(obj.get::<i64>(age)?, 1);
    obj.set(age, 2)?;
    assert_eq!(obj.get::<i64>(age)?, 2);

    let again = table.get_object(obj.key())?;
    assert_eq!(again.get::<i64>(age)?, 2);
    Ok(())
}

#[test]
fn removed_objects_fail_fast() -> Result<()> {
    let store = Store::default();
    let table = store.add_table("person")?;
    let age = table.add_column("age", ColumnType::Int, false)?;
    let obj = table.create_object()?;
    let twin = table.get_object(obj.key())?;

    obj.remove()?;
    assert!(!obj.is_valid());
    assert!(matches!(
        obj.get::<i64>(age),
        Err(StoreError::ObjectNotAlive)
    ));
    assert!(!twin.is_valid());
    assert!(matches!(
        twin.set(age, 1i64),
        Err(StoreError::ObjectNotAlive)
    ));
    assert!(matches!(
        table.get_object(obj.key()),
        Err(StoreError::KeyNotFound)
    ));
    Ok(())
}

#[test]
fn equality_compares_public_fields() -> Result<()> {
    let store = Store::default();
    let table = store.add_table("person")?;
    let age = table.add_column("age", ColumnType::Int, true)?;
    let name = table.add_column("name", ColumnType::String, true)?;

    let a = table.create_object()?;
    let b = table.create_object()?;
    a.set(age, 30i64)?.set(name, "kim")?;
    b.set(age, 30i64)?.set(name, "kim")?;
    assert!(a.equals(&b)?);

    b.set(age, 31i64)?;
    assert!(!a.equals(&b)?);
    Ok(())
}

#[test]
fn indexed_columns_answer_lookups() -> Result<()> {
    let store = Store::default();
    let table = store.add_table("person")?;
    let name = table.add_indexed_column("name", ColumnType::String, true)?;

    let a = table.create_object()?;
    let b = table.create_object()?;
    let c = table.create_object()?;
    a.set(name, "kim")?;
    b.set(name, "kim")?;
    c.set(name, "sam")?;

    let hits = table.find_all_indexed(name, &Mixed::from("kim"))?;
    assert_eq!(hits.len(), 2);
    assert!(hits.contains(&a.key()) && hits.contains(&b.key()));

    b.set(name, "sam")?;
    assert_eq!(table.find_all_indexed(name, &Mixed::from("kim"))?, vec![a.key()]);

    a.remove()?;
    assert!(table.find_all_indexed(name, &Mixed::from("kim"))?.is_empty());
    Ok(())
}

#[test]
fn json_output_is_wellformed() -> Result<()> {
    let store = Store::default();
    let table = store.add_table("person")?;
    let name = table.add_column("name", ColumnType::String, true)?;
    let data = table.add_column("data", ColumnType::Binary, true)?;
    let born = table.add_column("born", ColumnType::Timestamp, true)?;
    let score = table.add_column("score", ColumnType::Double, false)?;

    let obj = table.create_object()?;
    obj.set(name, "line1\nline\\2 \"quoted\"")?;
    obj.set(data, vec![1u8, 2, 3])?;
    obj.set(born, Timestamp::new(12, 5))?;
    obj.set(score, 2.5f64)?;

    let json = obj.to_json_string()?;
    let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
    assert_eq!(value["_key"], serde_json::json!(0));
    assert_eq!(value["name"], serde_json::json!("line1\nline\\2 \"quoted\""));
    assert_eq!(value["data"], serde_json::json!("AQID"));
    assert_eq!(value["born"], serde_json::json!("12.000000005"));
    assert_eq!(value["score"].as_f64(), Some(2.5));
    Ok(())
}

#[test]
fn json_renames_members() -> Result<()> {
    let store = Store::default();
    let table = store.add_table("person")?;
    let name = table.add_column("name", ColumnType::String, true)?;
    let obj = table.create_object()?;
    obj.set(name, "kim")?;

    let mut renames = rustc_hash::FxHashMap::default();
    renames.insert("_key".to_owned(), "id".to_owned());
    renames.insert("name".to_owned(), "fullName".to_owned());
    let mut out = String::new();
    obj.to_json(&mut out, 0, &renames)?;
    let value: serde_json::Value = serde_json::from_str(&out).expect("valid json");
    assert_eq!(value["id"], serde_json::json!(0));
    assert_eq!(value["fullName"], serde_json::json!("kim"));
    Ok(())
}
