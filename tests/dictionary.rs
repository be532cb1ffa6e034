use std::sync::Arc;

use burrow::{ColumnType, Mixed, ObjLink, Result, Store, StoreError, Table};

struct Fixture {
    _store: Store,
    table: Arc<Table>,
    col: burrow::ColKey,
}

fn int_dict() -> Result<Fixture> {
    let store = Store::default();
    let table = store.add_table("holder")?;
    let col = table.add_dictionary_column("d", ColumnType::Int)?;
    Ok(Fixture {
        _store: store,
        table,
        col,
    })
}

#[test]
fn insert_get_roundtrip() -> Result<()> {
    let f = int_dict()?;
    let obj = f.table.create_object()?;
    let dict = obj.get_dictionary(f.col)?;

    let (_, inserted) = dict.insert(7i64, "seven")?;
    assert!(inserted);
    assert_eq!(dict.get(&Mixed::from(7i64))?, Mixed::from("seven"));
    assert_eq!(dict.len()?, 1);

    assert!(matches!(
        dict.get(&Mixed::from(8i64)),
        Err(StoreError::KeyNotFound)
    ));
    Ok(())
}

#[test]
fn insert_overwrites_existing_keys() -> Result<()> {
    let f = int_dict()?;
    let obj = f.table.create_object()?;
    let dict = obj.get_dictionary(f.col)?;

    assert!(dict.insert(7i64, "seven")?.1);
    assert!(!dict.insert(7i64, "SEVEN")?.1);
    assert_eq!(dict.get(&Mixed::from(7i64))?, Mixed::from("SEVEN"));
    assert_eq!(dict.len()?, 1);
    Ok(())
}

#[test]
fn erase_and_find() -> Result<()> {
    let f = int_dict()?;
    let obj = f.table.create_object()?;
    let dict = obj.get_dictionary(f.col)?;

    dict.insert(1i64, 10i64)?;
    dict.insert(2i64, 20i64)?;
    assert!(dict.find(&Mixed::from(1i64))?.is_some());

    dict.erase(&Mixed::from(1i64))?;
    assert!(dict.find(&Mixed::from(1i64))?.is_none());
    assert_eq!(dict.len()?, 1);
    assert!(matches!(
        dict.erase(&Mixed::from(1i64)),
        Err(StoreError::KeyNotFound)
    ));

    dict.clear()?;
    assert_eq!(dict.len()?, 0);
    assert!(dict.is_empty()?);
    Ok(())
}

#[test]
fn keys_are_type_checked() -> Result<()> {
    let f = int_dict()?;
    let obj = f.table.create_object()?;
    let dict = obj.get_dictionary(f.col)?;
    assert!(matches!(
        dict.insert("not an int", 1i64),
        Err(StoreError::WrongType)
    ));
    assert!(matches!(
        dict.get(&Mixed::from("nope")),
        Err(StoreError::WrongType)
    ));
    Ok(())
}

#[test]
fn string_keys_work() -> Result<()> {
    let store = Store::default();
    let table = store.add_table("holder")?;
    let col = table.add_dictionary_column("d", ColumnType::String)?;
    let obj = table.create_object()?;
    let dict = obj.get_dictionary(col)?;

    dict.insert("one", 1i64)?;
    dict.insert("two", 2i64)?;
    assert_eq!(dict.get(&Mixed::from("two"))?, Mixed::Int(2));

    let mut seen: Vec<(Mixed, Mixed)> = Vec::new();
    for entry in dict.iter()? {
        seen.push(entry?);
    }
    assert_eq!(seen.len(), 2);
    assert!(seen.contains(&(Mixed::from("one"), Mixed::Int(1))));
    assert!(seen.contains(&(Mixed::from("two"), Mixed::Int(2))));
    Ok(())
}

#[test]
fn get_or_insert_null_returns_the_old_value() -> Result<()> {
    let f = int_dict()?;
    let obj = f.table.create_object()?;
    let dict = obj.get_dictionary(f.col)?;

    assert_eq!(dict.get_or_insert_null(5i64)?, Mixed::Null);
    assert_eq!(dict.len()?, 1);
    dict.insert(5i64, "five")?;
    assert_eq!(dict.get_or_insert_null(5i64)?, Mixed::from("five"));
    assert_eq!(dict.len()?, 1);
    Ok(())
}

#[test]
fn nullify_keeps_the_entry() -> Result<()> {
    let f = int_dict()?;
    let obj = f.table.create_object()?;
    let dict = obj.get_dictionary(f.col)?;

    dict.insert(5i64, "five")?;
    dict.nullify(&Mixed::from(5i64))?;
    assert_eq!(dict.len()?, 1);
    assert_eq!(dict.get(&Mixed::from(5i64))?, Mixed::Null);
    Ok(())
}

#[test]
fn accessors_share_one_cell() -> Result<()> {
    let f = int_dict()?;
    let obj = f.table.create_object()?;
    let first = obj.get_dictionary(f.col)?;
    let second = obj.get_dictionary(f.col)?;

    // The second accessor was built before the cell had storage; it
    // must pick the root up through the content-version handshake.
    first.insert(1i64, 100i64)?;
    assert_eq!(second.len()?, 1);
    assert_eq!(second.get(&Mixed::from(1i64))?, Mixed::Int(100));

    second.insert(2i64, 200i64)?;
    assert_eq!(first.len()?, 2);
    Ok(())
}

#[test]
fn link_values_carry_backlinks_without_cascade() -> Result<()> {
    let store = Store::default();
    let holder = store.add_table("holder")?;
    let people = store.add_table("people")?;
    let col = holder.add_dictionary_column("friends", ColumnType::String)?;

    let obj = holder.create_object()?;
    let kim = people.create_object()?;
    let dict = obj.get_dictionary(col)?;
    let link = ObjLink::new(people.key(), kim.key());

    dict.insert("bestie", link)?;
    assert_eq!(kim.get_backlink_count(&holder, col)?, 1);

    // Overwriting moves the edge; erasing drops it without cascading.
    dict.insert("bestie", Mixed::Null)?;
    assert_eq!(kim.get_backlink_count(&holder, col)?, 0);
    dict.insert("bestie", link)?;
    dict.erase(&Mixed::from("bestie"))?;
    assert_eq!(kim.get_backlink_count(&holder, col)?, 0);
    assert!(kim.is_valid());
    Ok(())
}

#[test]
fn removing_a_linked_target_nullifies_the_value() -> Result<()> {
    let store = Store::default();
    let holder = store.add_table("holder")?;
    let people = store.add_table("people")?;
    let col = holder.add_dictionary_column("friends", ColumnType::String)?;

    let obj = holder.create_object()?;
    let kim = people.create_object()?;
    let dict = obj.get_dictionary(col)?;
    dict.insert("bestie", ObjLink::new(people.key(), kim.key()))?;

    kim.remove()?;
    assert_eq!(dict.len()?, 1);
    assert_eq!(dict.get(&Mixed::from("bestie"))?, Mixed::Null);
    Ok(())
}

#[test]
fn owner_removal_tears_the_dictionary_down() -> Result<()> {
    let store = Store::default();
    let holder = store.add_table("holder")?;
    let people = store.add_table("people")?;
    let col = holder.add_dictionary_column("friends", ColumnType::String)?;

    let obj = holder.create_object()?;
    let kim = people.create_object()?;
    let dict = obj.get_dictionary(col)?;
    dict.insert("bestie", ObjLink::new(people.key(), kim.key()))?;
    dict.insert("note", "plain value")?;

    obj.remove()?;
    assert_eq!(kim.backlink_count()?, 0);
    assert!(kim.is_valid());
    assert_eq!(holder.size(), 0);
    Ok(())
}

#[test]
fn dictionaries_serialize_with_stringified_keys() -> Result<()> {
    let f = int_dict()?;
    let obj = f.table.create_object()?;
    let dict = obj.get_dictionary(f.col)?;
    dict.insert(7i64, "seven")?;

    let json = obj.to_json_string()?;
    let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
    assert_eq!(value["d"]["7"], serde_json::json!("seven"));
    Ok(())
}

#[test]
fn survives_commit_boundaries() -> Result<()> {
    let store = Store::default();
    let table = store.add_table("holder")?;
    let col = table.add_dictionary_column("d", ColumnType::Int)?;
    let obj = table.create_object()?;
    let dict = obj.get_dictionary(col)?;

    dict.insert(1i64, 10i64)?;
    store.commit();
    // Writes after the commit copy the inner tree; the entry stays
    // reachable through the re-read root.
    dict.insert(2i64, 20i64)?;
    assert_eq!(dict.len()?, 2);
    assert_eq!(dict.get(&Mixed::from(1i64))?, Mixed::Int(10));
    assert_eq!(dict.get(&Mixed::from(2i64))?, Mixed::Int(20));
    Ok(())
}
