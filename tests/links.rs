use std::sync::Arc;

use burrow::{
    ColumnType, Instruction, InstructionLog, Mixed, ObjKey, ObjLink, Result, Store, StoreError,
    StoreOptions, Table,
};

fn store_with_log() -> (Store, Arc<InstructionLog>) {
    let log = Arc::new(InstructionLog::new());
    let store = Store::new(StoreOptions::new().replication(log.clone()));
    (store, log)
}

struct LinkedPair {
    _store: Store,
    a: Arc<Table>,
    b: Arc<Table>,
    l: burrow::ColKey,
}

fn linked_tables() -> Result<LinkedPair> {
    let store = Store::default();
    let a = store.add_table("a")?;
    let b = store.add_table("b")?;
    let l = a.add_link_column("l", &b)?;
    Ok(LinkedPair {
        _store: store,
        a,
        b,
        l,
    })
}

#[test]
fn backlink_counts_follow_forward_links() -> Result<()> {
    let t = linked_tables()?;
    let target = t.b.create_object()?;
    let a1 = t.a.create_object()?;
    let a2 = t.a.create_object()?;

    a1.set(t.l, target.key())?;
    a2.set(t.l, target.key())?;
    assert_eq!(target.get_backlink_count(&t.a, t.l)?, 2);
    assert_eq!(target.backlink_count()?, 2);

    a1.remove()?;
    assert_eq!(target.get_backlink_count(&t.a, t.l)?, 1);
    assert_eq!(target.get_backlink(&t.a, t.l, 0)?, a2.key());
    assert_eq!(target.get_all_backlinks(&t.a, t.l)?, vec![a2.key()]);

    a2.set_null(t.l)?;
    assert_eq!(target.get_backlink_count(&t.a, t.l)?, 0);
    Ok(())
}

#[test]
fn link_writes_validate_targets() -> Result<()> {
    let t = linked_tables()?;
    let a = t.a.create_object()?;
    let target = t.b.create_object()?;
    let dead_key = target.key();
    target.remove()?;
    assert!(matches!(
        a.set(t.l, dead_key),
        Err(StoreError::TargetOutOfRange)
    ));
    assert_eq!(a.get::<ObjKey>(t.l)?, ObjKey::NULL);
    Ok(())
}

#[test]
fn removing_target_nullifies_origin_links() -> Result<()> {
    let (store, log) = store_with_log();
    let a = store.add_table("a")?;
    let b = store.add_table("b")?;
    let l = a.add_link_column("l", &b)?;

    let origin = a.create_object()?;
    let target = b.create_object()?;
    origin.set(l, target.key())?;
    target.remove()?;

    assert_eq!(origin.get::<ObjKey>(l)?, ObjKey::NULL);
    assert!(origin.is_null(l)?);
    let instrs = log.snapshot();
    let nullify_pos = instrs
        .iter()
        .position(|i| matches!(i, Instruction::NullifyLink { .. }))
        .expect("nullify emitted");
    let remove_pos = instrs
        .iter()
        .position(|i| matches!(i, Instruction::RemoveObject { key, .. } if *key == target.key()))
        .expect("remove emitted");
    assert!(nullify_pos < remove_pos);
    Ok(())
}

#[test]
fn embedded_children_die_with_their_owner() -> Result<()> {
    let store = Store::default();
    let parent = store.add_table("parent")?;
    let child = store.add_embedded_table("child")?;
    let l = parent.add_link_column("l", &child)?;

    assert!(matches!(
        child.create_object(),
        Err(StoreError::WrongTableKind)
    ));

    let p = parent.create_object()?;
    let c = p.create_and_set_linked_object(l)?;
    assert_eq!(child.size(), 1);
    assert_eq!(c.backlink_count()?, 1);

    p.remove()?;
    assert_eq!(child.size(), 0);
    assert!(!c.is_valid());
    Ok(())
}

#[test]
fn replacing_an_embedded_child_cascades_the_old_one() -> Result<()> {
    let store = Store::default();
    let parent = store.add_table("parent")?;
    let child = store.add_embedded_table("child")?;
    let l = parent.add_link_column("l", &child)?;

    let p = parent.create_object()?;
    let first = p.create_and_set_linked_object(l)?;
    let second = p.create_and_set_linked_object(l)?;
    assert!(!first.is_valid());
    assert!(second.is_valid());
    assert_eq!(child.size(), 1);

    // An owned embedded row rejects a second incoming link.
    let p2 = parent.create_object()?;
    assert!(matches!(
        p2.set(l, second.key()),
        Err(StoreError::WrongTableKind)
    ));
    Ok(())
}

#[test]
fn create_and_set_refuses_occupied_plain_links() -> Result<()> {
    let t = linked_tables()?;
    let a = t.a.create_object()?;
    let first = a.create_and_set_linked_object(t.l)?;
    assert_eq!(a.get::<ObjKey>(t.l)?, first.key());
    assert!(matches!(
        a.create_and_set_linked_object(t.l),
        Err(StoreError::WrongTableKind)
    ));
    Ok(())
}

#[test]
fn replication_orders_cascade_after_the_trigger() -> Result<()> {
    let (store, log) = store_with_log();
    let parent = store.add_table("parent")?;
    let child = store.add_embedded_table("child")?;
    let l = parent.add_link_column("l", &child)?;

    let p = parent.create_object()?;
    let c = p.create_and_set_linked_object(l)?;
    log.take();

    p.remove()?;
    let instrs = log.snapshot();
    let parent_pos = instrs
        .iter()
        .position(|i| matches!(i, Instruction::RemoveObject { key, .. } if *key == p.key()))
        .expect("parent removal");
    let child_pos = instrs
        .iter()
        .position(|i| matches!(i, Instruction::RemoveObject { key, .. } if *key == c.key()))
        .expect("child removal");
    assert!(parent_pos < child_pos);
    Ok(())
}

#[test]
fn link_lists_maintain_reverse_edges() -> Result<()> {
    let store = Store::default();
    let a = store.add_table("a")?;
    let b = store.add_table("b")?;
    let ll_col = a.add_linklist_column("many", &b)?;

    let origin = a.create_object()?;
    let t1 = b.create_object()?;
    let t2 = b.create_object()?;

    let list = origin.get_linklist(ll_col)?;
    list.add(t1.key())?;
    list.add(t2.key())?;
    list.add(t1.key())?;
    assert_eq!(origin.get_link_count(ll_col)?, 3);
    assert_eq!(t1.get_backlink_count(&a, ll_col)?, 2);
    assert_eq!(t2.get_backlink_count(&a, ll_col)?, 1);

    list.remove(0)?;
    assert_eq!(t1.get_backlink_count(&a, ll_col)?, 1);
    assert_eq!(list.get(0)?, t2.key());

    list.set(0, t1.key())?;
    assert_eq!(t2.get_backlink_count(&a, ll_col)?, 0);
    assert_eq!(t1.get_backlink_count(&a, ll_col)?, 2);

    list.clear()?;
    assert_eq!(t1.get_backlink_count(&a, ll_col)?, 0);
    assert_eq!(origin.get_link_count(ll_col)?, 0);
    Ok(())
}

#[test]
fn removing_a_list_target_erases_its_entry() -> Result<()> {
    let (store, log) = store_with_log();
    let a = store.add_table("a")?;
    let b = store.add_table("b")?;
    let ll_col = a.add_linklist_column("many", &b)?;

    let origin = a.create_object()?;
    let t1 = b.create_object()?;
    let t2 = b.create_object()?;
    let list = origin.get_linklist(ll_col)?;
    list.add(t1.key())?;
    list.add(t2.key())?;
    log.take();

    t1.remove()?;
    assert_eq!(origin.get_link_count(ll_col)?, 1);
    assert_eq!(origin.get_linklist(ll_col)?.get(0)?, t2.key());
    assert!(log
        .snapshot()
        .iter()
        .any(|i| matches!(i, Instruction::LinkListNullify { ndx: 0, .. })));
    Ok(())
}

#[test]
fn typed_links_track_backlinks_dynamically() -> Result<()> {
    let store = Store::default();
    let a = store.add_table("a")?;
    let b = store.add_table("b")?;
    let any_ref = a.add_column("any_ref", ColumnType::TypedLink, true)?;
    let payload = a.add_column("payload", ColumnType::Mixed, true)?;

    let origin = a.create_object()?;
    let target = b.create_object()?;
    let link = ObjLink::new(b.key(), target.key());

    origin.set(any_ref, link)?;
    assert_eq!(target.get_backlink_count(&a, any_ref)?, 1);
    assert_eq!(origin.get::<ObjLink>(any_ref)?, link);

    origin.set(payload, Mixed::TypedLink(link))?;
    assert_eq!(target.get_backlink_count(&a, payload)?, 1);

    // Overwriting the mixed cell with a scalar drops the edge.
    origin.set(payload, 7i64)?;
    assert_eq!(target.get_backlink_count(&a, payload)?, 0);

    origin.set_null(any_ref)?;
    assert_eq!(target.get_backlink_count(&a, any_ref)?, 0);
    Ok(())
}

#[test]
fn invalidate_leaves_a_tombstone_behind() -> Result<()> {
    let t = linked_tables()?;
    let origin = t.a.create_object()?;
    let target = t.b.create_object()?;
    origin.set(t.l, target.key())?;

    let ts_key = target.invalidate()?;
    assert!(ts_key.is_unresolved());
    assert_eq!(t.b.size(), 0);
    assert_eq!(t.b.tombstone_count(), 1);

    // The dangling link reads as null but is observably unresolved.
    assert_eq!(origin.get::<ObjKey>(t.l)?, ObjKey::NULL);
    assert!(!origin.is_null(t.l)?);
    assert!(origin.is_unresolved(t.l)?);
    assert_eq!(origin.get_unfiltered_link(t.l)?, ts_key);

    // Dropping the last reference erases the tombstone.
    origin.set_null(t.l)?;
    assert_eq!(t.b.tombstone_count(), 0);
    Ok(())
}

#[test]
fn invalidate_without_references_just_deletes() -> Result<()> {
    let t = linked_tables()?;
    let target = t.b.create_object()?;
    let ts_key = target.invalidate()?;
    assert_eq!(ts_key, ObjKey::NULL);
    assert_eq!(t.b.size(), 0);
    assert_eq!(t.b.tombstone_count(), 0);
    Ok(())
}

#[test]
fn paths_walk_up_to_the_top_owner() -> Result<()> {
    let store = Store::default();
    let person = store.add_table("person")?;
    let address = store.add_embedded_table("address")?;
    let note = store.add_embedded_table("note")?;
    let addr_col = person.add_link_column("addr", &address)?;
    let notes_col = address.add_linklist_column("notes", &note)?;

    let p = person.create_object()?;
    let addr = p.create_and_set_linked_object(addr_col)?;
    let list = addr.get_linklist(notes_col)?;
    let _first = list.create_and_insert_linked_object(0)?;
    let second = list.create_and_insert_linked_object(1)?;

    let path = second.get_path()?;
    assert_eq!(path.top_table, person.key());
    assert_eq!(path.top_objkey, p.key());
    assert_eq!(path.path_from_top.len(), 2);
    assert_eq!(path.path_from_top[0].col, addr_col);
    assert_eq!(path.path_from_top[0].index, 0);
    assert_eq!(path.path_from_top[1].col, notes_col);
    assert_eq!(path.path_from_top[1].index, 1);

    let fat = second.get_fat_path()?;
    assert_eq!(fat.len(), 2);
    assert_eq!(fat[0].obj.key(), p.key());
    assert_eq!(fat[1].obj.key(), addr.key());

    // A top-level object is its own path top.
    let top = p.get_path()?;
    assert_eq!(top.top_objkey, p.key());
    assert!(top.path_from_top.is_empty());
    Ok(())
}

#[test]
fn assign_copies_fields_and_steals_backlinks() -> Result<()> {
    let store = Store::default();
    let person = store.add_table("person")?;
    let friend = store.add_table("friend")?;
    let name = person.add_column("name", ColumnType::String, true)?;
    let l = friend.add_link_column("best", &person)?;

    let old = person.create_object()?;
    old.set(name, "kim")?;
    let fan = friend.create_object()?;
    fan.set(l, old.key())?;

    let fresh = person.create_object()?;
    fresh.assign(&old)?;
    assert_eq!(fresh.get::<String>(name)?, "kim");
    assert_eq!(fan.get::<ObjKey>(l)?, fresh.key());
    assert_eq!(old.backlink_count()?, 0);
    Ok(())
}

#[test]
fn assign_pk_and_backlinks_supports_resurrection() -> Result<()> {
    let store = Store::default();
    let person = store.add_table("person")?;
    let friend = store.add_table("friend")?;
    let pk = person.add_column("pk", ColumnType::Int, false)?;
    person.set_primary_key_column(pk)?;
    let l = friend.add_link_column("best", &person)?;

    let old = person.create_object()?;
    old.set(pk, 7i64)?;
    let fan = friend.create_object()?;
    fan.set(l, old.key())?;

    let fresh = person.create_object()?;
    fresh.assign_pk_and_backlinks(&old)?;
    assert_eq!(fresh.get::<i64>(pk)?, 7);
    assert_eq!(fan.get::<ObjKey>(l)?, fresh.key());
    Ok(())
}

#[test]
fn cascade_is_confluent_across_removal_orders() -> Result<()> {
    for order in [[0usize, 1, 2], [2, 1, 0], [1, 0, 2]] {
        let store = Store::default();
        let parent = store.add_table("parent")?;
        let child = store.add_embedded_table("child")?;
        let l = parent.add_link_column("l", &child)?;

        let mut parents = Vec::new();
        for _ in 0..3 {
            let p = parent.create_object()?;
            p.create_and_set_linked_object(l)?;
            parents.push(p);
        }
        assert_eq!(child.size(), 3);
        for ndx in order {
            parents[ndx].remove()?;
        }
        assert_eq!(parent.size(), 0);
        assert_eq!(child.size(), 0);
    }
    Ok(())
}

#[test]
fn self_referential_links_work() -> Result<()> {
    let store = Store::default();
    let node = store.add_table("node")?;
    let next = node.add_link_column("next", &node)?;

    let a = node.create_object()?;
    let b = node.create_object()?;
    a.set(next, b.key())?;
    b.set(next, a.key())?;
    assert_eq!(a.get_backlink_count(&node, next)?, 1);
    assert_eq!(b.get_backlink_count(&node, next)?, 1);

    a.remove()?;
    assert_eq!(b.get::<ObjKey>(next)?, ObjKey::NULL);
    assert_eq!(b.get_backlink_count(&node, next)?, 0);
    Ok(())
}
