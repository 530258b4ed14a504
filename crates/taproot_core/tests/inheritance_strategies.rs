mod common;

use common::{count_rows, registry_tracking, setup, CAR, CARD_PAYMENT, RECEIPT, VEHICLE};
use taproot_core::mapper::Mapper;
use taproot_core::model::{AttrValue, Entity};
use taproot_core::repo::Finder;

fn insert_car(conn: &rusqlite::Connection, meta: &taproot_core::MetaRegistry) -> Entity {
    let mut car = Entity::new(&CAR);
    car.set("name", "wagon").unwrap();
    car.set("doors", 5_i64).unwrap();
    let registry = registry_tracking(&[&car]);
    Mapper::new(conn, meta, &registry).insert(&mut car).unwrap();
    car
}

#[test]
fn class_table_insert_splits_the_row_across_the_chain() {
    let (conn, meta) = setup();
    let car = insert_car(&conn, &meta);
    let id = car.id().unwrap();

    // Root table row carries the shared columns and the subtype tag.
    assert_eq!(
        count_rows(
            &conn,
            "vehicles",
            &format!("id = {id} AND name = 'wagon' AND _type = 'cars'")
        ),
        1
    );
    // The subclass table holds only its own columns, keyed by the same id.
    assert_eq!(
        count_rows(&conn, "cars", &format!("id = {id} AND doors = 5")),
        1
    );
}

#[test]
fn fetch_resolves_the_concrete_type_from_the_stored_tag() {
    let (conn, meta) = setup();
    let car = insert_car(&conn, &meta);

    let finder = Finder::new(&conn, &meta);
    let loaded = finder
        .fetch_by_id(&VEHICLE, car.id().unwrap())
        .unwrap()
        .expect("active vehicle row");

    assert_eq!(loaded.class_name(), "car");
    assert_eq!(loaded.scalar("doors"), Some(&AttrValue::Int(5)));
    assert_eq!(loaded.scalar("name").unwrap().as_text(), Some("wagon"));
}

#[test]
fn fetch_falls_back_to_the_requested_type_without_a_tag() {
    let (conn, meta) = setup();
    conn.execute(
        "INSERT INTO vehicles (active, name) VALUES (1, 'mystery');",
        [],
    )
    .unwrap();
    let id = conn.last_insert_rowid();

    let finder = Finder::new(&conn, &meta);
    let loaded = finder
        .fetch_by_id(&VEHICLE, id)
        .unwrap()
        .expect("untagged row is readable as the static type");
    assert_eq!(loaded.class_name(), "vehicle");
    assert!(loaded.version().is_none());
}

#[test]
fn class_table_update_rewrites_every_chain_table() {
    let (conn, meta) = setup();
    let car = insert_car(&conn, &meta);
    let id = car.id().unwrap();

    let finder = Finder::new(&conn, &meta);
    let original = finder.require_by_id(&VEHICLE, id).unwrap();
    let mut modified = original.clone();
    modified.set("name", "estate").unwrap();
    modified.set("doors", 3_i64).unwrap();

    let registry = registry_tracking(&[&original]);
    Mapper::new(&conn, &meta, &registry)
        .update(&mut modified, &original)
        .unwrap();

    assert_eq!(
        count_rows(&conn, "vehicles", &format!("id = {id} AND name = 'estate'")),
        1
    );
    assert_eq!(
        count_rows(&conn, "cars", &format!("id = {id} AND doors = 3")),
        1
    );
    assert_eq!(modified.version().unwrap().number(), 2);
}

#[test]
fn class_table_delete_flags_only_the_root_row() {
    let (conn, meta) = setup();
    let mut car = insert_car(&conn, &meta);
    let id = car.id().unwrap();

    let registry = registry_tracking(&[&car]);
    Mapper::new(&conn, &meta, &registry)
        .delete(&mut car)
        .unwrap();

    assert_eq!(
        count_rows(&conn, "vehicles", &format!("id = {id} AND active = 0")),
        1
    );
    assert_eq!(
        count_rows(&conn, "cars", &format!("id = {id} AND active = 1")),
        1
    );
    // Invisible through the root either way.
    let finder = Finder::new(&conn, &meta);
    assert!(finder.fetch_by_id(&VEHICLE, id).unwrap().is_none());
}

#[test]
fn leaf_table_keeps_the_whole_instance_in_one_row() {
    let (conn, meta) = setup();

    let mut payment = Entity::new(&CARD_PAYMENT);
    payment.set("amount", 1250_i64).unwrap();
    payment.set("scheme", "visa").unwrap();
    let registry = registry_tracking(&[&payment]);
    let mapper = Mapper::new(&conn, &meta, &registry);
    mapper.insert(&mut payment).unwrap();
    let id = payment.id().unwrap();

    assert_eq!(
        count_rows(
            &conn,
            "card_payments",
            &format!("id = {id} AND amount = 1250 AND scheme = 'visa' AND _version_id IS NOT NULL")
        ),
        1
    );

    let finder = Finder::new(&conn, &meta);
    let loaded = finder.require_by_id(&CARD_PAYMENT, id).unwrap();
    assert_eq!(loaded.scalar("amount"), Some(&AttrValue::Int(1250)));
    assert_eq!(loaded.version().unwrap().number(), 1);
}

#[test]
fn leaf_table_update_bumps_only_version_tracked_classes() {
    let (conn, meta) = setup();

    let mut payment = Entity::new(&CARD_PAYMENT);
    payment.set("amount", 100_i64).unwrap();
    payment.set("scheme", "visa").unwrap();
    let registry = registry_tracking(&[&payment]);
    let mapper = Mapper::new(&conn, &meta, &registry);
    mapper.insert(&mut payment).unwrap();

    let original = payment.clone();
    let mut modified = payment.clone();
    modified.set("amount", 150_i64).unwrap();
    mapper.update(&mut modified, &original).unwrap();
    assert_eq!(modified.version().unwrap().number(), 2);

    // A class without version tracking updates its row without a bump.
    let mut receipt = Entity::new(&RECEIPT);
    receipt.set("memo", "lunch").unwrap();
    let registry = registry_tracking(&[&receipt]);
    let mapper = Mapper::new(&conn, &meta, &registry);
    mapper.insert(&mut receipt).unwrap();
    let receipt_id = receipt.id().unwrap();

    let finder = Finder::new(&conn, &meta);
    let original = finder.require_by_id(&RECEIPT, receipt_id).unwrap();
    assert!(original.version().is_none());
    let mut modified = original.clone();
    modified.set("memo", "team lunch").unwrap();

    let registry = registry_tracking(&[&original]);
    Mapper::new(&conn, &meta, &registry)
        .update(&mut modified, &original)
        .unwrap();
    assert_eq!(
        count_rows(
            &conn,
            "receipts",
            &format!("id = {receipt_id} AND memo = 'team lunch'")
        ),
        1
    );
}

#[test]
fn leaf_table_delete_flags_its_own_row() {
    let (conn, meta) = setup();

    let mut receipt = Entity::new(&RECEIPT);
    receipt.set("memo", "parts").unwrap();
    let registry = registry_tracking(&[&receipt]);
    let mapper = Mapper::new(&conn, &meta, &registry);
    mapper.insert(&mut receipt).unwrap();
    let id = receipt.id().unwrap();

    mapper.delete(&mut receipt).unwrap();
    assert_eq!(
        count_rows(&conn, "receipts", &format!("id = {id} AND active = 0")),
        1
    );
}
