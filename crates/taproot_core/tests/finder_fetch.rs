mod common;

use common::{
    meta_registry, registry_tracking, setup, DEPARTMENT, EMPLOYEE, OFFICE, PROJECT, TASK,
    TASK_NOTE,
};
use taproot_core::db::{create_tables, open_db};
use taproot_core::mapper::Mapper;
use taproot_core::model::{Entity, Reference};
use taproot_core::repo::{Finder, FinderError};
use taproot_core::serializer::{to_flat_map, SerializeOpts};

fn insert_department(
    conn: &rusqlite::Connection,
    meta: &taproot_core::MetaRegistry,
    name: &str,
) -> Entity {
    let mut department = Entity::new(&DEPARTMENT);
    department.set("name", name).unwrap();
    let registry = registry_tracking(&[&department]);
    Mapper::new(conn, meta, &registry)
        .insert(&mut department)
        .unwrap();
    department
}

#[test]
fn missing_id_is_an_empty_result_and_require_escalates() {
    let (conn, meta) = setup();
    let finder = Finder::new(&conn, &meta);

    assert!(finder.fetch_by_id(&DEPARTMENT, 9999).unwrap().is_none());

    let err = finder.require_by_id(&DEPARTMENT, 9999).unwrap_err();
    assert!(matches!(
        err,
        FinderError::NotFound {
            class: "department",
            id: 9999
        }
    ));

    // Reference lookups never touch the store up front.
    let reference = finder.fetch_reference_by_id(&DEPARTMENT, 9999);
    assert_eq!(reference.id(), Some(9999));
    assert!(!reference.is_resolved());
}

#[test]
fn multi_references_stay_lazy_until_resolved() {
    let (conn, meta) = setup();

    let dept_a = insert_department(&conn, &meta, "Evil");
    let dept_b = insert_department(&conn, &meta, "Hell");

    let mut employee = Entity::new(&EMPLOYEE);
    employee.set("name", "Beppe").unwrap();
    employee
        .add_reference("departments", Reference::for_entity(&dept_a))
        .unwrap();
    employee
        .add_reference("departments", Reference::for_entity(&dept_b))
        .unwrap();
    let registry = registry_tracking(&[&employee]);
    Mapper::new(&conn, &meta, &registry)
        .insert(&mut employee)
        .unwrap();

    let finder = Finder::new(&conn, &meta);
    let mut loaded = finder
        .require_by_id(&EMPLOYEE, employee.id().unwrap())
        .unwrap();

    {
        let departments = loaded.references("departments");
        assert_eq!(departments.len(), 2);
        assert!(departments.iter().all(|r| !r.is_resolved()));
        assert_eq!(departments[0].id(), dept_a.id());
        assert_eq!(departments[1].id(), dept_b.id());
    }

    let departments = loaded.references_mut("departments").unwrap();
    let resolved = departments[0].resolve(&finder).unwrap().unwrap();
    assert_eq!(resolved.scalar("name").unwrap().as_text(), Some("Evil"));
    // Resolution is idempotent and cached.
    assert!(departments[0].is_resolved());
    let again = departments[0].resolve(&finder).unwrap().unwrap();
    assert_eq!(again.scalar("name").unwrap().as_text(), Some("Evil"));
}

#[test]
fn immutable_references_rehydrate_as_lazy_foreign_keys() {
    let (conn, meta) = setup();

    let mut office = Entity::new(&OFFICE);
    office.set("name", "HQ").unwrap();
    let registry = registry_tracking(&[&office]);
    Mapper::new(&conn, &meta, &registry)
        .insert(&mut office)
        .unwrap();

    let mut employee = Entity::new(&EMPLOYEE);
    employee.set("name", "Mayer").unwrap();
    employee
        .set_reference("office", Some(Reference::for_entity(&office)))
        .unwrap();
    let registry = registry_tracking(&[&employee]);
    Mapper::new(&conn, &meta, &registry)
        .insert(&mut employee)
        .unwrap();

    let finder = Finder::new(&conn, &meta);
    let mut loaded = finder
        .require_by_id(&EMPLOYEE, employee.id().unwrap())
        .unwrap();
    {
        let reference = loaded.reference("office").expect("office fk rehydrated");
        assert_eq!(reference.id(), office.id());
        assert!(!reference.is_resolved());
    }
    let reference = loaded.reference_mut("office").unwrap();
    let resolved = reference.resolve(&finder).unwrap().unwrap();
    assert_eq!(resolved.scalar("name").unwrap().as_text(), Some("HQ"));
}

#[test]
fn children_and_grandchildren_are_attached_with_back_pointers() {
    let (conn, meta) = setup();

    let mut project = Entity::new(&PROJECT);
    project.set("title", "dam").unwrap();
    let mut task = Entity::new(&TASK);
    task.set("label", "dig").unwrap();
    let mut note = Entity::new(&TASK_NOTE);
    note.set("body", "wear boots").unwrap();
    task.add_child("notes", note).unwrap();
    project.add_child("tasks", task).unwrap();

    let registry = registry_tracking(&[&project]);
    Mapper::new(&conn, &meta, &registry)
        .insert(&mut project)
        .unwrap();

    let finder = Finder::new(&conn, &meta);
    let loaded = finder
        .require_by_id(&PROJECT, project.id().unwrap())
        .unwrap();

    let tasks = loaded.children("tasks");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].scalar("label").unwrap().as_text(), Some("dig"));
    assert_eq!(
        tasks[0].reference("project").and_then(Reference::id),
        loaded.id()
    );

    let notes = tasks[0].children("notes");
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].scalar("body").unwrap().as_text(), Some("wear boots"));
    assert_eq!(notes[0].reference("task").and_then(Reference::id), tasks[0].id());
}

#[test]
fn fetch_all_returns_only_live_aggregates() {
    let (conn, meta) = setup();

    let keep = insert_department(&conn, &meta, "Keep");
    let mut drop = insert_department(&conn, &meta, "Drop");

    let registry = registry_tracking(&[&drop]);
    Mapper::new(&conn, &meta, &registry)
        .delete(&mut drop)
        .unwrap();

    let finder = Finder::new(&conn, &meta);
    let all = finder.fetch_all(&DEPARTMENT).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id(), keep.id());
}

#[test]
fn flat_attributes_round_trip_through_insert_and_fetch() {
    let (conn, meta) = setup();

    let mut department = Entity::new(&DEPARTMENT);
    department.set("name", "Accounting").unwrap();
    let registry = registry_tracking(&[&department]);
    Mapper::new(&conn, &meta, &registry)
        .insert(&mut department)
        .unwrap();

    let finder = Finder::new(&conn, &meta);
    let loaded = finder
        .require_by_id(&DEPARTMENT, department.id().unwrap())
        .unwrap();

    let opts = SerializeOpts {
        without: Some("_version"),
    };
    let before = to_flat_map(&department, &opts);
    let after = to_flat_map(&loaded, &opts);
    assert_eq!(before, after);
}

#[test]
fn file_backed_databases_survive_reopening() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aggregates.db");
    let meta = meta_registry();

    let id = {
        let conn = open_db(&path).unwrap();
        create_tables(&conn, &meta, &[&DEPARTMENT]).unwrap();
        let department = {
            let mut department = Entity::new(&DEPARTMENT);
            department.set("name", "Durable").unwrap();
            let registry = registry_tracking(&[&department]);
            Mapper::new(&conn, &meta, &registry)
                .insert(&mut department)
                .unwrap();
            department
        };
        department.id().unwrap()
    };

    let conn = open_db(&path).unwrap();
    let finder = Finder::new(&conn, &meta);
    let loaded = finder.require_by_id(&DEPARTMENT, id).unwrap();
    assert_eq!(loaded.scalar("name").unwrap().as_text(), Some("Durable"));
    assert_eq!(loaded.version().unwrap().number(), 1);
}
