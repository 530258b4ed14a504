//! Shared fixture metadata and setup helpers for integration tests.
#![allow(dead_code)]

use rusqlite::Connection;
use taproot_core::db::{create_tables, open_db_in_memory};
use taproot_core::model::{
    AttrDescriptor, AttrKind, Entity, EntityDef, MappingKind, MetaRegistry, ScalarType,
};
use taproot_core::uow::{TrackedState, Transaction, TransactionRegistry};

pub static EMPLOYEE: EntityDef = EntityDef {
    class_name: "employee",
    table: "employees",
    parent: None,
    strategy: MappingKind::ClassTable,
    needs_version: false,
    immutable: false,
    attributes: &[
        AttrDescriptor {
            name: "name",
            kind: AttrKind::Plain(ScalarType::Text),
        },
        AttrDescriptor {
            name: "departments",
            kind: AttrKind::MultiRef {
                target: "department",
            },
        },
        AttrDescriptor {
            name: "buildings",
            kind: AttrKind::MultiRef { target: "building" },
        },
        AttrDescriptor {
            name: "badges",
            kind: AttrKind::ImmutableMultiRef { target: "badge" },
        },
        AttrDescriptor {
            name: "office",
            kind: AttrKind::ImmutableRef { target: "office" },
        },
    ],
};

pub static DEPARTMENT: EntityDef = EntityDef {
    class_name: "department",
    table: "departments",
    parent: None,
    strategy: MappingKind::ClassTable,
    needs_version: false,
    immutable: false,
    attributes: &[AttrDescriptor {
        name: "name",
        kind: AttrKind::Plain(ScalarType::Text),
    }],
};

pub static BUILDING: EntityDef = EntityDef {
    class_name: "building",
    table: "buildings",
    parent: None,
    strategy: MappingKind::ClassTable,
    needs_version: false,
    immutable: false,
    attributes: &[AttrDescriptor {
        name: "name",
        kind: AttrKind::Plain(ScalarType::Text),
    }],
};

pub static BADGE: EntityDef = EntityDef {
    class_name: "badge",
    table: "badges",
    parent: None,
    strategy: MappingKind::ClassTable,
    needs_version: false,
    immutable: false,
    attributes: &[AttrDescriptor {
        name: "label",
        kind: AttrKind::Plain(ScalarType::Text),
    }],
};

pub static OFFICE: EntityDef = EntityDef {
    class_name: "office",
    table: "offices",
    parent: None,
    strategy: MappingKind::ClassTable,
    needs_version: false,
    immutable: true,
    attributes: &[AttrDescriptor {
        name: "name",
        kind: AttrKind::Plain(ScalarType::Text),
    }],
};

pub static PROJECT: EntityDef = EntityDef {
    class_name: "project",
    table: "projects",
    parent: None,
    strategy: MappingKind::ClassTable,
    needs_version: false,
    immutable: false,
    attributes: &[
        AttrDescriptor {
            name: "title",
            kind: AttrKind::Plain(ScalarType::Text),
        },
        AttrDescriptor {
            name: "tasks",
            kind: AttrKind::ChildRef { target: "task" },
        },
    ],
};

pub static TASK: EntityDef = EntityDef {
    class_name: "task",
    table: "tasks",
    parent: None,
    strategy: MappingKind::ClassTable,
    needs_version: false,
    immutable: false,
    attributes: &[
        AttrDescriptor {
            name: "label",
            kind: AttrKind::Plain(ScalarType::Text),
        },
        AttrDescriptor {
            name: "project",
            kind: AttrKind::ParentRef { target: "project" },
        },
        AttrDescriptor {
            name: "notes",
            kind: AttrKind::ChildRef { target: "task_note" },
        },
    ],
};

pub static TASK_NOTE: EntityDef = EntityDef {
    class_name: "task_note",
    table: "task_notes",
    parent: None,
    strategy: MappingKind::ClassTable,
    needs_version: false,
    immutable: false,
    attributes: &[
        AttrDescriptor {
            name: "body",
            kind: AttrKind::Plain(ScalarType::Text),
        },
        AttrDescriptor {
            name: "task",
            kind: AttrKind::ParentRef { target: "task" },
        },
    ],
};

pub static VEHICLE: EntityDef = EntityDef {
    class_name: "vehicle",
    table: "vehicles",
    parent: None,
    strategy: MappingKind::ClassTable,
    needs_version: false,
    immutable: false,
    attributes: &[AttrDescriptor {
        name: "name",
        kind: AttrKind::Plain(ScalarType::Text),
    }],
};

pub static CAR: EntityDef = EntityDef {
    class_name: "car",
    table: "cars",
    parent: Some(&VEHICLE),
    strategy: MappingKind::ClassTable,
    needs_version: false,
    immutable: false,
    attributes: &[AttrDescriptor {
        name: "doors",
        kind: AttrKind::Plain(ScalarType::Integer),
    }],
};

pub static PAYMENT: EntityDef = EntityDef {
    class_name: "payment",
    table: "payments",
    parent: None,
    strategy: MappingKind::LeafTable,
    needs_version: true,
    immutable: false,
    attributes: &[AttrDescriptor {
        name: "amount",
        kind: AttrKind::Plain(ScalarType::Integer),
    }],
};

pub static CARD_PAYMENT: EntityDef = EntityDef {
    class_name: "card_payment",
    table: "card_payments",
    parent: Some(&PAYMENT),
    strategy: MappingKind::LeafTable,
    needs_version: true,
    immutable: false,
    attributes: &[AttrDescriptor {
        name: "scheme",
        kind: AttrKind::Plain(ScalarType::Text),
    }],
};

pub static RECEIPT: EntityDef = EntityDef {
    class_name: "receipt",
    table: "receipts",
    parent: None,
    strategy: MappingKind::LeafTable,
    needs_version: false,
    immutable: false,
    attributes: &[AttrDescriptor {
        name: "memo",
        kind: AttrKind::Plain(ScalarType::Text),
    }],
};

pub fn meta_registry() -> MetaRegistry {
    MetaRegistry::new()
        .with(&EMPLOYEE)
        .with(&DEPARTMENT)
        .with(&BUILDING)
        .with(&BADGE)
        .with(&OFFICE)
        .with(&PROJECT)
        .with(&TASK)
        .with(&TASK_NOTE)
        .with(&CAR)
        .with(&PAYMENT)
        .with(&CARD_PAYMENT)
        .with(&RECEIPT)
}

/// In-memory database with every fixture table created.
pub fn setup() -> (Connection, MetaRegistry) {
    let conn = open_db_in_memory().unwrap();
    let meta = meta_registry();
    create_tables(
        &conn,
        &meta,
        &[
            &EMPLOYEE,
            &DEPARTMENT,
            &BUILDING,
            &BADGE,
            &OFFICE,
            &PROJECT,
            &TASK,
            &TASK_NOTE,
            &CAR,
            &PAYMENT,
            &CARD_PAYMENT,
            &RECEIPT,
        ],
    )
    .unwrap();
    (conn, meta)
}

/// Registry with one open transaction tracking the given entities as new.
pub fn registry_tracking(entities: &[&Entity]) -> TransactionRegistry {
    let registry = TransactionRegistry::new();
    let mut transaction = Transaction::new();
    for &entity in entities {
        transaction.track(entity, TrackedState::New).unwrap();
    }
    registry.register(transaction);
    registry
}

/// Counts rows matching a where clause, for direct table assertions.
pub fn count_rows(conn: &Connection, table: &str, where_clause: &str) -> i64 {
    conn.query_row(
        &format!("SELECT COUNT(*) FROM {table} WHERE {where_clause};"),
        [],
        |row| row.get(0),
    )
    .unwrap()
}
