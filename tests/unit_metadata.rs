mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use common::{AuditEntry, OrderLine, Product};
use rquery_toolkit::{
    DataError, Entity, EntityMetadata, FieldDescriptor, FromRow, MetadataRegistry, Params, Row,
    SqlParam, SqlType,
};

static BUILDS: AtomicUsize = AtomicUsize::new(0);

struct Counted;

impl FromRow for Counted {
    fn from_row(_row: &Row) -> anyhow::Result<Self> {
        Ok(Counted)
    }
}

impl Entity for Counted {
    fn describe() -> EntityMetadata {
        BUILDS.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(20));
        EntityMetadata::builder("Counted")
            .field(FieldDescriptor::new("Id", SqlType::Int).key())
            .build()
    }

    fn to_params(&self) -> Params {
        Params::new()
    }
}

#[test]
fn concurrent_first_access_builds_one_descriptor() {
    let registry = Arc::new(MetadataRegistry::new());
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                registry.metadata::<Counted>()
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|m| Arc::ptr_eq(m, &results[0])));
    assert_eq!(registry.len(), 1);
}

#[test]
fn descriptor_is_memoized_per_type() {
    let registry = MetadataRegistry::new();
    assert!(registry.is_empty());

    let a = registry.metadata::<Product>();
    let b = registry.metadata::<Product>();
    let c = registry.metadata::<OrderLine>();

    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(registry.len(), 2);
}

#[test]
fn exposes_keys_identities_and_required_fields() {
    let registry = MetadataRegistry::new();
    let meta = registry.metadata::<Product>();

    assert_eq!(meta.table_name(), "Product");
    let keys: Vec<_> = meta.key_fields().map(|f| f.name.as_str()).collect();
    assert_eq!(keys, ["Id"]);
    let identities: Vec<_> = meta.identity_fields().map(|f| f.name.as_str()).collect();
    assert_eq!(identities, ["Id"]);
    let required: Vec<_> = meta.required_fields().map(|f| f.name.as_str()).collect();
    assert_eq!(required, ["Name"]);

    assert!(registry.is_key::<Product>("Id"));
    assert!(registry.is_identity::<Product>("Id"));
    assert!(registry.is_required::<Product>("Name"));
    assert!(!registry.is_key::<Product>("Price"));
    assert!(!registry.is_identity::<Product>("Unknown"));
}

#[test]
fn composite_keys_keep_declaration_order() {
    let registry = MetadataRegistry::new();
    let meta = registry.metadata::<OrderLine>();

    let keys: Vec<_> = meta.key_fields().map(|f| f.name.as_str()).collect();
    assert_eq!(keys, ["OrderId", "LineNo"]);
    assert!(meta.identity_fields().next().is_none());
}

#[test]
fn column_names_and_schema_qualification() {
    let meta = EntityMetadata::builder("Customers")
        .schema("sales")
        .field(FieldDescriptor::new("Id", SqlType::Int).column("CustomerId").key())
        .field(FieldDescriptor::new("Name", SqlType::Text))
        .not_mapped("DisplayName")
        .build();

    assert_eq!(meta.table_name(), "sales.Customers");
    assert_eq!(meta.column_name("Id"), Some("CustomerId"));
    assert_eq!(meta.column_name("Name"), Some("Name"));
    assert_eq!(meta.column_name("DisplayName"), None);
    assert!(meta.is_not_mapped("DisplayName"));
    let mappings: Vec<_> = meta.column_mappings().collect();
    assert_eq!(mappings, [("Id", "CustomerId"), ("Name", "Name")]);

    let registry = MetadataRegistry::new();
    assert_eq!(registry.table_name::<AuditEntry>(), "ops.AuditLog");
    assert_eq!(registry.column_name::<AuditEntry>("Message"), "Message");
    assert_eq!(registry.column_name::<AuditEntry>("Missing"), "Missing");
}

#[test]
fn duplicate_field_declarations_keep_the_first() {
    let meta = EntityMetadata::builder("T")
        .field(FieldDescriptor::new("A", SqlType::Int).key())
        .field(FieldDescriptor::new("A", SqlType::Text))
        .build();

    assert_eq!(meta.fields().len(), 1);
    assert_eq!(meta.field("A").map(|f| f.sql_type), Some(SqlType::Int));
}

#[test]
fn resolve_reports_unknown_and_not_mapped_fields() {
    let meta = EntityMetadata::builder("T")
        .field(FieldDescriptor::new("A", SqlType::Int))
        .not_mapped("B")
        .build();

    assert!(meta.resolve("A").is_ok());
    match meta.resolve("B") {
        Err(DataError::Mapping(msg)) => assert!(msg.contains("not mapped")),
        other => panic!("unexpected {:?}", other),
    }
    match meta.resolve("C") {
        Err(DataError::Mapping(msg)) => assert!(msg.contains("does not exist")),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn selector_expressions() {
    assert_eq!(
        MetadataRegistry::properties_from_expression("Price").unwrap(),
        ["Price"]
    );
    assert_eq!(
        MetadataRegistry::properties_from_expression("(Name, Price)").unwrap(),
        ["Name", "Price"]
    );
    assert_eq!(
        MetadataRegistry::properties_from_expression("{ Name, Price }").unwrap(),
        ["Name", "Price"]
    );

    for bad in ["", "x => x.Name", "Name + 1", "(Name, )", "a.b"] {
        let err = MetadataRegistry::properties_from_expression(bad).unwrap_err();
        assert!(matches!(err, DataError::Argument(_)), "{:?}", bad);
        assert!(err.is_client_fault());
    }
}

#[test]
fn required_fields_reject_null_and_empty_text() {
    let meta = MetadataRegistry::new().metadata::<Product>();

    let ok = Params::new().add("Name", "Pen");
    assert!(meta.validate_required(&ok).is_empty());

    let empty = Params::new().add("Name", "");
    assert_eq!(meta.validate_required(&empty), ["Name cannot be empty"]);

    let null = Params::new().add("Name", SqlParam::Null);
    assert_eq!(meta.validate_required(&null), ["Name is required"]);

    assert_eq!(meta.validate_required(&Params::new()), ["Name is required"]);
}
