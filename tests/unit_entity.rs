use chrono::{NaiveDate, NaiveDateTime};
use rquery_toolkit::infrastructure::sql_builder;
use rquery_toolkit::{Entity, FromRow, MetadataRegistry, Row, SqlParam, SqlType};
use rust_decimal::Decimal;

#[derive(Entity, Debug, Clone, PartialEq)]
#[table(name = "Employees", schema = "hr")]
struct Employee {
    #[key(is_identity = true)]
    #[column(name = "EmployeeId")]
    employee_id: i32,
    #[column(name = "FirstName", required)]
    first_name: String,
    #[column(name = "LastName")]
    last_name: String,
    age: i32,
    #[column(name = "HireDate")]
    hire_date: NaiveDateTime,
    #[column(name = "Salary")]
    salary: Option<Decimal>,
    #[column(name = "RowVersion", computed)]
    row_version: Option<Vec<u8>>,
    #[not_mapped]
    display_name: String,
}

fn hired() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2020, 1, 1)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap()
}

fn ana() -> Employee {
    Employee {
        employee_id: 0,
        first_name: "Ana".to_string(),
        last_name: "Ruiz".to_string(),
        age: 30,
        hire_date: hired(),
        salary: None,
        row_version: None,
        display_name: "Ana R.".to_string(),
    }
}

#[test]
fn derived_descriptor() {
    let meta = Employee::describe();

    assert_eq!(meta.table_name(), "hr.Employees");
    assert_eq!(meta.fields().len(), 7);
    assert!(meta.is_not_mapped("display_name"));

    let id = meta.field("employee_id").unwrap();
    assert!(id.key && id.identity);
    assert_eq!(id.column, "EmployeeId");
    assert_eq!(id.sql_type, SqlType::Int);

    let salary = meta.field("salary").unwrap();
    assert!(salary.nullable);
    assert_eq!(salary.sql_type, SqlType::Decimal);

    assert!(meta.field("row_version").unwrap().computed);
    assert_eq!(meta.column_name("age"), Some("age"));

    let required: Vec<_> = meta.required_fields().map(|f| f.name.as_str()).collect();
    assert_eq!(required, ["first_name"]);
}

#[test]
fn derived_constants_name_columns() {
    assert_eq!(Employee::TABLE, "Employees");
    assert_eq!(Employee::first_name, "FirstName");
    assert_eq!(Employee::age, "age");
}

#[test]
fn derived_params_skip_not_mapped_fields() {
    let params = ana().to_params();

    let names: Vec<_> = params.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(
        names,
        [
            "employee_id",
            "first_name",
            "last_name",
            "age",
            "hire_date",
            "salary",
            "row_version"
        ]
    );
    assert_eq!(
        params.value("first_name"),
        Some(&SqlParam::Text("Ana".into()))
    );
    assert!(params.value("salary").unwrap().is_null());
    assert!(params.value("display_name").is_none());
}

#[test]
fn derived_insert_excludes_generated_columns() {
    let registry = MetadataRegistry::new();
    let meta = registry.metadata::<Employee>();

    assert_eq!(
        sql_builder::insert(&meta).unwrap(),
        "INSERT INTO hr.Employees (FirstName, LastName, age, HireDate, Salary) \
         VALUES (@first_name, @last_name, @age, @hire_date, @salary)"
    );
}

#[test]
fn derived_from_row_reads_column_names() {
    let row = Row::from_pairs([
        ("EmployeeId", SqlParam::I32(5)),
        ("FirstName", SqlParam::Text("Ana".into())),
        ("LastName", SqlParam::Text("Ruiz".into())),
        ("age", SqlParam::I32(30)),
        ("HireDate", SqlParam::DateTime(hired())),
        ("Salary", SqlParam::Null),
    ]);

    let employee = Employee::from_row(&row).unwrap();

    assert_eq!(
        employee,
        Employee {
            employee_id: 5,
            display_name: String::new(),
            ..ana()
        }
    );
}

#[test]
fn derived_from_row_rejects_wrong_types() {
    let row = Row::from_pairs([("age", SqlParam::Text("thirty".into()))]);
    let err = Employee::from_row(&row).unwrap_err();
    assert!(format!("{:#}", err).contains("age"));
}
