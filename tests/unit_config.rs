use std::time::Duration;

use rquery_toolkit::{
    ConnectionFactory, DataError, DatabaseProvider, DbKind, MultiDbConnectionFactory,
    ToolkitOptions,
};

const OPTIONS: &str = r#"{
    "default_alias": "Main",
    "connections": {
        "Main": {
            "provider": "SqlServer",
            "connection_string": "server=tcp:localhost,1433;user=sa;password=secret;TrustServerCertificate=true"
        },
        "Reports": {
            "provider": "postgres",
            "connection_string": "host=localhost user=app dbname=reports",
            "command_timeout_secs": 60
        }
    }
}"#;

#[test]
fn parses_json_options() {
    let options = ToolkitOptions::from_json_str(OPTIONS).unwrap();

    assert_eq!(options.connections.len(), 2);
    assert_eq!(options.default_alias(), Some("Main"));
    let (name, reports) = options.connection("reports").unwrap();
    assert_eq!(name, "Reports");
    assert_eq!(reports.provider, DatabaseProvider::Postgres);
    assert_eq!(reports.command_timeout_secs, Some(60));
}

#[test]
fn invalid_json_is_a_configuration_error() {
    let err = ToolkitOptions::from_json_str("{ \"connections\": 3 }").unwrap_err();
    assert!(matches!(err, DataError::Configuration(_)));
}

#[test]
fn single_connection_is_the_default() {
    let options = ToolkitOptions::new().add_connection(
        "Only",
        "host=localhost",
        DatabaseProvider::Postgres,
    );
    assert_eq!(options.default_alias(), Some("Only"));

    let two = options.add_connection("Other", "host=db", DatabaseProvider::Postgres);
    assert_eq!(two.default_alias(), None);
}

#[test]
fn factory_requires_a_connection() {
    assert!(matches!(
        MultiDbConnectionFactory::new(ToolkitOptions::new()),
        Err(DataError::Configuration(_))
    ));
}

#[test]
fn factory_creates_lazy_connections_per_provider() {
    let factory =
        MultiDbConnectionFactory::new(ToolkitOptions::from_json_str(OPTIONS).unwrap()).unwrap();

    let main = factory.create_connection("Main").unwrap();
    assert_eq!(main.kind(), DbKind::Mssql);
    assert!(!main.is_open());

    let reports = factory.create_connection("REPORTS").unwrap();
    assert_eq!(reports.kind(), DbKind::Postgres);

    assert_eq!(factory.default_alias(), Some("Main"));
    assert_eq!(factory.command_timeout("Main"), None);
    assert_eq!(
        factory.command_timeout("Reports"),
        Some(Duration::from_secs(60))
    );
}

#[test]
fn factory_rejects_unknown_aliases_and_bad_strings() {
    let options = ToolkitOptions::new()
        .add_connection("Broken", "host=localhost port=notaport", DatabaseProvider::Postgres)
        .with_command_timeout("Broken", 5);
    let factory = MultiDbConnectionFactory::new(options).unwrap();

    match factory.create_connection("Missing") {
        Err(DataError::Configuration(msg)) => assert!(msg.contains("Missing")),
        Err(other) => panic!("unexpected {:?}", other),
        Ok(_) => panic!("expected an error"),
    }
    assert!(matches!(
        factory.create_connection("Broken"),
        Err(DataError::Configuration(_))
    ));
    assert_eq!(
        factory.command_timeout("broken"),
        Some(Duration::from_secs(5))
    );
}
