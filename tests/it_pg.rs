use std::sync::Arc;

use rquery_toolkit::{
    connect_postgres, sql_interpolated, Connection, Entity, MetadataRegistry, QueryExecutor,
    UnitOfWork,
};

#[derive(Entity, Debug)]
#[table(name = "employees")]
struct Employee {
    #[key]
    pub employee_id: i32,
    pub first_name: String,
    pub country_id: String,
    pub hire_date: chrono::NaiveDateTime,
}

async fn unit_of_work() -> anyhow::Result<UnitOfWork> {
    let conn: Arc<dyn Connection> = connect_postgres(
        "localhost",
        5432,
        "tempdb",
        "postgres",
        "YourStrong!Passw0rd",
    )
    .await?;
    Ok(UnitOfWork::from_connection(
        conn,
        Arc::new(MetadataRegistry::new()),
    ))
}

#[tokio::test]
#[ignore]
async fn it_pg_select_chain() -> anyhow::Result<()> {
    let uow = unit_of_work().await?;

    let list: Vec<Employee> = uow
        .fluent()?
        .Select(&["e.*"])
        .From("employees e")
        .LeftJoin("countries c", "e.country_id = c.country_id")
        .Where("e.country_id = 'Mex'")
        .OrderBy(&["e.hire_date DESC"])
        .execute_async()
        .await?;

    assert_eq!(list.len(), 1);
    assert_eq!(list[0].first_name, "Ana");
    Ok(())
}

#[tokio::test]
#[ignore]
async fn it_pg_repository_and_interpolation() -> anyhow::Result<()> {
    let mut uow = unit_of_work().await?;
    let repo = uow.get_repository::<Employee>()?;

    let all = repo.get_all(Some("(employee_id, first_name)")).await?;
    let country = "Mex";
    let mexican: Vec<Employee> = uow
        .sql()?
        .from_sql_interpolated(&sql_interpolated!(
            "SELECT * FROM employees WHERE country_id = {}",
            country
        ))
        .await?;

    assert!(mexican.len() <= all.len());
    uow.close().await?;
    Ok(())
}
