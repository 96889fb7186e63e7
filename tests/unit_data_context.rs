mod common;

use std::sync::Arc;

use common::{product_row, FakeConnection, Product};
use rquery_toolkit::{Crud, DataContext, DataError, MetadataRegistry, Params};
use rust_decimal::Decimal;

fn context(conn: &Arc<FakeConnection>) -> DataContext {
    DataContext::from_connection(conn.clone(), Arc::new(MetadataRegistry::new()))
}

#[tokio::test]
async fn repositories_sql_and_procedures_share_the_transaction() {
    let conn = FakeConnection::new();
    let mut ctx = context(&conn);

    ctx.begin_transaction().await.unwrap();
    assert!(ctx.in_transaction());
    ctx.repository::<Product>()
        .unwrap()
        .insert(&Product {
            id: 0,
            name: "Pen".into(),
            price: Decimal::ONE,
        })
        .await
        .unwrap();
    ctx.sql()
        .unwrap()
        .execute("UPDATE Product SET Price = @P", Params::new().add("P", 2))
        .await
        .unwrap();
    ctx.stored_procedures()
        .unwrap()
        .execute_data_set("dbo.Recalculate", Params::new())
        .await
        .unwrap();
    ctx.commit().await.unwrap();

    let commands = conn.commands();
    assert_eq!(commands.len(), 3);
    assert!(commands.iter().all(|c| c.transaction == commands[0].transaction));
    assert!(commands[0].transaction.is_some());
    assert_eq!(conn.events(), ["open", "begin", "commit"]);
}

#[tokio::test]
async fn fluent_queries_run_on_the_context_connection() {
    let conn = FakeConnection::new();
    conn.push_rows(vec![product_row(1, "Pen", Decimal::ONE)]);
    let ctx = context(&conn);

    let products: Vec<Product> = ctx
        .query()
        .unwrap()
        .Select(&["*"])
        .From("Product")
        .execute_async()
        .await
        .unwrap();

    assert_eq!(products.len(), 1);
    assert_eq!(conn.last_command().text, "SELECT * FROM Product");
}

#[tokio::test]
async fn close_rolls_back_and_ends_the_context() {
    let conn = FakeConnection::new();
    let mut ctx = context(&conn);

    ctx.begin_transaction().await.unwrap();
    ctx.close().await.unwrap();

    assert_eq!(conn.events(), ["open", "begin", "rollback", "close"]);
    assert!(matches!(ctx.sql(), Err(DataError::State(_))));
    assert!(matches!(
        ctx.repository::<Product>(),
        Err(DataError::State(_))
    ));
    assert!(ctx.unit_of_work().is_closed());
}
