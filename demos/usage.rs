use std::sync::Arc;

use rquery_toolkit::{
    Crud, Entity, EntityEntry, MetadataRegistry, MultiDbConnectionFactory, Params, QueryExecutor,
    ToolkitOptions, UnitOfWork,
};
use rust_decimal::Decimal;

#[derive(Entity, Debug, Clone)]
#[table(name = "Products", schema = "dbo")]
pub struct Product {
    #[key(is_identity = true)]
    #[column(name = "Id")]
    pub id: i32,
    #[column(name = "Name", required)]
    pub name: String,
    #[column(name = "Price")]
    pub price: Decimal,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = ToolkitOptions::from_json_file("rquery.json")?;
    let factory = MultiDbConnectionFactory::new(options)?;
    let registry = Arc::new(MetadataRegistry::new());

    let mut uow = UnitOfWork::with_default_alias(&factory, registry)?;
    uow.begin_transaction().await?;

    let products = uow.get_repository::<Product>()?;
    products
        .insert(&Product {
            id: 0,
            name: "Pen".into(),
            price: Decimal::new(150, 2),
        })
        .await?;

    for mut product in products.get_all(None).await? {
        let mut entry = EntityEntry::new(&product);
        product.price *= Decimal::new(11, 1);
        entry.detect_changes(&product);
        products.update_tracked(&product, &entry).await?;
    }
    uow.commit().await?;

    let cheap: Vec<Product> = uow
        .fluent()?
        .Select(&["*"])
        .From(Product::TABLE)
        .Where("Price < @Max")
        .OrderBy(&[Product::name])
        .Params(Params::new().add("Max", 5))
        .execute_async()
        .await?;
    println!("cheap products: {}", cheap.len());

    uow.close().await?;
    Ok(())
}
