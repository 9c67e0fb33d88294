use anyhow::Result;
use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use uuid::Uuid;
use crate::models::*;
use crate::schema::*;

pub type DbPool = Pool<AsyncPgConnection>;

/// One insert inside a catalog transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactWrite {
    PutProduct(NewProduct),
    PutStock(NewStock),
}

/// Flattens entries into product/stock write pairs, product first.
pub fn writes_for(entries: Vec<CatalogEntry>) -> Vec<TransactWrite> {
    entries
        .into_iter()
        .flat_map(|entry| {
            [
                TransactWrite::PutProduct(entry.product),
                TransactWrite::PutStock(entry.stock),
            ]
        })
        .collect()
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Applies every write in a single transaction: all of them or none.
    async fn transact_write(&self, writes: Vec<TransactWrite>) -> Result<()>;

    async fn find_product(&self, id: Uuid) -> Result<Option<ProductView>>;

    async fn list_products(&self) -> Result<Vec<ProductView>>;
}

pub struct PgCatalogStore {
    pool: DbPool,
}

impl PgCatalogStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn transact_write(&self, writes: Vec<TransactWrite>) -> Result<()> {
        let mut conn = self.pool.get().await?;

        conn.transaction::<_, anyhow::Error, _>(|conn| {
            Box::pin(async move {
                for write in writes {
                    match write {
                        TransactWrite::PutProduct(product) => {
                            diesel::insert_into(products::table)
                                .values(&product)
                                .execute(conn)
                                .await?;
                        }
                        TransactWrite::PutStock(stock) => {
                            diesel::insert_into(stocks::table)
                                .values(&stock)
                                .execute(conn)
                                .await?;
                        }
                    }
                }

                Ok(())
            })
        }).await?;

        Ok(())
    }

    async fn find_product(&self, id: Uuid) -> Result<Option<ProductView>> {
        let mut conn = self.pool.get().await?;

        let row = products::table
            .left_join(stocks::table)
            .filter(products::id.eq(id))
            .select((
                products::id,
                products::title,
                products::description,
                products::price,
                stocks::count.nullable(),
            ))
            .first::<ProductRow>(&mut conn)
            .await
            .optional()?;

        Ok(row.map(ProductView::from))
    }

    async fn list_products(&self) -> Result<Vec<ProductView>> {
        let mut conn = self.pool.get().await?;

        let rows = products::table
            .left_join(stocks::table)
            .select((
                products::id,
                products::title,
                products::description,
                products::price,
                stocks::count.nullable(),
            ))
            .order((products::title.asc(), products::id.asc()))
            .load::<ProductRow>(&mut conn)
            .await?;

        Ok(rows.into_iter().map(ProductView::from).collect())
    }
}
