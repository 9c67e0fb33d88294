use bigdecimal::BigDecimal;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::CatalogItem;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::products)]
pub struct NewProduct {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub price: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::stocks)]
pub struct NewStock {
    pub product_id: Uuid,
    pub count: i32,
}

/// A product joined with its stock count, as served by the read API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductView {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub price: BigDecimal,
    pub count: i32,
}

pub type ProductRow = (Uuid, String, String, BigDecimal, Option<i32>);

impl From<ProductRow> for ProductView {
    fn from((id, title, description, price, count): ProductRow) -> Self {
        Self {
            id,
            title,
            description,
            price,
            count: count.unwrap_or(0),
        }
    }
}

/// The product/stock pair written together for one validated item.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub product: NewProduct,
    pub stock: NewStock,
}

impl CatalogEntry {
    pub fn new(id: Uuid, item: CatalogItem) -> Self {
        Self {
            product: NewProduct {
                id,
                title: item.title,
                description: item.description,
                price: item.price,
            },
            stock: NewStock {
                product_id: id,
                count: item.count,
            },
        }
    }

    /// Each entry is created under a freshly generated id.
    pub fn generate(item: CatalogItem) -> Self {
        Self::new(Uuid::new_v4(), item)
    }
}
