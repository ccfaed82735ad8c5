use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::products::repo_types::{NewProduct, Product};

pub async fn insert<'e, E>(db: E, product_id: Uuid, p: &NewProduct) -> sqlx::Result<Product>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, Product>(
        r#"
        INSERT INTO products (product_id, name, description, price, stock_quantity, image_url, image_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING product_id, name, description, price, stock_quantity, image_url, image_key, created_at
        "#,
    )
    .bind(product_id)
    .bind(&p.name)
    .bind(&p.description)
    .bind(p.price)
    .bind(p.stock_quantity)
    .bind(&p.image_url)
    .bind(&p.image_key)
    .fetch_one(db)
    .await
}

pub async fn find_by_id<'e, E>(db: E, product_id: Uuid) -> sqlx::Result<Option<Product>>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, Product>(
        r#"
        SELECT product_id, name, description, price, stock_quantity, image_url, image_key, created_at
          FROM products
         WHERE product_id = $1
        "#,
    )
    .bind(product_id)
    .fetch_optional(db)
    .await
}

pub async fn list_all<'e, E>(db: E) -> sqlx::Result<Vec<Product>>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, Product>(
        r#"
        SELECT product_id, name, description, price, stock_quantity, image_url, image_key, created_at
          FROM products
         ORDER BY created_at ASC, product_id ASC
        "#,
    )
    .fetch_all(db)
    .await
}

/// Hard delete. Returns the removed row, `None` if there was nothing to remove.
pub async fn delete_by_id<'e, E>(db: E, product_id: Uuid) -> sqlx::Result<Option<Product>>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, Product>(
        r#"
        DELETE FROM products
         WHERE product_id = $1
        RETURNING product_id, name, description, price, stock_quantity, image_url, image_key, created_at
        "#,
    )
    .bind(product_id)
    .fetch_optional(db)
    .await
}
