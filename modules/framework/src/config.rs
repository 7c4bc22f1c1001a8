use tracing::{instrument, warn};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApplicationConfig {
    #[allow(unused)]
    pub id: i32,
    #[allow(unused)]
    pub key: String,
    pub content: serde_json::Value,
}

/// A business configuration document stored as JSON under a fixed key.
pub trait ConfigJson: Default + for<'de> serde::Deserialize<'de> + serde::Serialize {
    const KEY: &'static str;
}

#[instrument(
    skip_all,
    err,
    fields(
        config = std::any::type_name::<T>(),
        config_key = T::KEY
    )
)]
pub async fn find_config_from_db<T: ConfigJson>(
    db: impl sqlx::PgExecutor<'_>,
) -> Result<T, crate::Error> {
    let row: Option<ApplicationConfig> = sqlx::query_as(
        r#"
        SELECT id, key, content
        FROM "shop"."application_config"
        WHERE key = $1
        "#,
    )
    .bind(T::KEY)
    .fetch_optional(db)
    .await?;
    let Some(row) = row else {
        warn!("No stored config, falling back to default");
        return Ok(T::default());
    };
    Ok(serde_json::from_value(row.content)?)
}

#[instrument(
    skip(db),
    err,
    fields(
        config_key = T::KEY
    )
)]
pub async fn insert_config_into_db<T: ConfigJson + std::fmt::Debug>(
    db: impl sqlx::PgExecutor<'_>,
    config: &T,
) -> Result<(), crate::Error> {
    let content = serde_json::to_value(config)?;
    sqlx::query(
        r#"
        INSERT INTO "shop"."application_config" (key, content)
        VALUES ($1, $2)
        ON CONFLICT (key) DO UPDATE SET content = EXCLUDED.content
        "#,
    )
    .bind(T::KEY)
    .bind(content)
    .execute(db)
    .await?;
    Ok(())
}
