use crate::entities::order::{DriverInfo, GeoPoint};
use compact_str::CompactString;
use framework::processor::Processor;
use framework::sqlx::DatabaseProcessor;
use sqlx::types::Json;
use time::PrimitiveDateTime;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub phone: Option<String>,
    pub vehicle_type: Option<String>,
    pub online: bool,
    #[serde(skip)]
    pub online_since: Option<PrimitiveDateTime>,
    pub last_location: Option<Json<GeoPoint>>,
}

impl Driver {
    pub fn info(&self) -> DriverInfo {
        DriverInfo {
            id: self.id,
            name: CompactString::new(&self.name),
            phone: self.phone.as_deref().map(CompactString::new),
            vehicle_type: self.vehicle_type.as_deref().map(CompactString::new),
        }
    }

    pub fn position(&self) -> Option<GeoPoint> {
        self.last_location.as_ref().map(|json| json.0)
    }
}

macro_rules! driver_columns {
    () => {
        "id, name, phone, vehicle_type, online, online_since, last_location"
    };
}

#[derive(Debug, Clone, Copy)]
pub struct ListOnlineDrivers;

impl Processor<ListOnlineDrivers> for DatabaseProcessor {
    type Output = Vec<Driver>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:ListOnlineDrivers", err)]
    async fn process(&self, _: ListOnlineDrivers) -> Result<Vec<Driver>, sqlx::Error> {
        sqlx::query_as::<_, Driver>(concat!(
            "SELECT ",
            driver_columns!(),
            r#" FROM "shop"."driver" WHERE online ORDER BY online_since ASC NULLS LAST, id ASC"#
        ))
        .fetch_all(self.db())
        .await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FindDriverById {
    pub id: Uuid,
}

impl Processor<FindDriverById> for DatabaseProcessor {
    type Output = Option<Driver>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:FindDriverById", err)]
    async fn process(&self, input: FindDriverById) -> Result<Option<Driver>, sqlx::Error> {
        sqlx::query_as::<_, Driver>(concat!(
            "SELECT ",
            driver_columns!(),
            r#" FROM "shop"."driver" WHERE id = $1"#
        ))
        .bind(input.id)
        .fetch_optional(self.db())
        .await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SetDriverOnline {
    pub driver_id: Uuid,
    pub online: bool,
}

impl Processor<SetDriverOnline> for DatabaseProcessor {
    type Output = Option<Driver>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:SetDriverOnline", err)]
    async fn process(&self, input: SetDriverOnline) -> Result<Option<Driver>, sqlx::Error> {
        // going online keeps the original `online_since` when the driver already was online
        sqlx::query_as::<_, Driver>(concat!(
            r#"
            UPDATE "shop"."driver"
            SET online = $2,
                online_since = CASE
                    WHEN $2 AND online THEN online_since
                    WHEN $2 THEN NOW()
                    ELSE NULL
                END
            WHERE id = $1
            RETURNING "#,
            driver_columns!()
        ))
        .bind(input.driver_id)
        .bind(input.online)
        .fetch_optional(self.db())
        .await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UpdateDriverLocation {
    pub driver_id: Uuid,
    pub location: GeoPoint,
}

impl Processor<UpdateDriverLocation> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:UpdateDriverLocation", err)]
    async fn process(&self, input: UpdateDriverLocation) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE "shop"."driver"
            SET last_location = $2
            WHERE id = $1
            "#,
        )
        .bind(input.driver_id)
        .bind(Json(input.location))
        .execute(self.db())
        .await?;
        Ok(())
    }
}
