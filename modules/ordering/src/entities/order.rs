use compact_str::CompactString;
use framework::processor::Processor;
use framework::sqlx::DatabaseProcessor;
use sqlx::types::Json;
use time::PrimitiveDateTime;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub fulfillment_type: FulfillmentType,
    pub status: OrderStatus,
    pub status_history: Json<Vec<StatusHistoryEntry>>,
    pub current_location: Option<Json<CurrentLocation>>,
    pub delivery_address: Option<Json<GeoPoint>>,
    pub delivery_details: Option<Json<DeliveryDetails>>,
    pub driver_id: Option<Uuid>,

    pub pickup_location: Option<String>,
    pub pickup_instructions: Option<String>,
    pub pickup_verification_code: Option<String>,
    pub pickup_verified_by: Option<Uuid>,
    pub pickup_verified_at: Option<PrimitiveDateTime>,

    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
}

impl Order {
    pub fn history(&self) -> &[StatusHistoryEntry] {
        &self.status_history.0
    }

    pub fn last_history_timestamp(&self) -> Option<i64> {
        self.history().last().map(|entry| entry.timestamp)
    }

    pub fn location(&self) -> Option<CurrentLocation> {
        self.current_location.as_ref().map(|json| json.0)
    }

    pub fn destination(&self) -> Option<GeoPoint> {
        self.delivery_address.as_ref().map(|json| json.0)
    }

    pub fn delivery(&self) -> Option<&DeliveryDetails> {
        self.delivery_details.as_ref().map(|json| &json.0)
    }

    /// The driver currently bound to the order, if any.
    pub fn bound_driver(&self) -> Option<Uuid> {
        self.delivery()
            .map(|details| details.driver.id)
            .or(self.driver_id)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    sqlx::Type,
    serde::Serialize,
    serde::Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[sqlx(type_name = "shop.order_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    DriverAssigned,
    OutForDelivery,
    Nearby,
    Delivered,
    ReadyForPickup,
    PickedUp,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::PickedUp
        )
    }

    /// A driver holding an order in one of these states is busy with it.
    pub fn is_with_driver(self) -> bool {
        matches!(
            self,
            OrderStatus::DriverAssigned | OrderStatus::OutForDelivery | OrderStatus::Nearby
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::DriverAssigned => "driver_assigned",
            OrderStatus::OutForDelivery => "out_for_delivery",
            OrderStatus::Nearby => "nearby",
            OrderStatus::Delivered => "delivered",
            OrderStatus::ReadyForPickup => "ready_for_pickup",
            OrderStatus::PickedUp => "picked_up",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, serde::Serialize, serde::Deserialize)]
#[sqlx(type_name = "shop.fulfillment_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentType {
    Delivery,
    Pickup,
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// The last position pinged by the bound driver. Overwritten on every ping.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentLocation {
    pub lat: f64,
    pub lng: f64,
    /// unix millis
    pub last_updated: i64,
}

impl CurrentLocation {
    pub fn point(&self) -> GeoPoint {
        GeoPoint {
            lat: self.lat,
            lng: self.lng,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Customer,
    Driver,
    Staff,
    Admin,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub role: ActorRole,
}

impl Actor {
    pub fn system() -> Self {
        Self {
            id: Uuid::nil(),
            role: ActorRole::System,
        }
    }

    pub fn is_staff(&self) -> bool {
        matches!(
            self.role,
            ActorRole::Staff | ActorRole::Admin | ActorRole::System
        )
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryEntry {
    pub status: OrderStatus,
    /// unix millis, never earlier than the previous entry
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<Actor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverInfo {
    pub id: Uuid,
    pub name: CompactString,
    pub phone: Option<CompactString>,
    pub vehicle_type: Option<CompactString>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryDetails {
    pub driver: DriverInfo,
    /// unix millis
    pub estimated_delivery_time: Option<i64>,
}

/// Extra columns written atomically together with a status change.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusPatch {
    None,
    AssignDriver(DeliveryDetails),
    PickupVerified {
        by: Uuid,
        at: PrimitiveDateTime,
    },
}

macro_rules! order_columns {
    () => {
        r#"id, user_id, fulfillment_type, status, status_history, current_location,
        delivery_address, delivery_details, driver_id, pickup_location, pickup_instructions,
        pickup_verification_code, pickup_verified_by, pickup_verified_at, created_at, updated_at"#
    };
}

#[derive(Debug, Clone, Copy)]
pub struct FindOrderById {
    pub id: Uuid,
}

impl Processor<FindOrderById> for DatabaseProcessor {
    type Output = Option<Order>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:FindOrderById", err)]
    async fn process(&self, input: FindOrderById) -> Result<Option<Order>, sqlx::Error> {
        sqlx::query_as::<_, Order>(concat!(
            "SELECT ",
            order_columns!(),
            r#" FROM "shop"."order" WHERE id = $1"#
        ))
        .bind(input.id)
        .fetch_optional(self.db())
        .await
    }
}

#[derive(Debug, Clone)]
pub struct FindOrderByPickupCode {
    pub code: String,
}

impl Processor<FindOrderByPickupCode> for DatabaseProcessor {
    type Output = Option<Order>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:FindOrderByPickupCode", err)]
    async fn process(&self, input: FindOrderByPickupCode) -> Result<Option<Order>, sqlx::Error> {
        sqlx::query_as::<_, Order>(concat!(
            "SELECT ",
            order_columns!(),
            r#" FROM "shop"."order" WHERE pickup_verification_code = $1"#
        ))
        .bind(&input.code)
        .fetch_optional(self.db())
        .await
    }
}

#[derive(Debug, Clone)]
pub struct InsertOrder {
    pub id: Uuid,
    pub user_id: Uuid,
    pub fulfillment_type: FulfillmentType,
    pub initial_entry: StatusHistoryEntry,
    pub delivery_address: Option<GeoPoint>,
    pub pickup_location: Option<String>,
    pub pickup_instructions: Option<String>,
    pub pickup_verification_code: Option<String>,
}

impl Processor<InsertOrder> for DatabaseProcessor {
    /// `None` when the id or the pickup code collides with an existing order.
    type Output = Option<Order>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:InsertOrder", err)]
    async fn process(&self, input: InsertOrder) -> Result<Option<Order>, sqlx::Error> {
        sqlx::query_as::<_, Order>(concat!(
            r#"
            INSERT INTO "shop"."order" (id, user_id, fulfillment_type, status, status_history,
                delivery_address, pickup_location, pickup_instructions, pickup_verification_code)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT DO NOTHING
            RETURNING "#,
            order_columns!()
        ))
        .bind(input.id)
        .bind(input.user_id)
        .bind(input.fulfillment_type)
        .bind(input.initial_entry.status)
        .bind(Json(vec![input.initial_entry]))
        .bind(input.delivery_address.map(Json))
        .bind(input.pickup_location)
        .bind(input.pickup_instructions)
        .bind(input.pickup_verification_code)
        .fetch_optional(self.db())
        .await
    }
}

/// Optimistic status write: applies only while the stored status still equals `expected_status`.
#[derive(Debug, Clone)]
pub struct ConditionalUpdateStatus {
    pub order_id: Uuid,
    pub expected_status: OrderStatus,
    pub new_status: OrderStatus,
    pub entry: StatusHistoryEntry,
    pub patch: StatusPatch,
}

impl Processor<ConditionalUpdateStatus> for DatabaseProcessor {
    /// `None` on conflict (or when the order vanished).
    type Output = Option<Order>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:ConditionalUpdateStatus", err)]
    async fn process(&self, input: ConditionalUpdateStatus) -> Result<Option<Order>, sqlx::Error> {
        let (driver_id, delivery_details, verified_by, verified_at) = match input.patch {
            StatusPatch::None => (None, None, None, None),
            StatusPatch::AssignDriver(details) => {
                (Some(details.driver.id), Some(Json(details)), None, None)
            }
            StatusPatch::PickupVerified { by, at } => (None, None, Some(by), Some(at)),
        };
        sqlx::query_as::<_, Order>(concat!(
            r#"
            UPDATE "shop"."order"
            SET status = $3,
                status_history = status_history || $4::jsonb,
                driver_id = COALESCE($5, driver_id),
                delivery_details = COALESCE($6, delivery_details),
                pickup_verified_by = COALESCE($7, pickup_verified_by),
                pickup_verified_at = COALESCE($8, pickup_verified_at),
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING "#,
            order_columns!()
        ))
        .bind(input.order_id)
        .bind(input.expected_status)
        .bind(input.new_status)
        .bind(Json(vec![input.entry]))
        .bind(driver_id)
        .bind(delivery_details)
        .bind(verified_by)
        .bind(verified_at)
        .fetch_optional(self.db())
        .await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UpdateOrderLocation {
    pub order_id: Uuid,
    pub location: CurrentLocation,
}

impl Processor<UpdateOrderLocation> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:UpdateOrderLocation", err)]
    async fn process(&self, input: UpdateOrderLocation) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE "shop"."order"
            SET current_location = $2
            WHERE id = $1
            "#,
        )
        .bind(input.order_id)
        .bind(Json(input.location))
        .execute(self.db())
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CountDriverActiveOrders {
    pub driver_id: Uuid,
}

impl Processor<CountDriverActiveOrders> for DatabaseProcessor {
    type Output = i64;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:CountDriverActiveOrders", err)]
    async fn process(&self, input: CountDriverActiveOrders) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM "shop"."order"
            WHERE driver_id = $1
              AND status IN ('driver_assigned', 'out_for_delivery', 'nearby')
            "#,
        )
        .bind(input.driver_id)
        .fetch_one(self.db())
        .await
    }
}

/// Orders bound to a driver, most recently touched first. `active` selects the ones the driver
/// still carries, otherwise the finished ones.
#[derive(Debug, Clone, Copy)]
pub struct ListDriverOrders {
    pub driver_id: Uuid,
    pub active: bool,
    pub limit: i64,
    pub offset: i64,
}

impl ListDriverOrders {
    /// Whether `order` falls into this page's selection, ignoring paging.
    pub fn selects(&self, order: &Order) -> bool {
        order.driver_id == Some(self.driver_id) && order.status.is_with_driver() == self.active
    }
}

impl Processor<ListDriverOrders> for DatabaseProcessor {
    type Output = Vec<Order>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:ListDriverOrders", err)]
    async fn process(&self, input: ListDriverOrders) -> Result<Vec<Order>, sqlx::Error> {
        sqlx::query_as::<_, Order>(concat!(
            "SELECT ",
            order_columns!(),
            r#" FROM "shop"."order"
            WHERE driver_id = $1
              AND (status IN ('driver_assigned', 'out_for_delivery', 'nearby')) = $2
            ORDER BY updated_at DESC, id
            LIMIT $3 OFFSET $4"#
        ))
        .bind(input.driver_id)
        .bind(input.active)
        .bind(input.limit)
        .bind(input.offset)
        .fetch_all(self.db())
        .await
    }
}

/// Pickup orders not yet handed over or cancelled, oldest first.
#[derive(Debug, Clone, Copy)]
pub struct ListPendingPickups;

impl ListPendingPickups {
    pub fn selects(order: &Order) -> bool {
        order.fulfillment_type == FulfillmentType::Pickup && !order.status.is_terminal()
    }
}

impl Processor<ListPendingPickups> for DatabaseProcessor {
    type Output = Vec<Order>;
    type Error = sqlx::Error;
    #[instrument(skip_all, name = "SQL:ListPendingPickups", err)]
    async fn process(&self, _: ListPendingPickups) -> Result<Vec<Order>, sqlx::Error> {
        sqlx::query_as::<_, Order>(concat!(
            "SELECT ",
            order_columns!(),
            r#" FROM "shop"."order"
            WHERE fulfillment_type = 'pickup'
              AND status NOT IN ('picked_up', 'cancelled')
            ORDER BY created_at, id"#
        ))
        .fetch_all(self.db())
        .await
    }
}
