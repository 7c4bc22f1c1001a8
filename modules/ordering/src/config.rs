use framework::config::ConfigJson;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TrackingConfig {
    /// Flat speed used for the linear ETA
    pub average_speed_kmh: f64,
    /// Distance to the destination under which an order out for delivery becomes `nearby`
    pub nearby_radius_meters: f64,
    /// Empty rooms are torn down after this long without members
    pub room_idle_timeout: time::Duration,
    /// Per-subscriber queue length; messages to a full queue are dropped
    pub subscriber_buffer: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            average_speed_kmh: 30.0,
            nearby_radius_meters: 500.0,
            room_idle_timeout: time::Duration::minutes(30),
            subscriber_buffer: 64,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DispatchConfig {
    /// How long a reserved driver stays blocked for other dispatches
    pub reservation_ttl: time::Duration,
    pub max_active_orders_per_driver: i64,
    /// Used when either the driver position or the destination is unknown
    pub fallback_delivery_estimate: time::Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            reservation_ttl: time::Duration::seconds(15),
            max_active_orders_per_driver: 1,
            fallback_delivery_estimate: time::Duration::minutes(45),
        }
    }
}

impl DispatchConfig {
    pub fn reservation_ttl_std(&self) -> std::time::Duration {
        self.reservation_ttl
            .try_into()
            .unwrap_or(std::time::Duration::from_secs(15))
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PickupConfig {
    pub code_prefix: String,
}

impl Default for PickupConfig {
    fn default() -> Self {
        Self {
            code_prefix: "PICK".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct FulfillmentConfig {
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub pickup: PickupConfig,
}

impl ConfigJson for FulfillmentConfig {
    const KEY: &'static str = "fulfillment_config";
}
