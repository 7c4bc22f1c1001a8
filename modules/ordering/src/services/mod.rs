use crate::config::FulfillmentConfig;
use crate::services::dispatch::DispatchAssigner;
use crate::services::intake::OrderIntake;
use crate::services::location_channel::LocationChannel;
use crate::services::pickup_verification::PickupVerification;
use crate::services::status_machine::StatusMachine;
use crate::services::tracking::TrackingService;
use crate::store::FulfillmentStore;

pub mod dispatch;
pub mod intake;
pub mod location_channel;
pub mod pickup_verification;
pub mod status_machine;
pub mod tracking;

/// All fulfillment services wired to one store and one set of rooms.
#[derive(Clone)]
pub struct FulfillmentServices<S> {
    pub store: S,
    pub channel: LocationChannel<S>,
    pub machine: StatusMachine<S>,
    pub dispatch: DispatchAssigner<S>,
    pub pickup: PickupVerification<S>,
    pub tracking: TrackingService<S>,
    pub intake: OrderIntake<S>,
}

impl<S: FulfillmentStore + Clone> FulfillmentServices<S> {
    pub fn new(store: S, config: FulfillmentConfig) -> Self {
        let channel = LocationChannel::new(store.clone(), config.tracking.clone());
        let machine = StatusMachine::new(store.clone(), channel.clone());
        let dispatch = DispatchAssigner::new(
            store.clone(),
            machine.clone(),
            config.dispatch.clone(),
            config.tracking.clone(),
        );
        let pickup = PickupVerification::new(store.clone(), machine.clone());
        let tracking = TrackingService::new(
            store.clone(),
            channel.clone(),
            machine.clone(),
            config.tracking.clone(),
        );
        let intake = OrderIntake::new(store.clone(), channel.clone(), config.pickup);
        Self {
            store,
            channel,
            machine,
            dispatch,
            pickup,
            tracking,
            intake,
        }
    }
}
