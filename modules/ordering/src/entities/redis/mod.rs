pub mod driver_reservation;
