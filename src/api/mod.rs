pub mod routes;
pub mod handlers;
pub mod handlers_checkin;
