//! HTTP front door for notification requests.
//!
//! - `GET    /health`
//! - `POST   /api/notifications`
//! - `GET    /api/notifications?namespace=&phase=`
//! - `GET    /api/notifications/{namespace}/{name}`
//! - `DELETE /api/notifications/{namespace}/{name}`

pub mod routes;
pub mod state;
