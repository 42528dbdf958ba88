//! Path segments of the daemon control API.
//! Full paths are `/{API_PREFIX}/{PORTALS_SEGMENT}/...`.

/// API version prefix
pub const API_PREFIX: &str = "v1";

/// Portal collection; `GET` lists, `POST` creates.
/// `GET`, `PUT` and `DELETE` on `/v1/portals/{id}` address one portal.
pub const PORTALS_SEGMENT: &str = "portals";

/// `GET /v1/portals/hash`, hex SHA-256 of the listing
pub const HASH_SEGMENT: &str = "hash";

/// `POST /v1/portals/{id}/invites`
pub const INVITES_SEGMENT: &str = "invites";
