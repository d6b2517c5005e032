// Routing is segregated per resource; each module assembles the Router for
// its slice of the /api/v1 surface. Authorization is declared on the handler
// signatures (AuthUser and the role-guard extractors), not here.

pub mod auth;
pub mod properties;
pub mod reviews;
pub mod users;
