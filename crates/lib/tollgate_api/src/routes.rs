//! Route paths.

pub const GET_HEALTH: &str = "/health";
pub const POST_LOGIN: &str = "/login";
pub const POST_REGISTER: &str = "/register";
pub const POST_REFRESH_TOKEN: &str = "/refresh-token";
pub const POST_LOGOUT: &str = "/logout";
pub const GET_ME: &str = "/me";
pub const POST_AUTHORIZE: &str = "/authorize";
