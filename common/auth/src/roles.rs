pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_USER: &str = "user";
pub const ROLE_SYSTEM_PXE: &str = "system-pxe";
pub const ROLE_SYSTEM_COMPUTE: &str = "system-compute";
pub const ROLE_WLM: &str = "wlm";
