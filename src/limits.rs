/// Hard caps on engine state. Anything past these is rejected with `LimitExceeded`.
pub const MAX_ROOMS: usize = 10_000;
pub const MAX_RESERVATIONS_PER_ROOM: usize = 50_000;
pub const MAX_USERS: usize = 1_000_000;

/// Longest stay a single reservation (or listing filter) may cover.
pub const MAX_STAY_NIGHTS: i64 = 366;

pub const MAX_USERNAME_LEN: usize = 150;
pub const MAX_EMAIL_LEN: usize = 254;
/// argon2 cost grows with input; cap it so login can't be used to burn CPU.
pub const MAX_PASSWORD_LEN: usize = 1024;

/// Hex characters in an API token (20 random bytes).
pub const TOKEN_LEN: usize = 40;
