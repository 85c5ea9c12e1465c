/// Max length of any caller-supplied id (group, resource, requester).
pub const MAX_ID_LEN: usize = 128;

/// Max length of a group or resource display name.
pub const MAX_NAME_LEN: usize = 256;

/// Max length of one request line on the wire.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Max releases held for retry. Beyond this, failures are only logged and counted.
pub const MAX_DEAD_LETTERS: usize = 10_000;

/// Max clubs returned by one search.
pub const MAX_SEARCH_GROUPS: usize = 50;

/// Max resources one connection may watch at once.
pub const MAX_WATCHES: usize = 64;

/// Max attempts for one compensating release, including the first.
pub const MAX_RELEASE_ATTEMPTS: u32 = 20;

/// Max concurrent client connections.
pub const MAX_CONNECTIONS: usize = 100_000;
