pub const BASE_URL: &str = "ws://127.0.0.1:8000/ai/stream";
pub const DEFAULT_CAPACITY: usize = 1024;

pub const AUTHORIZATION_HEADER: &str = "Authorization";
