pub mod format;
pub mod http;
pub mod logger;
pub mod url;
