//! Message identifiers for operator-facing diagnostics.
//!
//! Every failure or notable outcome of an autoupdater run is logged exactly
//! once with a `message_id` field taken from this module, so log tooling can
//! classify runs without parsing free-form text.
//!
//! | Constant               | Emitted when                                         |
//! |------------------------|------------------------------------------------------|
//! | `INVALID_ARGS`         | command-line arguments could not be parsed           |
//! | `CONFIGURATION_ERROR`  | configuration missing/invalid, stamp dir unavailable |
//! | `DAEMON_ERROR`         | daemon reported an error or could not be reached     |
//! | `STAMP_ERROR`          | schedule stamp file could not be read or written     |
//! | `SUCCESS`              | the run completed all configured steps               |
//! | `NOT_ONLINE`           | no network connectivity                              |
//! | `METERED_CONNECTION`   | metered connection and updates on it are disallowed  |
//! | `NOT_TIME`             | update interval has not elapsed yet                  |

pub const INVALID_ARGS: &str = "4f1c0e5a9d2b47d8b36a0c71e2f9a1d3";
pub const CONFIGURATION_ERROR: &str = "8b2e6d3c1a0f4e9b97c5d4a3b2e1f0c9";
pub const DAEMON_ERROR: &str = "c3a9e7b15d2f4c6a8e0b9d7f3a1c5e2b";
pub const STAMP_ERROR: &str = "1e7d3b9f5a2c4e8d90b6f4a2c8e1d7b3";
pub const SUCCESS: &str = "6a4f2c8e0b9d4a7c83e5f1b9d2a6c4e0";
pub const NOT_ONLINE: &str = "b5d1f9a37c2e4b0d96a8c4e2f7b3d1a9";
pub const METERED_CONNECTION: &str = "2d8a6c4e1f3b4d9a87c0e6b2d4f8a1c5";
pub const NOT_TIME: &str = "e9c7a5b3d1f24e6a80c4b2d9f7e5a3c1";
