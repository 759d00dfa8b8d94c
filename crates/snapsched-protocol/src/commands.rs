// Command names as they appear in the `command` field of a frame.

pub const STATUS: &str = "status";
pub const LIST: &str = "list";
pub const ADD: &str = "add";
pub const REMOVE: &str = "remove";
pub const RETENTION_ADD: &str = "retention add";
pub const RETENTION_REMOVE: &str = "retention remove";
pub const ACTIVATE: &str = "activate";
pub const DEACTIVATE: &str = "deactivate";

pub const ALL: &[&str] = &[
    STATUS,
    LIST,
    ADD,
    REMOVE,
    RETENTION_ADD,
    RETENTION_REMOVE,
    ACTIVATE,
    DEACTIVATE,
];
