//! Linux errno values reported (negated) in command results.

pub const EPERM: i32 = 1;
pub const ENOENT: i32 = 2;
pub const EIO: i32 = 5;
pub const EEXIST: i32 = 17;
pub const EINVAL: i32 = 22;
pub const ENOTCONN: i32 = 107;
